//! Durable storage for the knowledge base
//!
//! Incidents land in an append-only `incidents.jsonl`; the full pattern set
//! is rewritten to `patterns.json` on every change. Pattern rewrites go
//! through a temp file and rename so a crash mid-write never leaves a
//! truncated document behind.

use chrono::{DateTime, Utc};
use kratos_common::{
    Error, Incident, IncidentSeverity, IncidentType, KubernetesResource, Pattern, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const INCIDENTS_FILE: &str = "incidents.jsonl";
const PATTERNS_FILE: &str = "patterns.json";

/// The on-disk shape of one incident log line
#[derive(Debug, Serialize, Deserialize)]
struct IncidentRecord {
    id: String,
    #[serde(rename = "type")]
    kind: IncidentType,
    severity: IncidentSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<ResourceRecord>,
    message: String,
    #[serde(default)]
    details: HashMap<String, serde_json::Value>,
    occurred_at: DateTime<Utc>,
    detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root_cause: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResourceRecord {
    kind: String,
    name: String,
    namespace: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

impl From<&Incident> for IncidentRecord {
    fn from(incident: &Incident) -> Self {
        IncidentRecord {
            id: incident.id.clone(),
            kind: incident.kind,
            severity: incident.severity,
            resource: incident.resource.as_ref().map(|r| ResourceRecord {
                kind: r.kind.clone(),
                name: r.name.clone(),
                namespace: r.namespace.clone(),
                labels: r.labels.clone(),
            }),
            message: incident.message.clone(),
            details: incident.details.clone(),
            occurred_at: incident.occurred_at,
            detected_at: incident.detected_at,
            resolved_at: incident.resolved_at,
            root_cause: incident.root_cause.clone(),
            tags: incident.tags.clone(),
        }
    }
}

impl From<IncidentRecord> for Incident {
    fn from(record: IncidentRecord) -> Self {
        Incident {
            id: record.id,
            kind: record.kind,
            severity: record.severity,
            resource: record.resource.map(|r| {
                KubernetesResource::new(r.kind, r.name, r.namespace).with_labels(r.labels)
            }),
            message: record.message,
            details: record.details,
            metrics_snapshot: None,
            occurred_at: record.occurred_at,
            detected_at: record.detected_at,
            resolved_at: record.resolved_at,
            root_cause: record.root_cause,
            related_incidents: Vec::new(),
            tags: record.tags,
        }
    }
}

/// Knowledge store persistence, serialized behind one writer lock
pub struct Persistence {
    root: PathBuf,
    io: Mutex<()>,
}

impl Persistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Persistence {
            root: root.into(),
            io: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-read the incident log and pattern document into memory.
    ///
    /// Malformed log lines are skipped with a warning; an unreadable pattern
    /// document is treated as empty. Returns the loaded incidents/patterns.
    pub fn load(&self) -> (Vec<Incident>, Vec<Pattern>) {
        let mut incidents = Vec::new();
        let incidents_path = self.root.join(INCIDENTS_FILE);
        if incidents_path.exists() {
            match fs::File::open(&incidents_path) {
                Ok(file) => {
                    for (line_no, line) in BufReader::new(file).lines().enumerate() {
                        let line = match line {
                            Ok(line) => line,
                            Err(e) => {
                                warn!("Failed to read incident log line {}: {}", line_no + 1, e);
                                continue;
                            }
                        };
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<IncidentRecord>(&line) {
                            Ok(record) => incidents.push(record.into()),
                            Err(e) => {
                                warn!("Skipping malformed incident at line {}: {}", line_no + 1, e)
                            }
                        }
                    }
                }
                Err(e) => warn!("Failed to open incident log: {}", e),
            }
        }

        let mut patterns = Vec::new();
        let patterns_path = self.root.join(PATTERNS_FILE);
        if patterns_path.exists() {
            match fs::read_to_string(&patterns_path) {
                Ok(raw) => match serde_json::from_str::<Vec<Pattern>>(&raw) {
                    Ok(loaded) => patterns = loaded,
                    Err(e) => warn!("Skipping unreadable pattern document: {}", e),
                },
                Err(e) => warn!("Failed to read pattern document: {}", e),
            }
        }

        info!(
            "Loaded {} incidents, {} patterns from {}",
            incidents.len(),
            patterns.len(),
            self.root.display()
        );
        (incidents, patterns)
    }

    /// Append one incident to the durable log, creating the directory on
    /// first write
    pub fn append_incident(&self, incident: &Incident) -> Result<()> {
        let _guard = self.io.lock();
        fs::create_dir_all(&self.root)?;

        let record = IncidentRecord::from(incident);
        let line = serde_json::to_string(&record)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(INCIDENTS_FILE))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Rewrite the full pattern document atomically (temp file + rename)
    pub fn save_patterns(&self, patterns: &[Pattern]) -> Result<()> {
        let _guard = self.io.lock();
        fs::create_dir_all(&self.root)?;

        let raw = serde_json::to_string_pretty(patterns)?;
        let tmp_path = self.root.join(format!("{PATTERNS_FILE}.tmp"));
        fs::write(&tmp_path, raw.as_bytes())?;
        fs::rename(&tmp_path, self.root.join(PATTERNS_FILE))
            .map_err(|e| Error::Knowledge(format!("Failed to publish pattern document: {e}")))?;
        Ok(())
    }
}
