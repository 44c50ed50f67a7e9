//! Knowledge base for the Kratos self-healing core
//!
//! Learns from every incident: an append-only incident log with similarity
//! indexes, automatic pattern induction over recurring fingerprints, and
//! per-(kind, action) outcome statistics that rank future recommendations.

pub mod fingerprint;
pub mod persistence;
pub mod store;

pub use fingerprint::{normalize_message, IncidentFingerprint};
pub use store::{default_actions_for, KnowledgeBase, KnowledgeStats, PatternSummary};
