//! Common types and utilities for the Kratos self-healing core
//!
//! This crate provides the shared vocabulary used across all components:
//! incident, prediction and remediation types, the error enum, configuration
//! structures and component-health reporting.

pub mod config;
pub mod error;
pub mod health;
pub mod types;

pub use config::{KnowledgeConfig, KratosConfig, RemediationConfig, SafetyConfig};
pub use error::{Error, Result};
pub use health::{ComponentHealth, HealthLevel};
pub use types::*;
