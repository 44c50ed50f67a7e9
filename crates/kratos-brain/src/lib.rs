//! Central intelligence hub for the Kratos self-healing core
//!
//! The brain owns one instance of every component, runs the observation and
//! prediction loops, and dispatches incidents and predictions through the
//! remediation pipeline under the configured autonomy mode.

pub mod brain;

pub use brain::{
    BrainStatus, ClusterObservation, ClusterSource, ClusterState, KratosBrain, KratosMode,
    MetricsSource, StaticClusterSource, StaticMetricsSource,
};
