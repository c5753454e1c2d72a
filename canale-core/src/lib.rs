//! Canale Core - shared types for the MongoDB → NATS change-data-capture bridge
//!
//! This crate provides the foundational pieces used by the source adapter, the
//! sink adapter and the connector binary:
//!
//! - **Events**: [`event`] module defines the change-stream operation taxonomy
//!   and the published-message triple (subject, message id, payload)
//! - **Monitoring**: [`monitor`] module defines the named health-probe
//!   capability reported on `/healthz`
//! - **Metrics**: [`metrics`] module defines the instrumentation helpers used
//!   by the replication loops
//!
//! # Example
//!
//! ```rust
//! use canale_core::event::OperationType;
//!
//! let op = OperationType::parse("insert");
//! assert!(op.is_publishable());
//! assert_eq!(op.as_str(), "insert");
//! ```

pub mod event;
pub mod metrics;
pub mod monitor;

pub use event::{ChangeMessage, OperationType};
pub use monitor::NamedMonitor;
