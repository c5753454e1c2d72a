//! MongoDB source adapter for the canale CDC bridge.
//!
//! This crate owns everything MongoDB-specific: connection management,
//! idempotent collection creation (including best-effort enablement of
//! change-stream pre/post-images), and the per-collection replication loop
//! that couples a resumable change stream to the publish-then-commit policy.
//!
//! The replication loop is deliberately callback-driven: the caller injects a
//! per-event handler and the adapter commits the event's cursor token to the
//! resume collection only after the handler reports success. That keeps the
//! at-least-once contract in a single place.
//!
//! # Example
//!
//! ```rust,no_run
//! use canale_mongo::{ChangeEventHandler, Client, HandlerError, WatchOptions};
//! use std::future::Future;
//! use std::pin::Pin;
//! use tokio::sync::broadcast;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect("mongodb://localhost:27017").await?;
//! let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//! let opts = WatchOptions {
//!     db_name: "test-connector".into(),
//!     coll_name: "coll1".into(),
//!     tokens_db_name: "resume-tokens".into(),
//!     tokens_coll_name: "coll1".into(),
//!     tokens_coll_capped: true,
//!     stream_name: "COLL1".into(),
//! };
//!
//! let handler: ChangeEventHandler = Box::new(|msg| {
//!     Box::pin(async move {
//!         println!("{} {}", msg.subject, msg.id);
//!         Ok(())
//!     }) as Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>
//! });
//!
//! client.watch_collection(&opts, handler, shutdown_rx).await?;
//! # drop(shutdown_tx);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod watch;

pub use client::{Client, EnsureCollectionOptions, SourceError};
pub use watch::{ChangeEventHandler, HandlerError, WatchOptions};
