//! NATS JetStream sink adapter for the canale CDC bridge.
//!
//! Ensures the destination streams exist and publishes one message per
//! publishable change event. The message id header carries the event's
//! cursor token so JetStream's de-duplication window and downstream
//! consumers can suppress redelivered events.

pub mod client;

pub use client::{Client, SinkError};
