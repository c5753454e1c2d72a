// Copyright 2025 Canale Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! NATS JetStream connection, stream management and publishing.

use async_nats::header::NATS_MESSAGE_ID;
use async_nats::jetstream::{self, stream::StorageType};
use async_nats::HeaderMap;
use async_trait::async_trait;
use canale_core::event::ChangeMessage;
use canale_core::monitor::{MonitorError, NamedMonitor};
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_NAME: &str = "nats";
const CONNECTION_NAME: &str = "canale-connector";

/// Errors produced by the sink adapter.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Could not establish the initial connection
    #[error("could not connect to nats: {0}")]
    Connect(#[source] async_nats::ConnectError),

    /// Could not create the destination stream
    #[error("could not add nats stream {stream}: {source}")]
    CreateStream {
        stream: String,
        #[source]
        source: async_nats::jetstream::context::CreateStreamError,
    },

    /// The sink did not durably accept a message
    #[error("could not publish message to {subject}: {source}")]
    Publish {
        subject: String,
        #[source]
        source: async_nats::jetstream::context::PublishError,
    },
}

/// A NATS client shared by every replication loop.
pub struct Client {
    name: String,
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl Client {
    /// Connects to NATS and initialises the JetStream context.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Connect`] when the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        let client = async_nats::ConnectOptions::new()
            .name(CONNECTION_NAME)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => warn!("disconnected from nats"),
                    async_nats::Event::Connected => info!("reconnected to nats"),
                    async_nats::Event::Closed => info!("nats connection closed"),
                    other => debug!(event = %other, "nats connection event"),
                }
            })
            .connect(url)
            .await
            .map_err(SinkError::Connect)?;

        let jetstream = jetstream::new(client.clone());

        info!("connected to nats");
        Ok(Self {
            name: DEFAULT_NAME.to_string(),
            client,
            jetstream,
        })
    }

    /// Idempotently creates the durable stream carrying `<name>.*` subjects.
    pub async fn ensure_stream(&self, name: &str) -> Result<(), SinkError> {
        if self.jetstream.get_stream(name).await.is_ok() {
            debug!(stream = %name, "nats stream exists");
            return Ok(());
        }

        self.jetstream
            .create_stream(stream_config(name))
            .await
            .map_err(|source| SinkError::CreateStream {
                stream: name.to_string(),
                source,
            })?;

        debug!(stream = %name, "added nats stream");
        Ok(())
    }

    /// Publishes one message, using its id as the de-duplication key.
    ///
    /// Returns only once JetStream has acknowledged the message, so a
    /// successful return means the message is durably stored.
    pub async fn publish(&self, message: ChangeMessage) -> Result<(), SinkError> {
        let headers = message_headers(&message.id);
        let subject = message.subject;

        let ack = self
            .jetstream
            .publish_with_headers(subject.clone(), headers, message.payload.into())
            .await
            .map_err(|source| SinkError::Publish {
                subject: subject.clone(),
                source,
            })?;

        ack.await.map_err(|source| SinkError::Publish {
            subject: subject.clone(),
            source,
        })?;

        debug!(subject = %subject, msg_id = %message.id, "published message");
        Ok(())
    }

    /// Flushes buffered writes and drops the connection. Idempotent.
    pub async fn close(&self) {
        if let Err(error) = self.client.flush().await {
            warn!(%error, "could not flush nats connection");
        }
        info!("nats client closed");
    }
}

#[async_trait]
impl NamedMonitor for Client {
    fn name(&self) -> &str {
        &self.name
    }

    async fn monitor(&self) -> Result<(), MonitorError> {
        match self.client.connection_state() {
            async_nats::connection::State::Connected => Ok(()),
            state => Err(MonitorError::new(format!(
                "could not reach nats: connection {state}"
            ))),
        }
    }
}

/// Configuration of a destination stream: durable on disk, carrying every
/// `<name>.*` subject.
fn stream_config(name: &str) -> jetstream::stream::Config {
    jetstream::stream::Config {
        name: name.to_string(),
        subjects: vec![format!("{name}.*")],
        storage: StorageType::File,
        ..Default::default()
    }
}

/// Headers for a published message; the id doubles as the de-dup key.
fn message_headers(id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(NATS_MESSAGE_ID, id);
    headers
}
