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

//! MongoDB connection and collection management.

use async_trait::async_trait;
use bson::doc;
use canale_core::monitor::{MonitorError, NamedMonitor};
use mongodb::options::{ClientOptions, CreateCollectionOptions};
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_NAME: &str = "mongo";

/// Errors produced by the source adapter.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not parse the URI or reach the server
    #[error("could not connect to mongodb: {0}")]
    Connect(#[source] mongodb::error::Error),

    /// Could not list existing collections
    #[error("could not list mongodb collections in {db}: {source}")]
    ListCollections {
        db: String,
        #[source]
        source: mongodb::error::Error,
    },

    /// Could not create a collection
    #[error("could not create mongodb collection {db}.{coll}: {source}")]
    CreateCollection {
        db: String,
        coll: String,
        #[source]
        source: mongodb::error::Error,
    },

    /// A persisted resume cursor exists but cannot be decoded
    #[error("could not decode resume token in {db}.{coll}: {source}")]
    CursorDecode {
        db: String,
        coll: String,
        #[source]
        source: mongodb::error::Error,
    },

    /// A stored token value does not convert back into a stream cursor
    #[error("could not rebuild change stream cursor from token {value}: {reason}")]
    TokenRebuild { value: String, reason: String },

    /// Could not open the change stream
    #[error("could not open change stream on {db}.{coll}: {source}")]
    OpenStream {
        db: String,
        coll: String,
        #[source]
        source: mongodb::error::Error,
    },

    /// A received change event does not serialise
    #[error("could not serialise change event: {0}")]
    Serialize(#[from] bson::ser::Error),

    /// A received change event carries no cursor token
    #[error("change event carries no cursor token at _id._data")]
    MissingCursorToken,
}

/// Options for [`Client::ensure_collection`].
#[derive(Debug, Clone, Default)]
pub struct EnsureCollectionOptions {
    pub db_name: String,
    pub coll_name: String,

    /// Create the collection as a fixed-size ring
    pub capped: bool,

    /// Ring size, required when `capped` is set
    pub size_in_bytes: u64,

    /// Ask the server to capture pre/post-images for change streams
    pub change_stream_pre_and_post_images: bool,
}

/// A MongoDB client shared by every replication loop.
///
/// The underlying driver handle is a connection pool and is safe to use from
/// any task.
pub struct Client {
    name: String,
    pub(crate) inner: mongodb::Client,
}

impl Client {
    /// Connects to MongoDB and verifies the URI.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connect`] when the URI is invalid or the
    /// initial handshake fails.
    pub async fn connect(uri: &str) -> Result<Self, SourceError> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(SourceError::Connect)?;
        let hosts = options.hosts.clone();

        let inner = mongodb::Client::with_options(options).map_err(SourceError::Connect)?;

        info!(hosts = ?hosts, "connected to mongodb");
        Ok(Self {
            name: DEFAULT_NAME.to_string(),
            inner,
        })
    }

    /// Idempotently creates a collection with the requested parameters.
    ///
    /// Pre/post-image capture is best effort: servers older than 6.0 reject
    /// the `collMod`, which is logged and ignored; the change stream still
    /// works, only pre-images will be absent.
    pub async fn ensure_collection(&self, opts: &EnsureCollectionOptions) -> Result<(), SourceError> {
        let db = self.inner.database(&opts.db_name);

        let existing = db
            .list_collection_names()
            .filter(doc! { "name": &opts.coll_name })
            .await
            .map_err(|source| SourceError::ListCollections {
                db: opts.db_name.clone(),
                source,
            })?;

        if existing.is_empty() {
            let mut create = CreateCollectionOptions::default();
            if opts.capped {
                create.capped = Some(true);
                create.size = Some(opts.size_in_bytes);
            }

            db.create_collection(&opts.coll_name)
                .with_options(create)
                .await
                .map_err(|source| SourceError::CreateCollection {
                    db: opts.db_name.clone(),
                    coll: opts.coll_name.clone(),
                    source,
                })?;

            debug!(db = %opts.db_name, coll = %opts.coll_name, "created mongodb collection");
        }

        if opts.change_stream_pre_and_post_images {
            let enable = doc! {
                "collMod": &opts.coll_name,
                "changeStreamPreAndPostImages": { "enabled": true },
            };
            if let Err(error) = db.run_command(enable).await {
                warn!(
                    coll = %opts.coll_name,
                    %error,
                    "could not enable changeStreamPreAndPostImages, is your MongoDB version at least 6.0?"
                );
            }
        }

        Ok(())
    }

    /// Closes the underlying connection pool. Idempotent.
    pub async fn close(&self) {
        self.inner.clone().shutdown().await;
        info!("mongodb client closed");
    }
}

#[async_trait]
impl NamedMonitor for Client {
    fn name(&self) -> &str {
        &self.name
    }

    async fn monitor(&self) -> Result<(), MonitorError> {
        self.inner
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| MonitorError::new(format!("could not reach mongodb: {e}")))
    }
}
