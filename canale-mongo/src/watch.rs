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

//! Per-collection replication loop.
//!
//! [`Client::watch_collection`] runs the resume/consume state machine for one
//! watched collection:
//!
//! 1. read the latest committed cursor from the resume collection
//! 2. open a change stream resumed after that cursor
//! 3. for each publishable event, in order: invoke the handler, then commit
//!    the event's cursor
//! 4. on any publish or commit failure, drop the stream and start over from
//!    the last committed cursor
//!
//! Publish and commit are strictly serialised; the loop never has more than
//! one un-committed event outstanding. An `invalidate` event ends the loop
//! for good: the watched collection no longer exists.

use bson::{doc, Bson, Document};
use canale_core::event::{ChangeMessage, OperationType};
use canale_core::metrics;
use futures::StreamExt;
use mongodb::change_stream::event::ResumeToken;
use mongodb::error::ErrorKind;
use mongodb::options::{
    ChangeStreamOptions, FindOneOptions, FullDocumentBeforeChangeType, FullDocumentType,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::client::{Client, SourceError};

/// Delay before retrying a failed cursor read, so a source outage does not
/// spin the outer loop.
const CURSOR_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Error type returned by the injected per-event handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Per-event callback invoked exactly once per publishable event.
///
/// The handler must return `Ok(())` only once the sink has durably accepted
/// the message; the adapter commits the event's cursor right after.
pub type ChangeEventHandler = Box<
    dyn Fn(ChangeMessage) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>
        + Send
        + Sync,
>;

/// Options for [`Client::watch_collection`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Database of the watched collection
    pub db_name: String,

    /// Watched collection
    pub coll_name: String,

    /// Database of the resume cursor collection
    pub tokens_db_name: String,

    /// Resume cursor collection
    pub tokens_coll_name: String,

    /// Whether the resume cursor collection is capped
    pub tokens_coll_capped: bool,

    /// Destination stream name; events go to `<stream>.<operation>`
    pub stream_name: String,
}

/// One persisted resume cursor. A record is appended per published event;
/// capped collections evict old ones automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ResumeTokenRecord {
    pub value: String,
}

impl Client {
    /// Watches a collection and republishes its change events until the
    /// shutdown signal fires or the stream is invalidated.
    ///
    /// # Errors
    ///
    /// Returns an error when a persisted cursor cannot be decoded, the
    /// change stream cannot be opened, or an event cannot be serialised.
    /// Transient source and sink failures are handled internally by
    /// reopening the stream from the last committed cursor.
    pub async fn watch_collection(
        &self,
        opts: &WatchOptions,
        handler: ChangeEventHandler,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), SourceError> {
        let tokens_coll = self
            .inner
            .database(&opts.tokens_db_name)
            .collection::<ResumeTokenRecord>(&opts.tokens_coll_name);
        let watched_coll = self
            .inner
            .database(&opts.db_name)
            .collection::<Document>(&opts.coll_name);

        let mut resume = true;
        let mut first_open = true;

        while resume {
            // Latest committed cursor. Absence means "start from now"; a
            // record that no longer decodes is fatal, a transport failure
            // is retried.
            let find_opts = FindOneOptions::builder()
                .sort(resume_token_sort(opts.tokens_coll_capped))
                .build();

            let last_token = match tokens_coll.find_one(doc! {}).with_options(find_opts).await {
                Ok(record) => record,
                Err(source) if matches!(source.kind.as_ref(), ErrorKind::BsonDeserialization(_)) => {
                    return Err(SourceError::CursorDecode {
                        db: opts.tokens_db_name.clone(),
                        coll: opts.tokens_coll_name.clone(),
                        source,
                    });
                }
                Err(error) => {
                    warn!(
                        db = %opts.tokens_db_name,
                        coll = %opts.tokens_coll_name,
                        %error,
                        "could not fetch resume token, retrying"
                    );
                    tokio::time::sleep(CURSOR_RETRY_DELAY).await;
                    if shutdown_requested(&mut shutdown) {
                        break;
                    }
                    continue;
                }
            };

            let mut stream_opts = ChangeStreamOptions::default();
            stream_opts.full_document = Some(FullDocumentType::UpdateLookup);
            stream_opts.full_document_before_change = Some(FullDocumentBeforeChangeType::WhenAvailable);

            if let Some(record) = &last_token {
                debug!(token = %record.value, "resuming after token");
                stream_opts.resume_after = Some(decode_resume_token(&record.value)?);
            }

            let mut stream = watched_coll
                .watch()
                .with_options(stream_opts)
                .await
                .map_err(|source| SourceError::OpenStream {
                    db: opts.db_name.clone(),
                    coll: opts.coll_name.clone(),
                    source,
                })?;

            if first_open {
                first_open = false;
            } else {
                metrics::increment_stream_reopens(&opts.coll_name);
            }
            info!(db = %opts.db_name, coll = %opts.coll_name, "watching mongodb collection");

            // Drain events in arrival order, one in flight at a time.
            loop {
                let next = tokio::select! {
                    _ = shutdown.recv() => {
                        resume = false;
                        break;
                    }
                    next = stream.next() => next,
                };

                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(error)) => {
                        // Recoverable: the next iteration reopens the stream
                        // from the last committed cursor.
                        warn!(coll = %opts.coll_name, %error, "change stream error");
                        break;
                    }
                    None => {
                        warn!(coll = %opts.coll_name, "change stream ended");
                        break;
                    }
                };

                let mut event_doc = bson::to_document(&event)?;
                let token = token_of(&event_doc)
                    .ok_or(SourceError::MissingCursorToken)?
                    .to_owned();
                let operation =
                    OperationType::parse(event_doc.get_str("operationType").unwrap_or_default());

                // Fields the source omitted must stay absent in the
                // republished event.
                strip_nulls(&mut event_doc);

                let payload = Bson::Document(event_doc).into_relaxed_extjson();
                debug!(change_event = %payload, "received change event");

                if !operation.is_publishable() {
                    if operation.is_invalidate() {
                        info!(
                            db = %opts.db_name,
                            coll = %opts.coll_name,
                            "change stream invalidated, stopping watcher"
                        );
                        resume = false;
                        break;
                    }
                    metrics::increment_events_skipped(&opts.coll_name, operation.as_str());
                    continue;
                }

                let message = ChangeMessage::new(
                    operation.subject(&opts.stream_name),
                    token.clone(),
                    payload.to_string().into_bytes(),
                );
                let subject = message.subject.clone();

                let started = Instant::now();
                if let Err(error) = handler(message).await {
                    // Current event not published; its token is not stored,
                    // so the next stream resumes after the previous one.
                    error!(%subject, %error, "could not publish change event");
                    metrics::increment_publish_errors(&opts.coll_name);
                    break;
                }
                metrics::record_publish_duration(started.elapsed().as_secs_f64(), &opts.coll_name);
                metrics::increment_events_published(&opts.coll_name, operation.as_str());

                if let Err(error) = tokens_coll
                    .insert_one(&ResumeTokenRecord { value: token })
                    .await
                {
                    // Event published but the token insert failed: the next
                    // stream resumes after the previous token and redelivers
                    // this event with the same message id, which consumers
                    // deduplicate.
                    error!(coll = %opts.coll_name, %error, "could not insert resume token");
                    metrics::increment_cursor_commit_errors(&opts.coll_name);
                    break;
                }
                metrics::increment_cursor_commits(&opts.coll_name);
            }

            // Dropping the cursor releases it server-side even while the
            // shutdown signal is set.
            drop(stream);
            info!(db = %opts.db_name, coll = %opts.coll_name, "stopped watching mongodb collection");

            if resume && shutdown_requested(&mut shutdown) {
                resume = false;
            }
        }

        Ok(())
    }
}

/// Sort order selecting the most recent resume record: capped collections
/// preserve insertion order, uncapped ones are ordered by `_id`.
fn resume_token_sort(capped: bool) -> Document {
    if capped {
        doc! { "$natural": -1 }
    } else {
        doc! { "_id": -1 }
    }
}

/// Rebuilds a change stream cursor from a stored `_data` value.
fn decode_resume_token(value: &str) -> Result<ResumeToken, SourceError> {
    let bytes = bson::to_vec(&doc! { "_data": value }).map_err(|e| SourceError::TokenRebuild {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    bson::from_slice(&bytes).map_err(|e| SourceError::TokenRebuild {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Extracts the cursor token at the event's well-known `_id._data` path.
fn token_of(event: &Document) -> Option<&str> {
    event.get_document("_id").ok()?.get_str("_data").ok()
}

/// Removes top-level nulls so absent optional fields do not surface in the
/// serialised event.
fn strip_nulls(event: &mut Document) {
    let nulls: Vec<String> = event
        .iter()
        .filter(|(_, value)| matches!(value, Bson::Null))
        .map(|(key, _)| key.clone())
        .collect();
    for key in nulls {
        event.remove(&key);
    }
}

/// Non-blocking check for a pending shutdown signal.
fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        shutdown.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_token_sort_capped_uses_natural_order() {
        assert_eq!(resume_token_sort(true), doc! { "$natural": -1 });
    }

    #[test]
    fn test_resume_token_sort_uncapped_uses_id() {
        assert_eq!(resume_token_sort(false), doc! { "_id": -1 });
    }

    #[test]
    fn test_decode_resume_token_accepts_stored_value() {
        let token = decode_resume_token("8264BEB9F3000000012B0229296E04").unwrap();
        let doc = bson::to_document(&token).unwrap();
        assert_eq!(doc.get_str("_data").unwrap(), "8264BEB9F3000000012B0229296E04");
    }

    #[test]
    fn test_token_of_reads_the_well_known_path() {
        let event = doc! {
            "_id": { "_data": "8264BEB9F3000000012B0229296E04" },
            "operationType": "insert",
            "fullDocument": { "message": "hi" },
        };
        assert_eq!(token_of(&event), Some("8264BEB9F3000000012B0229296E04"));
    }

    #[test]
    fn test_token_of_missing_id_or_data() {
        assert_eq!(token_of(&doc! { "operationType": "insert" }), None);
        assert_eq!(token_of(&doc! { "_id": {} }), None);
        assert_eq!(token_of(&doc! { "_id": "plain" }), None);
    }

    #[test]
    fn test_strip_nulls_drops_only_null_fields() {
        let mut event = doc! {
            "_id": { "_data": "abc" },
            "operationType": "delete",
            "fullDocument": Bson::Null,
            "documentKey": { "_id": 1 },
        };
        strip_nulls(&mut event);

        assert!(!event.contains_key("fullDocument"));
        assert!(event.contains_key("documentKey"));
        assert!(event.contains_key("operationType"));
    }

    #[test]
    fn test_resume_token_record_roundtrip() {
        let record = ResumeTokenRecord {
            value: "8264BEB9F3000000012B0229296E04".to_string(),
        };

        let doc = bson::to_document(&record).unwrap();
        assert_eq!(doc.get_str("value").unwrap(), record.value);

        let back: ResumeTokenRecord = bson::from_document(doc).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_payload_rendering_keeps_event_shape() {
        let event = doc! {
            "_id": { "_data": "abc" },
            "operationType": "insert",
            "fullDocument": { "message": "hi" },
        };
        let json = Bson::Document(event).into_relaxed_extjson().to_string();

        assert!(json.contains(r#""operationType":"insert""#));
        assert!(json.contains(r#""message":"hi""#));
        assert!(json.contains(r#""_data":"abc""#));
    }
}
