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

//! Metrics instrumentation for the replication loops.
//!
//! Uses the `metrics` facade so any exporter can be installed; the connector
//! binary installs the Prometheus recorder and mounts its rendering on
//! `/metrics`.
//!
//! # Naming
//!
//! All metrics follow Prometheus conventions: `canale_` prefix, `_total`
//! suffix on counters, unit suffix on histograms. Labels are limited to low
//! cardinality values:
//!
//! - **collection**: watched collection name
//! - **operation**: `insert`, `update`, `replace`, `delete`
//!
//! Never label with document ids, tokens or full error messages.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Total number of change events published to the sink.
///
/// Type: Counter
/// Labels: collection, operation
const EVENTS_PUBLISHED_TOTAL: &str = "canale_events_published_total";

/// Total number of change events skipped because their operation is not
/// publishable.
///
/// Type: Counter
/// Labels: collection, operation
const EVENTS_SKIPPED_TOTAL: &str = "canale_events_skipped_total";

/// Total number of failed publish attempts.
///
/// Type: Counter
/// Labels: collection
const PUBLISH_ERRORS_TOTAL: &str = "canale_publish_errors_total";

/// Total number of resume cursors committed after a successful publish.
///
/// Type: Counter
/// Labels: collection
const CURSOR_COMMITS_TOTAL: &str = "canale_cursor_commits_total";

/// Total number of failed cursor commits.
///
/// Type: Counter
/// Labels: collection
const CURSOR_COMMIT_ERRORS_TOTAL: &str = "canale_cursor_commit_errors_total";

/// Total number of times a change stream was reopened from the last
/// committed cursor.
///
/// Type: Counter
/// Labels: collection
const STREAM_REOPENS_TOTAL: &str = "canale_stream_reopens_total";

/// Number of collections currently being watched.
///
/// Type: Gauge
const ACTIVE_WATCHERS: &str = "canale_active_watchers";

/// Time taken for a single publish, including the sink's durable ack.
///
/// Type: Histogram
/// Labels: collection
/// Unit: seconds
const PUBLISH_DURATION_SECONDS: &str = "canale_publish_duration_seconds";

/// Registers metric descriptions with the installed recorder.
///
/// Call once at startup, before any loop records a value.
pub fn init_metrics() {
    describe_counter!(
        EVENTS_PUBLISHED_TOTAL,
        "Total number of change events published to the sink"
    );

    describe_counter!(
        EVENTS_SKIPPED_TOTAL,
        "Total number of change events skipped because the operation is not publishable"
    );

    describe_counter!(
        PUBLISH_ERRORS_TOTAL,
        "Total number of failed publish attempts"
    );

    describe_counter!(
        CURSOR_COMMITS_TOTAL,
        "Total number of resume cursors committed after a successful publish"
    );

    describe_counter!(
        CURSOR_COMMIT_ERRORS_TOTAL,
        "Total number of failed resume cursor commits"
    );

    describe_counter!(
        STREAM_REOPENS_TOTAL,
        "Total number of change stream reopens from the last committed cursor"
    );

    describe_gauge!(
        ACTIVE_WATCHERS,
        metrics::Unit::Count,
        "Number of collections currently being watched"
    );

    describe_histogram!(
        PUBLISH_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken for a single publish including the sink's durable ack"
    );
}

/// Increments the count of published events.
pub fn increment_events_published(collection: &str, operation: &str) {
    counter!(EVENTS_PUBLISHED_TOTAL, "collection" => collection.to_string(), "operation" => operation.to_string())
        .increment(1);
}

/// Increments the count of skipped events.
pub fn increment_events_skipped(collection: &str, operation: &str) {
    counter!(EVENTS_SKIPPED_TOTAL, "collection" => collection.to_string(), "operation" => operation.to_string())
        .increment(1);
}

/// Increments the count of failed publishes.
pub fn increment_publish_errors(collection: &str) {
    counter!(PUBLISH_ERRORS_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Increments the count of committed resume cursors.
pub fn increment_cursor_commits(collection: &str) {
    counter!(CURSOR_COMMITS_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Increments the count of failed cursor commits.
pub fn increment_cursor_commit_errors(collection: &str) {
    counter!(CURSOR_COMMIT_ERRORS_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Increments the count of change stream reopens.
pub fn increment_stream_reopens(collection: &str) {
    counter!(STREAM_REOPENS_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Sets the number of active watchers.
pub fn set_active_watchers(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!(ACTIVE_WATCHERS).set(count as f64);
}

/// Records the duration of a single publish.
pub fn record_publish_duration(seconds: f64, collection: &str) {
    histogram!(PUBLISH_DURATION_SECONDS, "collection" => collection.to_string()).record(seconds);
}
