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

//! Named health probes.
//!
//! The operational surface reports the liveness of each external dependency.
//! Both adapters implement [`NamedMonitor`]; the health handler iterates over
//! a dynamic set of probes and maps a successful `monitor()` call to `UP` and
//! a failed one to `DOWN`.

use async_trait::async_trait;
use thiserror::Error;

/// A dependency became unreachable.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MonitorError(String);

impl MonitorError {
    /// Creates a new error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Capability implemented by components whose liveness is reported on the
/// health endpoint.
///
/// `monitor` must be cheap and safe to call from any task; it must never
/// block event consumption.
#[async_trait]
pub trait NamedMonitor: Send + Sync {
    /// The component name shown in the health response.
    fn name(&self) -> &str;

    /// Returns `Ok(())` when the dependency is reachable.
    async fn monitor(&self) -> Result<(), MonitorError>;
}
