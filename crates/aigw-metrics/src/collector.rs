// Copyright 2025 AIGW Authors
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

use crate::registry::{MetricsConfig, MetricsRegistry};
use crate::snapshot::{GatewayInfo, MetricsSnapshot};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector for the gateway dispatcher.
///
/// Tracks per-route (`capability/action`) call statistics with latency
/// percentiles, plus per-instance request distribution so load-balancer
/// behavior is observable.
///
/// # Example
///
/// ```
/// use aigw_metrics::GatewayMetricsCollector;
/// use std::time::Instant;
///
/// let collector = GatewayMetricsCollector::new();
///
/// let start = Instant::now();
/// // ... forward the request ...
/// collector.record_instance_request("127.0.0.1:7511");
/// collector.record_dispatch("resume", "parse", start, true);
///
/// let snapshot = collector.snapshot();
/// assert_eq!(snapshot.total_requests, 1);
/// ```
pub struct GatewayMetricsCollector {
    registry: Arc<MetricsRegistry>,
}

impl GatewayMetricsCollector {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Controls map bounds; see [`MetricsConfig`].
    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            registry: Arc::new(MetricsRegistry::with_config(config)),
        }
    }

    /// Shares a pre-built registry; useful in tests.
    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    /// Records one completed dispatch with its outcome and latency.
    ///
    /// Call after every dispatch completes, successful or not. Rejections
    /// that never reached a backend (validation, admission, no instances)
    /// count as failures on the route.
    pub fn record_dispatch(&self, capability: &str, action: &str, start: Instant, success: bool) {
        let latency_us = start.elapsed().as_micros() as u64;
        let route = format!("{}/{}", capability, action);
        self.registry.record_dispatch(&route, latency_us, success);
    }

    /// Records that a request was forwarded to `addr`.
    pub fn record_instance_request(&self, addr: &str) {
        self.registry.record_instance_request(addr);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }

    pub fn info(&self) -> GatewayInfo {
        GatewayInfo::new(self.registry.uptime_ms())
    }
}

impl Default for GatewayMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
