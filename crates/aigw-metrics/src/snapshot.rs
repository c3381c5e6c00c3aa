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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Gateway identity and uptime, surfaced on the monitoring endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub version: String,
    pub uptime_ms: u64,
}

impl GatewayInfo {
    pub fn new(uptime_ms: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms,
        }
    }
}

/// Metrics for one dispatch route (`capability/action`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteMetrics {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_us: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
}

/// Forwarding stats for one backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceMetrics {
    pub addr: String,
    pub request_count: u64,
    pub last_request_ms: u64,
}

impl InstanceMetrics {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            request_count: 0,
            last_request_ms: 0,
        }
    }
}

/// Complete metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub uptime_ms: u64,
    pub routes: HashMap<String, RouteMetrics>,
    pub instances: HashMap<String, InstanceMetrics>,
}
