//! Data Transfer Objects
//!
//! Response types for the health endpoints.

use serde::Serialize;

use crate::websocket::HubStats;

/// Readiness probe body
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// "ok" or "error"
    pub status: String,
    /// Store backend name, e.g. "sqlite"
    pub storage: String,
}

/// Hub statistics with process metadata
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub hub: HubStats,
    pub uptime_seconds: u64,
    pub version: String,
}
