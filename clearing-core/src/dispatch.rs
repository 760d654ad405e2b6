//! External ledger dispatch
//!
//! After a cycle commits as closed, its final net positions are pushed
//! synchronously to the external accounting system. The trait seam lets
//! tests swap the HTTP client for a recording mock.

use crate::config::DispatchConfig;
use crate::error::{ClearingError, Result};
use crate::types::{Cycle, NetPositionRecord, Position};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

/// Outbound payload for the accounting system
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerPushRequest {
    /// Business sequence number of the closed cycle
    pub cycle_id: i64,

    /// Final net position per participant
    pub positions: Vec<NetPositionRecord>,
}

impl LedgerPushRequest {
    /// Build the payload from a closed cycle and its final positions
    pub fn new(cycle: &Cycle, positions: &[Position]) -> Self {
        Self {
            cycle_id: cycle.sequence,
            positions: positions.iter().map(NetPositionRecord::from).collect(),
        }
    }
}

/// Seam to the external accounting system
#[async_trait]
pub trait LedgerDispatcher: Send + Sync {
    /// Push the final positions of a closed cycle. An error here means
    /// the downstream did not acknowledge the balances.
    async fn push(&self, cycle: &Cycle, positions: &[Position]) -> Result<()>;
}

/// HTTP dispatcher against the accounting system's ingest endpoint
pub struct HttpLedgerDispatcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerDispatcher {
    /// Build the dispatcher with a bounded request timeout so a hung
    /// downstream cannot hold the closure sequence indefinitely
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ClearingError::Internal(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.accounting_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LedgerDispatcher for HttpLedgerDispatcher {
    async fn push(&self, cycle: &Cycle, positions: &[Position]) -> Result<()> {
        let url = format!("{}/api/v1/ledger/compensar", self.base_url);
        let request = LedgerPushRequest::new(cycle, positions);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClearingError::DispatchFailed(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            error!(
                "Ledger rejected positions for cycle {}: HTTP {}",
                cycle.sequence, status
            );
            return Err(ClearingError::DispatchFailed(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        info!(
            "Pushed {} net positions for cycle {} to ledger",
            positions.len(),
            cycle.sequence
        );
        Ok(())
    }
}

/// Recording dispatcher for tests: captures every push and can be told
/// to fail.
pub struct MockLedgerDispatcher {
    pushes: parking_lot::Mutex<Vec<LedgerPushRequest>>,
    fail: std::sync::atomic::AtomicBool,
    delay: parking_lot::Mutex<Option<Duration>>,
}

impl MockLedgerDispatcher {
    /// Create an empty recording dispatcher
    pub fn new() -> Self {
        Self {
            pushes: parking_lot::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
            delay: parking_lot::Mutex::new(None),
        }
    }

    /// Make subsequent pushes fail with `DispatchFailed`
    pub fn set_failing(&self, failing: bool) {
        self.fail
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make subsequent pushes sleep first, like a real network call
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Requests recorded so far
    pub fn recorded(&self) -> Vec<LedgerPushRequest> {
        self.pushes.lock().clone()
    }
}

impl Default for MockLedgerDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerDispatcher for MockLedgerDispatcher {
    async fn push(&self, cycle: &Cycle, positions: &[Position]) -> Result<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ClearingError::DispatchFailed(
                "mock dispatcher configured to fail".to_string(),
            ));
        }
        self.pushes.lock().push(LedgerPushRequest::new(cycle, positions));
        Ok(())
    }
}
