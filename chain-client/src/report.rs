//! Client outcome summary

use crate::CrossShardTracker;
use chain_core::{ClientId, Timestamp, TxId, TxReceipt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Broadcast-to-confirmation latency of completed transfers, in seconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: u64,
    pub total_secs: u64,
    pub max_secs: Option<u64>,
    pub max_tx: Option<TxId>,
    pub min_secs: Option<u64>,
    pub min_tx: Option<TxId>,
    /// Earliest broadcast of any tracked transfer
    pub first_broadcast: Option<Timestamp>,
    /// Latest confirmation of any completed transfer
    pub last_confirm: Option<Timestamp>,
}

impl LatencyStats {
    pub fn observe_broadcast(&mut self, broadcast_time: Timestamp) {
        self.first_broadcast = Some(
            self.first_broadcast
                .map_or(broadcast_time, |first| first.min(broadcast_time)),
        );
    }

    /// Record a completed transfer
    pub fn record(&mut self, tx_id: TxId, broadcast_time: Timestamp, confirm_time: Timestamp) {
        let latency = confirm_time.saturating_sub(broadcast_time);
        self.observe_broadcast(broadcast_time);
        self.samples += 1;
        self.total_secs = self.total_secs.saturating_add(latency);
        if self.max_secs.map_or(true, |max| latency > max) {
            self.max_secs = Some(latency);
            self.max_tx = Some(tx_id);
        }
        if self.min_secs.map_or(true, |min| latency < min) {
            self.min_secs = Some(latency);
            self.min_tx = Some(tx_id);
        }
        self.last_confirm = Some(self.last_confirm.map_or(confirm_time, |last| last.max(confirm_time)));
    }

    pub fn average_secs(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.total_secs as f64 / self.samples as f64)
    }

    /// Seconds from the first broadcast to the last confirmation
    pub fn span_secs(&self) -> Option<u64> {
        match (self.first_broadcast, self.last_confirm) {
            (Some(first), Some(last)) => Some(last.saturating_sub(first)),
            _ => None,
        }
    }

    pub fn merge(&mut self, other: &LatencyStats) {
        self.samples += other.samples;
        self.total_secs = self.total_secs.saturating_add(other.total_secs);
        if let Some(max) = other.max_secs {
            if self.max_secs.map_or(true, |mine| max > mine) {
                self.max_secs = Some(max);
                self.max_tx = other.max_tx;
            }
        }
        if let Some(min) = other.min_secs {
            if self.min_secs.map_or(true, |mine| min < mine) {
                self.min_secs = Some(min);
                self.min_tx = other.min_tx;
            }
        }
        if let Some(first) = other.first_broadcast {
            self.observe_broadcast(first);
        }
        if let Some(last) = other.last_confirm {
            self.last_confirm = Some(self.last_confirm.map_or(last, |mine| mine.max(last)));
        }
    }
}

/// What a client observed over a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub client_id: ClientId,
    pub generated: usize,
    pub injected: usize,
    pub receipts: u64,
    /// Receipts per final status, keyed by the status name
    pub statuses: BTreeMap<String, u64>,
    pub completed: usize,
    pub rolled_back: usize,
    pub failed: usize,
    pub in_flight: usize,
    pub inconsistencies: u64,
    pub latency: LatencyStats,
    /// Completed transfers per second between first broadcast and last confirmation
    pub throughput: f64,
    /// Rolled back share of the transfers that completed or rolled back
    pub rollback_rate: f64,
}

impl OutcomeReport {
    pub fn new(client_id: ClientId, generated: usize) -> Self {
        Self {
            client_id,
            generated,
            ..Self::default()
        }
    }

    pub fn record_receipt(&mut self, receipt: &TxReceipt) {
        self.receipts += 1;
        *self
            .statuses
            .entry(receipt.status.as_str().to_string())
            .or_default() += 1;
    }

    /// Refresh the transfer counters from the tracker
    pub fn update_from(&mut self, tracker: &CrossShardTracker) {
        self.completed = tracker.completed();
        self.rolled_back = tracker.rolled_back();
        self.failed = tracker.failed();
        self.in_flight = tracker.in_flight();
        self.inconsistencies = tracker.inconsistencies();
        self.latency = tracker.latency().clone();
        self.refresh_rates();
    }

    pub fn status_count(&self, status: &str) -> u64 {
        self.statuses.get(status).copied().unwrap_or_default()
    }

    /// Fold another client's report into this one
    pub fn merge(&mut self, other: &OutcomeReport) {
        self.generated += other.generated;
        self.injected += other.injected;
        self.receipts += other.receipts;
        for (status, count) in &other.statuses {
            *self.statuses.entry(status.clone()).or_default() += count;
        }
        self.completed += other.completed;
        self.rolled_back += other.rolled_back;
        self.failed += other.failed;
        self.in_flight += other.in_flight;
        self.inconsistencies += other.inconsistencies;
        self.latency.merge(&other.latency);
        self.refresh_rates();
    }

    fn refresh_rates(&mut self) {
        let settled = self.completed + self.rolled_back;
        self.rollback_rate = if settled == 0 {
            0.0
        } else {
            self.rolled_back as f64 / settled as f64
        };
        // confirmations are stamped in whole seconds
        self.throughput = match self.latency.span_secs() {
            Some(span) if self.completed > 0 => self.completed as f64 / span.max(1) as f64,
            _ => 0.0,
        };
    }
}
