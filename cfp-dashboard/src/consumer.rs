//! Consumer state machine
//!
//! Folds broadcast payloads into the state a rendering layer needs: the most
//! recent prediction, a bounded history of probabilities and a status that
//! distinguishes "live", "no new data", "no data" and "disconnected".
//!
//! Every decodable message on the topic is recorded. Correlation only decides
//! whether the tick currently being waited for was answered.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};
use uuid::Uuid;

use cfp_common::types::DEFAULT_WINDOW_SIZE;
use cfp_common::BroadcastMessage;

// ========================================
// History Window
// ========================================

/// FIFO of the last `capacity` probabilities
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting and returning the oldest value when full
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.values.len() == self.capacity {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Oldest first
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

// ========================================
// Consumer
// ========================================

/// What the rendering layer should show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerStatus {
    /// Nothing to show yet, or the source is empty
    #[default]
    NoData,
    /// Last awaited result arrived
    Live,
    /// Last awaited result did not arrive in time; showing previous state
    NoNewData,
    /// Subscription lost; showing stale state while reconnecting
    Disconnected,
}

/// Message and loss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerCounters {
    /// Messages decoded and recorded
    pub received: u64,
    /// Payloads that failed to decode
    pub malformed: u64,
    /// Messages the broker dropped because we fell behind
    pub lost: u64,
    /// Awaited results that never arrived
    pub timeouts: u64,
}

/// Result of feeding one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Recorded; `matched` when it answered the awaited request
    Recorded { matched: bool },
    /// Undecodable; skipped
    Malformed,
}

#[derive(Debug, Clone)]
pub struct Consumer {
    window: HistoryWindow,
    current: Option<BroadcastMessage>,
    status: ConsumerStatus,
    awaiting: Option<Uuid>,
    counters: ConsumerCounters,
}

impl Consumer {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: HistoryWindow::new(window_size),
            current: None,
            status: ConsumerStatus::NoData,
            awaiting: None,
            counters: ConsumerCounters::default(),
        }
    }

    pub fn window(&self) -> &HistoryWindow {
        &self.window
    }

    pub fn current(&self) -> Option<&BroadcastMessage> {
        self.current.as_ref()
    }

    pub fn status(&self) -> ConsumerStatus {
        self.status
    }

    pub fn counters(&self) -> ConsumerCounters {
        self.counters
    }

    /// Request id whose broadcast has not arrived yet
    pub fn awaiting(&self) -> Option<Uuid> {
        self.awaiting
    }

    /// A tick sent `request_id`; start waiting for its broadcast
    ///
    /// A still-pending earlier request counts as timed out.
    pub fn expect(&mut self, request_id: Uuid) {
        if self.awaiting.is_some() {
            self.on_timeout();
        }
        self.awaiting = Some(request_id);
    }

    /// Feed one raw payload from the subscription
    pub fn on_payload(&mut self, payload: &str) -> Delivery {
        let message = match BroadcastMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                self.counters.malformed += 1;
                warn!(error = %e, "Skipping malformed broadcast payload");
                return Delivery::Malformed;
            }
        };

        let matched = message.request_id.is_some() && message.request_id == self.awaiting;
        if matched {
            self.awaiting = None;
        }

        self.window.push(message.failure_probability);
        self.counters.received += 1;
        debug!(
            request_id = ?message.request_id,
            probability = message.failure_probability,
            matched,
            "Prediction recorded"
        );
        self.current = Some(message);

        // A message for someone else's request does not answer ours
        if matched || self.awaiting.is_none() {
            self.status = ConsumerStatus::Live;
        }

        Delivery::Recorded { matched }
    }

    /// Broker reported `dropped` messages lost to buffer overflow
    pub fn on_lagged(&mut self, dropped: u64) {
        self.counters.lost += dropped;
        warn!(dropped, total = self.counters.lost, "Predictions lost to slow consumption");
    }

    /// Awaited broadcast did not arrive in time; current and history stay as they are
    pub fn on_timeout(&mut self) {
        if let Some(request_id) = self.awaiting.take() {
            self.counters.timeouts += 1;
            self.status = ConsumerStatus::NoNewData;
            debug!(%request_id, "No broadcast for request before deadline");
        }
    }

    /// Tick found nothing to send
    pub fn on_empty_source(&mut self) {
        self.awaiting = None;
        self.status = ConsumerStatus::NoData;
    }

    pub fn on_disconnected(&mut self) {
        self.status = ConsumerStatus::Disconnected;
    }

    pub fn on_reconnected(&mut self) {
        self.status = if self.current.is_some() {
            ConsumerStatus::Live
        } else {
            ConsumerStatus::NoData
        };
    }
}

impl Default for Consumer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfp_common::{FeatureVector, ScoreResult};

    fn payload(request_id: Uuid, probability: f64) -> String {
        ScoreResult {
            request_id,
            seq: None,
            features: FeatureVector::new(0.1, 0.2, 0, 1),
            probability,
        }
        .to_message()
        .encode()
        .unwrap()
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut w = HistoryWindow::new(3);
        assert_eq!(w.push(0.1), None);
        assert_eq!(w.push(0.2), None);
        assert_eq!(w.push(0.3), None);
        assert_eq!(w.push(0.4), Some(0.1));
        assert_eq!(w.to_vec(), vec![0.2, 0.3, 0.4]);
        assert_eq!(w.len(), 3);
        assert_eq!(w.latest(), Some(0.4));
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut w = HistoryWindow::new(50);
        for i in 0..500 {
            w.push(i as f64 / 500.0);
            assert!(w.len() <= 50);
        }
        assert_eq!(w.to_vec().first().copied(), Some(450.0 / 500.0));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut w = HistoryWindow::new(0);
        w.push(0.5);
        w.push(0.6);
        assert_eq!(w.to_vec(), vec![0.6]);
    }

    #[test]
    fn test_matching_message_goes_live() {
        let mut c = Consumer::new(5);
        assert_eq!(c.status(), ConsumerStatus::NoData);

        let id = Uuid::new_v4();
        c.expect(id);
        assert_eq!(c.on_payload(&payload(id, 0.7)), Delivery::Recorded { matched: true });
        assert_eq!(c.status(), ConsumerStatus::Live);
        assert_eq!(c.awaiting(), None);
        assert_eq!(c.current().unwrap().failure_probability, 0.7);
        assert_eq!(c.window().to_vec(), vec![0.7]);
    }

    #[test]
    fn test_timeout_keeps_current_and_history() {
        let mut c = Consumer::new(5);
        let first = Uuid::new_v4();
        c.expect(first);
        c.on_payload(&payload(first, 0.3));
        let before_current = c.current().cloned();
        let before_window = c.window().clone();

        c.expect(Uuid::new_v4());
        c.on_timeout();

        assert_eq!(c.status(), ConsumerStatus::NoNewData);
        assert_eq!(c.current().cloned(), before_current);
        assert_eq!(c.window(), &before_window);
        assert_eq!(c.counters().timeouts, 1);
    }

    #[test]
    fn test_timeout_without_pending_request_is_noop() {
        let mut c = Consumer::new(5);
        c.on_timeout();
        assert_eq!(c.status(), ConsumerStatus::NoData);
        assert_eq!(c.counters().timeouts, 0);
    }

    #[test]
    fn test_malformed_payload_skipped() {
        let mut c = Consumer::new(5);
        let id = Uuid::new_v4();
        c.expect(id);

        assert_eq!(c.on_payload("not json"), Delivery::Malformed);
        assert_eq!(
            c.on_payload(r#"{"data":{},"failure_probability":0.5}"#),
            Delivery::Malformed
        );
        assert_eq!(c.counters().malformed, 2);
        assert!(c.window().is_empty());
        assert_eq!(c.awaiting(), Some(id));

        c.on_payload(&payload(id, 0.9));
        assert_eq!(c.window().to_vec(), vec![0.9]);
    }

    #[test]
    fn test_foreign_message_recorded_but_does_not_answer() {
        let mut c = Consumer::new(5);
        let ours = Uuid::new_v4();
        c.expect(ours);

        assert_eq!(
            c.on_payload(&payload(Uuid::new_v4(), 0.4)),
            Delivery::Recorded { matched: false }
        );
        assert_eq!(c.awaiting(), Some(ours));
        assert_eq!(c.window().len(), 1);
        assert_eq!(c.status(), ConsumerStatus::NoData);
    }

    #[test]
    fn test_uncorrelated_legacy_message_recorded() {
        let mut c = Consumer::new(5);
        let legacy = r#"{"data":{"cpu_request":0.1,"memory_request":0.2,"priority":0,"scheduling_class":1},"failure_probability":0.15}"#;
        assert_eq!(c.on_payload(legacy), Delivery::Recorded { matched: false });
        assert_eq!(c.status(), ConsumerStatus::Live);
    }

    #[test]
    fn test_second_expect_times_out_first() {
        let mut c = Consumer::new(5);
        c.expect(Uuid::new_v4());
        c.expect(Uuid::new_v4());
        assert_eq!(c.counters().timeouts, 1);
        assert_eq!(c.status(), ConsumerStatus::NoNewData);
    }

    #[test]
    fn test_lag_and_connection_status() {
        let mut c = Consumer::new(5);
        c.on_lagged(3);
        c.on_lagged(2);
        assert_eq!(c.counters().lost, 5);

        c.on_disconnected();
        assert_eq!(c.status(), ConsumerStatus::Disconnected);
        c.on_reconnected();
        assert_eq!(c.status(), ConsumerStatus::NoData);

        c.on_payload(&payload(Uuid::new_v4(), 0.5));
        c.on_disconnected();
        c.on_reconnected();
        assert_eq!(c.status(), ConsumerStatus::Live);
    }

    #[test]
    fn test_empty_source_status() {
        let mut c = Consumer::new(5);
        c.on_payload(&payload(Uuid::new_v4(), 0.5));
        c.on_empty_source();
        assert_eq!(c.status(), ConsumerStatus::NoData);
        // History is kept for display
        assert_eq!(c.window().len(), 1);
    }
}
