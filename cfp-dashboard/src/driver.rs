//! Stream driver
//!
//! Walks a feature source one record per tick and sends each record to the
//! inference endpoint. The driver owns no timer: its session calls `tick()` on
//! the cadence while the driver is running.
//!
//! ```text
//!            start()               stop()
//!   Idle ─────────────► Running ───────────► Stopped
//!    ▲                   │  ▲                  │
//!    └───────────────────┘  └──────────────────┘
//!     one-shot source          start()
//!     exhausted
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cfp_common::{PredictRequest, SourceMode};

use crate::predictor::Predictor;
use crate::source::FeatureSource;

/// Lifecycle state of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    /// Never started, or a one-shot source ran out
    #[default]
    Idle,
    Running,
    Stopped,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Driver is not running; nothing happened
    NotRunning,
    /// Source has no records; no call was made
    Empty,
    /// Source length could not be read; no call was made and the position
    /// stays put, since there is no known record to step past
    SourceUnavailable { error: String },
    /// Record was scored; its broadcast should carry `request_id`
    Scored {
        request_id: Uuid,
        seq: u64,
        position: usize,
        probability: f64,
    },
    /// Reading or scoring the record failed; the position still advanced
    Failed {
        seq: u64,
        position: usize,
        error: String,
    },
}

/// Paces records from a source into the inference endpoint
pub struct StreamDriver {
    source: Arc<dyn FeatureSource>,
    predictor: Arc<dyn Predictor>,
    state: DriverState,
    position: usize,
    next_seq: u64,
}

impl StreamDriver {
    pub fn new(source: Arc<dyn FeatureSource>, predictor: Arc<dyn Predictor>) -> Self {
        Self {
            source,
            predictor,
            state: DriverState::Idle,
            position: 0,
            next_seq: 0,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == DriverState::Running
    }

    /// Index of the next record to send
    pub fn position(&self) -> usize {
        self.position
    }

    /// Sequence number the next request will carry
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn mode(&self) -> SourceMode {
        self.source.mode()
    }

    pub fn source(&self) -> &Arc<dyn FeatureSource> {
        &self.source
    }

    /// Begin streaming. Returns `false` if already running.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        info!(
            source = %self.source.describe(),
            mode = %self.mode(),
            position = self.position,
            "Stream started"
        );
        self.state = DriverState::Running;
        true
    }

    /// Halt streaming. Returns `false` if not running.
    ///
    /// One-shot sources rewind to the first record; cyclic sources keep their
    /// place.
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.state = DriverState::Stopped;
        if self.mode() == SourceMode::OneShot {
            self.position = 0;
        }
        info!(position = self.position, "Stream stopped");
        true
    }

    /// Swap the source. Only allowed while not running; the position rewinds.
    pub fn set_source(&mut self, source: Arc<dyn FeatureSource>) -> bool {
        if self.is_running() {
            return false;
        }
        info!(source = %source.describe(), mode = %source.mode(), "Source selected");
        self.source = source;
        self.position = 0;
        self.state = DriverState::Idle;
        true
    }

    /// Send the record at the current position and advance
    ///
    /// Errors never escape: a failed read or call is logged and reported as
    /// `TickOutcome::Failed`, and the position moves on regardless. A source
    /// whose length cannot be read sends nothing and consumes no `seq`.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.is_running() {
            return TickOutcome::NotRunning;
        }

        let len = match self.source.len().await {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "Source unreadable; tick skipped");
                return TickOutcome::SourceUnavailable {
                    error: e.to_string(),
                };
            }
        };

        if len == 0 {
            debug!("Source is empty; no data to send");
            return TickOutcome::Empty;
        }

        // Only reachable if the source shrank underneath us
        if self.position >= len {
            self.position = 0;
        }

        let position = self.position;
        let seq = self.take_seq();
        let request_id = Uuid::new_v4();

        let outcome = match self.source.get(position).await {
            Ok(Some(features)) => {
                let request = PredictRequest::new(features, request_id, seq);
                match self.predictor.predict(&request).await {
                    Ok(response) => TickOutcome::Scored {
                        request_id,
                        seq,
                        position,
                        probability: response.failure_probability,
                    },
                    Err(e) => {
                        warn!(position, seq, error = %e, "Inference call failed; tick skipped");
                        TickOutcome::Failed {
                            seq,
                            position,
                            error: e.to_string(),
                        }
                    }
                }
            }
            Ok(None) => TickOutcome::Failed {
                seq,
                position,
                error: format!("no record at position {}", position),
            },
            Err(e) => {
                warn!(position, seq, error = %e, "Unreadable record; tick skipped");
                TickOutcome::Failed {
                    seq,
                    position,
                    error: e.to_string(),
                }
            }
        };

        self.advance(len);
        outcome
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn advance(&mut self, len: usize) {
        self.position += 1;
        if self.position < len {
            return;
        }
        self.position = 0;
        if self.mode() == SourceMode::OneShot {
            self.state = DriverState::Idle;
            info!(records = len, "Source exhausted; stream finished");
        }
    }
}
