//! Streaming session
//!
//! One session = one stream driver + one consumer, owned by a single tokio task.
//! The task serializes everything that touches that state:
//! - control commands from the HTTP surface (mpsc, replies over oneshot)
//! - the tick cadence (only while the driver is running)
//! - inbound broadcast messages
//! - the deadline for the awaited broadcast
//! - the resubscribe backoff after the subscription drops
//! - cancellation
//!
//! Readers never lock anything: each change is published as a `SessionSnapshot`
//! on a `watch` channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cfp_common::bus::{Inbound, InboundEvent, Subscriber};
use cfp_common::config::DashboardConfig;
use cfp_common::{BroadcastMessage, RiskLevel, SourceMode, PREDICTIONS_TOPIC};

use crate::consumer::{Consumer, ConsumerCounters, ConsumerStatus, Delivery};
use crate::driver::{DriverState, StreamDriver, TickOutcome};
use crate::error::SessionError;
use crate::predictor::Predictor;
use crate::source::FeatureSource;

/// First resubscribe delay after the subscription drops
pub const RESUBSCRIBE_INITIAL: Duration = Duration::from_millis(250);

/// Resubscribe delay cap
pub const RESUBSCRIBE_MAX: Duration = Duration::from_secs(10);

const COMMAND_BUFFER: usize = 16;

/// Session timing and sizing
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub tick_interval: Duration,
    pub message_timeout: Duration,
    pub window_size: usize,
    pub topic: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&DashboardConfig::default())
    }
}

impl From<&DashboardConfig> for SessionConfig {
    fn from(config: &DashboardConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            message_timeout: config.message_timeout(),
            window_size: config.window_size,
            topic: PREDICTIONS_TOPIC.to_string(),
        }
    }
}

/// Everything a rendering layer needs, as of the last change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: DriverState,
    pub source: String,
    pub mode: SourceMode,
    /// Next record to send
    pub position: usize,
    /// Requests sent so far
    pub ticks: u64,
    pub status: ConsumerStatus,
    pub connected: bool,
    pub current: Option<BroadcastMessage>,
    pub risk: Option<RiskLevel>,
    /// Oldest first
    pub history: Vec<f64>,
    pub window_size: usize,
    pub awaiting: Option<Uuid>,
    pub counters: ConsumerCounters,
    pub failed_ticks: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Equal apart from the timestamp
    fn same_state(&self, other: &SessionSnapshot) -> bool {
        SessionSnapshot {
            updated_at: other.updated_at,
            ..self.clone()
        } == *other
    }
}

// ========================================
// Backoff
// ========================================

/// Exponential delay: doubles after each failure up to a cap
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

// ========================================
// Handle
// ========================================

enum Command {
    Start(oneshot::Sender<SessionSnapshot>),
    Stop(oneshot::Sender<SessionSnapshot>),
    SelectSource {
        source: Arc<dyn FeatureSource>,
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
}

/// Cloneable control handle for a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Start streaming; a no-op if already running
    pub async fn start(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Start).await
    }

    /// Stop streaming; a no-op if not running
    pub async fn stop(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Stop).await
    }

    /// Replace the record source (refused while running)
    pub async fn select_source(
        &self,
        source: Arc<dyn FeatureSource>,
    ) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| Command::SelectSource { source, reply })
            .await?
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes on every state change
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Cancel the session task; pending waits end and the subscription is dropped
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Spawn a session task
///
/// The task runs until `cancel` fires or every handle is dropped.
pub fn spawn_session(
    config: SessionConfig,
    source: Arc<dyn FeatureSource>,
    predictor: Arc<dyn Predictor>,
    subscriber: Arc<dyn Subscriber>,
    cancel: CancellationToken,
) -> (SessionHandle, JoinHandle<()>) {
    let consumer = Consumer::new(config.window_size);
    let driver = StreamDriver::new(source, predictor);

    let initial = snapshot_of(&driver, &consumer, false, 0, Utc::now());
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = SessionActor {
        config,
        driver,
        consumer,
        subscriber,
        cancel: cancel.clone(),
        snapshots: snapshot_tx,
        inbound: None,
        reconnect_at: None,
        backoff: Backoff::new(RESUBSCRIBE_INITIAL, RESUBSCRIBE_MAX),
        deadline: None,
        failed_ticks: 0,
    };
    let task = tokio::spawn(actor.run(command_rx));

    let handle = SessionHandle {
        commands: command_tx,
        snapshots: snapshot_rx,
        cancel,
    };
    (handle, task)
}

fn snapshot_of(
    driver: &StreamDriver,
    consumer: &Consumer,
    connected: bool,
    failed_ticks: u64,
    updated_at: DateTime<Utc>,
) -> SessionSnapshot {
    let current = consumer.current().cloned();
    SessionSnapshot {
        state: driver.state(),
        source: driver.source().describe(),
        mode: driver.mode(),
        position: driver.position(),
        ticks: driver.next_seq(),
        status: consumer.status(),
        connected,
        risk: current.as_ref().map(BroadcastMessage::risk),
        current,
        history: consumer.window().to_vec(),
        window_size: consumer.window().capacity(),
        awaiting: consumer.awaiting(),
        counters: consumer.counters(),
        failed_ticks,
        updated_at,
    }
}

// ========================================
// Actor
// ========================================

struct SessionActor {
    config: SessionConfig,
    driver: StreamDriver,
    consumer: Consumer,
    subscriber: Arc<dyn Subscriber>,
    cancel: CancellationToken,
    snapshots: watch::Sender<SessionSnapshot>,
    inbound: Option<Box<dyn Inbound>>,
    reconnect_at: Option<Instant>,
    backoff: Backoff,
    deadline: Option<Instant>,
    failed_ticks: u64,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(
            topic = %self.config.topic,
            tick_interval = ?self.config.tick_interval,
            message_timeout = ?self.config.message_timeout,
            window_size = self.config.window_size,
            "Session started"
        );

        // Subscribe before accepting commands so the first tick's broadcast is seen
        self.connect().await;
        self.publish();

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut ticker),
                    None => break,
                },

                event = next_inbound(&mut self.inbound), if self.inbound.is_some() => {
                    self.handle_inbound(event);
                }

                _ = sleep_until(self.deadline.unwrap_or_else(Instant::now)), if self.deadline.is_some() => {
                    self.deadline = None;
                    self.consumer.on_timeout();
                }

                _ = sleep_until(self.reconnect_at.unwrap_or_else(Instant::now)), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.connect().await;
                }

                _ = ticker.tick(), if self.driver.is_running() => {
                    let outcome = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        outcome = self.driver.tick() => outcome,
                    };
                    self.handle_tick(outcome);
                }
            }

            self.publish();
        }

        info!("Session ended");
    }

    fn handle_command(&mut self, command: Command, ticker: &mut tokio::time::Interval) {
        match command {
            Command::Start(reply) => {
                if self.driver.start() {
                    // First record goes out now, not one interval from now
                    ticker.reset_immediately();
                }
                self.publish();
                let _ = reply.send(self.snapshots.borrow().clone());
            }
            Command::Stop(reply) => {
                self.driver.stop();
                self.publish();
                let _ = reply.send(self.snapshots.borrow().clone());
            }
            Command::SelectSource { source, reply } => {
                let result = if self.driver.set_source(source) {
                    self.publish();
                    Ok(self.snapshots.borrow().clone())
                } else {
                    Err(SessionError::Running)
                };
                let _ = reply.send(result);
            }
        }
    }

    fn handle_tick(&mut self, outcome: TickOutcome) {
        match outcome {
            TickOutcome::Scored {
                request_id, seq, ..
            } => {
                self.consumer.expect(request_id);
                self.deadline = Some(Instant::now() + self.config.message_timeout);
                debug!(%request_id, seq, "Awaiting broadcast");
            }
            TickOutcome::Failed { .. } | TickOutcome::SourceUnavailable { .. } => {
                self.failed_ticks += 1;
            }
            TickOutcome::Empty => {
                self.deadline = None;
                self.consumer.on_empty_source();
            }
            TickOutcome::NotRunning => {}
        }
    }

    fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Message(payload) => {
                if let Delivery::Recorded { matched: true } = self.consumer.on_payload(&payload) {
                    self.deadline = None;
                }
            }
            InboundEvent::Lagged(dropped) => self.consumer.on_lagged(dropped),
            InboundEvent::Closed => {
                self.inbound = None;
                self.consumer.on_disconnected();
                let delay = self.backoff.next_delay();
                warn!(topic = %self.config.topic, retry_in = ?delay, "Subscription closed");
                self.reconnect_at = Some(Instant::now() + delay);
            }
        }
    }

    async fn connect(&mut self) {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = self.subscriber.subscribe(&self.config.topic) => result,
        };

        match result {
            Ok(inbound) => {
                info!(topic = %self.config.topic, "Subscribed");
                self.inbound = Some(inbound);
                self.backoff.reset();
                if self.consumer.status() == ConsumerStatus::Disconnected {
                    self.consumer.on_reconnected();
                }
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!(
                    topic = %self.config.topic,
                    error = %e,
                    retry_in = ?delay,
                    "Subscribe failed"
                );
                self.consumer.on_disconnected();
                self.reconnect_at = Some(Instant::now() + delay);
            }
        }
    }

    /// Send a snapshot to readers if anything changed
    fn publish(&self) {
        let now = Utc::now();
        let next = snapshot_of(
            &self.driver,
            &self.consumer,
            self.inbound.is_some(),
            self.failed_ticks,
            now,
        );
        self.snapshots.send_if_modified(|current| {
            if current.same_state(&next) {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn next_inbound(inbound: &mut Option<Box<dyn Inbound>>) -> InboundEvent {
    match inbound {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
