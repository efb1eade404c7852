//! In-process stand-ins for the inference endpoint and the broker

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use cfp_common::bus::{Inbound, InboundEvent, Subscriber, TopicBus};
use cfp_common::{
    Error, FeatureVector, PredictRequest, PredictResponse, Result, ScoreResult, PREDICTIONS_TOPIC,
};
use cfp_dashboard::predictor::Predictor;

/// Records whose cpu_request is 0.1, 0.2, ... so probabilities are predictable
pub fn rows(n: usize) -> Vec<FeatureVector> {
    (1..=n)
        .map(|i| FeatureVector::new(i as f64 / 10.0, 0.5, 0, 1))
        .collect()
}

/// Scores with `probability = cpu_request` and publishes like the real endpoint
pub struct FakeInference {
    bus: TopicBus,
    /// Calls at or beyond this index are answered but never published
    silent_after: usize,
    calls: AtomicUsize,
}

impl FakeInference {
    pub fn new(bus: TopicBus) -> Self {
        Self {
            bus,
            silent_after: usize::MAX,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn silent_after(mut self, calls: usize) -> Self {
        self.silent_after = calls;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Predictor for FakeInference {
    async fn predict(&self, request: &PredictRequest) -> Result<PredictResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        let result = ScoreResult {
            request_id: request.request_id.unwrap_or_else(Uuid::new_v4),
            seq: request.seq,
            features: request.features(),
            probability: request.cpu_request.clamp(0.0, 1.0),
        };

        if call < self.silent_after {
            self.bus
                .publish_local(PREDICTIONS_TOPIC, result.to_message().encode()?);
        }

        Ok(PredictResponse {
            failure_probability: result.probability,
            request_id: result.request_id,
        })
    }
}

/// Fails the first `failures` subscribe calls, then delegates to a bus
pub struct FlakySubscriber {
    bus: TopicBus,
    failures: u32,
    attempts: AtomicU32,
}

impl FlakySubscriber {
    pub fn new(bus: TopicBus, failures: u32) -> Self {
        Self {
            bus,
            failures,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subscriber for FlakySubscriber {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Inbound>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(Error::BroadcastUnavailable("connection refused".into()));
        }
        self.bus.subscribe(topic).await
    }
}

/// First subscription is driven by the test through a channel; later ones go to a bus
pub struct ChannelSubscriber {
    scripted: Mutex<Option<mpsc::Receiver<InboundEvent>>>,
    bus: TopicBus,
    attempts: AtomicU32,
}

impl ChannelSubscriber {
    pub fn new(bus: TopicBus) -> (Self, mpsc::Sender<InboundEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let subscriber = Self {
            scripted: Mutex::new(Some(rx)),
            bus,
            attempts: AtomicU32::new(0),
        };
        (subscriber, tx)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Inbound>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripted.lock().unwrap().take();
        match scripted {
            Some(rx) => Ok(Box::new(ChannelInbound(rx))),
            None => self.bus.subscribe(topic).await,
        }
    }
}

struct ChannelInbound(mpsc::Receiver<InboundEvent>);

#[async_trait]
impl Inbound for ChannelInbound {
    async fn recv(&mut self) -> InboundEvent {
        self.0.recv().await.unwrap_or(InboundEvent::Closed)
    }
}
