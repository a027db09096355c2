// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus interface abstraction
//!
//! The consumer only needs to subscribe a handler to a subject. Real bus
//! transports implement [`Subscriber`]; this module ships two in-process
//! implementations:
//!
//! - [`MockPubSub`] -- synchronous delivery, for tests
//! - [`ChannelBus`] -- tokio mpsc delivery loop, used by the CLI
//!
//! Subjects are `.`-separated tokens. Patterns accept `*` (exactly one
//! token) and a trailing `>` (one or more remaining tokens).

use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tlm_transformers::RawMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Subject prefix of every channel message.
pub const SUBJECT_PREFIX: &str = "channels";

/// Pattern matching messages of every channel.
pub const SUBJECT_ALL_CHANNELS: &str = "channels.>";

/// Callback invoked once per delivered message.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, msg: &RawMessage) -> Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&RawMessage) -> Result<()> + Send + Sync,
{
    fn handle(&self, msg: &RawMessage) -> Result<()> {
        self(msg)
    }
}

/// Bus side the consumer subscribes through.
pub trait Subscriber: Send + Sync {
    /// Register `handler` for every message whose subject matches `subject`.
    fn subscribe(&self, subject: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;
}

/// Check a subject against a subscription pattern.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');

    for token in pattern.split('.') {
        match token {
            ">" => return subject_tokens.next().is_some(),
            "*" => {
                if subject_tokens.next().is_none() {
                    return false;
                }
            }
            literal => {
                if subject_tokens.next() != Some(literal) {
                    return false;
                }
            }
        }
    }

    subject_tokens.next().is_none()
}

/// Subject a message is published on: `channels.<channel>[.<subtopic>]`.
pub fn subject_for(msg: &RawMessage) -> String {
    if msg.subtopic.is_empty() {
        format!("{}.{}", SUBJECT_PREFIX, msg.channel)
    } else {
        format!("{}.{}.{}", SUBJECT_PREFIX, msg.channel, msg.subtopic)
    }
}

fn validate_pattern(pattern: &str) -> Result<()> {
    let tokens: Vec<_> = pattern.split('.').collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(Error::Bus(format!("invalid subject '{}'", pattern)));
    }
    if tokens[..tokens.len() - 1].contains(&">") {
        return Err(Error::Bus(format!(
            "'>' must be the last token of '{}'",
            pattern
        )));
    }
    Ok(())
}

struct Subscription {
    pattern: String,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
struct Registry {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscription>> {
        match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn add(&self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        validate_pattern(pattern)?;
        self.lock().push(Subscription {
            pattern: pattern.to_string(),
            handler,
        });
        Ok(())
    }

    /// Handlers are cloned out so none runs under the lock.
    fn matching(&self, subject: &str) -> Vec<Arc<dyn MessageHandler>> {
        self.lock()
            .iter()
            .filter(|s| subject_matches(&s.pattern, subject))
            .map(|s| Arc::clone(&s.handler))
            .collect()
    }

    fn patterns(&self) -> Vec<String> {
        self.lock().iter().map(|s| s.pattern.clone()).collect()
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock bus delivering published messages synchronously
#[derive(Default)]
pub struct MockPubSub {
    registry: Registry,
    fail_on: Mutex<Option<String>>,
}

impl MockPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subscribing to `subject` fail
    pub fn fail_subscribe_on(&self, subject: impl Into<String>) {
        let mut fail_on = match self.fail_on.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *fail_on = Some(subject.into());
    }

    /// Subscribed patterns, in subscription order
    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.patterns()
    }

    /// Deliver `msg` to every matching handler and collect their results
    pub fn publish(&self, subject: &str, msg: &RawMessage) -> Vec<Result<()>> {
        self.registry
            .matching(subject)
            .iter()
            .map(|handler| handler.handle(msg))
            .collect()
    }
}

impl Subscriber for MockPubSub {
    fn subscribe(&self, subject: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let fail_on = match self.fail_on.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if fail_on.as_deref() == Some(subject) {
            return Err(Error::Bus(format!("subscription to '{}' refused", subject)));
        }

        self.registry.add(subject, handler)
    }
}

// ============================================================================
// Channel bus
// ============================================================================

/// Message paired with the subject it was published on
#[derive(Debug, Clone)]
pub struct Envelope {
    pub subject: String,
    pub message: RawMessage,
}

/// Publishing half of a [`ChannelBus`]
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::Sender<Envelope>,
}

impl BusSender {
    /// Publish on the message's own channel subject
    pub async fn publish(&self, message: RawMessage) -> Result<()> {
        let subject = subject_for(&message);
        self.publish_to(subject, message).await
    }

    pub async fn publish_to(&self, subject: impl Into<String>, message: RawMessage) -> Result<()> {
        self.tx
            .send(Envelope {
                subject: subject.into(),
                message,
            })
            .await
            .map_err(|_| Error::Bus("bus is closed".to_string()))
    }
}

/// Delivery counters of a [`ChannelBus::run`] loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BusStats {
    /// Envelopes taken off the channel
    pub received: u64,
    /// Envelopes no subscription matched
    pub unmatched: u64,
    /// Handler invocations that returned an error
    pub handler_errors: u64,
}

/// In-process bus over a tokio mpsc channel
///
/// Handlers may block on storage, so each envelope is handed to the
/// blocking pool and awaited before the next one; delivery order is kept.
/// A failing (or panicking) handler is logged and never stops delivery.
pub struct ChannelBus {
    registry: Registry,
    rx: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
}

impl ChannelBus {
    pub fn new(capacity: usize) -> (Self, BusSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let bus = Self {
            registry: Registry::default(),
            rx: tokio::sync::Mutex::new(rx),
        };
        (bus, BusSender { tx })
    }

    /// Deliver envelopes until every sender is dropped or `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> BusStats {
        let mut rx = self.rx.lock().await;
        let mut stats = BusStats::default();

        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => break,
                envelope = rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            stats.received += 1;
            let handlers = self.registry.matching(&envelope.subject);
            if handlers.is_empty() {
                stats.unmatched += 1;
                tracing::debug!("No subscription for subject {}", envelope.subject);
                continue;
            }

            let Envelope { subject, message } = envelope;
            let delivered = tokio::task::spawn_blocking(move || {
                handlers
                    .iter()
                    .map(|handler| handler.handle(&message))
                    .collect::<Vec<_>>()
            })
            .await;

            match delivered {
                Ok(results) => {
                    for e in results.into_iter().filter_map(|r| r.err()) {
                        stats.handler_errors += 1;
                        tracing::warn!("Handler failed for subject {}: {}", subject, e);
                    }
                }
                Err(e) => {
                    stats.handler_errors += 1;
                    tracing::error!("Handler task for subject {} aborted: {}", subject, e);
                }
            }
        }

        tracing::debug!(
            "ChannelBus stopped after {} envelopes ({} handler errors)",
            stats.received,
            stats.handler_errors
        );
        stats
    }
}

impl Subscriber for ChannelBus {
    fn subscribe(&self, subject: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.registry.add(subject, handler)
    }
}
