// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message consumer
//!
//! Wires the bus to a repository.
//!
//! # Operation
//!
//! 1. Load the filter file (defaults on failure)
//! 2. Select the transformer from the content type
//! 3. Check the repository accepts the transformer's record shape
//! 4. Subscribe one handler to every configured subject
//! 5. Per message: transform, check the batch shape, save

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pubsub::{MessageHandler, Subscriber};
use crate::store::MessageRepository;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tlm_transformers::{
    content_type, Encoding, JsonTransformer, KeyFilter, KeyFilterTransformer, RawMessage,
    RecordKind, Transformer,
};
use tokio_util::sync::CancellationToken;

/// Pick the transformer for a payload content type.
///
/// Unknown (or empty) content types get the SenML JSON transformer.
pub fn select_transformer(content_type: &str, keys: KeyFilter) -> Box<dyn Transformer> {
    match content_type {
        content_type::JSON => Box::new(JsonTransformer::new(keys)),
        content_type::SENML_JSON => Box::new(KeyFilterTransformer::new(Encoding::Json, keys)),
        content_type::SENML_CBOR => Box::new(KeyFilterTransformer::new(Encoding::Cbor, keys)),
        other => {
            tracing::debug!(
                "Unknown content type '{}', using {}",
                other,
                content_type::SENML_JSON
            );
            Box::new(KeyFilterTransformer::new(Encoding::Json, keys))
        }
    }
}

/// Consumer counters, updated without locking
#[derive(Debug, Default)]
struct ConsumerStats {
    received: AtomicU64,
    stored: AtomicU64,
    transform_failures: AtomicU64,
    conversion_failures: AtomicU64,
    storage_failures: AtomicU64,
}

/// Point-in-time copy of the consumer counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages handed to the consumer
    pub messages_received: u64,
    /// Records saved
    pub records_stored: u64,
    /// Messages rejected by the transformer
    pub transform_failures: u64,
    /// Batches of a shape the repository does not take
    pub conversion_failures: u64,
    /// Failed saves
    pub storage_failures: u64,
}

/// Consumer feeding one repository from the bus
pub struct Consumer<R: MessageRepository + ?Sized> {
    repo: Arc<R>,
    transformer: Box<dyn Transformer>,
    shutdown: CancellationToken,
    write_timeout: Option<Duration>,
    stats: ConsumerStats,
}

impl<R: MessageRepository + ?Sized + 'static> Consumer<R> {
    /// Fails with a conversion error when `repo` cannot store what
    /// `transformer` produces.
    pub fn new(
        repo: Arc<R>,
        transformer: Box<dyn Transformer>,
        write_timeout: Option<Duration>,
    ) -> Result<Self> {
        let kind = transformer.kind();
        if !repo.accepts(kind) {
            let err = Error::conversion(format!(
                "{} repository does not accept {} records",
                repo.name(),
                kind
            ));
            tracing::error!("{}", err);
            return Err(err);
        }

        Ok(Self {
            repo,
            transformer,
            shutdown: CancellationToken::new(),
            write_timeout,
            stats: ConsumerStats::default(),
        })
    }

    /// Build a consumer from `config` and subscribe it to every configured
    /// subject. The first subscribe error aborts the start.
    pub fn start<S: Subscriber + ?Sized>(
        subscriber: &S,
        repo: Arc<R>,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let filters = config.load_filters();
        let transformer = select_transformer(&config.content_type, filters.key_filter());
        let consumer = Arc::new(Self::new(repo, transformer, config.write_timeout())?);

        for subject in filters.subjects() {
            let handler: Arc<dyn MessageHandler> = consumer.clone();
            subscriber.subscribe(&subject, handler)?;
            tracing::info!("Subscribed to {}", subject);
        }

        tracing::info!(
            "Consumer started: {} records into {}",
            consumer.kind(),
            consumer.repo.name()
        );
        Ok(consumer)
    }

    /// Record shape the transformer produces
    pub fn kind(&self) -> RecordKind {
        self.transformer.kind()
    }

    /// Transform one message and save the batch.
    ///
    /// Errors are scoped to the message; the subscription stays active.
    pub fn handle_message(&self, msg: &RawMessage) -> Result<()> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let batch = match self.transformer.transform(msg) {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.transform_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Failed to transform message from {}: {}", msg.channel, e);
                return Err(e.into());
            }
        };

        let expected = self.transformer.kind();
        if batch.kind() != expected || !self.repo.accepts(batch.kind()) {
            self.stats.conversion_failures.fetch_add(1, Ordering::Relaxed);
            let err = Error::conversion(format!(
                "expected {} batch for {} repository, got {}",
                expected,
                self.repo.name(),
                batch.kind()
            ));
            tracing::error!("{}", err);
            return Err(err);
        }

        let ctx = self.context();
        if let Err(e) = self.repo.save(&ctx, &batch) {
            self.stats.storage_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Failed to save {} records from {}: {}", batch.len(), msg.channel, e);
            return Err(e);
        }

        self.stats
            .stored
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        tracing::trace!("Saved {} records from {}", batch.len(), msg.channel);
        Ok(())
    }

    fn context(&self) -> Context {
        let ctx = Context::with_token(self.shutdown.child_token());
        match self.write_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    /// Cancel in-flight and future saves
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.stats.received.load(Ordering::Relaxed),
            records_stored: self.stats.stored.load(Ordering::Relaxed),
            transform_failures: self.stats.transform_failures.load(Ordering::Relaxed),
            conversion_failures: self.stats.conversion_failures.load(Ordering::Relaxed),
            storage_failures: self.stats.storage_failures.load(Ordering::Relaxed),
        }
    }
}

impl<R: MessageRepository + ?Sized + 'static> MessageHandler for Consumer<R> {
    fn handle(&self, msg: &RawMessage) -> Result<()> {
        self.handle_message(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryStore;
    use crate::pubsub::{MockPubSub, SUBJECT_ALL_CHANNELS};
    use crate::store::MessageReader;
    use std::collections::HashMap;
    use tlm_transformers::{Batch, RecordValue, SenmlRecord, TransformError};

    /// Repository storing SenML records only
    struct SenmlOnly(MemoryStore);

    impl MessageRepository for SenmlOnly {
        fn save(&self, ctx: &Context, batch: &Batch) -> Result<()> {
            self.0.save(ctx, batch)
        }

        fn accepts(&self, kind: RecordKind) -> bool {
            kind == RecordKind::Senml
        }

        fn name(&self) -> &'static str {
            "senml-only"
        }
    }

    /// Declares JSON output but emits SenML
    struct Mislabelled;

    impl Transformer for Mislabelled {
        fn transform(&self, msg: &RawMessage) -> std::result::Result<Batch, TransformError> {
            Ok(Batch::Senml(vec![SenmlRecord {
                channel: msg.channel.clone(),
                subtopic: String::new(),
                publisher: String::new(),
                protocol: String::new(),
                name: "x".into(),
                unit: String::new(),
                time: 0.0,
                update_time: 0.0,
                sum: None,
                value: RecordValue::Float(1.0),
            }]))
        }

        fn kind(&self) -> RecordKind {
            RecordKind::Json
        }
    }

    fn senml_message(channel: &str, payload: &str) -> RawMessage {
        RawMessage::new(channel, payload.as_bytes().to_vec()).with_created(2_500_000_000)
    }

    #[test]
    fn test_select_transformer() {
        let cases = [
            (content_type::JSON, RecordKind::Json),
            (content_type::SENML_JSON, RecordKind::Senml),
            (content_type::SENML_CBOR, RecordKind::Senml),
            ("text/plain", RecordKind::Senml),
            ("", RecordKind::Senml),
        ];
        for (ct, kind) in cases {
            assert_eq!(select_transformer(ct, KeyFilter::All).kind(), kind, "{}", ct);
        }

        // {"t": 1}
        let cbor = RawMessage::new("c1", vec![0xa1, 0x61, b't', 0x01]);
        let batch = select_transformer(content_type::SENML_CBOR, KeyFilter::All)
            .transform(&cbor)
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert!(select_transformer(content_type::SENML_JSON, KeyFilter::All)
            .transform(&cbor)
            .is_err());
    }

    #[test]
    fn test_start_with_filter_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filters.toml");
        std::fs::write(
            &path,
            "[subjects]\nfilter = [\"channels.c1\", \"channels.c2.>\"]\n[keys]\nfilter = [\"temp\"]\n",
        )
        .unwrap();

        let bus = MockPubSub::new();
        let store = Arc::new(MemoryStore::new());
        let config = Config::builder().filter_config_path(&path).build();
        let consumer = Consumer::start(&bus, Arc::clone(&store), &config).unwrap();

        assert_eq!(bus.subscriptions(), vec!["channels.c1", "channels.c2.>"]);

        let msg = senml_message("c1", r#"{"temp": 21.5, "rpm": 900}"#);
        let results = bus.publish("channels.c1", &msg);
        assert!(results.iter().all(|r| r.is_ok()));

        let page = store
            .read_all(&Context::background(), "c1", 0, 10, &HashMap::new())
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.messages[0].name, "temp");
        assert_eq!(page.messages[0].time, 2.5);
        assert_eq!(consumer.stats().records_stored, 1);
    }

    #[test]
    fn test_missing_filter_file_falls_back() {
        let bus = MockPubSub::new();
        let config = Config::builder()
            .filter_config_path("/nonexistent/tlm/filters.toml")
            .build();

        Consumer::start(&bus, Arc::new(MemoryStore::new()), &config).unwrap();
        assert_eq!(bus.subscriptions(), vec![SUBJECT_ALL_CHANNELS]);
    }

    #[test]
    fn test_bad_message_does_not_stop_consumer() {
        let bus = MockPubSub::new();
        let store = Arc::new(MemoryStore::new());
        let consumer = Consumer::start(&bus, Arc::clone(&store), &Config::default()).unwrap();

        let bad = bus.publish("channels.c1", &senml_message("c1", "{not json"));
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].as_ref().unwrap_err().kind(), ErrorKind::Decode);

        let good = bus.publish("channels.c1", &senml_message("c1", r#"{"a": 1, "b": true}"#));
        assert!(good[0].is_ok());

        let stats = consumer.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.transform_failures, 1);
        assert_eq!(stats.records_stored, 2);
    }

    #[test]
    fn test_start_rejects_unsupported_shape() {
        let bus = MockPubSub::new();
        let repo = Arc::new(SenmlOnly(MemoryStore::new()));
        let config = Config::builder().content_type(content_type::JSON).build();

        let err = Consumer::start(&bus, repo, &config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert!(err.is_fatal());
        assert!(bus.subscriptions().is_empty());
    }

    #[test]
    fn test_mislabelled_batch_is_conversion_error() {
        let store = Arc::new(MemoryStore::new());
        let consumer = Consumer::new(Arc::clone(&store), Box::new(Mislabelled), None).unwrap();

        let err = consumer
            .handle_message(&senml_message("c1", "{}"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert_eq!(store.count(RecordKind::Senml), 0);
        assert_eq!(consumer.stats().conversion_failures, 1);
    }

    #[test]
    fn test_subscribe_failure_aborts_start() {
        let bus = MockPubSub::new();
        bus.fail_subscribe_on(SUBJECT_ALL_CHANNELS);

        let result = Consumer::start(&bus, Arc::new(MemoryStore::new()), &Config::default());
        assert_eq!(result.err().unwrap().kind(), ErrorKind::Bus);
    }

    #[test]
    fn test_shutdown_cancels_saves() {
        let store = Arc::new(MemoryStore::new());
        let consumer = Consumer::new(
            Arc::clone(&store),
            select_transformer(content_type::SENML_JSON, KeyFilter::All),
            Some(Duration::from_secs(5)),
        )
        .unwrap();

        consumer.shutdown();
        assert!(consumer.is_shutdown());

        let err = consumer
            .handle_message(&senml_message("c1", r#"{"a": 1}"#))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(store.count(RecordKind::Senml), 0);
        assert_eq!(consumer.stats().storage_failures, 1);
    }

    #[test]
    fn test_dyn_repository() {
        let bus = MockPubSub::new();
        let repo: Arc<dyn MessageRepository> = Arc::new(MemoryStore::new());
        let consumer = Consumer::start(&bus, repo, &Config::default()).unwrap();

        bus.publish("channels.c1", &senml_message("c1", r#"{"a": "on"}"#));
        assert_eq!(consumer.stats().records_stored, 1);
    }
}
