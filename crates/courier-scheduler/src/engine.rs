//! Dispatch engine — owns the lifecycle of every scheduled message:
//! pending → sent | failed | cancelled, with timers armed per message and
//! readiness re-checked against the channel at fire time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use courier_core::error::{CourierError, Result};
use courier_core::traits::{Channel, ChannelEvent};
use courier_core::types::{
    MessageStatus, ScheduleRequest, ScheduledMessage, validate_body, validate_recipient,
};

use crate::store::MessageStore;
use crate::timers::TimerRegistry;

/// Bounded fixed-delay retry for delivery attempts. No backoff, no jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// The dispatch engine. One instance owns the store, the timer registry,
/// and the only mutation rights over scheduled messages.
pub struct DispatchEngine {
    store: MessageStore,
    channel: Arc<dyn Channel>,
    timers: TimerRegistry,
    retry: RetryPolicy,
}

impl DispatchEngine {
    pub fn new(store: MessageStore, channel: Arc<dyn Channel>, retry: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            store,
            channel,
            timers: TimerRegistry::new(),
            retry,
        })
    }

    /// Restart reconciliation: re-arm a timer for every record still pending
    /// in the store. Overdue records fire immediately. Returns the number of
    /// timers armed.
    pub fn start(self: &Arc<Self>) -> Result<usize> {
        let pending = self.store.pending();
        for message in &pending {
            // Clear any stale bookkeeping before re-arming.
            self.timers.disarm(&message.id);
            self.arm(&message.id, message.scheduled_time)?;
        }
        if !pending.is_empty() {
            tracing::info!("⏰ Re-armed {} pending message(s)", pending.len());
        }
        self.spawn_lifecycle_watcher();
        Ok(pending.len())
    }

    /// Log channel lifecycle transitions. Timers are time-driven, so a
    /// disconnect leaves them armed; due sends re-check readiness themselves.
    fn spawn_lifecycle_watcher(&self) {
        let mut events = self.channel.subscribe();
        let channel_name = self.channel.name().to_string();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChannelEvent::Ready) => {
                        tracing::info!("✅ Channel '{channel_name}' is ready");
                    }
                    Ok(ChannelEvent::Disconnected { reason }) => {
                        tracing::warn!(
                            "⚠️ Channel '{channel_name}' disconnected ({reason}) — pending timers stay armed"
                        );
                    }
                    Ok(ChannelEvent::MessageReceived { from, .. }) => {
                        tracing::debug!("📥 Incoming message from {from}");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Lifecycle watcher lagged, skipped {n} event(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Schedule a message for future delivery.
    ///
    /// Rejects if the channel is not ready right now, even though readiness
    /// is re-checked at fire time anyway — scheduling against a dead channel
    /// is almost always a caller mistake.
    pub fn schedule(self: &Arc<Self>, request: ScheduleRequest) -> Result<ScheduledMessage> {
        if !self.channel.is_ready() {
            return Err(CourierError::ChannelUnavailable(format!(
                "channel '{}' is not ready",
                self.channel.name()
            )));
        }
        request.validate(Utc::now())?;

        let message = ScheduledMessage::new(&request.to, &request.message, request.scheduled_time);
        self.store.save(message.clone())?;

        // A pending record must never exist without an armed timer: if the
        // registry refuses (shutdown in progress), roll the record back out.
        if let Err(e) = self.arm(&message.id, message.scheduled_time) {
            if let Err(del) = self.store.delete(&message.id) {
                tracing::error!("❌ Rollback of unarmed message {} failed: {del}", message.id);
            }
            return Err(e);
        }

        tracing::info!(
            "📅 Scheduled message {} to {} at {}",
            message.id,
            message.to,
            message.scheduled_time
        );
        Ok(message)
    }

    /// Schedule a batch; each request succeeds or fails independently.
    pub fn schedule_bulk(
        self: &Arc<Self>,
        requests: Vec<ScheduleRequest>,
    ) -> Vec<Result<ScheduledMessage>> {
        requests.into_iter().map(|r| self.schedule(r)).collect()
    }

    /// Cancel a pending message. Returns false — not an error — when the id
    /// is unknown or the message already reached a terminal state.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let cancelled = self
            .store
            .mark_if_pending(id, MessageStatus::Cancelled, None)?;
        if cancelled {
            self.timers.disarm(id);
            tracing::info!("🚫 Cancelled scheduled message {id}");
        }
        Ok(cancelled)
    }

    pub fn get(&self, id: &str) -> Option<ScheduledMessage> {
        self.store.find(id)
    }

    pub fn get_all(&self) -> Vec<ScheduledMessage> {
        self.store.all()
    }

    /// Number of timers currently armed.
    pub fn armed_timers(&self) -> usize {
        self.timers.armed()
    }

    /// Immediate validated send, bypassing the schedule/store path.
    pub async fn send_now(&self, to: &str, body: &str) -> Result<()> {
        if !self.channel.is_ready() {
            return Err(CourierError::ChannelUnavailable(format!(
                "channel '{}' is not ready",
                self.channel.name()
            )));
        }
        validate_recipient(to)?;
        validate_body(body)?;
        self.channel.send(to, body).await
    }

    /// Stop accepting timers and disarm everything armed. Pending records
    /// stay in the store and re-arm on the next `start`.
    pub fn shutdown(&self) {
        self.timers.shutdown();
        tracing::info!("⏹ Dispatch engine stopped");
    }

    fn arm(self: &Arc<Self>, id: &str, fire_at: DateTime<Utc>) -> Result<()> {
        let engine = Arc::clone(self);
        let message_id = id.to_string();
        self.timers.arm(id, fire_at, move || async move {
            engine.on_fire(&message_id).await;
        })
    }

    /// Timer-fired delivery attempt with bounded retries.
    ///
    /// Failures here have no caller to report to; they end up on the record
    /// (status + lastError) and in the log.
    async fn on_fire(&self, id: &str) {
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.retry.max_attempts {
            // A cancel may win between attempts; a message that already left
            // pending must never be sent.
            let message = match self.store.find(id) {
                Some(m) if m.status == MessageStatus::Pending => m,
                Some(_) | None => return,
            };

            // Readiness at arm time means nothing now; check again.
            if !self.channel.is_ready() {
                last_error = Some(format!("channel '{}' not ready", self.channel.name()));
                tracing::warn!(
                    "⚠️ Message {id}: attempt {attempt}/{} skipped, channel not ready",
                    self.retry.max_attempts
                );
            } else {
                match self.channel.send(&message.to, &message.message).await {
                    Ok(()) => {
                        match self.store.mark_if_pending(id, MessageStatus::Sent, None) {
                            Ok(true) => {
                                tracing::info!("📨 Message {id} sent to {}", message.to);
                            }
                            Ok(false) => {
                                // Cancelled mid-send; the wire send happened
                                // but the record keeps its terminal state.
                                tracing::warn!(
                                    "Message {id} reached a terminal state during send"
                                );
                            }
                            Err(e) => {
                                tracing::error!(
                                    "❌ Message {id} sent but status update failed: {e}"
                                );
                            }
                        }
                        return;
                    }
                    Err(e) => {
                        last_error = Some(e.to_string());
                        tracing::warn!(
                            "⚠️ Message {id}: attempt {attempt}/{} failed: {e}",
                            self.retry.max_attempts
                        );
                    }
                }
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay).await;
            }
        }

        let reason = last_error.unwrap_or_else(|| "unknown error".into());
        match self
            .store
            .mark_if_pending(id, MessageStatus::Failed, Some(reason.clone()))
        {
            Ok(true) => {
                tracing::error!(
                    "❌ Message {id} failed after {} attempt(s): {reason}",
                    self.retry.max_attempts
                );
            }
            Ok(false) => {}
            Err(e) => tracing::error!("❌ Message {id}: could not record failure: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Scripted channel double: readiness is a switch, and the next
    /// `fail_next` sends error before sends start succeeding.
    struct MockChannel {
        ready: AtomicBool,
        fail_next: AtomicU32,
        sent: Mutex<Vec<(String, String)>>,
        attempts: AtomicU32,
        events: broadcast::Sender<ChannelEvent>,
    }

    impl MockChannel {
        fn new(ready: bool) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                ready: AtomicBool::new(ready),
                fail_next: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
                attempts: AtomicU32::new(0),
                events,
            })
        }

        fn set_ready(&self, ready: bool) {
            self.ready.store(ready, Ordering::SeqCst);
        }

        fn fail_next_sends(&self, n: u32) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            "mock"
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn send(&self, to: &str, body: &str) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                return Err(CourierError::SendFailed("scripted failure".into()));
            }
            self.sent.lock().unwrap().push((to.into(), body.into()));
            Ok(())
        }

        async fn is_registered(&self, _to: &str) -> Result<bool> {
            Ok(true)
        }

        fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
            self.events.subscribe()
        }
    }

    fn test_store(name: &str) -> (MessageStore, PathBuf) {
        let dir = std::env::temp_dir().join(name);
        std::fs::remove_dir_all(&dir).ok();
        let path = dir.join("scheduled-messages.json");
        (MessageStore::open(&path), path)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(20),
        }
    }

    fn test_engine(name: &str, channel: Arc<MockChannel>) -> (Arc<DispatchEngine>, PathBuf) {
        let (store, path) = test_store(name);
        let engine = DispatchEngine::new(store, channel, fast_retry());
        (engine, path)
    }

    fn request(to: &str, message: &str, offset_ms: i64) -> ScheduleRequest {
        ScheduleRequest {
            to: to.into(),
            message: message.into(),
            scheduled_time: Utc::now() + chrono::Duration::milliseconds(offset_ms),
        }
    }

    fn cleanup(path: &std::path::Path) {
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_schedule_persists_pending_record() {
        let channel = MockChannel::new(true);
        let (engine, path) = test_engine("courier-engine-schedule", channel);

        let msg = engine
            .schedule(request("6281234567890", "hi", 60_000))
            .unwrap();
        assert_eq!(msg.status, MessageStatus::Pending);
        assert_eq!(engine.get(&msg.id), Some(msg.clone()));
        assert_eq!(engine.armed_timers(), 1);
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_schedule_rejects_invalid_input() {
        let channel = MockChannel::new(true);
        let (engine, path) = test_engine("courier-engine-invalid", channel);

        // Not strictly in the future
        let err = engine
            .schedule(request("6281234567890", "hi", 0))
            .unwrap_err();
        assert!(matches!(err, CourierError::InvalidInput(_)));

        // Bad recipient, oversized body
        assert!(engine.schedule(request("123", "hi", 60_000)).is_err());
        assert!(engine
            .schedule(request("6281234567890", &"x".repeat(5000), 60_000))
            .is_err());

        // Nothing was persisted or armed
        assert!(engine.get_all().is_empty());
        assert_eq!(engine.armed_timers(), 0);
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_schedule_rejects_when_channel_not_ready() {
        let channel = MockChannel::new(false);
        let (engine, path) = test_engine("courier-engine-notready", channel);

        let err = engine
            .schedule(request("6281234567890", "hi", 60_000))
            .unwrap_err();
        assert!(matches!(err, CourierError::ChannelUnavailable(_)));
        assert!(engine.get_all().is_empty());
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_schedule_rolls_back_when_arming_fails() {
        let channel = MockChannel::new(true);
        let (engine, path) = test_engine("courier-engine-rollback", channel);

        engine.shutdown();
        let err = engine
            .schedule(request("6281234567890", "hi", 60_000))
            .unwrap_err();
        assert!(matches!(err, CourierError::Shutdown(_)));
        // Compensating rollback: no orphaned pending record without a timer.
        assert!(engine.get_all().is_empty());
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_noop() {
        let channel = MockChannel::new(true);
        let (engine, path) = test_engine("courier-engine-cancel-unknown", channel);

        assert!(!engine.cancel("nope").unwrap());
        assert!(engine.get("nope").is_none());
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_cancel_before_fire_prevents_send() {
        let channel = MockChannel::new(true);
        let (engine, path) = test_engine("courier-engine-cancel", Arc::clone(&channel));

        let msg = engine
            .schedule(request("6281234567890", "hi", 100))
            .unwrap();
        assert!(engine.cancel(&msg.id).unwrap());
        assert_eq!(engine.get(&msg.id).unwrap().status, MessageStatus::Cancelled);

        // Second cancel is a no-op, state unchanged.
        assert!(!engine.cancel(&msg.id).unwrap());
        assert_eq!(engine.get(&msg.id).unwrap().status, MessageStatus::Cancelled);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(channel.sent().is_empty());
        assert_eq!(channel.attempts(), 0);
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_fire_sends_exactly_once() {
        let channel = MockChannel::new(true);
        let (engine, path) = test_engine("courier-engine-fire", Arc::clone(&channel));

        let msg = engine
            .schedule(request("6281234567890", "hi", 80))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(channel.sent(), vec![("6281234567890".into(), "hi".into())]);
        let sent = engine.get(&msg.id).unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        assert!(sent.updated_at >= sent.created_at);
        assert_eq!(engine.armed_timers(), 0);
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_fire_retries_then_fails_terminally() {
        let channel = MockChannel::new(true);
        channel.fail_next_sends(u32::MAX);
        let (engine, path) = test_engine("courier-engine-retries", Arc::clone(&channel));

        let msg = engine
            .schedule(request("6281234567890", "hi", 50))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Retry policy exhausted: exactly max_attempts sends, then terminal.
        assert_eq!(channel.attempts(), 3);
        let failed = engine.get(&msg.id).unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert!(failed.last_error.as_deref().unwrap().contains("scripted failure"));

        // Exhaustion is terminal — nothing fires again afterwards.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(channel.attempts(), 3);
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_fire_recovers_after_transient_failures() {
        let channel = MockChannel::new(true);
        channel.fail_next_sends(2);
        let (engine, path) = test_engine("courier-engine-transient", Arc::clone(&channel));

        let msg = engine
            .schedule(request("6281234567890", "hi", 50))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(channel.attempts(), 3);
        assert_eq!(channel.sent().len(), 1);
        assert_eq!(engine.get(&msg.id).unwrap().status, MessageStatus::Sent);
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_fire_waits_out_a_not_ready_channel() {
        let channel = MockChannel::new(true);
        let (store, path) = test_store("courier-engine-flap");
        let engine = DispatchEngine::new(
            store,
            Arc::clone(&channel) as Arc<dyn Channel>,
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(80),
            },
        );

        let msg = engine
            .schedule(request("6281234567890", "hi", 30))
            .unwrap();
        // The channel drops right after scheduling; send is never attempted
        // while not ready, and succeeds once readiness returns before the
        // final attempt.
        channel.set_ready(false);
        tokio::time::sleep(Duration::from_millis(120)).await;
        channel.set_ready(true);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(engine.get(&msg.id).unwrap().status, MessageStatus::Sent);
        assert_eq!(channel.sent().len(), 1);
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_fire_fails_when_channel_stays_down() {
        let channel = MockChannel::new(true);
        let (engine, path) = test_engine("courier-engine-down", Arc::clone(&channel));

        let msg = engine
            .schedule(request("6281234567890", "hi", 30))
            .unwrap();
        channel.set_ready(false);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let failed = engine.get(&msg.id).unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert!(failed.last_error.as_deref().unwrap().contains("not ready"));
        // Never sent while not ready.
        assert_eq!(channel.attempts(), 0);
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_restart_rearms_pending_messages() {
        let channel = MockChannel::new(true);
        let (engine, path) = test_engine("courier-engine-restart", Arc::clone(&channel));

        let a = engine
            .schedule(request("6281234567890", "first", 60_000))
            .unwrap();
        let b = engine
            .schedule(request("6289876543210", "second", 150))
            .unwrap();
        // Simulate a crash: timers die with the process, the store survives.
        engine.shutdown();
        drop(engine);

        let store = MessageStore::open(&path);
        assert_eq!(store.pending().len(), 2);
        let channel2 = MockChannel::new(true);
        let engine2 = DispatchEngine::new(store, Arc::clone(&channel2) as Arc<dyn Channel>, fast_retry());
        let rearmed = engine2.start().unwrap();
        assert_eq!(rearmed, 2);
        assert_eq!(engine2.armed_timers(), 2);

        // The near-due message still fires at its original time.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(channel2.sent(), vec![("6289876543210".into(), "second".into())]);
        assert_eq!(engine2.get(&b.id).unwrap().status, MessageStatus::Sent);
        assert_eq!(engine2.get(&a.id).unwrap().status, MessageStatus::Pending);
        assert!(channel.sent().is_empty());
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_overdue_message_fires_immediately_on_restart() {
        let (store, path) = test_store("courier-engine-overdue");
        // A record whose due time passed while the process was down.
        let mut overdue =
            ScheduledMessage::new("6281234567890", "late", Utc::now() - chrono::Duration::seconds(45));
        overdue.created_at = Utc::now() - chrono::Duration::seconds(90);
        overdue.updated_at = overdue.created_at;
        store.save(overdue.clone()).unwrap();

        let channel = MockChannel::new(true);
        let engine = DispatchEngine::new(store, Arc::clone(&channel) as Arc<dyn Channel>, fast_retry());
        assert_eq!(engine.start().unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(channel.sent(), vec![("6281234567890".into(), "late".into())]);
        assert_eq!(engine.get(&overdue.id).unwrap().status, MessageStatus::Sent);
        cleanup(&path);
    }

    #[tokio::test]
    async fn test_send_now() {
        let channel = MockChannel::new(true);
        let (engine, path) = test_engine("courier-engine-sendnow", Arc::clone(&channel));

        engine.send_now("6281234567890", "direct").await.unwrap();
        assert_eq!(channel.sent(), vec![("6281234567890".into(), "direct".into())]);

        assert!(matches!(
            engine.send_now("abc", "direct").await,
            Err(CourierError::InvalidInput(_))
        ));

        channel.set_ready(false);
        assert!(matches!(
            engine.send_now("6281234567890", "direct").await,
            Err(CourierError::ChannelUnavailable(_))
        ));
        cleanup(&path);
    }
}
