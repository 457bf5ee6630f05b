//! WhatsApp channel backed by a self-hosted HTTP bridge.
//!
//! The bridge owns the real WhatsApp session — QR pairing, browser session,
//! reconnects — and exposes it over a small REST API (sessions, sendText,
//! contact checks). This adapter is plain HTTP against that API, the same
//! shape as running signal-cli behind its REST server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;

use courier_core::config::WhatsAppConfig;
use courier_core::error::{CourierError, Result};
use courier_core::traits::{Channel, ChannelEvent};

/// Session state reported by the bridge.
#[derive(Debug, Deserialize)]
struct SessionStatus {
    status: String,
}

impl SessionStatus {
    /// The bridge reports WORKING once the session is paired and usable;
    /// anything else (STARTING, SCANNING_QR, FAILED, STOPPED) is not ready.
    fn is_working(&self) -> bool {
        self.status.eq_ignore_ascii_case("working")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckExists {
    number_exists: bool,
}

/// WhatsApp bridge channel adapter.
pub struct WhatsAppBridgeChannel {
    config: WhatsAppConfig,
    client: reqwest::Client,
    ready: AtomicBool,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
    events: broadcast::Sender<ChannelEvent>,
}

impl WhatsAppBridgeChannel {
    pub fn new(config: WhatsAppConfig, reconnect_attempts: u32, reconnect_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            config,
            client: reqwest::Client::new(),
            ready: AtomicBool::new(false),
            reconnect_attempts,
            reconnect_delay,
            events,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.is_empty() {
            builder
        } else {
            builder.header("X-Api-Key", &self.config.api_key)
        }
    }

    async fn session_status(&self) -> Result<SessionStatus> {
        let url = self.url(&format!("sessions/{}", self.config.session));
        let response = self
            .request(self.client.get(&url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CourierError::Channel(format!("bridge status request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CourierError::Channel(format!(
                "bridge status error {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CourierError::Channel(format!("invalid bridge status response: {e}")))
    }

    /// Ask the bridge to restart the session.
    async fn restart_session(&self) -> Result<()> {
        let url = self.url(&format!("sessions/{}/restart", self.config.session));
        let response = self
            .request(self.client.post(&url))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| CourierError::Channel(format!("bridge restart failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(CourierError::Channel(format!(
                "bridge restart error {status}"
            )));
        }
        Ok(())
    }

    /// Connect with bounded fixed-delay retry. Succeeds only once the bridge
    /// session reports WORKING.
    pub async fn connect(&self) -> Result<()> {
        let mut last_error: Option<CourierError> = None;
        for attempt in 1..=self.reconnect_attempts {
            match self.session_status().await {
                Ok(status) if status.is_working() => {
                    self.mark_ready();
                    tracing::info!(
                        "✅ WhatsApp bridge session '{}' is ready",
                        self.config.session
                    );
                    return Ok(());
                }
                Ok(status) => {
                    last_error = Some(CourierError::ChannelUnavailable(format!(
                        "session '{}' is {}",
                        self.config.session, status.status
                    )));
                }
                Err(e) => last_error = Some(e),
            }
            if attempt < self.reconnect_attempts {
                tracing::warn!(
                    "⚠️ WhatsApp bridge not ready (attempt {attempt}/{}), retrying",
                    self.reconnect_attempts
                );
                tokio::time::sleep(self.reconnect_delay).await;
            }
        }
        Err(last_error
            .unwrap_or_else(|| CourierError::Channel("bridge unreachable".into())))
    }

    /// Poll the bridge session and publish ready/disconnected transitions.
    /// On an observed disconnect it also asks the bridge to restart the
    /// session, with the same bounded retry as `connect`.
    pub fn spawn_watcher(self: &Arc<Self>) {
        let adapter = Arc::clone(self);
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match adapter.session_status().await {
                    Ok(status) if status.is_working() => {
                        adapter.mark_ready();
                    }
                    Ok(status) => {
                        if adapter.mark_disconnected(&status.status) {
                            adapter.try_reconnect().await;
                        }
                    }
                    Err(e) => {
                        adapter.mark_disconnected(&e.to_string());
                    }
                }
            }
        });
    }

    async fn try_reconnect(&self) {
        for attempt in 1..=self.reconnect_attempts {
            match self.restart_session().await {
                Ok(()) => {
                    tracing::info!("🔄 WhatsApp bridge session restart requested");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Session restart failed (attempt {attempt}/{}): {e}",
                        self.reconnect_attempts
                    );
                }
            }
            if attempt < self.reconnect_attempts {
                tokio::time::sleep(self.reconnect_delay).await;
            }
        }
    }

    /// Returns true when this call flipped the state.
    fn mark_ready(&self) -> bool {
        let flipped = !self.ready.swap(true, Ordering::SeqCst);
        if flipped {
            let _ = self.events.send(ChannelEvent::Ready);
        }
        flipped
    }

    /// Returns true when this call flipped the state.
    fn mark_disconnected(&self, reason: &str) -> bool {
        let flipped = self.ready.swap(false, Ordering::SeqCst);
        if flipped {
            let _ = self.events.send(ChannelEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
        flipped
    }

    async fn check_number_exists(&self, number: &str) -> Result<bool> {
        let response = self
            .request(self.client.get(self.url("contacts/check-exists")))
            .query(&[("phone", number), ("session", self.config.session.as_str())])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CourierError::Channel(format!("bridge contact check failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(CourierError::Channel(format!(
                "bridge contact check error {status}"
            )));
        }

        let body: CheckExists = response
            .json()
            .await
            .map_err(|e| CourierError::Channel(format!("invalid contact check response: {e}")))?;
        Ok(body.number_exists)
    }
}

#[async_trait]
impl Channel for WhatsAppBridgeChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let number = normalize_msisdn(to, &self.config.country_code)?;
        if !self.check_number_exists(&number).await? {
            return Err(CourierError::NotFound(
                "Phone number is not registered on WhatsApp".into(),
            ));
        }

        let payload = serde_json::json!({
            "session": self.config.session,
            "chatId": format!("{number}@c.us"),
            "text": body,
        });
        let response = self
            .request(self.client.post(self.url("sendText")))
            .json(&payload)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| CourierError::SendFailed(format!("bridge send failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CourierError::SendFailed(format!(
                "bridge send error {status}: {text}"
            )));
        }

        tracing::debug!("WhatsApp message sent → {number}");
        Ok(())
    }

    async fn is_registered(&self, to: &str) -> Result<bool> {
        let number = normalize_msisdn(to, &self.config.country_code)?;
        self.check_number_exists(&number).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

/// Normalize a phone number to international digits: strip everything that
/// is not a digit, drop a leading "0", and prepend `country_code` when it is
/// missing.
pub fn normalize_msisdn(raw: &str, country_code: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(CourierError::InvalidInput(
            "recipient contains no digits".into(),
        ));
    }
    if digits.starts_with(country_code) {
        return Ok(digits);
    }
    match digits.strip_prefix('0') {
        Some(rest) => Ok(format!("{country_code}{rest}")),
        None => Ok(format!("{country_code}{digits}")),
    }
}
