//! Alert Dispatcher
//!
//! Posts device transition messages to every configured chat webhook.

use chrono_tz::Tz;
use futures::future::join_all;
use indoc::formatdoc;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{error, info, warn};
use url::Url;

use crate::{
    monitor::status::{Direction, TransitionEvent},
    HttpClient,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub webhook_urls: Vec<String>,
    /// Zone used to render event times in messages.
    pub timezone: Tz,
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Failed to send notification: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Webhook responded with {status}: {body}")]
    ApiError { status: StatusCode, body: String },
}

/// Outcome of one delivery attempt.
#[derive(Debug)]
pub struct DeliveryReport {
    pub endpoint: Url,
    pub result: Result<(), AlertError>,
}

#[derive(Debug, Serialize)]
struct WebhookText {
    content: String,
}

#[derive(Debug, Serialize)]
struct WebhookMessage {
    msgtype: &'static str,
    text: WebhookText,
}

impl WebhookMessage {
    fn text(content: String) -> Self {
        Self {
            msgtype: "text",
            text: WebhookText { content },
        }
    }
}

pub struct AlertDispatcher {
    http_client: HttpClient,
    endpoints: Vec<Url>,
    timezone: Tz,
}

impl AlertDispatcher {
    pub fn new(http_client: HttpClient, settings: AlertSettings) -> Self {
        let endpoints = settings
            .webhook_urls
            .iter()
            .filter_map(|raw| match Url::parse(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("Ignoring invalid webhook URL {:?}: {}", raw, e);
                    None
                }
            })
            .collect();

        Self {
            http_client,
            endpoints,
            timezone: settings.timezone,
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn render(&self, event: &TransitionEvent) -> String {
        let time = event
            .occurred_at
            .with_timezone(&self.timezone)
            .format(TIME_FORMAT);

        match event.direction {
            Direction::WentOffline => formatdoc! {"
                ⚠️ [Device Offline]
                ❌ Name: {name}
                IP: {address}:{port}
                Time: {time}
                💡 Please investigate the cause immediately",
                name = event.name,
                address = event.address,
                port = event.port,
            },
            Direction::CameOnline => formatdoc! {"
                ✅ [Device Recovered]
                ✔ Name: {name}
                IP: {address}:{port}
                Time: {time}",
                name = event.name,
                address = event.address,
                port = event.port,
            },
        }
    }

    pub fn compose(&self, events: &[TransitionEvent]) -> String {
        events
            .iter()
            .map(|event| self.render(event))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Sends one combined message per endpoint. Endpoints are attempted
    /// concurrently and never retried.
    pub async fn dispatch(&self, events: &[TransitionEvent]) -> Vec<DeliveryReport> {
        if events.is_empty() {
            return Vec::new();
        }

        if self.endpoints.is_empty() {
            warn!(
                "No alert webhooks configured, skipping {} transition alert(s)",
                events.len()
            );
            return Vec::new();
        }

        let message = WebhookMessage::text(self.compose(events));
        let deliveries = self
            .endpoints
            .iter()
            .map(|endpoint| self.deliver(endpoint, &message));

        join_all(deliveries).await
    }

    async fn deliver(&self, endpoint: &Url, message: &WebhookMessage) -> DeliveryReport {
        let result = self.post(endpoint, message).await;

        match &result {
            Ok(()) => info!("Device alert delivered to webhook {}", redact(endpoint)),
            Err(e) => error!(
                "Device alert delivery to webhook {} failed: {}",
                redact(endpoint),
                e
            ),
        }

        DeliveryReport {
            endpoint: endpoint.clone(),
            result,
        }
    }

    async fn post(&self, endpoint: &Url, message: &WebhookMessage) -> Result<(), AlertError> {
        let response = self
            .http_client
            .post(endpoint.clone())
            .json(message)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AlertError::ApiError { status, body })
        }
    }
}

/// Webhook URLs usually carry an access token in the query string.
fn redact(endpoint: &Url) -> String {
    format!(
        "{}://{}{}",
        endpoint.scheme(),
        endpoint.host_str().unwrap_or_default(),
        endpoint.path()
    )
}
