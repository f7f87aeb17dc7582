use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use tokio::net::TcpListener;

use crate::{
    model::device::{Device, DeviceStore, InMemoryDeviceStore},
    monitor::{
        clock::Clock,
        debounce::DebounceTracker,
        probe::{ProbeOutcome, Prober},
        service::DeviceStatusService,
    },
    notify::{
        alert::{AlertDispatcher, AlertSettings},
        broadcast::{BroadcastError, StatusSink},
    },
};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn device(id: i32, name: &str, is_online: bool) -> Device {
    Device {
        id,
        name: name.to_string(),
        address: format!("10.0.0.{id}"),
        port: 502,
        is_online,
        last_communication: start_time(),
    }
}

pub fn store_with(devices: Vec<Device>) -> Arc<InMemoryDeviceStore> {
    let store = InMemoryDeviceStore::new();
    for device in devices {
        store.insert(device);
    }
    Arc::new(store)
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        *self.now.lock().unwrap() += chrono::Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Prober whose outcome is set per address. Unknown addresses are reachable.
#[derive(Default)]
pub struct ScriptedProber {
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
    probes: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &str, outcome: ProbeOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(address.to_string(), outcome);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, address: &str, _port: u16) -> ProbeOutcome {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or(ProbeOutcome::Reachable)
    }

    async fn send_command(&self, device: &Device, command: &str) -> String {
        format!("{} <- {}", device.name, command)
    }
}

/// In-memory store that refuses status writes for selected devices.
pub struct FailingStore {
    inner: Arc<InMemoryDeviceStore>,
    failing_ids: HashSet<i32>,
}

impl FailingStore {
    pub fn new(inner: Arc<InMemoryDeviceStore>, failing_ids: &[i32]) -> Self {
        Self {
            inner,
            failing_ids: failing_ids.iter().copied().collect(),
        }
    }
}

#[async_trait]
impl DeviceStore for FailingStore {
    async fn list(&self) -> anyhow::Result<Vec<Device>> {
        self.inner.list().await
    }

    async fn get(&self, id: i32) -> anyhow::Result<Option<Device>> {
        self.inner.get(id).await
    }

    async fn save_status(&self, device: &Device) -> anyhow::Result<()> {
        if self.failing_ids.contains(&device.id) {
            return Err(anyhow!("database unavailable"));
        }
        self.inner.save_status(device).await
    }
}

/// Subscriber that keeps every payload it is sent.
#[derive(Default)]
pub struct RecordingSink {
    pub received: Mutex<Vec<Arc<str>>>,
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn send(&self, payload: Arc<str>) -> Result<(), BroadcastError> {
        self.received.lock().unwrap().push(payload);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Subscriber that never finishes a send.
pub struct StalledSink;

#[async_trait]
impl StatusSink for StalledSink {
    async fn send(&self, _payload: Arc<str>) -> Result<(), BroadcastError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Webhook receiver: `/ok` records bodies, `/fail` answers 500.
#[derive(Default)]
pub struct WebhookLog {
    pub received: Mutex<Vec<serde_json::Value>>,
    pub failures: AtomicUsize,
}

async fn accept_webhook(
    State(log): State<Arc<WebhookLog>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    log.received.lock().unwrap().push(body);
    StatusCode::OK
}

async fn reject_webhook(State(log): State<Arc<WebhookLog>>) -> (StatusCode, &'static str) {
    log.failures.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "robot disabled")
}

pub async fn spawn_webhook_server() -> (SocketAddr, Arc<WebhookLog>) {
    let log = Arc::new(WebhookLog::default());
    let app = Router::new()
        .route("/ok", post(accept_webhook))
        .route("/fail", post(reject_webhook))
        .with_state(log.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, log)
}

pub fn dispatcher_for(webhook_urls: Vec<String>) -> Arc<AlertDispatcher> {
    Arc::new(AlertDispatcher::new(
        reqwest::Client::new(),
        AlertSettings {
            webhook_urls,
            timezone: chrono_tz::UTC,
        },
    ))
}

pub struct TestMonitor {
    pub store: Arc<InMemoryDeviceStore>,
    pub prober: Arc<ScriptedProber>,
    pub clock: Arc<ManualClock>,
    pub service: Arc<DeviceStatusService>,
}

/// Status service over an in-memory store, scripted prober and manual clock.
pub fn test_monitor(devices: Vec<Device>, confirmation_window: Duration) -> TestMonitor {
    test_monitor_alerting(devices, confirmation_window, dispatcher_for(vec![]))
}

pub fn test_monitor_alerting(
    devices: Vec<Device>,
    confirmation_window: Duration,
    dispatcher: Arc<AlertDispatcher>,
) -> TestMonitor {
    let store = store_with(devices);
    let prober = Arc::new(ScriptedProber::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let service = Arc::new(DeviceStatusService::new(
        store.clone(),
        prober.clone(),
        DebounceTracker::new(confirmation_window),
        clock.clone(),
        dispatcher,
    ));

    TestMonitor {
        store,
        prober,
        clock,
        service,
    }
}
