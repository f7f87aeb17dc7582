use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{
    error::MonitorError,
    model::device::{Device, DeviceStore},
    notify::AlertDispatcher,
};

use super::{
    clock::Clock,
    debounce::{DebounceState, DebounceTracker, Decision},
    probe::{ProbeOutcome, Prober},
    status::{Direction, TransitionEvent},
};

/// Result of checking one device.
#[derive(Debug, Clone)]
pub struct DeviceCheck {
    /// The device with its new verdict and check time applied.
    pub device: Device,
    pub was_online: bool,
    pub decision: Decision,
    pub transition: Option<TransitionEvent>,
    pub persisted: bool,
}

/// Probe, debounce and persist for a single device. Shared by the poll loop
/// and on-demand checks so both go through the same tracker and both alert.
pub struct DeviceStatusService {
    store: Arc<dyn DeviceStore>,
    prober: Arc<dyn Prober>,
    tracker: DebounceTracker,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<AlertDispatcher>,
    alert_tasks: TaskTracker,
}

impl DeviceStatusService {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        prober: Arc<dyn Prober>,
        tracker: DebounceTracker,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            store,
            prober,
            tracker,
            clock,
            dispatcher,
            alert_tasks: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    pub fn tracker(&self) -> &DebounceTracker {
        &self.tracker
    }

    pub async fn check_device(&self, device: Device) -> DeviceCheck {
        let was_online = device.is_online;
        let outcome = self.prober.probe(&device.address, device.port).await;
        let now = self.clock.now();

        match &outcome {
            ProbeOutcome::Reachable => {}
            ProbeOutcome::Unreachable => info!(
                "Device {} ({}) did not answer within the probe timeout",
                device.name,
                device.endpoint()
            ),
            ProbeOutcome::Errored(cause) => warn!(
                "Probe of device {} ({}) failed: {}",
                device.name,
                device.endpoint(),
                cause
            ),
        }

        let decision = self.tracker.observe(device.id, &outcome, now);
        if decision.state == DebounceState::PendingOffline
            && decision.next_window.map(|w| w.first_failure_at) == Some(now)
        {
            info!(
                "Device {} ({}) failed its first probe, waiting {:?} before marking it offline",
                device.name,
                device.endpoint(),
                self.tracker.confirmation_window()
            );
        }

        let mut device = device;
        device.is_online = decision.is_online;
        device.last_communication = now;

        let transition = TransitionEvent::between(&device, was_online, now);
        if let Some(event) = &transition {
            match event.direction {
                Direction::WentOffline => warn!(
                    "Device {} ({}) went offline",
                    device.name,
                    device.endpoint()
                ),
                Direction::CameOnline => info!(
                    "Device {} ({}) is back online",
                    device.name,
                    device.endpoint()
                ),
            }
        }

        let persisted = match self.store.save_status(&device).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to save status for device {} ({}): {:#}",
                    device.id, device.name, e
                );
                false
            }
        };

        debug!(
            "Device {} checked: {} ({})",
            device.id, decision.state, outcome_label(&outcome)
        );

        DeviceCheck {
            device,
            was_online,
            decision,
            transition,
            persisted,
        }
    }

    /// On-demand check of one device, persisted like a poll cycle.
    pub async fn check_now(&self, device_id: i32) -> Result<bool, MonitorError> {
        let device = self
            .store
            .get(device_id)
            .await?
            .ok_or(MonitorError::DeviceNotFound(device_id))?;

        let check = self.check_device(device).await;
        self.notify_transitions(check.transition.into_iter().collect());
        Ok(check.device.is_online)
    }

    /// Delivers alerts in the background so callers never wait on webhooks.
    pub fn notify_transitions(&self, events: Vec<TransitionEvent>) {
        if events.is_empty() {
            return;
        }

        let dispatcher = self.dispatcher.clone();
        self.alert_tasks.spawn(async move {
            dispatcher.dispatch(&events).await;
        });
    }

    /// Waits for every alert batch started so far to finish delivering.
    pub async fn wait_for_alerts(&self) {
        self.alert_tasks.close();
        self.alert_tasks.wait().await;
        self.alert_tasks.reopen();
    }

    pub async fn send_command(&self, device_id: i32, command: &str) -> Result<String, MonitorError> {
        let device = self
            .store
            .get(device_id)
            .await?
            .ok_or(MonitorError::DeviceNotFound(device_id))?;

        info!(
            "Sending command to device {} ({})",
            device.name,
            device.endpoint()
        );
        Ok(self.prober.send_command(&device, command).await)
    }
}

fn outcome_label(outcome: &ProbeOutcome) -> &'static str {
    match outcome {
        ProbeOutcome::Reachable => "reachable",
        ProbeOutcome::Unreachable => "timed out",
        ProbeOutcome::Errored(_) => "errored",
    }
}
