//! Device Status Poller
//!
//! Walks every device on a fixed interval, probing them one at a time, and
//! hands the cycle's transitions and snapshots to the notifiers.

use std::sync::Arc;

use anyhow::Context;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::notify::broadcast::StatusBroadcaster;

use super::{
    service::DeviceStatusService,
    status::{StatusSnapshot, TransitionEvent},
};

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    /// Pause between two consecutive devices of the same cycle.
    pub inter_device_delay: Duration,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub snapshots: Vec<StatusSnapshot>,
    pub transitions: Vec<TransitionEvent>,
    pub persistence_failures: usize,
    /// Cancellation arrived before every device was checked.
    pub cancelled: bool,
}

#[derive(Clone)]
pub struct StatusPoller {
    service: Arc<DeviceStatusService>,
    broadcaster: StatusBroadcaster,
    settings: PollerSettings,
}

impl StatusPoller {
    pub fn new(
        service: Arc<DeviceStatusService>,
        broadcaster: StatusBroadcaster,
        settings: PollerSettings,
    ) -> Self {
        Self {
            service,
            broadcaster,
            settings,
        }
    }

    /// Main polling loop. Only returns once `shutdown` is cancelled and the
    /// alert batches already started have been delivered.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            "Device status poller started (interval: {:?}, confirmation window: {:?})",
            self.settings.poll_interval,
            self.service.tracker().confirmation_window()
        );

        loop {
            match self.run_cycle(&shutdown).await {
                Ok(report) => tracing::debug!(
                    "Poll cycle finished: {} device(s), {} transition(s), {} failed write(s)",
                    report.snapshots.len(),
                    report.transitions.len(),
                    report.persistence_failures
                ),
                Err(e) => tracing::error!("Error polling devices: {:#}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Device status poller shutting down");
                    break;
                }
                _ = sleep(self.settings.poll_interval) => {}
            }
        }

        self.service.wait_for_alerts().await;
    }

    /// One pass over all devices followed by alerting and broadcasting.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> anyhow::Result<CycleReport> {
        let devices = self
            .service
            .store()
            .list()
            .await
            .context("Failed to list devices")?;

        let mut report = CycleReport::default();
        if devices.is_empty() {
            tracing::debug!("No devices to poll");
            return Ok(report);
        }

        for (index, device) in devices.into_iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = sleep(self.settings.inter_device_delay) => {}
                }
            }

            let check = self.service.check_device(device).await;
            if !check.persisted {
                report.persistence_failures += 1;
            }
            report.snapshots.push(StatusSnapshot::from(&check.device));
            report.transitions.extend(check.transition);
        }

        self.notify(&report).await;
        Ok(report)
    }

    async fn notify(&self, report: &CycleReport) {
        self.service.notify_transitions(report.transitions.clone());

        // A partial snapshot list would tell subscribers that missing devices are gone.
        if !report.snapshots.is_empty() && !report.cancelled {
            let summary = self.broadcaster.broadcast(&report.snapshots).await;
            tracing::debug!(
                "Status broadcast delivered to {} subscriber(s), {} removed",
                summary.delivered,
                summary.removed
            );
        }
    }
}
