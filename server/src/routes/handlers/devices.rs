use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppJsonResult},
    model::device::{Device, DeviceStore},
    monitor::{status::StatusSnapshot, DeviceStatusService},
};

pub async fn handler_list_devices(
    State(store): State<Arc<dyn DeviceStore>>,
) -> AppJsonResult<Vec<Device>> {
    let devices = store.list().await?;
    Ok(Json(devices))
}

pub async fn handler_get_device(
    Path(id): Path<i32>,
    State(store): State<Arc<dyn DeviceStore>>,
) -> AppJsonResult<Device> {
    let device = store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Device {} not found", id)))?;

    Ok(Json(device))
}

/// Last persisted verdict of every device. Does not probe.
pub async fn handler_device_statuses(
    State(store): State<Arc<dyn DeviceStore>>,
) -> AppJsonResult<Vec<StatusSnapshot>> {
    let devices = store.list().await?;
    Ok(Json(devices.iter().map(StatusSnapshot::from).collect()))
}

pub async fn handler_check_device_status(
    Path(id): Path<i32>,
    State(service): State<Arc<DeviceStatusService>>,
) -> AppJsonResult<bool> {
    let is_online = service.check_now(id).await?;
    Ok(Json(is_online))
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub response: String,
}

pub async fn handler_send_command(
    Path(id): Path<i32>,
    State(service): State<Arc<DeviceStatusService>>,
    Json(request): Json<CommandRequest>,
) -> AppJsonResult<CommandResponse> {
    let command = request.command.trim();
    if command.is_empty() {
        return Err(AppError::BadRequest("Command must not be empty".to_string()));
    }

    let response = service.send_command(id, command).await?;
    Ok(Json(CommandResponse { response }))
}
