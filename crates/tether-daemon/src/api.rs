//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tether_core::{ChangeType, HardwareAddress, RegistryError};
use tether_engine::PresenceEvent;
use tracing::info;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn parse_address(raw: &str) -> Result<HardwareAddress, axum::response::Response> {
    raw.parse::<HardwareAddress>().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(format!("Invalid hardware address: {e}"))),
        )
            .into_response()
    })
}

/// List all tracked devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let devices = state.registry.list_devices().await;
    Json(devices)
}

/// Get one device by hardware address
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
) -> impl IntoResponse {
    let address = match parse_address(&addr) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match state.registry.find_by_address(&address).await {
        Some(device) => Json(device).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Device not found")),
        )
            .into_response(),
    }
}

/// Explicit registration request body
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub address: String,
    pub name: String,
}

/// Explicitly register a device. Create-if-absent: an existing record
/// is returned unchanged with 200, a new one with 201.
pub async fn register_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let address = match parse_address(&req.address) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    match state.registry.register(address, req.name).await {
        Ok((device, created)) => {
            if created {
                info!(address = %device.address, name = %device.display_name(), "Device registered");
                let _ = state
                    .reconciler
                    .event_sender()
                    .send(PresenceEvent::DeviceRegistered(device.clone()));
                (StatusCode::CREATED, Json(device)).into_response()
            } else {
                (StatusCode::OK, Json(device)).into_response()
            }
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("Registration failed: {e}"))),
        )
            .into_response(),
    }
}

/// Registration-completion request body
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub name: String,
}

/// Complete a pending registration. Cannot create: 404 if the address
/// has no record, 409 if the record already completed registration.
pub async fn complete_registration(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
    Json(req): Json<CompleteRequest>,
) -> impl IntoResponse {
    let address = match parse_address(&addr) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    match state.registry.complete_registration(&address, req.name).await {
        Ok(device) => {
            let _ = state
                .reconciler
                .event_sender()
                .send(PresenceEvent::DeviceRegistered(device.clone()));
            Json(device).into_response()
        }
        Err(RegistryError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("No such pending device")),
        )
            .into_response(),
        Err(RegistryError::NotPending(_)) => (
            StatusCode::CONFLICT,
            Json(ApiError::new("Device is not pending registration")),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("Completion failed: {e}"))),
        )
            .into_response(),
    }
}

/// Forget a device: remove the registry record and drop the pairing
pub async fn forget_device(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
) -> impl IntoResponse {
    let address = match parse_address(&addr) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    match state.registry.remove(&address).await {
        Ok(Some(_)) => {
            info!(address = %address, "Forget device requested");
            state.reconciler.clear_failure_streak(&address).await;
            if let Err(e) = state.prober.remove_pairing(&address).await {
                // Registry removal already happened; pairing cleanup is
                // best-effort
                tracing::warn!(address = %address, error = %e, "Failed to remove pairing");
            }
            let _ = state
                .reconciler
                .event_sender()
                .send(PresenceEvent::DeviceRemoved(address.clone()));
            Json(serde_json::json!({
                "status": "removed",
                "address": address.as_str(),
            }))
            .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Device not found")),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("Remove failed: {e}"))),
        )
            .into_response(),
    }
}

/// Change-log entry joined with device display context
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub id: uuid::Uuid,
    pub address: HardwareAddress,
    pub device_name: Option<String>,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

/// Change log, newest first, with display names for devices that still
/// exist
pub async fn list_changes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let changes = state.registry.list_changes().await;
    let mut entries = Vec::with_capacity(changes.len());
    for record in changes {
        let device_name = state
            .registry
            .find_by_address(&record.address)
            .await
            .map(|d| d.display_name());
        entries.push(ChangeEntry {
            id: record.id,
            address: record.address,
            device_name,
            change_type: record.change_type,
            timestamp: record.timestamp,
            details: record.details,
        });
    }
    Json(entries)
}

/// Run the grace-period expiry sweep now
pub async fn trigger_sweep(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual expiry sweep triggered");
    match state.sweeper().expire_once().await {
        Ok(deleted) => Json(serde_json::json!({
            "status": "completed",
            "deletedCount": deleted,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("Sweep failed: {e}"))),
        )
            .into_response(),
    }
}

/// Liveness probe, unauthenticated
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
