// Geotab telemetry client (MyGeotab JSON-RPC API)
//
// Endpoints:
// - All calls go to: https://{server}/apiv1
// - Authenticate: method "Authenticate", params { userName, password, database }
// - Device status: method "Get", params { typeName: "DeviceStatusInfo",
//   search, credentials }
//
// Authentication happens exactly once at startup; the resulting session
// credentials ride along on every subsequent call. There is no implicit
// re-authentication; an expired session surfaces as a fetch failure.

use chrono::DateTime;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::shuttle_models::{Result, TrackerError, VehiclePosition};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeotabConfig {
    pub username: String,
    pub password: String,
    pub database: String,
    pub server: String,
}

impl GeotabConfig {
    pub const DEFAULT_DATABASE: &'static str = "nycsbus";
    pub const DEFAULT_SERVER: &'static str = "afmfe.att.com";

    /// Reads credentials from the environment. The username and password are
    /// secrets and have no defaults; database and server are fixed deployment
    /// values that can be overridden.
    pub fn from_env() -> Result<Self> {
        let username = std::env::var("GEOTAB_USERNAME").map_err(|_| {
            TrackerError::AuthenticationFailure("GEOTAB_USERNAME is not set".to_string())
        })?;
        let password = std::env::var("GEOTAB_PASSWORD").map_err(|_| {
            TrackerError::AuthenticationFailure("GEOTAB_PASSWORD is not set".to_string())
        })?;
        let database =
            std::env::var("GEOTAB_DATABASE").unwrap_or_else(|_| Self::DEFAULT_DATABASE.to_string());
        let server =
            std::env::var("GEOTAB_SERVER").unwrap_or_else(|_| Self::DEFAULT_SERVER.to_string());

        Ok(GeotabConfig {
            username,
            password,
            database,
            server,
        })
    }
}

// ============================================================================
// Client
// ============================================================================

/// Authenticated handle to the Geotab API. Constructed once via
/// `authenticate` and passed by reference to everything that fetches
/// positions; holds no mutable state after construction.
pub struct GeotabClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    credentials: Value,
}

impl GeotabClient {
    pub fn authenticate(config: &GeotabConfig) -> Result<GeotabClient> {
        let http = crate::shuttle_models::create_http_client()
            .map_err(|e| TrackerError::AuthenticationFailure(e.to_string()))?;

        let endpoint = format!("https://{}/apiv1", config.server);

        let body = json!({
            "method": "Authenticate",
            "params": {
                "userName": config.username,
                "password": config.password,
                "database": config.database,
            }
        });

        let response = http
            .post(&endpoint)
            .json(&body)
            .send()
            .map_err(|e| TrackerError::AuthenticationFailure(format!("Request failed: {}", e)))?;

        let json: Value = response.json().map_err(|e| {
            TrackerError::AuthenticationFailure(format!("Invalid JSON response: {}", e))
        })?;

        if let Some(error) = json.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown error");
            return Err(TrackerError::AuthenticationFailure(message.to_string()));
        }

        let credentials = json["result"]["credentials"].clone();
        if credentials.is_null() {
            return Err(TrackerError::AuthenticationFailure(
                "No session credentials in response".to_string(),
            ));
        }

        Ok(GeotabClient {
            http,
            endpoint,
            credentials,
        })
    }

    fn get_device_statuses(&self, search: Value) -> Result<Vec<Value>> {
        let body = json!({
            "method": "Get",
            "params": {
                "typeName": "DeviceStatusInfo",
                "search": search,
                "credentials": self.credentials,
            }
        });

        let response = self.http.post(&self.endpoint).json(&body).send().map_err(|e| {
            TrackerError::DataUnavailable(format!("Failed to fetch device status: {}", e))
        })?;

        let json: Value = response.json().map_err(|e| {
            TrackerError::DataUnavailable(format!("Invalid JSON response: {}", e))
        })?;

        if let Some(error) = json.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown error");
            return Err(TrackerError::DataUnavailable(format!(
                "Geotab error: {}",
                message
            )));
        }

        let statuses = json["result"]
            .as_array()
            .ok_or_else(|| TrackerError::DataUnavailable("Missing result data".to_string()))?;

        Ok(statuses.clone())
    }

    /// Single-vehicle mode. The caller always gets a complete position or an
    /// explicit PositionUnavailable, never a partial record.
    pub fn vehicle_position(&self, vehicle_id: &str) -> Result<VehiclePosition> {
        let statuses =
            self.get_device_statuses(json!({ "deviceSearch": { "id": vehicle_id } }))?;

        let status = statuses.first().ok_or_else(|| {
            TrackerError::PositionUnavailable(format!(
                "No status data available for vehicle '{}'",
                vehicle_id
            ))
        })?;

        position_from_status(status).ok_or_else(|| {
            TrackerError::PositionUnavailable(format!(
                "Latitude or longitude is missing for vehicle '{}'",
                vehicle_id
            ))
        })
    }

    /// Fleet mode: every device with a valid fix, keyed by vehicle name.
    /// Devices without coordinates are dropped from the map entirely. An
    /// Err here (network, expired session) is distinct from an empty map,
    /// which just means nobody is currently reporting.
    pub fn fleet_positions(&self) -> Result<HashMap<String, VehiclePosition>> {
        let statuses = self.get_device_statuses(json!({}))?;
        Ok(parse_fleet_statuses(&statuses))
    }
}

// ============================================================================
// Status Record Parsing
// ============================================================================

/// Extracts a position from one DeviceStatusInfo record. Returns None when
/// latitude or longitude is absent; that is a normal state for a vehicle
/// with no current fix, not an error in the record.
pub fn position_from_status(status: &Value) -> Option<VehiclePosition> {
    let latitude = status["latitude"].as_f64()?;
    let longitude = status["longitude"].as_f64()?;

    let name = status["device"]["name"]
        .as_str()
        .or_else(|| status["device"]["id"].as_str())
        .unwrap_or("Unknown Vehicle")
        .to_string();

    let fix_time = status["dateTime"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp());

    Some(VehiclePosition {
        name,
        latitude,
        longitude,
        fix_time,
    })
}

/// Fleet-mode filter: keeps only devices with a valid fix.
pub fn parse_fleet_statuses(statuses: &[Value]) -> HashMap<String, VehiclePosition> {
    statuses
        .iter()
        .filter_map(position_from_status)
        .map(|position| (position.name.clone(), position))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
