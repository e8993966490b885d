use serde::{Deserialize, Serialize};

/// Vehicle sensor reading posted to `/api/iot/car`.
///
/// `api_key` is carried through untouched and never checked.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VehicleTelemetry {
    pub device_id: String,
    pub api_key: String,
    pub temperature: f64,
    pub speed: f64,
}

/// Charging-station reading posted to `/api/iot/charge`.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChargeTelemetry {
    pub device_id: String,
    pub api_key: String,
    pub voltage: f64,
    pub current: f64,
}
