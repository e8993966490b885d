use crate::app::AppState;
use crate::broker::{BrokerError, CAR_QUEUE, CHARGE_QUEUE};
use crate::models::telemetry::{ChargeTelemetry, VehicleTelemetry};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to publish to {queue}: {source}")]
    Publish {
        queue: &'static str,
        failure_body: &'static str,
        #[source]
        source: BrokerError,
    },
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::InvalidJson(_) => {
                (StatusCode::BAD_REQUEST, "Invalid JSON\n").into_response()
            }
            IngestError::Encode(e) => {
                warn!(error = %e, "Failed to encode payload");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode JSON\n").into_response()
            }
            IngestError::Publish {
                queue,
                failure_body,
                source,
            } => {
                warn!(queue, error = %source, "Failed to publish message");
                (StatusCode::INTERNAL_SERVER_ERROR, failure_body).into_response()
            }
        }
    }
}

/// Where one kind of telemetry goes and what the caller is told.
struct Route {
    queue: &'static str,
    accepted_body: &'static str,
    failure_body: &'static str,
}

const CAR: Route = Route {
    queue: CAR_QUEUE,
    accepted_body: "Data received and queued\n",
    failure_body: "Failed to send message\n",
};

const CHARGE: Route = Route {
    queue: CHARGE_QUEUE,
    accepted_body: "Charge data received and queued\n",
    failure_body: "Failed to send charge message\n",
};

pub async fn ingest_car(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, IngestError> {
    relay::<VehicleTelemetry>(&state, &CAR, &body).await
}

pub async fn ingest_charge(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, IngestError> {
    relay::<ChargeTelemetry>(&state, &CHARGE, &body).await
}

/// Decode into `T`, re-encode, publish. The body is parsed by hand so every
/// decode failure maps to 400 regardless of Content-Type.
async fn relay<T>(state: &AppState, route: &Route, body: &[u8]) -> Result<Response, IngestError>
where
    T: DeserializeOwned + Serialize + Default,
{
    let record: T = decode_record(body).map_err(IngestError::InvalidJson)?;
    let payload = serde_json::to_vec(&record).map_err(IngestError::Encode)?;
    let logged = String::from_utf8_lossy(&payload).into_owned();

    state
        .publisher
        .publish(route.queue, payload)
        .await
        .map_err(|source| IngestError::Publish {
            queue: route.queue,
            failure_body: route.failure_body,
            source,
        })?;

    info!(queue = route.queue, payload = %logged, "Sent message to broker");
    Ok((StatusCode::ACCEPTED, route.accepted_body).into_response())
}

/// Parses a record leniently: `null` yields the zero record and a key repeated
/// within the object keeps its last value. Anything but an object or `null`
/// is rejected.
fn decode_record<T>(body: &[u8]) -> Result<T, serde_json::Error>
where
    T: DeserializeOwned + Default,
{
    // Going through `Value` collapses duplicate keys, last one wins
    match serde_json::from_slice::<Option<Value>>(body)? {
        None => Ok(T::default()),
        Some(object @ Value::Object(_)) => T::deserialize(object),
        Some(_) => Err(de::Error::custom("expected a JSON object")),
    }
}

pub async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Only POST allowed\n")
}
