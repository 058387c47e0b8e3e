//! Handle Base (C6): the request/response primitive every typed handle is
//! built on.
//!
//! Grounded on the `UARequest::send` pattern of attaching a request header,
//! handing the serialised request to the channel, and resolving the
//! response against the service result carried in its header: here the
//! "service result" is the aggregated-acknowledgements envelope, and the
//! request header field that matters is `correlation-id` rather than a
//! numeric request handle.

use std::time::Duration;

use uuid::Uuid;

use crate::adaptable::Adaptable;
use crate::adapter::{ProtocolAdapter, Signal};
use crate::bus::AdaptableBus;
use crate::engine::{ConnectionEngine, EmitError};
use crate::errors::{ProtocolError, RequestError, RuntimeFault};

/// The default per-request timeout when a handle's caller does not override
/// it.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The label an aggregated-acknowledgements entry must carry for a
/// particular handle to treat it as the synthetic success response, e.g.
/// `"twin-persisted"`.
pub type ExpectedAckLabel = &'static str;

impl From<EmitError> for RequestError {
    fn from(err: EmitError) -> Self {
        match err {
            EmitError::ClientState(state) => RequestError::ClientState(state),
            EmitError::NotConnected => RequestError::NotConnected,
        }
    }
}

/// Send `signal` and resolve once its correlated response arrives,
/// classifying the response per the handle's declared success/error type
/// names.
///
/// `channel_live` rewrites the outgoing signal's headers for the `live`
/// channel before it is sent, stripping the three headers that are
/// meaningful only to the gateway. `expected_ack_label` names which entry of
/// an aggregated-acknowledgements envelope this handle treats as success,
/// should one arrive instead of `success_type`.
pub async fn send_and_expect(
    engine: &ConnectionEngine,
    adapter: &dyn ProtocolAdapter,
    signal: &dyn Signal,
    channel_live: bool,
    expected_ack_label: Option<ExpectedAckLabel>,
    success_type: &str,
    error_type: &str,
    timeout: Duration,
) -> Result<Adaptable, RequestError> {
    let mut adaptable = adapter.to_adaptable(signal)?;
    if channel_live {
        adaptable.rewrite_for_live_channel();
    }
    let correlation_id = adaptable
        .correlation_id()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    adaptable.set_correlation_id(correlation_id.clone());

    let waiter = engine
        .bus()
        .subscribe_once_for_adaptable(correlation_id, timeout);

    let text = adapter.to_json_string(&adaptable)?;
    engine.emit(text)?;

    let response = waiter.await?;
    classify_response(&response, expected_ack_label, success_type, error_type)
}

fn classify_response(
    response: &Adaptable,
    expected_ack_label: Option<ExpectedAckLabel>,
    success_type: &str,
    error_type: &str,
) -> Result<Adaptable, RequestError> {
    if let Some(acks) = try_aggregated_acks(response) {
        if acks.iter().any(|entry| entry.is_failure()) {
            return Err(ProtocolError::AcknowledgementsFailed(acks).into());
        }
        let label = expected_ack_label.unwrap_or_default();
        return acks
            .into_iter()
            .find(|entry| entry.label == label)
            .map(|_| response.clone())
            .ok_or(RequestError::Protocol(ProtocolError::TypeMismatch));
    }

    let action = response.topic_path.action.as_str();
    if action == error_type {
        return Err(extract_runtime_fault(response).into());
    }
    if action == success_type {
        return Ok(response.clone());
    }
    Err(RequestError::Protocol(ProtocolError::TypeMismatch))
}

/// An aggregated-acknowledgements envelope carries its entries as a JSON
/// array under `payload.acknowledgements`, each `{label, status}`. Any other
/// shape is not an acknowledgements envelope.
fn try_aggregated_acks(response: &Adaptable) -> Option<Vec<crate::bus::AckEntry>> {
    let entries = response.payload.get("acknowledgements")?.as_array()?;
    let mut acks = Vec::with_capacity(entries.len());
    for entry in entries {
        let label = entry.get("label")?.as_str()?.to_string();
        let status = entry.get("status")?.as_u64()? as u16;
        acks.push(crate::bus::AckEntry { label, status });
    }
    Some(acks)
}

fn extract_runtime_fault(response: &Adaptable) -> RuntimeFault {
    let status = response
        .payload
        .get("status")
        .and_then(|v| v.as_u64())
        .unwrap_or(500) as u16;
    let message = response
        .payload
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown runtime fault")
        .to_string();
    let error_code = response
        .payload
        .get("errorCode")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    RuntimeFault {
        status,
        message,
        error_code,
    }
}
