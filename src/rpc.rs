//! Inbound RPC payload shapes and the `get_context` tool's section selector.
//! Transport and registration with a host's RPC surface are out of scope —
//! this module only defines and validates the value types a host binds to.

use crate::model::DeviceEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const INVALID_PARAMS: i32 = -32602;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PingResult {
    pub ok: bool,
    pub version: String,
    pub initialized: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventParams {
    pub subscription_id: String,
    pub source: String,
    #[serde(default)]
    pub data: HashMap<String, f64>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    pub fired_at: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventAck {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContextSection {
    Device,
    Activity,
    Patterns,
    Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetContextParams {
    #[serde(default)]
    pub include: Option<Vec<ContextSection>>,
}

impl GetContextParams {
    pub fn sections(&self) -> Vec<ContextSection> {
        self.include.clone().unwrap_or_else(|| {
            vec![ContextSection::Device, ContextSection::Activity, ContextSection::Patterns, ContextSection::Meta]
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self { code: INVALID_PARAMS, message: message.into() }
    }
}

/// Validates and converts `betterclaw.event` params into a `DeviceEvent`,
/// defaulting `firedAt` to `now` if the caller omits it. Returns the
/// `INVALID_PARAMS` error on empty `subscriptionId`/`source`.
pub fn validate_event(params: EventParams, now: f64) -> Result<DeviceEvent, RpcError> {
    if params.subscription_id.trim().is_empty() {
        return Err(RpcError::invalid_params("subscriptionId must not be empty"));
    }
    if params.source.trim().is_empty() {
        return Err(RpcError::invalid_params("source must not be empty"));
    }
    Ok(DeviceEvent {
        subscription_id: params.subscription_id,
        source: params.source,
        data: params.data,
        metadata: params.metadata,
        fired_at: params.fired_at.unwrap_or(now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_event_rejects_empty_subscription_id() {
        let params = EventParams { subscription_id: "".into(), source: "device.battery".into(), data: HashMap::new(), metadata: None, fired_at: None };
        let err = validate_event(params, 1.0).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn validate_event_rejects_empty_source() {
        let params = EventParams { subscription_id: "default.custom".into(), source: "  ".into(), data: HashMap::new(), metadata: None, fired_at: None };
        assert!(validate_event(params, 1.0).is_err());
    }

    #[test]
    fn validate_event_defaults_fired_at_to_now() {
        let params = EventParams { subscription_id: "default.custom".into(), source: "custom.source".into(), data: HashMap::new(), metadata: None, fired_at: None };
        let event = validate_event(params, 42.0).unwrap();
        assert_eq!(event.fired_at, 42.0);
    }

    #[test]
    fn get_context_params_defaults_to_all_sections() {
        let params = GetContextParams { include: None };
        assert_eq!(params.sections().len(), 4);
    }
}
