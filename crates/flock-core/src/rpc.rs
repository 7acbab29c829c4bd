//! Adoption Protocol Messages
//!
//! Requests and responses exchanged between a controller and a node's
//! adoption endpoint. On the wire each message is a JSON document tagged by
//! method:
//!
//! ```text
//! {"method": "adopt", "body": {"cluster_token": "...", "controller_address": "...", "role": "agent"}}
//! {"method": "heartbeat", "body": {}}
//! {"method": "error", "body": {"message": "..."}}
//! ```

use crate::mode::Role;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Claim request sent by a controller to a pending node.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoptRequest {
    /// Join credential minted for this claim
    pub cluster_token: String,
    /// Address the node should use to reach the controller's control plane
    pub controller_address: String,
    pub role: Role,
    /// Pre-shared bootstrap secret, when the flock requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret: Option<String>,
}

impl fmt::Debug for AdoptRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdoptRequest")
            .field("cluster_token", &"<redacted>")
            .field("controller_address", &self.controller_address)
            .field("role", &self.role)
            .field("bootstrap_secret", &self.bootstrap_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Answer to an [`AdoptRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoptResponse {
    pub accepted: bool,
    pub message: String,
}

impl AdoptResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
        }
    }
}

/// Liveness probe from a controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

/// Heartbeat answer; `reconfigure` asks the controller to re-push settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub reconfigure: bool,
}

/// Request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "body", rename_all = "lowercase")]
pub enum RpcRequest {
    Adopt(AdoptRequest),
    Heartbeat(HeartbeatRequest),
}

impl RpcRequest {
    pub fn method(&self) -> &'static str {
        match self {
            RpcRequest::Adopt(_) => "adopt",
            RpcRequest::Heartbeat(_) => "heartbeat",
        }
    }
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "body", rename_all = "lowercase")]
pub enum RpcResponse {
    Adopt(AdoptResponse),
    Heartbeat(HeartbeatResponse),
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_shape() {
        let request = RpcRequest::Adopt(AdoptRequest {
            cluster_token: "K10abc::server:def".to_string(),
            controller_address: "10.0.0.1".to_string(),
            role: Role::Agent,
            bootstrap_secret: None,
        });

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["method"], "adopt");
        assert_eq!(value["body"]["role"], "agent");
        assert!(value["body"].get("bootstrap_secret").is_none());
    }

    #[test]
    fn test_empty_fields_survive_encoding() {
        let request = RpcRequest::Adopt(AdoptRequest {
            cluster_token: String::new(),
            controller_address: String::new(),
            role: Role::Controller,
            bootstrap_secret: Some(String::new()),
        });
        let bytes = serde_json::to_vec(&request).unwrap();
        let decoded: RpcRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, request);

        let response = RpcResponse::Adopt(AdoptResponse::rejected(""));
        let bytes = serde_json::to_vec(&response).unwrap();
        let decoded: RpcResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_heartbeat_envelope() {
        let json = r#"{"method":"heartbeat","body":{}}"#;
        let request: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request, RpcRequest::Heartbeat(HeartbeatRequest {}));
        assert_eq!(request.method(), "heartbeat");
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let request = AdoptRequest {
            cluster_token: "secret-token".to_string(),
            controller_address: "10.0.0.1".to_string(),
            role: Role::Agent,
            bootstrap_secret: Some("psk".to_string()),
        };
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("psk"));
        assert!(rendered.contains("10.0.0.1"));
    }
}
