//! Claim Admission
//!
//! Decides whether an inbound claim may be considered at all. The default
//! lets any reachable host claim a pending node; `PresharedSecret` requires
//! the claim to carry the flock's bootstrap secret.

use flock_core::AdoptRequest;
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub trait Authenticator: Send + Sync {
    /// `Err` carries the reason reported back to the caller.
    fn authorize(&self, peer: SocketAddr, request: &AdoptRequest) -> Result<(), String>;
}

/// Admits every claim.
#[derive(Debug, Clone, Default)]
pub struct OpenNetwork;

impl Authenticator for OpenNetwork {
    fn authorize(&self, _peer: SocketAddr, _request: &AdoptRequest) -> Result<(), String> {
        Ok(())
    }
}

/// Admits claims carrying the configured bootstrap secret.
#[derive(Clone)]
pub struct PresharedSecret {
    secret: Vec<u8>,
}

impl PresharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().into_bytes(),
        }
    }
}

impl Authenticator for PresharedSecret {
    fn authorize(&self, _peer: SocketAddr, request: &AdoptRequest) -> Result<(), String> {
        let presented = request.bootstrap_secret.as_deref().unwrap_or_default().as_bytes();
        if bool::from(presented.ct_eq(&self.secret)) {
            Ok(())
        } else {
            Err("bootstrap secret mismatch".to_string())
        }
    }
}

/// `PresharedSecret` when a secret is configured, otherwise `OpenNetwork`.
pub fn authenticator_for(secret: Option<&str>) -> Arc<dyn Authenticator> {
    match secret {
        Some(secret) if !secret.is_empty() => Arc::new(PresharedSecret::new(secret)),
        _ => Arc::new(OpenNetwork),
    }
}
