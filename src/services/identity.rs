// src/services/identity.rs

//! Visitor identity derivation.
//!
//! The raw IP, user agent and visitor token never leave this module: the
//! recorder only ever sees their SHA-256 digest.

use http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::models::VisitorHash;

/// Placeholder for a missing IP address or user agent.
pub const UNKNOWN: &str = "unknown";

/// Header carrying the client-generated visitor token.
pub const VISITOR_ID_HEADER: &str = "x-visitor-id";

/// Request metadata from which a visitor hash is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorIdentity {
    pub ip: String,
    pub user_agent: String,
    pub visitor_token: String,
}

impl VisitorIdentity {
    pub fn new(
        ip: impl Into<String>,
        user_agent: impl Into<String>,
        visitor_token: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
            visitor_token: visitor_token.into(),
        }
    }

    /// Extract the identity from request headers.
    ///
    /// IP: first `x-forwarded-for` entry, else `cf-connecting-ip`, else
    /// `"unknown"`. User agent falls back to `"unknown"`, the visitor token
    /// to an empty string.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = header_str(headers, "user-agent").unwrap_or(UNKNOWN);
        let visitor_token = header_str(headers, VISITOR_ID_HEADER).unwrap_or("");
        Self::new(client_ip(headers), user_agent, visitor_token)
    }

    /// Whether none of the three signals carries information.
    pub fn is_anonymous(&self) -> bool {
        self.ip == UNKNOWN && self.user_agent == UNKNOWN && self.visitor_token.is_empty()
    }

    /// Digest of `"{ip}:{user_agent}:{visitor_token}"` as lowercase hex.
    pub fn hash(&self) -> VisitorHash {
        let mut hasher = Sha256::new();
        hasher.update(self.ip.as_bytes());
        hasher.update(b":");
        hasher.update(self.user_agent.as_bytes());
        hasher.update(b":");
        hasher.update(self.visitor_token.as_bytes());
        VisitorHash::from_hex(hex::encode(hasher.finalize()))
    }
}

/// Best-effort client IP from proxy headers.
pub fn client_ip(headers: &HeaderMap) -> String {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "cf-connecting-ip"))
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Non-empty, visible-ASCII header value.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
