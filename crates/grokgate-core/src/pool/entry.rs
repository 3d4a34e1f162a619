//! Credential records held by the pool.

use serde::{Deserialize, Serialize};

use crate::models::Tier;

/// Session identity extracted from a raw cookie string. Parsing fails
/// closed: a token without a non-empty `sso=` value cannot be enrolled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SsoId(String);

impl SsoId {
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.split_once("sso=")?.1;
        let value = rest.split(';').next().unwrap_or("");
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SsoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One credential in one model family's queue. Counters are per family;
/// the same raw token appears in several queues with independent counts.
#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub token: String,
    pub max_request_count: u32,
    pub request_count: u32,
    pub added_at_ms: i64,
    /// Set on first use; quota windows are lazy.
    pub first_used_at_ms: Option<i64>,
    pub is_super: bool,
}

impl TokenEntry {
    pub fn new(token: &str, max_request_count: u32, tier: Tier, now_ms: i64) -> Self {
        Self {
            token: token.to_string(),
            max_request_count,
            request_count: 0,
            added_at_ms: now_ms,
            first_used_at_ms: None,
            is_super: tier == Tier::Super,
        }
    }

    pub fn tier(&self) -> Tier {
        if self.is_super {
            Tier::Super
        } else {
            Tier::Normal
        }
    }
}

/// Persisted validity view, keyed by (session identity, model family).
/// Field names match the on-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStatus {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(rename = "invalidatedTime")]
    pub invalidated_at_ms: Option<i64>,
    #[serde(rename = "totalRequestCount")]
    pub total_request_count: u64,
    #[serde(rename = "isSuper")]
    pub is_super: bool,
}

impl TokenStatus {
    pub fn fresh(tier: Tier) -> Self {
        Self {
            is_valid: true,
            invalidated_at_ms: None,
            total_request_count: 0,
            is_super: tier == Tier::Super,
        }
    }
}

/// A credential removed from a family queue, awaiting recovery once its
/// retirement age exceeds the family's expiration window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetiredToken {
    pub token: String,
    pub family: String,
    pub retired_at_ms: i64,
    pub is_super: bool,
}

impl RetiredToken {
    pub fn tier(&self) -> Tier {
        if self.is_super {
            Tier::Super
        } else {
            Tier::Normal
        }
    }
}
