//! Caller identity used to key rate limits.

use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    User,
    ApiKey,
    Ip,
    Anonymous,
}

/// Stable identity string for one client, such as `user:42` or `ip:203.0.113.7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    kind: IdentityKind,
    key: String,
}

/// Raw request facts the identity is resolved from.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub remote_addr: Option<String>,
}

impl ClientInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Pick up `X-Forwarded-For` and `X-Real-IP` from request headers
    /// (names compared case-insensitively).
    pub fn with_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("x-forwarded-for") {
                self.forwarded_for = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("x-real-ip") {
                self.real_ip = Some(value.to_string());
            }
        }
        self
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Identity {
    /// Resolve in order: authenticated user, API key, first `X-Forwarded-For`
    /// hop, `X-Real-IP`, connection address. Falls back to a shared anonymous
    /// identity.
    ///
    /// API keys are hashed so secrets never end up in store keys or logs.
    pub fn resolve(info: &ClientInfo) -> Self {
        if let Some(user) = non_empty(info.user_id.as_deref()) {
            return Self::user(user);
        }
        if let Some(key) = non_empty(info.api_key.as_deref()) {
            return Self::api_key(key);
        }
        let forwarded = info
            .forwarded_for
            .as_deref()
            .and_then(|v| non_empty(v.split(',').next()));
        let ip = forwarded
            .or_else(|| non_empty(info.real_ip.as_deref()))
            .or_else(|| non_empty(info.remote_addr.as_deref()));
        match ip {
            Some(ip) => Self {
                kind: IdentityKind::Ip,
                key: format!("ip:{ip}"),
            },
            None => Self::anonymous(),
        }
    }

    pub fn user(id: &str) -> Self {
        Self {
            kind: IdentityKind::User,
            key: format!("user:{id}"),
        }
    }

    pub fn api_key(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let short: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        Self {
            kind: IdentityKind::ApiKey,
            key: format!("key:{short}"),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            kind: IdentityKind::Anonymous,
            key: "anonymous".to_string(),
        }
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
