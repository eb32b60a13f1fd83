//! Cache key generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Deterministic key for one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Route or endpoint the key belongs to; empty for raw keys.
    pub namespace: String,
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            hash: hash.into(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Key as stored in either tier.
    pub fn as_string(&self) -> String {
        if self.namespace.is_empty() {
            self.hash.clone()
        } else {
            format!("{}:{}", self.namespace, self.hash)
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.hash)
        } else {
            write!(f, "{}:{}", self.namespace, self.hash)
        }
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Builds cache keys from JSON request payloads.
///
/// Payloads are normalised first: object keys are sorted and volatile fields
/// are dropped at any depth, so two requests that differ only in field order
/// or in a timestamp share one entry.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    volatile_fields: BTreeSet<String>,
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self {
            volatile_fields: ["timestamp", "request_id", "nonce"]
                .into_iter()
                .map(String::from)
                .collect(),
            salt: None,
        }
    }

    pub fn with_volatile_field(mut self, field: impl Into<String>) -> Self {
        self.volatile_fields.insert(field.into());
        self
    }

    pub fn with_volatile_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.volatile_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Mixed into every hash; changing it invalidates all previous keys.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn canonical_form(&self, payload: &Value) -> String {
        let mut out = String::new();
        self.write_canonical(payload, &mut out);
        out
    }

    pub fn generate(&self, namespace: &str, payload: &Value) -> CacheKey {
        let mut hasher = Sha256::new();
        if let Some(ref salt) = self.salt {
            hasher.update(salt.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.canonical_form(payload).as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(hash).with_namespace(namespace)
    }

    fn write_canonical(&self, value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map
                    .keys()
                    .filter(|k| !self.volatile_fields.contains(k.as_str()))
                    .collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::from(key.as_str()).to_string());
                    out.push(':');
                    if let Some(v) = map.get(key) {
                        self.write_canonical(v, out);
                    }
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write_canonical(item, out);
                }
                out.push(']');
            }
            scalar => out.push_str(&scalar.to_string()),
        }
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ignores_field_order() {
        let gen = CacheKeyGenerator::new();
        let a = gen.generate("search", &json!({"q": "cat", "page": 2, "filters": {"b": 1, "a": 2}}));
        let b = gen.generate("search", &json!({"filters": {"a": 2, "b": 1}, "page": 2, "q": "cat"}));
        assert_eq!(a, b);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn test_volatile_fields_are_dropped_at_any_depth() {
        let gen = CacheKeyGenerator::new();
        let a = gen.generate("ai", &json!({"prompt": "hi", "timestamp": 1, "meta": {"nonce": "x"}}));
        let b = gen.generate("ai", &json!({"prompt": "hi", "timestamp": 2, "meta": {"nonce": "y"}}));
        assert_eq!(a, b);
        assert_eq!(gen.canonical_form(&json!({"meta": {"nonce": "x"}})), r#"{"meta":{}}"#);
    }

    #[test]
    fn test_namespace_and_content_distinguish_keys() {
        let gen = CacheKeyGenerator::new();
        let payload = json!({"q": "cat"});
        assert_ne!(gen.generate("search", &payload), gen.generate("images", &payload));
        assert_ne!(
            gen.generate("search", &payload),
            gen.generate("search", &json!({"q": "dog"}))
        );
        assert!(gen.generate("search", &payload).to_string().starts_with("search:"));
    }

    #[test]
    fn test_salt_changes_hash() {
        let payload = json!({"q": "cat"});
        let plain = CacheKeyGenerator::new().generate("s", &payload);
        let salted = CacheKeyGenerator::new().with_salt("v2").generate("s", &payload);
        assert_ne!(plain, salted);
    }
}
