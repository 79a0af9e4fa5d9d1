//! Entities: the principals an acquisition run works on behalf of.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable unique key of an entity (e.g. a phone-number-like string).
///
/// Used for set membership in [`crate::RunState`] and for result reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One principal plus the attempt parameters handed to the executor.
///
/// `params` is opaque to the core; only the executor interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique key.
    pub key: EntityKey,

    /// Human-readable name used in logs and notifications.
    #[serde(default)]
    pub label: Option<String>,

    /// Executor-specific attempt parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Entity {
    pub fn new(key: impl Into<EntityKey>) -> Self {
        Self {
            key: key.into(),
            label: None,
            params: serde_json::Value::Null,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Label if present, otherwise the key.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(self.key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_name_prefers_label() {
        let e = Entity::new("13800000000").with_label("alice");
        assert_eq!(e.display_name(), "alice");

        let e = Entity::new("13800000001");
        assert_eq!(e.display_name(), "13800000001");
    }

    #[test]
    fn test_entity_deserializes_with_defaults() {
        let e: Entity = serde_json::from_value(json!({ "key": "k1" })).unwrap();
        assert_eq!(e.key, EntityKey::new("k1"));
        assert!(e.label.is_none());
        assert!(e.params.is_null());
    }

    #[test]
    fn test_key_serializes_transparently() {
        let key = EntityKey::new("abc");
        assert_eq!(serde_json::to_value(&key).unwrap(), json!("abc"));
    }
}
