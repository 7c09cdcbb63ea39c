//! Ordered environment parameters.

use serde::{Deserialize, Serialize};

/// A single environment parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvParam {
    /// Parameter name.
    pub key: String,
    /// Parameter value.
    pub value: String,
}

impl EnvParam {
    /// Creates a new parameter.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An ordered list of environment parameters with unique keys.
///
/// Insertion order is preserved; setting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvParams(Vec<EnvParam>);

impl EnvParams {
    /// Creates an empty parameter list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing an existing value with the same key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|p| p.key == key) {
            Some(existing) => existing.value = value,
            None => self.0.push(EnvParam { key, value }),
        }
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Gets a parameter value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|p| p.key == key).map(|p| p.value.as_str())
    }

    /// Merges `overrides` on top of `self`.
    ///
    /// Keys already present keep their position and take the override value;
    /// new keys are appended in the override's order.
    #[must_use]
    pub fn merged_with(&self, overrides: &Self) -> Self {
        let mut merged = self.clone();
        for param in &overrides.0 {
            merged.set(param.key.clone(), param.value.clone());
        }
        merged
    }

    /// Iterates the parameters in order.
    pub fn iter(&self) -> impl Iterator<Item = &EnvParam> {
        self.0.iter()
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.set(key, value);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_replaces_in_place() {
        let mut params = EnvParams::new().with("A", "1").with("B", "2");
        params.set("A", "3");

        let keys: Vec<_> = params.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert_eq!(params.get("A"), Some("3"));
    }

    #[test]
    fn test_merge_preserves_order() {
        let pipeline: EnvParams = [("BRANCH", "main"), ("TARGET", "x86")].into_iter().collect();
        let action: EnvParams = [("TARGET", "arm"), ("SUITE", "smoke")].into_iter().collect();

        let merged = pipeline.merged_with(&action);
        assert_eq!(
            merged,
            [("BRANCH", "main"), ("TARGET", "arm"), ("SUITE", "smoke")]
                .into_iter()
                .collect::<EnvParams>()
        );
    }

    #[test]
    fn test_serializes_as_list() {
        let params = EnvParams::new().with("K", "V");
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, serde_json::json!([{"key": "K", "value": "V"}]));
    }
}
