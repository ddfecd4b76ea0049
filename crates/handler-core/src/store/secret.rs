use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::experiment::ObjectMeta;

/// Key holding the token in notification secrets.
pub const TOKEN_KEY: &str = "token";

/// A secret: base64 encoded `data` plus plain `stringData`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

impl Secret {
    /// Creates a secret from plain values.
    pub fn from_string_data<K, V>(name: &str, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            metadata: ObjectMeta { name: name.to_string(), ..Default::default() },
            data: BTreeMap::new(),
            string_data: values.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Decoded payload. `stringData` entries win over `data` entries.
    ///
    /// Values that are not valid base64 UTF-8 are skipped with a warning.
    pub fn decoded(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        for (key, encoded) in &self.data {
            match STANDARD.decode(encoded.trim()).map(String::from_utf8) {
                Ok(Ok(value)) => {
                    values.insert(key.clone(), value);
                }
                _ => warn!(
                    secret = %self.metadata.name,
                    key = %key,
                    "Skipping undecodable secret value"
                ),
            }
        }
        values.extend(self.string_data.iter().map(|(k, v)| (k.clone(), v.clone())));
        values
    }

    /// Decoded value of one key.
    pub fn value(&self, key: &str) -> Option<String> {
        self.decoded().remove(key)
    }

    /// The non-empty `token` value, if any.
    pub fn token(&self) -> Option<String> {
        self.value(TOKEN_KEY).filter(|t| !t.is_empty())
    }
}
