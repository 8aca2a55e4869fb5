//! Request fingerprinting
//!
//! A [`CacheKey`] is the SHA-256 digest of a logical request: the model
//! identifier, the payload and the parameter set. Payload and parameters are
//! reduced to canonical JSON (object keys sorted at every depth) and each
//! component is hashed with a tag and a length prefix, so neither map order
//! nor field boundaries can make two different requests share a key.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const KEY_DOMAIN: &[u8] = b"aicache/request/v1";

/// Deterministic fingerprint of a logical request
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive a key from a model identifier, payload and parameter set
    pub fn derive<P, Q>(model: &str, payload: &P, params: &Q) -> Result<Self>
    where
        P: Serialize + ?Sized,
        Q: Serialize + ?Sized,
    {
        if model.trim().is_empty() {
            return Err(CacheError::KeyDerivation(
                "model identifier is empty".to_string(),
            ));
        }

        let payload = to_canonical_json(payload, "payload")?;
        let params = to_canonical_json(params, "params")?;

        Ok(Self::from_parts(model.as_bytes(), &payload, &params))
    }

    /// Wrap a raw digest
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    fn from_parts(model: &[u8], payload: &[u8], params: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        for (tag, part) in [(b'm', model), (b'p', payload), (b'q', params)] {
            hasher.update([tag]);
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.short())
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| CacheError::KeyDerivation(format!("invalid key '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Builder for request fingerprints
///
/// Parameters are kept in a sorted map, so the order of `param` calls does
/// not affect the resulting key.
#[derive(Debug, Default)]
pub struct CacheKeyBuilder {
    model: String,
    payload: Option<Value>,
    params: BTreeMap<String, Value>,
    errors: Vec<String>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model identifier
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the request payload
    pub fn payload<P: Serialize + ?Sized>(mut self, payload: &P) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => self.payload = Some(value),
            Err(e) => self.errors.push(format!("payload: {}", e)),
        }
        self
    }

    /// Add a parameter to the key
    pub fn param<V: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &V) -> Self {
        let name = name.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.params.insert(name, value);
            }
            Err(e) => self.errors.push(format!("param '{}': {}", name, e)),
        }
        self
    }

    /// Build the cache key
    pub fn build(self) -> Result<CacheKey> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(CacheError::KeyDerivation(first));
        }

        let payload = self
            .payload
            .ok_or_else(|| CacheError::KeyDerivation("payload not set".to_string()))?;

        CacheKey::derive(&self.model, &payload, &self.params)
    }
}

fn to_canonical_json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)
        .map_err(|e| CacheError::KeyDerivation(format!("{}: {}", what, e)))?;
    let mut out = Vec::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, k)?;
                out.push(b':');
                write_canonical(v, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}
