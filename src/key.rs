//! Cache key derivation.
//!
//! Keys have the form `{namespace}:{sha256-hex}` where the digest covers a
//! canonical JSON form of the operation id and its parameters. Parameters are
//! held in a `BTreeMap`, so the order in which they were supplied never
//! affects the key.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::CacheError;

/// A scalar parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v.into())
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::Int(v.into())
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map_or(Scalar::Null, Into::into)
    }
}

#[derive(Serialize)]
struct Canonical<'a> {
    op: &'a str,
    params: &'a BTreeMap<String, Scalar>,
}

/// Derive the cache key for `(namespace, operation_id, params)`.
///
/// Fails only for values with no canonical JSON form (non-finite floats).
/// When a parameter name repeats, the last value wins.
pub fn derive_key<I, K, V>(namespace: &str, operation_id: &str, params: I) -> Result<String, CacheError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Scalar>,
{
    let mut sorted = BTreeMap::new();
    for (name, value) in params {
        let name = name.into();
        let value = value.into();
        if let Scalar::Float(f) = value
            && !f.is_finite()
        {
            return Err(CacheError::InvalidParameter {
                name,
                reason: format!("{} has no JSON representation", f),
            });
        }
        sorted.insert(name, value);
    }

    let canonical = serde_json::to_string(&Canonical {
        op: operation_id,
        params: &sorted,
    })
    .map_err(|e| CacheError::Serialization(format!("Key canonicalization failed: {}", e)))?;

    let digest = Sha256::digest(canonical.as_bytes());
    Ok(format!("{}:{}", namespace, hex::encode(digest)))
}
