//! Canonical argument encoding and cache keys
//!
//! Normalization lowercases object keys, sorts them, and trims string
//! leaves. The result is idempotent: `canonicalize(canonicalize(v)) ==
//! canonicalize(v)`.

use crate::descriptor::OpRef;
use ring::digest;
use serde_json::{Map, Value};

pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            // serde_json's default Map is ordered by key, so insertion sorts.
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.to_lowercase(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

/// Compact JSON of the canonical form.
pub fn canonical_string(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// SHA-256 hex of the canonical arguments.
pub fn arg_hash(args: &Value) -> String {
    hex(digest::digest(&digest::SHA256, canonical_string(args).as_bytes()).as_ref())
}

/// Stable key for `(op_ref, normalized args)`.
pub fn cache_key(op: &OpRef, args: &Value) -> String {
    let material = format!("{}\n{}", op, canonical_string(args));
    hex(digest::digest(&digest::SHA256, material.as_bytes()).as_ref())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_lowercased_sorted_and_strings_trimmed() {
        let v = json!({"Tienda": "  SAN BRNRDO ", "SKU": "WUXACC0001"});
        assert_eq!(canonical_string(&v), r#"{"sku":"WUXACC0001","tienda":"SAN BRNRDO"}"#);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let v = json!({"B": [{"Z": " x "}, 2], "a": {"Q": true}});
        let once = canonicalize(&v);
        assert_eq!(canonicalize(&once), once);
    }

    #[test]
    fn cache_key_depends_on_op_and_normalized_args() {
        let op = OpRef::new("catalog", "product_by_sku");
        let a = cache_key(&op, &json!({"sku": "WUXACC0001"}));
        let b = cache_key(&op, &json!({"SKU": " WUXACC0001"}));
        let c = cache_key(&OpRef::new("catalog", "stock_by_sku"), &json!({"sku": "WUXACC0001"}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn string_values_keep_case() {
        let v = json!({"q": "Filtro"});
        assert_eq!(canonicalize(&v)["q"], "Filtro");
    }
}
