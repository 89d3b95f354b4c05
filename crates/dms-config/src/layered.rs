//! Layered YAML loading, secret-literal guard and config hashing.
//!
//! Documents are deep-merged in order (later overrides earlier). The merged
//! document is serialized canonically (keys sorted at every level) and
//! hashed so the effective configuration can be identified in logs.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Prefixes that mark a leaf string as a credential: PEM keys, mail-provider
/// API keys used as SMTP passwords, generic API keys. Credentials never live
/// in YAML; only the *name* of the environment variable holding them does.
const SECRET_PREFIXES: &[&str] = &["-----BEGIN", "SG.", "xkeysib-", "sk-", "AKIA"];

/// Leaves holding mail addresses or login names. These are validated as
/// addresses elsewhere and may legitimately start with any prefix above.
const ADDRESS_LEAVES: &[&str] = &["/operator", "/recipients", "/smtp/username"];

/// Keys whose values are credentials whatever they look like.
const SECRET_KEYS: &[&str] = &["password", "pass", "secret", "token"];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml<P: AsRef<Path>>(paths: &[P]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let p = p.as_ref();
        let raw = fs::read_to_string(p)
            .with_context(|| format!("failed to read yaml path: {}", p.display()))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty document parses as null; treat it as an empty layer.
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }
    finish(merged)
}

/// Apply one more layer (typically CLI overrides) on top of a loaded config.
/// Unset (`null`) fields in `layer` are dropped first, so an empty layer is a
/// no-op and the config hash is unchanged.
pub fn overlay(base: LoadedConfig, layer: Value) -> Result<LoadedConfig> {
    finish(deep_merge(base.config_json, prune_nulls(layer)))
}

fn prune_nulls(v: Value) -> Value {
    match v {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| {
                    let v = prune_nulls(v);
                    let unset = v.is_null() || v.as_object().is_some_and(|m| m.is_empty());
                    (!unset).then_some((k, v))
                })
                .collect(),
        ),
        other => other,
    }
}

fn finish(merged: Value) -> Result<LoadedConfig> {
    if !merged.is_object() {
        bail!("CONFIG_INVALID: top-level yaml must be a mapping");
    }
    enforce_no_secret_literals(&merged)?;

    let canonical_json =
        serde_json::to_string(&sorted(&merged)).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

pub(crate) fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                let merged = deep_merge(a_val, b_val);
                if !merged.is_null() {
                    a_map.insert(k, merged);
                }
            }
            Value::Object(a_map)
        }
        // Null in an override layer means "not set", not "erase".
        (a_other, Value::Null) => a_other,
        (_, b_other) => b_other,
    }
}

/// Key-sorted copy, independent of whether serde_json preserves insertion order.
fn sorted(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), sorted(v))).collect())
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_string_leaves(v, "", &mut leaves);

    for (ptr, s) in leaves {
        let key = ptr.rsplit('/').next().unwrap_or_default();
        if SECRET_KEYS.contains(&key) || (!is_address_leaf(&ptr) && looks_like_secret(s)) {
            bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
        }
    }
    Ok(())
}

fn collect_string_leaves<'a>(v: &'a Value, prefix: &str, out: &mut Vec<(String, &'a str)>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, k.replace('~', "~0").replace('/', "~1"));
                collect_string_leaves(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                collect_string_leaves(vv, &format!("{}/{}", prefix, i), out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.as_str())),
        _ => {}
    }
}

fn is_address_leaf(ptr: &str) -> bool {
    ADDRESS_LEAVES.iter().any(|leaf| {
        ptr.strip_prefix(leaf)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}
