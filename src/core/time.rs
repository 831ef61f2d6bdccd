//! Shared timestamp helpers for experiment naming and status envelopes.

use serde_json::Value as JsonValue;
use sha1::{Digest, Sha1};
use ulid::Ulid;

/// Unix-epoch seconds in UTC.
pub fn now_epoch_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    format!("{}Z", now_epoch_secs())
}

/// UTC wall-clock time in RFC 3339, for resource annotations.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// First 7 hex chars of the SHA-1 of a decimal unix timestamp.
pub fn timestamp_hash(epoch_secs: u64) -> String {
    let digest = Sha1::digest(epoch_secs.to_string().as_bytes());
    let hex = digest
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    hex[..7].to_string()
}

/// [`timestamp_hash`] of the current time.
pub fn now_2_hash() -> String {
    timestamp_hash(now_epoch_secs())
}

/// Random lowercase alphanumeric id, taken from the random half of a ULID.
pub fn random_id(len: usize) -> String {
    let ulid = Ulid::new().to_string().to_lowercase();
    let len = len.min(16);
    ulid[ulid.len() - len..].to_string()
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "ts": now_epoch_z(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}
