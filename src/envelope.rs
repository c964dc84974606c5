//! The three-layer envelope codec (spec §4.1).
//!
//! `pack` builds the outgoing envelope: encrypt the inner record to the
//! recipient, then sign the routing header around it. `unpack` reverses
//! that in a single [`CryptoOracle::decrypt`] call (the oracle is trusted
//! to peel every signature/encryption layer it encounters) and then runs
//! the schema and policy checks that turn "some bytes came in" into either
//! a silent drop, a hard error, or a normalized [`IncomingRequest`].
//!
//! This module never interprets `host`/`client`/`service` as policy — it
//! only checks that the party who encrypted the inner layer is the party
//! the inner layer claims to be (the confused-deputy guard in spec §6).
//! Consent and routing decisions belong to [`crate::engine`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::CryptoOracle;
use crate::error::SantiagoError;
use crate::identity::{Identity, Location, ServiceName};

/// Keys that must be present and non-null in every inner record.
pub const REQUIRED_KEYS: &[&str] = &[
    "host",
    "client",
    "service",
    "request_version",
    "reply_versions",
];

/// Keys that, when present, must be JSON arrays.
pub const LIST_KEYS: &[&str] = &["reply_to", "locations", "reply_versions"];

/// The canonical payload carried inside the encrypted (innermost) layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InnerRecord {
    pub host: Identity,
    pub client: Identity,
    pub service: ServiceName,
    pub request_version: u32,
    pub reply_versions: Vec<u32>,
    #[serde(default)]
    pub reply_to: Vec<Location>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

/// A normalized, validated inbound message: the typed [`InnerRecord`] plus
/// the two fields the codec synthesizes on unpack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub host: Identity,
    pub client: Identity,
    pub service: ServiceName,
    pub request_version: u32,
    pub reply_versions: Vec<u32>,
    pub reply_to: Vec<Location>,
    pub locations: Vec<Location>,
    /// The inner layer's encrypting signer — the original client (for a
    /// request) or host (for a reply). Never the proxy that relayed it.
    pub from: Identity,
    /// Always our own identity; present for symmetry with `from` and so
    /// callers don't need to thread `me` through separately.
    pub to: Identity,
}

/// Build the outgoing three-layer envelope for `inner`, addressed to `to`.
///
/// Layer C: `inner` is encrypted to `to` and signed by `me`. Layer B: the
/// routing header `{"request": <layer C>, "to": to}` is signed by `me`
/// (unencrypted, so a proxy can read `to` without decrypting anything). A
/// proxy hop would wrap the result in a further signature (layer A); this
/// crate's [`crate::engine::SantiagoEngine::proxy`] does not perform that
/// wrap since it no-ops by default.
pub fn pack(
    inner: &InnerRecord,
    to: &Identity,
    me: &Identity,
    crypto: &dyn CryptoOracle,
) -> Result<String, SantiagoError> {
    let inner_bytes = serde_json::to_vec(inner)?;
    let encrypted = crypto.encrypt(&inner_bytes, to, me)?;

    let routing = serde_json::json!({ "request": encrypted, "to": to });
    let routing_bytes = serde_json::to_vec(&routing)?;
    crypto.sign(&routing_bytes, me)
}

/// Unpack an incoming envelope into a normalized [`IncomingRequest`].
///
/// Returns `Ok(None)` for every condition spec §4.1 calls a silent drop:
/// no signer on the inner layer, a missing/null required key, a listy
/// field that isn't a list, an unsupported version, or a confused-deputy
/// mismatch. Returns `Err(SantiagoError::InvalidEnvelope)` only when the
/// blob fails to decrypt/verify at all, decrypts to nothing, or doesn't
/// even parse as a JSON object.
pub fn unpack(
    blob: &str,
    me: &Identity,
    crypto: &dyn CryptoOracle,
    supported_versions: &HashSet<u32>,
) -> Result<Option<IncomingRequest>, SantiagoError> {
    // Layer B: the outer routing header, signed (not encrypted) by whoever
    // handed us this blob directly, so a relay could read `to` without
    // being able to decrypt the inner record.
    let (routing_bytes, _outer_signer) = crypto
        .verify(blob)
        .map_err(|e| SantiagoError::InvalidEnvelope(e.to_string()))?;
    let routing: Value = serde_json::from_slice(&routing_bytes)
        .map_err(|e| SantiagoError::InvalidEnvelope(format!("malformed routing header: {e}")))?;
    let encrypted = routing
        .get("request")
        .and_then(Value::as_str)
        .ok_or_else(|| SantiagoError::InvalidEnvelope("routing header missing `request`".into()))?;
    let addressed_to = routing.get("to").and_then(Value::as_str);
    if addressed_to != Some(me.as_str()) {
        return Ok(None);
    }

    // Layer C: the inner record, encrypted to us and signed by its author.
    let (decrypted, inner_signer) = crypto
        .decrypt(encrypted)
        .map_err(|e| SantiagoError::InvalidEnvelope(e.to_string()))?;

    if decrypted.is_empty() {
        return Err(SantiagoError::InvalidEnvelope("empty decrypted payload".into()));
    }

    let Some(from) = inner_signer else {
        return Ok(None);
    };

    let value: Value = serde_json::from_slice(&decrypted)
        .map_err(|e| SantiagoError::InvalidEnvelope(format!("not valid JSON: {e}")))?;
    let Value::Object(mut obj) = value else {
        return Err(SantiagoError::InvalidEnvelope(
            "inner record is not a JSON object".into(),
        ));
    };

    for key in REQUIRED_KEYS {
        match obj.get(*key) {
            None | Some(Value::Null) => return Ok(None),
            _ => {}
        }
    }

    for key in LIST_KEYS {
        match obj.get(*key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(_)) => {}
            Some(_) => return Ok(None),
        }
    }

    // Optional-key tolerance: null is equivalent to `[]` (spec §8, property 4).
    for key in ["reply_to", "locations"] {
        if matches!(obj.get(key), None | Some(Value::Null)) {
            obj.insert(key.to_string(), Value::Array(Vec::new()));
        }
    }

    let record: InnerRecord = serde_json::from_value(Value::Object(obj))
        .map_err(|e| SantiagoError::InvalidEnvelope(format!("schema mismatch: {e}")))?;

    if !supported_versions.contains(&record.request_version) {
        return Ok(None);
    }
    let reply_versions: HashSet<u32> = record.reply_versions.iter().copied().collect();
    if reply_versions.is_disjoint(supported_versions) {
        return Ok(None);
    }

    // Confused-deputy guard (spec §6): the inner encrypting signer must be
    // the claimed client (request: `locations` empty) or host (reply).
    let expected_signer = if record.locations.is_empty() {
        &record.client
    } else {
        &record.host
    };
    if *expected_signer != from {
        return Ok(None);
    }

    Ok(Some(IncomingRequest {
        host: record.host,
        client: record.client,
        service: record.service,
        request_version: record.request_version,
        reply_versions: record.reply_versions,
        reply_to: record.reply_to,
        locations: record.locations,
        from,
        to: me.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::FakeCryptoOracle;

    fn versions() -> HashSet<u32> {
        [1].into_iter().collect()
    }

    #[test]
    fn roundtrip_request() {
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        let alice_crypto = FakeCryptoOracle::new(alice.clone());
        let bob_crypto = FakeCryptoOracle::new(bob.clone());

        let inner = InnerRecord {
            host: bob.clone(),
            client: alice.clone(),
            service: ServiceName::from("chat"),
            request_version: 1,
            reply_versions: vec![1],
            reply_to: vec![Location::from("https://alice.example")],
            locations: vec![],
        };

        let blob = pack(&inner, &bob, &alice, &alice_crypto).unwrap();
        let record = unpack(&blob, &bob, &bob_crypto, &versions()).unwrap().unwrap();

        assert_eq!(record.host, bob);
        assert_eq!(record.client, alice);
        assert_eq!(record.from, alice);
        assert_eq!(record.to, bob);
        assert!(record.locations.is_empty());
    }

    #[test]
    fn roundtrip_reply() {
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        let alice_crypto = FakeCryptoOracle::new(alice.clone());
        let bob_crypto = FakeCryptoOracle::new(bob.clone());

        let inner = InnerRecord {
            host: bob.clone(),
            client: alice.clone(),
            service: ServiceName::from("chat"),
            request_version: 1,
            reply_versions: vec![1],
            reply_to: vec![Location::from("https://bob.example")],
            locations: vec![Location::from("https://bob.example/chat")],
        };

        let blob = pack(&inner, &alice, &bob, &bob_crypto).unwrap();
        let record = unpack(&blob, &alice, &alice_crypto, &versions()).unwrap().unwrap();

        assert_eq!(record.from, bob);
        assert_eq!(record.locations, vec![Location::from("https://bob.example/chat")]);
    }

    #[test]
    fn tampered_envelope_is_silent_or_error_never_panics() {
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        let alice_crypto = FakeCryptoOracle::new(alice.clone());
        let bob_crypto = FakeCryptoOracle::new(bob.clone());

        let inner = InnerRecord {
            host: bob.clone(),
            client: alice.clone(),
            service: ServiceName::from("chat"),
            request_version: 1,
            reply_versions: vec![1],
            reply_to: vec![],
            locations: vec![],
        };
        let blob = pack(&inner, &bob, &alice, &alice_crypto).unwrap();

        // Delete a line from the armor.
        let tampered: String = blob
            .lines()
            .enumerate()
            .filter(|(i, _)| *i != 2)
            .map(|(_, l)| l)
            .collect::<Vec<_>>()
            .join("\n");

        let result = unpack(&tampered, &bob, &bob_crypto, &versions());
        assert!(matches!(result, Err(SantiagoError::InvalidEnvelope(_))));
    }

    #[test]
    fn required_key_removal_drops_silently() {
        let bob = Identity::from("bob");
        let bob_crypto = FakeCryptoOracle::new(bob.clone());
        let payload = serde_json::json!({
            "client": "alice",
            "service": "chat",
            "request_version": 1,
            "reply_versions": [1],
        });
        let blob = bob_crypto
            .encrypt(&serde_json::to_vec(&payload).unwrap(), &bob, &Identity::from("alice"))
            .unwrap();
        // Re-sign as the outer routing layer the way `pack` would.
        let routing = serde_json::json!({ "request": blob, "to": bob.as_str() });
        let alice_crypto = FakeCryptoOracle::new(Identity::from("alice"));
        let outer = alice_crypto
            .sign(&serde_json::to_vec(&routing).unwrap(), &Identity::from("alice"))
            .unwrap();

        // Signed by alice but addressed/encrypted to bob: decrypt must be
        // run from bob's oracle since it is keyed to the `recipient` field.
        let bob_outer_crypto = FakeCryptoOracle::new(bob.clone());
        let result = unpack(&outer, &bob, &bob_outer_crypto, &versions()).unwrap();
        assert!(result.is_none(), "missing `host` key must drop silently");
    }

    #[test]
    fn version_mismatch_drops_silently() {
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        let alice_crypto = FakeCryptoOracle::new(alice.clone());
        let bob_crypto = FakeCryptoOracle::new(bob.clone());

        let inner = InnerRecord {
            host: bob.clone(),
            client: alice.clone(),
            service: ServiceName::from("chat"),
            request_version: 1,
            reply_versions: vec![99],
            reply_to: vec![],
            locations: vec![],
        };
        let blob = pack(&inner, &bob, &alice, &alice_crypto).unwrap();
        let result = unpack(&blob, &bob, &bob_crypto, &versions()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn null_locations_treated_as_empty() {
        let bob = Identity::from("bob");
        let alice = Identity::from("alice");
        let bob_crypto = FakeCryptoOracle::new(bob.clone());
        let payload = serde_json::json!({
            "host": bob.as_str(),
            "client": alice.as_str(),
            "service": "chat",
            "request_version": 1,
            "reply_versions": [1],
            "locations": null,
            "reply_to": null,
        });
        let encrypted = bob_crypto
            .encrypt(&serde_json::to_vec(&payload).unwrap(), &bob, &alice)
            .unwrap();
        let routing = serde_json::json!({ "request": encrypted, "to": bob.as_str() });
        let alice_crypto = FakeCryptoOracle::new(alice.clone());
        let outer = alice_crypto
            .sign(&serde_json::to_vec(&routing).unwrap(), &alice)
            .unwrap();

        let record = unpack(&outer, &bob, &bob_crypto, &versions()).unwrap().unwrap();
        assert!(record.locations.is_empty());
        assert!(record.reply_to.is_empty());
    }

    #[test]
    fn confused_deputy_mismatch_drops_silently() {
        // The ciphertext was encrypted/signed by "mallory", but the
        // payload claims `client = alice`. unpack must refuse to act.
        let bob = Identity::from("bob");
        let alice = Identity::from("alice");
        let mallory = Identity::from("mallory");
        let bob_crypto = FakeCryptoOracle::new(bob.clone());

        let payload = serde_json::json!({
            "host": bob.as_str(),
            "client": alice.as_str(),
            "service": "chat",
            "request_version": 1,
            "reply_versions": [1],
            "locations": [],
            "reply_to": [],
        });
        let encrypted = bob_crypto
            .encrypt(&serde_json::to_vec(&payload).unwrap(), &bob, &mallory)
            .unwrap();
        let routing = serde_json::json!({ "request": encrypted, "to": bob.as_str() });
        let mallory_crypto = FakeCryptoOracle::new(mallory.clone());
        let outer = mallory_crypto
            .sign(&serde_json::to_vec(&routing).unwrap(), &mallory)
            .unwrap();

        let result = unpack(&outer, &bob, &bob_crypto, &versions()).unwrap();
        assert!(result.is_none());
    }
}
