//! The crypto oracle seam.
//!
//! Santiago's envelope layering (spec §4.1) assumes sign/verify/encrypt/
//! decrypt are provided by an external library — in practice OpenPGP. This
//! module defines only the trait the engine depends on; wiring in a real
//! OpenPGP binding (e.g. `sequoia-openpgp`) is out of this crate's scope.
//! [`testing::FakeCryptoOracle`] is a pure-Rust stand-in used by this
//! crate's own tests. It is not cryptographically secure and must never be
//! used outside `#[cfg(test)]`.

use crate::error::SantiagoError;
use crate::identity::Identity;

/// External crypto capability the engine depends on for every envelope
/// layer. A single implementation is expected to be shared (via `Arc`)
/// across the engine and, transitively, every transport it registers.
pub trait CryptoOracle: Send + Sync {
    /// Sign `plaintext` as `signer`, returning an ascii-armored signed blob.
    fn sign(&self, plaintext: &[u8], signer: &Identity) -> Result<String, SantiagoError>;

    /// Verify an ascii-armored signed blob, returning its payload and the
    /// signer's fingerprint.
    fn verify(&self, blob: &str) -> Result<(Vec<u8>, Identity), SantiagoError>;

    /// Sign-then-encrypt `plaintext` for `recipient`, returning an
    /// ascii-armored blob only `recipient` can read.
    fn encrypt(
        &self,
        plaintext: &[u8],
        recipient: &Identity,
        signer: &Identity,
    ) -> Result<String, SantiagoError>;

    /// Decrypt an ascii-armored blob addressed to this oracle's owner,
    /// verifying every signature layer encountered along the way.
    ///
    /// Returns `(plaintext, None)` when the blob decrypts cleanly but the
    /// innermost layer carries no signature — `Envelope::unpack` treats
    /// that as a silent drop, not an error. Returns `Err` when decryption
    /// itself fails (wrong recipient, tampered ciphertext, malformed
    /// armor).
    fn decrypt(&self, blob: &str) -> Result<(Vec<u8>, Option<Identity>), SantiagoError>;
}

/// Deterministic 64-bit FNV-1a, used only to detect tampering in
/// [`testing::FakeCryptoOracle`]'s fake signatures. Not a real MAC.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// XOR `data` against a keystream derived by repeating `key`'s bytes.
/// A placeholder for "only the recipient can read this" in the fake oracle;
/// carries no real confidentiality guarantee.
fn xor_with_key(data: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect()
}

pub mod testing {
    //! A fast, insecure [`CryptoOracle`] for exercising the envelope codec
    //! and protocol engine without a real OpenPGP keyring.

    use super::*;

    const SIGNED_BEGIN: &str = "-----BEGIN SANTIAGO SIGNED-----";
    const SIGNED_END: &str = "-----END SANTIAGO SIGNED-----";
    const ENCRYPTED_BEGIN: &str = "-----BEGIN SANTIAGO ENCRYPTED-----";
    const ENCRYPTED_END: &str = "-----END SANTIAGO ENCRYPTED-----";

    /// A [`CryptoOracle`] bound to one local identity (`owner`). Every
    /// identity in a test is expected to construct its own instance; there
    /// is no shared keyring beyond the identities themselves, since the
    /// fake scheme derives "keys" deterministically from identity strings.
    #[derive(Debug, Clone)]
    pub struct FakeCryptoOracle {
        owner: Identity,
    }

    impl FakeCryptoOracle {
        pub fn new(owner: Identity) -> Self {
            Self { owner }
        }

        /// Build a signed blob with an explicit (possibly blank) signer
        /// field, bypassing the normal MAC check. Used only to construct
        /// malformed fixtures (e.g. an unsigned inner layer) in tests.
        pub fn signed_armor_with_signer(body: &[u8], signer: &str) -> String {
            format!(
                "{SIGNED_BEGIN}\nsigner: {signer}\nmac: {}\nbody: {}\n{SIGNED_END}",
                to_hex(&fnv1a(format!("{signer}{}", to_hex(body)).as_bytes()).to_be_bytes()),
                to_hex(body),
            )
        }
    }

    fn parse_block<'a>(blob: &'a str, begin: &str, end: &str) -> Option<Vec<(&'a str, &'a str)>> {
        let mut lines = blob.lines();
        if lines.next()? != begin {
            return None;
        }
        let mut fields = Vec::new();
        for line in lines {
            if line == end {
                return Some(fields);
            }
            let (key, value) = line.split_once(": ")?;
            fields.push((key, value));
        }
        None // missing END marker — truncated armor
    }

    fn field<'a>(fields: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
        fields.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    impl CryptoOracle for FakeCryptoOracle {
        fn sign(&self, plaintext: &[u8], signer: &Identity) -> Result<String, SantiagoError> {
            let body_hex = to_hex(plaintext);
            let mac = fnv1a(format!("{}{}", signer.as_str(), body_hex).as_bytes());
            Ok(format!(
                "{SIGNED_BEGIN}\nsigner: {}\nmac: {:016x}\nbody: {}\n{SIGNED_END}",
                signer.as_str(),
                mac,
                body_hex
            ))
        }

        fn verify(&self, blob: &str) -> Result<(Vec<u8>, Identity), SantiagoError> {
            let fields = parse_block(blob, SIGNED_BEGIN, SIGNED_END)
                .ok_or_else(|| SantiagoError::Crypto("malformed signed armor".into()))?;
            let signer = field(&fields, "signer")
                .ok_or_else(|| SantiagoError::Crypto("missing signer field".into()))?;
            let mac_hex = field(&fields, "mac")
                .ok_or_else(|| SantiagoError::Crypto("missing mac field".into()))?;
            let body_hex = field(&fields, "body")
                .ok_or_else(|| SantiagoError::Crypto("missing body field".into()))?;

            let expected = fnv1a(format!("{signer}{body_hex}").as_bytes());
            let actual = u64::from_str_radix(mac_hex, 16)
                .map_err(|_| SantiagoError::Crypto("malformed mac".into()))?;
            if actual != expected {
                return Err(SantiagoError::Crypto("signature verification failed".into()));
            }

            let body = from_hex(body_hex)
                .ok_or_else(|| SantiagoError::Crypto("malformed body encoding".into()))?;
            Ok((body, Identity::from(signer)))
        }

        fn encrypt(
            &self,
            plaintext: &[u8],
            recipient: &Identity,
            signer: &Identity,
        ) -> Result<String, SantiagoError> {
            let ciphertext = xor_with_key(plaintext, recipient.as_str().as_bytes());
            let body_hex = to_hex(&ciphertext);
            let mac = fnv1a(format!("{}{}{}", signer.as_str(), recipient.as_str(), body_hex).as_bytes());
            Ok(format!(
                "{ENCRYPTED_BEGIN}\nsigner: {}\nrecipient: {}\nmac: {:016x}\nbody: {}\n{ENCRYPTED_END}",
                signer.as_str(),
                recipient.as_str(),
                mac,
                body_hex
            ))
        }

        fn decrypt(&self, blob: &str) -> Result<(Vec<u8>, Option<Identity>), SantiagoError> {
            let fields = parse_block(blob, ENCRYPTED_BEGIN, ENCRYPTED_END)
                .ok_or_else(|| SantiagoError::Crypto("malformed encrypted armor".into()))?;
            let signer = field(&fields, "signer")
                .ok_or_else(|| SantiagoError::Crypto("missing signer field".into()))?;
            let recipient = field(&fields, "recipient")
                .ok_or_else(|| SantiagoError::Crypto("missing recipient field".into()))?;
            let mac_hex = field(&fields, "mac")
                .ok_or_else(|| SantiagoError::Crypto("missing mac field".into()))?;
            let body_hex = field(&fields, "body")
                .ok_or_else(|| SantiagoError::Crypto("missing body field".into()))?;

            if recipient != self.owner.as_str() {
                return Err(SantiagoError::Crypto(
                    "ciphertext not addressed to this identity".into(),
                ));
            }

            let expected = fnv1a(format!("{signer}{recipient}{body_hex}").as_bytes());
            let actual = u64::from_str_radix(mac_hex, 16)
                .map_err(|_| SantiagoError::Crypto("malformed mac".into()))?;
            if actual != expected {
                return Err(SantiagoError::Crypto("ciphertext has been tampered with".into()));
            }

            let ciphertext = from_hex(body_hex)
                .ok_or_else(|| SantiagoError::Crypto("malformed body encoding".into()))?;
            let plaintext = xor_with_key(&ciphertext, recipient.as_bytes());

            if signer.is_empty() {
                return Ok((plaintext, None));
            }
            Ok((plaintext, Some(Identity::from(signer))))
        }
    }

}
