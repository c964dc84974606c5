//! Core identifiers: peers, transport locations, and service names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The reserved service name denoting "a location at which the peer speaks
/// the Santiago protocol itself". Every other identity's consuming-directory
/// entry for this service tells us where to reach them with new requests.
pub const SANTIAGO_SERVICE: &str = "santiago";

/// An opaque peer identifier — in practice an OpenPGP key fingerprint.
///
/// Equality is byte-exact; this crate never normalizes or case-folds
/// fingerprints, since the crypto oracle is the sole authority on identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Identity(fingerprint.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Identity(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Identity(s)
    }
}

/// A transport URL of the form `<scheme>://<rest>`.
///
/// `rest` is opaque to the protocol engine; only the scheme is ever
/// inspected, and only by [`crate::transport::TransportRegistry`] at send
/// time. A `Location` with no `://` is still a valid set member — it simply
/// never resolves to a registered sender, and is skipped rather than
/// treated as fatal (see spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location(pub String);

impl Location {
    pub fn new(url: impl Into<String>) -> Self {
        Location(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme prefix (everything before `://`), or `None` if the
    /// location is malformed.
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once("://").map(|(scheme, _)| scheme)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Location(s.to_string())
    }
}

impl From<String> for Location {
    fn from(s: String) -> Self {
        Location(s)
    }
}

/// A UTF-8 service name. [`SANTIAGO_SERVICE`] is the one reserved value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Self {
        ServiceName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The reserved self-service name, as a [`ServiceName`].
    pub fn santiago() -> Self {
        ServiceName(SANTIAGO_SERVICE.to_string())
    }

    pub fn is_santiago(&self) -> bool {
        self.0 == SANTIAGO_SERVICE
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        ServiceName(s.to_string())
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        ServiceName(s)
    }
}
