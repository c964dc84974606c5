use std::collections::HashSet;
use std::sync::Arc;

use crate::crypto::CryptoOracle;
use crate::identity::Identity;
use crate::transport::TransportRegistry;

/// Configuration for one [`crate::engine::SantiagoEngine`] instance.
pub struct SantiagoConfig {
    /// This node's own identity — the fingerprint every envelope we sign or
    /// decrypt is checked against.
    pub me: Identity,

    /// Protocol versions this node can both speak and understand incoming
    /// requests for. Used to populate `reply_versions` on every outgoing
    /// request and to reject unsupported `request_version`s on unpack.
    pub supported_versions: HashSet<u32>,

    /// `request_version` stamped on outgoing requests we originate.
    pub default_version: u32,

    /// Sign/verify/encrypt/decrypt provider. Shared by reference since the
    /// engine and any transport listeners need the same oracle.
    pub crypto: Arc<dyn CryptoOracle>,

    /// Senders and listeners available at construction time. Further
    /// transports may be registered later via
    /// [`crate::engine::SantiagoEngine::transports`].
    pub transports: TransportRegistry,
}

impl SantiagoConfig {
    pub fn new(me: Identity, default_version: u32, crypto: Arc<dyn CryptoOracle>) -> Self {
        Self {
            me,
            supported_versions: [default_version].into_iter().collect(),
            default_version,
            crypto,
            transports: TransportRegistry::new(),
        }
    }

    /// Widen the set of request versions this node accepts on unpack,
    /// beyond the single `default_version` seeded by `new`.
    pub fn with_supported_versions(mut self, versions: impl IntoIterator<Item = u32>) -> Self {
        self.supported_versions.extend(versions);
        self
    }

    pub fn with_transports(mut self, transports: TransportRegistry) -> Self {
        self.transports = transports;
        self
    }
}
