//! The protocol engine: `query`, `incoming_request`, `handle_request`,
//! `handle_reply`, `proxy`, and `outgoing_request` (spec §4.3).
//!
//! `SantiagoEngine` owns the directory state behind one mutex (spec §5),
//! the crypto oracle, and the transport registry. Every entry point that
//! can be reached by an untrusted peer (`incoming_request`) swallows its
//! own errors after logging them — nothing about a bad message is ever
//! observable to whoever sent it.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::SantiagoConfig;
use crate::crypto::CryptoOracle;
use crate::directory::Directories;
use crate::envelope::{self, IncomingRequest, InnerRecord};
use crate::error::SantiagoError;
use crate::identity::{Identity, Location, ServiceName};
use crate::transport::TransportRegistry;

/// A running Santiago node.
///
/// Cheap to clone is not a goal here — wrap in `Arc` at the call site if
/// multiple owners are needed, the same way a transport listener would
/// hold a reference to dispatch inbound bytes into `incoming_request`.
pub struct SantiagoEngine {
    me: Identity,
    crypto: Arc<dyn CryptoOracle>,
    supported_versions: std::collections::HashSet<u32>,
    default_version: u32,
    directories: Mutex<Directories>,
    transports: Mutex<TransportRegistry>,
}

impl SantiagoEngine {
    pub fn new(config: SantiagoConfig) -> Self {
        Self {
            me: config.me,
            crypto: config.crypto,
            supported_versions: config.supported_versions,
            default_version: config.default_version,
            directories: Mutex::new(Directories::new()),
            transports: Mutex::new(config.transports),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.me
    }

    /// Run `f` against the combined directory state, holding the single
    /// lock for the shortest span that does the work (spec §5).
    fn with_directories<R>(&self, f: impl FnOnce(&mut Directories) -> R) -> R {
        let mut guard = self.directories.lock().expect("directories mutex poisoned");
        f(&mut guard)
    }

    fn transport_for(&self, location: &Location) -> Option<Arc<dyn crate::transport::Sender>> {
        self.transports.lock().expect("transports mutex poisoned").sender_for(location)
    }

    /// Register a sender for a URL scheme (spec §4.4). Public so an
    /// embedder can wire transports in after construction.
    pub fn register_sender(&self, scheme: impl Into<String>, sender: Arc<dyn crate::transport::Sender>) {
        self.transports
            .lock()
            .expect("transports mutex poisoned")
            .register_sender(scheme, sender);
    }

    /// Declare that we host `service` for `client` at `locations` (spec
    /// §4.2 `H`). Used both at startup to seed what we serve, and an
    /// embedder may call this any time policy changes.
    pub fn provide_service<I>(&self, client: &Identity, service: &ServiceName, locations: I)
    where
        I: IntoIterator<Item = Location>,
    {
        self.with_directories(|d| d.provide_service(client, service, locations));
    }

    /// Record where `host` serves `service` for us, without having asked
    /// (spec §4.2 `C`) — used to seed well-known locations (our own
    /// `SANTIAGO_SERVICE` peers) ahead of any query.
    pub fn learn_service<I>(&self, host: &Identity, service: &ServiceName, locations: I)
    where
        I: IntoIterator<Item = Location>,
    {
        self.with_directories(|d| d.learn_service(host, service, locations));
    }

    /// `C[host][service]` — where `host` is currently known to serve
    /// `service` for us.
    pub fn get_client_locations(&self, host: &Identity, service: &ServiceName) -> std::collections::HashSet<Location> {
        self.with_directories(|d| d.get_client_locations(host, service))
    }

    /// `H[client][service]` — where we currently serve `service` to
    /// `client`.
    pub fn get_host_locations(&self, client: &Identity, service: &ServiceName) -> std::collections::HashSet<Location> {
        self.with_directories(|d| d.get_host_locations(client, service))
    }

    /// Ask `host` for `service`, recording the outstanding request in `R`
    /// so a later reply is recognized. Every failure along the way is
    /// logged and swallowed — `query` never surfaces an error to its
    /// caller beyond "nothing happened".
    pub fn query(&self, host: &Identity, service: &ServiceName) {
        if let Err(e) = self.try_query(host, service) {
            debug!(%host, %service, error = %e, "query failed, swallowing");
        }
    }

    fn try_query(&self, host: &Identity, service: &ServiceName) -> Result<(), SantiagoError> {
        let locations = self.with_directories(|d| {
            d.pending.add(host, service);
            d.get_client_locations(host, &ServiceName::santiago())
        });

        let inner = InnerRecord {
            host: host.clone(),
            client: self.me.clone(),
            service: service.clone(),
            request_version: self.default_version,
            reply_versions: self.supported_versions.iter().copied().collect(),
            reply_to: self.our_santiago_locations(),
            locations: vec![],
        };

        self.outgoing_request(&inner, host, &locations)
    }

    /// Where we ourselves can be reached for the protocol's own service —
    /// stamped into `reply_to` on requests we originate. Empty until the
    /// embedder has published at least one address for `SANTIAGO_SERVICE`
    /// under our own identity in the hosting directory.
    fn our_santiago_locations(&self) -> Vec<Location> {
        self.with_directories(|d| {
            d.get_host_locations(&self.me, &ServiceName::santiago())
                .into_iter()
                .collect()
        })
    }

    /// Pack `inner` and hand it to every transport registered for the
    /// schemes in `locations`. Unknown schemes and send failures are
    /// logged and skipped, not fatal — one bad location must not block
    /// delivery via the others (spec §4.4).
    fn outgoing_request(
        &self,
        inner: &InnerRecord,
        to: &Identity,
        locations: &std::collections::HashSet<Location>,
    ) -> Result<(), SantiagoError> {
        if locations.is_empty() {
            return Err(SantiagoError::UnknownTransport(format!(
                "no known santiago location for {to}"
            )));
        }
        let blob = envelope::pack(inner, to, &self.me, self.crypto.as_ref())?;
        for location in locations {
            match self.transport_for(location) {
                Some(sender) => {
                    if let Err(e) = sender.send(location, &blob) {
                        warn!(%location, error = %e, "send failed");
                    }
                }
                None => debug!(%location, "no sender registered for scheme"),
            }
        }
        Ok(())
    }

    /// Entry point for bytes arriving off the wire. Unpacks, validates,
    /// and dispatches to `handle_request` or `handle_reply` depending on
    /// whether the normalized record carries `locations` (a reply) or not
    /// (a request). Every error is logged at the appropriate level and
    /// swallowed; nothing is ever returned to the network.
    pub fn incoming_request(&self, blob: &str) {
        match envelope::unpack(blob, &self.me, self.crypto.as_ref(), &self.supported_versions) {
            Ok(Some(record)) => {
                if record.locations.is_empty() {
                    self.handle_request(record);
                } else {
                    self.handle_reply(record);
                }
            }
            Ok(None) => debug!("dropped malformed or unauthorized envelope"),
            Err(e) => warn!(error = %e, "failed to unpack incoming envelope"),
        }
    }

    /// We are (potentially) `record.host`: decide whether to answer
    /// `record.client`'s request for `record.service`, and reply either way
    /// once consent clears (spec §9 open question: even an empty-locations
    /// reply is sent, so the client's pending-request entry always
    /// resolves instead of hanging forever).
    fn handle_request(&self, record: IncomingRequest) {
        // Consent (spec §4.3.4 step 1): we must be willing to host *some*
        // service for both the immediate sender and the original client.
        // The sender check defends against being used as an open relay.
        let consented = self.with_directories(|d| {
            d.hosting.contains_client(&record.from) && d.hosting.contains_client(&record.client)
        });
        if !consented {
            debug!(from = %record.from, client = %record.client, "no hosting relationship, dropping");
            return;
        }

        // Routing (step 2): a request not addressed to us is proxied, not
        // answered.
        if record.host != self.me {
            self.proxy(&record.host);
            return;
        }

        // Learning (step 3): remember where to reach the client from now on.
        self.with_directories(|d| {
            d.learn_service(&record.client, &ServiceName::santiago(), record.reply_to.clone())
        });

        // Reply (step 4): always answer, even with an empty location set.
        let (locations, reply_to) = self.with_directories(|d| {
            (
                d.get_host_locations(&record.client, &record.service),
                d.get_client_locations(&record.client, &ServiceName::santiago()),
            )
        });

        if reply_to.is_empty() {
            debug!(client = %record.client, "no known location to reply to, dropping");
            return;
        }

        let reply = InnerRecord {
            host: self.me.clone(),
            client: record.client.clone(),
            service: record.service.clone(),
            request_version: self.default_version,
            reply_versions: self.supported_versions.iter().copied().collect(),
            reply_to: self.our_santiago_locations(),
            locations: locations.into_iter().collect(),
        };
        if let Err(e) = self.outgoing_request(&reply, &record.client, &reply_to) {
            warn!(client = %record.client, error = %e, "failed to send reply");
        }
    }

    /// We are (potentially) `record.client`: a host answered a query we
    /// (may have) sent. Only believed if consent clears and `R` actually
    /// has `(host, service)` pending — otherwise this is an unsolicited
    /// reply and is ignored.
    fn handle_reply(&self, record: IncomingRequest) {
        // Consent (spec §4.3.5 step 1): we must already be consuming some
        // service from both the immediate sender and the stated host.
        let consented = self.with_directories(|d| {
            d.consuming.contains_client(&record.from) && d.consuming.contains_client(&record.host)
        });
        if !consented {
            debug!(from = %record.from, host = %record.host, "no consuming relationship, dropping");
            return;
        }

        // Addressing (step 2): replies not meant for us are proxied, not
        // learned from.
        if record.client != self.me {
            self.proxy(&record.host);
            return;
        }

        let was_pending = self.with_directories(|d| {
            let pending = d.pending.contains(&record.host, &record.service);
            if pending {
                d.learn_service(&record.host, &ServiceName::santiago(), record.reply_to.clone());
                d.learn_service(&record.host, &record.service, record.locations.clone());
                d.pending.discard(&record.host, &record.service);
            }
            pending
        });

        if !was_pending {
            debug!(host = %record.host, service = %record.service, "unsolicited reply, ignoring");
        }
    }

    /// Re-emit a request or reply toward `record.host` on behalf of a third
    /// party, without inspecting or altering the inner envelope (spec
    /// §4.3.6). Left a no-op: this engine only ever speaks as an endpoint,
    /// never as a relay — proxying is specified at contract level only and
    /// a minimal conforming engine may no-op it safely (spec §9). Proxied
    /// messages are therefore dropped, not forwarded, but nothing panics
    /// and no error escapes to the peer that asked.
    fn proxy(&self, host: &Identity) {
        debug!(%host, "proxy is a no-op in this implementation, dropping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::FakeCryptoOracle;
    use std::sync::Mutex as StdMutex;

    struct Wire {
        inboxes: StdMutex<std::collections::HashMap<Location, Vec<String>>>,
    }

    impl Wire {
        fn new() -> Arc<Self> {
            Arc::new(Self { inboxes: StdMutex::new(std::collections::HashMap::new()) })
        }
    }

    impl crate::transport::Sender for Wire {
        fn send(&self, location: &Location, envelope: &str) -> Result<(), SantiagoError> {
            self.inboxes
                .lock()
                .unwrap()
                .entry(location.clone())
                .or_default()
                .push(envelope.to_string());
            Ok(())
        }
    }

    fn engine_for(id: &str, wire: &Arc<Wire>) -> SantiagoEngine {
        let identity = Identity::from(id);
        let crypto = Arc::new(FakeCryptoOracle::new(identity.clone()));
        let config = SantiagoConfig::new(identity, 1, crypto);
        let engine = SantiagoEngine::new(config);
        engine.register_sender("test", wire.clone());
        engine
    }

    #[test]
    fn query_without_known_location_is_swallowed() {
        let wire = Wire::new();
        let engine = engine_for("alice", &wire);
        // No location known for bob's santiago service: query should not panic.
        engine.query(&Identity::from("bob"), &ServiceName::from("chat"));
    }

    #[test]
    fn full_round_trip_query_then_reply() {
        let wire = Wire::new();
        let alice = engine_for("alice", &wire);
        let bob = engine_for("bob", &wire);

        // alice knows where bob's santiago endpoint is.
        alice.with_directories(|d| {
            d.learn_service(
                &Identity::from("bob"),
                &ServiceName::santiago(),
                vec![Location::from("test://bob-inbox")],
            )
        });
        // bob is willing to host "chat" for alice.
        bob.with_directories(|d| {
            d.provide_service(
                &Identity::from("alice"),
                &ServiceName::from("chat"),
                vec![Location::from("test://chat-endpoint")],
            )
        });
        // bob knows where alice's santiago endpoint is, to reply.
        bob.with_directories(|d| {
            d.learn_service(
                &Identity::from("alice"),
                &ServiceName::santiago(),
                vec![Location::from("test://alice-inbox")],
            )
        });

        alice.query(&Identity::from("bob"), &ServiceName::from("chat"));

        let sent_to_bob = {
            let inboxes = wire.inboxes.lock().unwrap();
            inboxes.get(&Location::from("test://bob-inbox")).cloned().unwrap_or_default()
        };
        assert_eq!(sent_to_bob.len(), 1);

        bob.incoming_request(&sent_to_bob[0]);

        let sent_to_alice = {
            let inboxes = wire.inboxes.lock().unwrap();
            inboxes.get(&Location::from("test://alice-inbox")).cloned().unwrap_or_default()
        };
        assert_eq!(sent_to_alice.len(), 1);

        alice.incoming_request(&sent_to_alice[0]);

        let learned = alice.with_directories(|d| {
            d.get_client_locations(&Identity::from("bob"), &ServiceName::from("chat"))
        });
        assert_eq!(learned, [Location::from("test://chat-endpoint")].into_iter().collect());
    }

    #[test]
    fn handle_request_with_empty_hosting_directory_makes_no_outbound_call() {
        let wire = Wire::new();
        let alice = engine_for("alice", &wire);
        let bob = engine_for("bob", &wire);

        alice.with_directories(|d| {
            d.learn_service(&Identity::from("bob"), &ServiceName::santiago(), vec![Location::from("test://bob-inbox")])
        });
        // bob's hosting directory never gets an entry for alice at all.

        alice.query(&Identity::from("bob"), &ServiceName::from("chat"));
        let sent_to_bob = wire.inboxes.lock().unwrap().get(&Location::from("test://bob-inbox")).cloned().unwrap_or_default();
        assert_eq!(sent_to_bob.len(), 1);

        bob.incoming_request(&sent_to_bob[0]);

        let sent_anywhere: usize = wire.inboxes.lock().unwrap().values().map(Vec::len).sum();
        assert_eq!(sent_anywhere, 1, "an unwilling host with H={} must make no outbound call at all");
    }

    /// Property 8 (spec §8): `handle_reply` with `service ∉ R[h]` does not
    /// modify `C`, even once the consent check (step 1) already passes.
    /// `alice` must already be consuming *something* from `bob` here, or
    /// this would be rejected by the earlier consent check instead of the
    /// pending-request check this test targets.
    #[test]
    fn unsolicited_reply_is_ignored() {
        let wire = Wire::new();
        let bob = engine_for("bob", &wire);
        let alice = engine_for("alice", &wire);

        alice.with_directories(|d| {
            d.learn_service(&Identity::from("bob"), &ServiceName::santiago(), vec![Location::from("test://bob-inbox")])
        });

        // bob never asked alice for "chat", but she replies anyway.
        let inner = InnerRecord {
            host: Identity::from("bob"),
            client: Identity::from("alice"),
            service: ServiceName::from("chat"),
            request_version: 1,
            reply_versions: vec![1],
            reply_to: vec![],
            locations: vec![Location::from("test://unsolicited")],
        };
        let blob = envelope::pack(&inner, &Identity::from("alice"), &Identity::from("bob"), &*bob_crypto(&bob))
            .unwrap();
        alice.incoming_request(&blob);

        let learned = alice.with_directories(|d| {
            d.get_client_locations(&Identity::from("bob"), &ServiceName::from("chat"))
        });
        assert!(learned.is_empty(), "a reply for a service never in R[h] must not populate C");

        let baseline = alice.with_directories(|d| {
            d.get_client_locations(&Identity::from("bob"), &ServiceName::santiago())
        });
        assert_eq!(
            baseline,
            [Location::from("test://bob-inbox")].into_iter().collect(),
            "C must be otherwise untouched by the rejected reply"
        );
    }

    fn bob_crypto(_bob: &SantiagoEngine) -> Arc<FakeCryptoOracle> {
        Arc::new(FakeCryptoOracle::new(Identity::from("bob")))
    }
}
