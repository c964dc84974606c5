//! The hosting and consuming directories, and the pending-request set.
//!
//! `DirectoryStore` backs both `H` (hosting) and `C` (consuming) — they are
//! the same shape (identity → service → set of locations), just read and
//! written from opposite sides of a relationship, so one generic type
//! implements both rather than duplicating the map-of-map-of-set logic.
//! [`Directories`] composes one of each plus the pending-request set `R`
//! and exposes the operation names from the spec directly.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, Location, ServiceName};

/// One side of the hosting/consuming relationship: identity → service name
/// → set of locations.
///
/// All reads return an owned, possibly-empty `HashSet` rather than an
/// `Option` — unknown-key reads never raise, per the directory's
/// load-bearing silent-failure contract (spec §4.2).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DirectoryStore {
    table: HashMap<Identity, HashMap<ServiceName, HashSet<Location>>>,
}

impl DirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_client(&mut self, client: &Identity) {
        self.table.entry(client.clone()).or_default();
    }

    pub fn create_service(&mut self, client: &Identity, service: &ServiceName) {
        self.table
            .entry(client.clone())
            .or_default()
            .entry(service.clone())
            .or_default();
    }

    pub fn create_location<I>(&mut self, client: &Identity, service: &ServiceName, locations: I)
    where
        I: IntoIterator<Item = Location>,
    {
        self.table
            .entry(client.clone())
            .or_default()
            .entry(service.clone())
            .or_default()
            .extend(locations);
    }

    pub fn get_locations(&self, client: &Identity, service: &ServiceName) -> HashSet<Location> {
        self.table
            .get(client)
            .and_then(|services| services.get(service))
            .cloned()
            .unwrap_or_default()
    }

    /// Union `locations` into `table[client][service]`. A no-op (no
    /// intermediate maps created, nothing logged) when `locations` is
    /// empty — this is what makes repeated learning idempotent (spec §8,
    /// property 6).
    pub fn learn<I>(&mut self, client: &Identity, service: &ServiceName, locations: I)
    where
        I: IntoIterator<Item = Location>,
    {
        let mut locations = locations.into_iter().peekable();
        if locations.peek().is_none() {
            return;
        }
        self.table
            .entry(client.clone())
            .or_default()
            .entry(service.clone())
            .or_default()
            .extend(locations);
    }

    pub fn delete_client(&mut self, client: &Identity) {
        self.table.remove(client);
    }

    pub fn delete_service(&mut self, client: &Identity, service: &ServiceName) {
        if let Some(services) = self.table.get_mut(client) {
            services.remove(service);
        }
    }

    pub fn delete_location(&mut self, client: &Identity, service: &ServiceName, location: &Location) {
        if let Some(services) = self.table.get_mut(client) {
            if let Some(locations) = services.get_mut(service) {
                locations.remove(location);
            }
        }
    }

    pub fn contains_client(&self, client: &Identity) -> bool {
        self.table.contains_key(client)
    }

    /// Serialize this side of the directory to a JSON blob, for a caller
    /// that wants to persist `H` or `C` across restarts. Not wired to any
    /// file I/O — spec.md §6 names a serialized blob per directory without
    /// mandating a schema or a storage backend, so this is only the
    /// (de)serialization half of that contract.
    pub fn snapshot(&self) -> Result<String, crate::error::SantiagoError> {
        Ok(serde_json::to_string(&self.table)?)
    }

    /// Restore a directory side previously produced by [`Self::snapshot`].
    pub fn load_snapshot(blob: &str) -> Result<Self, crate::error::SantiagoError> {
        Ok(Self { table: serde_json::from_str(blob)? })
    }
}

/// The pending-request set `R`: host identity → set of service names we
/// have asked for and not yet received an answer to.
#[derive(Debug, Default, Clone)]
pub struct PendingRequests {
    table: HashMap<Identity, HashSet<ServiceName>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, host: &Identity, service: &ServiceName) {
        self.table
            .entry(host.clone())
            .or_default()
            .insert(service.clone());
    }

    pub fn contains(&self, host: &Identity, service: &ServiceName) -> bool {
        self.table
            .get(host)
            .map(|services| services.contains(service))
            .unwrap_or(false)
    }

    /// Remove `service` from `R[host]`. A no-op if absent, per spec §4.2.
    pub fn discard(&mut self, host: &Identity, service: &ServiceName) {
        if let Some(services) = self.table.get_mut(host) {
            services.remove(service);
        }
    }
}

/// The complete directory state owned by a [`crate::engine::SantiagoEngine`]:
/// hosting (`H`), consuming (`C`), and pending requests (`R`). Grouped into
/// one struct so the engine can guard all three behind a single mutex, per
/// spec §5's concurrency model.
#[derive(Debug, Default, Clone)]
pub struct Directories {
    /// `H`: services I host for others.
    pub hosting: DirectoryStore,
    /// `C`: services others host for me.
    pub consuming: DirectoryStore,
    /// `R`: outstanding queries I've sent and not yet gotten a reply to.
    pub pending: PendingRequests,
}

impl Directories {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Hosting (H) ──────────────────────────────────────────────────────

    pub fn create_hosting_client(&mut self, client: &Identity) {
        self.hosting.create_client(client);
    }

    pub fn create_hosting_service(&mut self, client: &Identity, service: &ServiceName) {
        self.hosting.create_service(client, service);
    }

    pub fn create_hosting_location<I>(&mut self, client: &Identity, service: &ServiceName, locations: I)
    where
        I: IntoIterator<Item = Location>,
    {
        self.hosting.create_location(client, service, locations);
    }

    /// `H[client][service]` — where I currently serve `service` to `client`.
    pub fn get_host_locations(&self, client: &Identity, service: &ServiceName) -> HashSet<Location> {
        self.hosting.get_locations(client, service)
    }

    /// Union `locations` into `H[client][service]`.
    pub fn provide_service<I>(&mut self, client: &Identity, service: &ServiceName, locations: I)
    where
        I: IntoIterator<Item = Location>,
    {
        self.hosting.learn(client, service, locations);
    }

    pub fn delete_hosting_client(&mut self, client: &Identity) {
        self.hosting.delete_client(client);
    }

    pub fn delete_hosting_service(&mut self, client: &Identity, service: &ServiceName) {
        self.hosting.delete_service(client, service);
    }

    pub fn delete_hosting_location(&mut self, client: &Identity, service: &ServiceName, location: &Location) {
        self.hosting.delete_location(client, service, location);
    }

    // ── Consuming (C) ────────────────────────────────────────────────────

    pub fn create_consuming_host(&mut self, host: &Identity) {
        self.consuming.create_client(host);
    }

    pub fn create_consuming_service(&mut self, host: &Identity, service: &ServiceName) {
        self.consuming.create_service(host, service);
    }

    pub fn create_consuming_location<I>(&mut self, host: &Identity, service: &ServiceName, locations: I)
    where
        I: IntoIterator<Item = Location>,
    {
        self.consuming.create_location(host, service, locations);
    }

    /// `C[host][service]` — where `host` serves `service` to me.
    pub fn get_client_locations(&self, host: &Identity, service: &ServiceName) -> HashSet<Location> {
        self.consuming.get_locations(host, service)
    }

    /// Union `locations` into `C[host][service]`.
    pub fn learn_service<I>(&mut self, host: &Identity, service: &ServiceName, locations: I)
    where
        I: IntoIterator<Item = Location>,
    {
        self.consuming.learn(host, service, locations);
    }

    pub fn delete_consuming_host(&mut self, host: &Identity) {
        self.consuming.delete_client(host);
    }

    pub fn delete_consuming_service(&mut self, host: &Identity, service: &ServiceName) {
        self.consuming.delete_service(host, service);
    }

    pub fn delete_consuming_location(&mut self, host: &Identity, service: &ServiceName, location: &Location) {
        self.consuming.delete_location(host, service, location);
    }
}
