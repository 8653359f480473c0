use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Whether the index should consume the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexUpdateState {
    SubscribeAndListen,
    DoNotSubscribe,
}

/// Lifecycle state of the index as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexGeneralState {
    Active,
    Disabled,
    DeleteRequested,
    Deleting,
}

/// Everything needed to run one index: the configuration blob the
/// conf builder consumes, the shard topology, switches for the
/// optional subsystems, and the optimistic-locking data version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    /// Declarative indexer configuration (JSON).
    pub configuration: Vec<u8>,
    /// Shard name -> address. Addresses are opaque to the engine.
    pub shards: BTreeMap<String, String>,
    /// Declarative sharding rules (JSON); absent means hash over the
    /// shard names.
    pub sharding_configuration: Option<Vec<u8>>,
    pub enable_deref_map: bool,
    pub enable_locking: bool,
    pub update_state: IndexUpdateState,
    pub general_state: IndexGeneralState,
    /// Change-log subscription this index consumes under; assigned
    /// when the subscription is created.
    pub subscription_id: Option<String>,
    /// Monotonically increasing; updates carrying a stale value are
    /// rejected.
    pub data_version: u64,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, configuration: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            configuration,
            shards: BTreeMap::new(),
            sharding_configuration: None,
            enable_deref_map: true,
            enable_locking: true,
            update_state: IndexUpdateState::SubscribeAndListen,
            general_state: IndexGeneralState::Active,
            subscription_id: None,
            data_version: 0,
        }
    }

    pub fn with_shard(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.shards.insert(name.into(), address.into());
        self
    }

    pub fn with_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    /// Whether the worker should keep an updater stack running for
    /// this definition.
    pub fn should_run(&self) -> bool {
        self.general_state == IndexGeneralState::Active
            && self.update_state == IndexUpdateState::SubscribeAndListen
            && self.subscription_id.is_some()
    }
}
