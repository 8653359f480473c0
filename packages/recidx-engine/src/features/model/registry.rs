//! The index-definition registry.
//!
//! An explicit object owned by whoever orchestrates indexes; there is
//! no process-wide registry. Mutations go through a per-index named
//! lock plus a data-version check, and listeners are notified from a
//! dedicated dispatcher thread so a slow listener never blocks a
//! mutating caller.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::features::model::{IndexDefinition, ModelError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexModelEvent {
    Added(String),
    Updated(String),
    Removed(String),
}

impl IndexModelEvent {
    pub fn index_name(&self) -> &str {
        match self {
            IndexModelEvent::Added(name)
            | IndexModelEvent::Updated(name)
            | IndexModelEvent::Removed(name) => name,
        }
    }
}

/// Receives model events asynchronously, on the registry's dispatcher
/// thread. Delivery is at-least-once in mutation order.
pub trait IndexModelListener: Send + 'static {
    fn on_event(&self, event: IndexModelEvent);
}

pub struct IndexerModel {
    indexes: DashMap<String, IndexDefinition>,
    /// Per-index mutation locks; read-modify-write goes through here.
    mutation_locks: DashMap<String, Arc<Mutex<()>>>,
    listeners: Arc<Mutex<Vec<Box<dyn IndexModelListener>>>>,
    event_tx: Option<Sender<IndexModelEvent>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl IndexerModel {
    pub fn new() -> Self {
        let listeners: Arc<Mutex<Vec<Box<dyn IndexModelListener>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let (event_tx, event_rx) = mpsc::channel();
        let dispatcher = {
            let listeners = Arc::clone(&listeners);
            std::thread::Builder::new()
                .name("recidx-model-dispatch".to_string())
                .spawn(move || dispatch_loop(event_rx, listeners))
                .ok()
        };
        Self {
            indexes: DashMap::new(),
            mutation_locks: DashMap::new(),
            listeners,
            event_tx: Some(event_tx),
            dispatcher,
        }
    }

    /// Register a listener. It immediately starts receiving events
    /// for subsequent mutations; use [`index_names`](Self::index_names)
    /// to catch up on pre-existing indexes.
    pub fn register_listener(&self, listener: Box<dyn IndexModelListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn add_index(&self, mut definition: IndexDefinition) -> Result<(), ModelError> {
        validate(&definition)?;
        definition.data_version = 1;

        let lock = self.mutation_lock(&definition.name);
        let guard = lock.lock();
        if self.indexes.contains_key(&definition.name) {
            return Err(ModelError::IndexExists(definition.name));
        }
        let name = definition.name.clone();
        self.indexes.insert(name.clone(), definition);
        drop(guard);

        self.emit(IndexModelEvent::Added(name));
        Ok(())
    }

    /// Read-modify-write update: the caller's `data_version` must
    /// match the stored one, and the stored definition moves to the
    /// next version.
    pub fn update_index(&self, mut definition: IndexDefinition) -> Result<(), ModelError> {
        validate(&definition)?;

        let lock = self.mutation_lock(&definition.name);
        let guard = lock.lock();
        let current_version = match self.indexes.get(&definition.name) {
            Some(existing) => existing.data_version,
            None => return Err(ModelError::IndexNotFound(definition.name)),
        };
        if definition.data_version != current_version {
            return Err(ModelError::ConcurrentModification {
                name: definition.name,
                stale: definition.data_version,
                current: current_version,
            });
        }
        definition.data_version = current_version + 1;
        let name = definition.name.clone();
        self.indexes.insert(name.clone(), definition);
        drop(guard);

        self.emit(IndexModelEvent::Updated(name));
        Ok(())
    }

    pub fn delete_index(&self, name: &str) -> Result<(), ModelError> {
        let lock = self.mutation_lock(name);
        let guard = lock.lock();
        if self.indexes.remove(name).is_none() {
            return Err(ModelError::IndexNotFound(name.to_string()));
        }
        drop(guard);

        self.emit(IndexModelEvent::Removed(name.to_string()));
        Ok(())
    }

    pub fn index(&self, name: &str) -> Result<IndexDefinition, ModelError> {
        self.indexes
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| ModelError::IndexNotFound(name.to_string()))
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.iter().map(|entry| entry.key().clone()).collect()
    }

    fn mutation_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.mutation_locks
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn emit(&self, event: IndexModelEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.send(event).is_err() {
                warn!("model event dispatcher is gone, dropping event");
            }
        }
    }
}

impl Default for IndexerModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IndexerModel {
    fn drop(&mut self) {
        // Closing the channel ends the dispatcher loop.
        self.event_tx.take();
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

fn dispatch_loop(
    events: Receiver<IndexModelEvent>,
    listeners: Arc<Mutex<Vec<Box<dyn IndexModelListener>>>>,
) {
    while let Ok(event) = events.recv() {
        for listener in listeners.lock().iter() {
            listener.on_event(event.clone());
        }
    }
}

fn validate(definition: &IndexDefinition) -> Result<(), ModelError> {
    if definition.name.is_empty() {
        return Err(ModelError::Validation("index name must not be empty".into()));
    }
    if definition.configuration.is_empty() {
        return Err(ModelError::Validation(format!(
            "index '{}' has no configuration",
            definition.name
        )));
    }
    Ok(())
}
