//! The indexer worker: keeps one running updater stack per runnable
//! index definition, reacting to model events.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::features::events::Consumer;
use crate::features::model::{IndexDefinition, IndexModelEvent, IndexModelListener, IndexerModel};
use crate::stop::StopSignal;
use crate::Result;

/// Builds and starts the consumer stack (change-log consumer feeding
/// an IndexUpdater) for one index definition. The factory owns the
/// wiring to the record store, the dependency map and the search
/// backend; the worker only manages lifecycles.
pub trait UpdaterStackFactory: Send + Sync + 'static {
    fn start(&self, definition: &IndexDefinition, stop: StopSignal) -> Result<Consumer>;
}

struct Handle {
    consumer: Consumer,
    stop: StopSignal,
    data_version: u64,
}

struct WorkerState {
    model: Arc<IndexerModel>,
    factory: Arc<dyn UpdaterStackFactory>,
    handles: Mutex<HashMap<String, Handle>>,
}

impl WorkerState {
    /// Bring the running stack for one index in line with the model.
    /// A start failure is logged and left for the next relevant event;
    /// it never takes the worker down.
    fn sync_index(&self, name: &str) {
        let definition = self.model.index(name).ok();
        let mut handles = self.handles.lock();

        let wanted = definition.as_ref().filter(|def| def.should_run());
        match (handles.remove(name), wanted) {
            (Some(handle), Some(def)) if handle.data_version == def.data_version => {
                handles.insert(name.to_string(), handle);
            }
            (existing, wanted) => {
                if let Some(handle) = existing {
                    info!(index = name, "stopping updater stack");
                    handle.stop.request_stop();
                    handle.consumer.stop();
                }
                if let Some(def) = wanted {
                    let stop = StopSignal::new();
                    match self.factory.start(def, stop.clone()) {
                        Ok(consumer) => {
                            info!(index = name, data_version = def.data_version,
                                "started updater stack");
                            handles.insert(
                                name.to_string(),
                                Handle { consumer, stop, data_version: def.data_version },
                            );
                        }
                        Err(e) => {
                            error!(index = name, error = %e, "failed to start updater stack");
                        }
                    }
                }
            }
        }
    }

    fn stop_all(&self) {
        let mut handles = self.handles.lock();
        for (name, handle) in handles.drain() {
            info!(index = %name, "stopping updater stack");
            handle.stop.request_stop();
            handle.consumer.stop();
        }
    }
}

struct WorkerListener(Arc<WorkerState>);

impl IndexModelListener for WorkerListener {
    fn on_event(&self, event: IndexModelEvent) {
        self.0.sync_index(event.index_name());
    }
}

/// Watches the model and owns the running updater stacks.
pub struct IndexerWorker {
    state: Arc<WorkerState>,
}

impl IndexerWorker {
    pub fn new(model: Arc<IndexerModel>, factory: Arc<dyn UpdaterStackFactory>) -> Self {
        Self {
            state: Arc::new(WorkerState {
                model,
                factory,
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start stacks for the definitions already in the model, then
    /// follow model events.
    pub fn start(&self) {
        self.state
            .model
            .register_listener(Box::new(WorkerListener(Arc::clone(&self.state))));
        for name in self.state.model.index_names() {
            self.state.sync_index(&name);
        }
    }

    pub fn stop(&self) {
        self.state.stop_all();
    }

    pub fn running_indexes(&self) -> Vec<String> {
        self.state.handles.lock().keys().cloned().collect()
    }
}

impl Drop for IndexerWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
