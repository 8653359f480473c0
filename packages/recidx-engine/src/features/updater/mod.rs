//! The IndexUpdater state machine.
//!
//! One change-log event in, a set of index mutations plus follow-up
//! events out. The transport guarantees an event's record id is not
//! being handled on another worker; the record lock is a second,
//! explicit layer of the same guarantee.
//!
//! Failure classes:
//! - missing record: normal flow, silently skipped;
//! - per-dependant publish failures: logged, counted, processing
//!   continues with the next dependant;
//! - everything else escaping [`IndexUpdater::process_event`]: logged
//!   with record id and event type, counted, and returned to the
//!   consumer for redelivery. Interruption passes through untouched.

mod plan;

pub use plan::UpdatePlan;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, warn};

use recidx_model::{
    AbsoluteRecordId, IndexFilterData, RecordEvent, RecordEventType, RecordId, SchemaId, Scope,
};
use recidx_storage::{DependantCursor, DependencyMap};

use crate::features::events::{EventHandler, EventPublisher};
use crate::features::indexer::Indexer;
use crate::features::locking::IndexLocker;
use crate::features::repository::{FieldTypes, FilterStateProvider, RecordStore, VTaggedRecord};
use crate::metrics::UpdaterMetrics;
use crate::stop::StopSignal;
use crate::{EngineError, Result};

pub struct IndexUpdater {
    indexer: Arc<Indexer>,
    store: Arc<dyn RecordStore>,
    filter_state: Arc<dyn FilterStateProvider>,
    field_types: Arc<FieldTypes>,
    /// `None` disables denormalization propagation for this index.
    deref_map: Option<Arc<dyn DependencyMap>>,
    locker: IndexLocker,
    publisher: Arc<dyn EventPublisher>,
    subscription_id: String,
    stop: StopSignal,
    metrics: UpdaterMetrics,
}

impl IndexUpdater {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index_name: &str,
        indexer: Arc<Indexer>,
        store: Arc<dyn RecordStore>,
        filter_state: Arc<dyn FilterStateProvider>,
        field_types: Arc<FieldTypes>,
        deref_map: Option<Arc<dyn DependencyMap>>,
        locker: IndexLocker,
        publisher: Arc<dyn EventPublisher>,
        subscription_id: impl Into<String>,
        stop: StopSignal,
    ) -> Self {
        Self {
            indexer,
            store,
            filter_state,
            field_types,
            deref_map,
            locker,
            publisher,
            subscription_id: subscription_id.into(),
            stop,
            metrics: UpdaterMetrics::new(index_name),
        }
    }

    /// Handle one change-log event end to end.
    pub fn process_event(&self, key: &[u8], payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            // Decoding it would fail forever; redelivery cannot help.
            warn!("ignoring change-log entry with an empty payload");
            return Ok(());
        }
        let id: RecordId = RecordId::from_bytes(key)?;
        let event = RecordEvent::from_bytes(payload)?;
        if !event.applies_to_subscription(&self.subscription_id) {
            return Ok(());
        }
        self.metrics.updates.inc();

        let abs = AbsoluteRecordId::new(event.table_name(), id);
        let result = self.dispatch(&abs, &event);
        if let Err(e) = &result {
            if !e.is_interrupted() {
                self.metrics.errors.inc();
                error!(
                    record = %abs,
                    event_type = ?event.event_type(),
                    error = %e,
                    "event processing failed, awaiting redelivery"
                );
            }
        }
        result
    }

    fn dispatch(&self, abs: &AbsoluteRecordId, event: &RecordEvent) -> Result<()> {
        match event.event_type() {
            RecordEventType::Index => self.process_index(abs, event),
            RecordEventType::Delete => {
                self.with_lock(abs, |this| {
                    this.indexer.delete_record(abs.table(), abs.record_id())
                })?;
                // All vtags of the deleted record count as changed.
                self.update_denormalized_data(abs, None)
            }
            RecordEventType::Create | RecordEventType::Update => {
                // The snapshot is read under the record lock so the
                // state the plan is computed from is the state the
                // index mutations are applied to.
                self.with_lock(abs, |this| {
                    let vt = VTaggedRecord::read(
                        this.store.as_ref(),
                        &this.field_types,
                        abs,
                        Some(event.clone()),
                    )?;

                    let plan = if event.event_type() == RecordEventType::Create {
                        match &vt {
                            Some(vt) => this.plan_for_create(abs, vt),
                            None => {
                                debug!(record = %abs, "record vanished before create was processed");
                                UpdatePlan::new()
                            }
                        }
                    } else {
                        this.plan_for_update(abs, vt.as_ref(), event)?
                    };

                    this.apply_plan(abs, vt.as_ref(), &plan)
                })?;
                self.update_denormalized_data(abs, Some(event))
            }
        }
    }

    /// Self-generated re-index request: index the carried vtags, kept
    /// only where the record's current index case still tracks them.
    /// A stale request for a record that has since left every
    /// inclusion rule is dropped, not trusted. The indexer further
    /// intersects with the tags actually present on the record.
    fn process_index(&self, abs: &AbsoluteRecordId, event: &RecordEvent) -> Result<()> {
        self.with_lock(abs, |this| {
            let vt = VTaggedRecord::read(
                this.store.as_ref(),
                &this.field_types,
                abs,
                Some(event.clone()),
            )?;
            let Some(vt) = vt else {
                debug!(record = %abs, "record vanished before re-index request was processed");
                return Ok(());
            };
            let Some(case) = this.indexer.conf().index_case(abs.table(), vt.record()) else {
                debug!(record = %abs, "record left every index case, dropping re-index request");
                return Ok(());
            };
            let vtags: BTreeSet<SchemaId> = event
                .vtags_to_index()
                .intersection(case.version_tags())
                .copied()
                .collect();
            if vtags.is_empty() {
                return Ok(());
            }
            this.indexer.index(abs.table(), &vt, &vtags)
        })
    }

    fn plan_for_create(&self, abs: &AbsoluteRecordId, vt: &VTaggedRecord) -> UpdatePlan {
        match self.indexer.conf().index_case(abs.table(), vt.record()) {
            Some(case) => UpdatePlan::new().index_vtags(case.version_tags().iter().copied()),
            None => UpdatePlan::new(),
        }
    }

    /// The UPDATE branch: each sub-rule contributes a delta, merged
    /// in document order by the plan reducer.
    fn plan_for_update(
        &self,
        abs: &AbsoluteRecordId,
        vt: Option<&VTaggedRecord>,
        event: &RecordEvent,
    ) -> Result<UpdatePlan> {
        let conf = self.indexer.conf();
        let (old, new) = self.filter_state.old_and_new(abs, event)?;
        let case_old = old.as_ref().and_then(|r| conf.index_case(abs.table(), r));
        let case_new = new.as_ref().and_then(|r| conf.index_case(abs.table(), r));

        let mut plan = UpdatePlan::new();

        // Tags tracked before but not after this event lost their
        // applicability; their entries go immediately.
        if let (Some(case_old), Some(case_new)) = (&case_old, &case_new) {
            for vtag in case_old.version_tags().difference(case_new.version_tags()) {
                plan = plan.delete_vtag(*vtag);
            }
        }

        // No matching case (or no record state at all): existing
        // entries cannot be trusted, delete outright.
        let (Some(case_new), Some(vt)) = (case_new, vt) else {
            return Ok(plan.delete_record());
        };

        if event.record_type_changed() {
            // Prior assumptions about tracked vtags are void.
            return Ok(plan
                .delete_record()
                .index_vtags(case_new.version_tags().iter().copied()));
        }

        if conf.changes_affect_index(vt, Scope::NonVersioned) {
            plan = plan.index_vtags(case_new.version_tags().iter().copied());
        } else if let Some(version) = event.version_created().or(event.version_updated()) {
            let versioned_change = conf.changes_affect_index(vt, Scope::Versioned)
                || conf.changes_affect_index(vt, Scope::VersionedMutable);
            if versioned_change {
                if let Some(tags_at_version) = vt.vtags_by_version().get(&version) {
                    plan = plan.index_vtags(
                        case_new
                            .version_tags()
                            .intersection(tags_at_version)
                            .copied(),
                    );
                }
            }
        }

        // Vtag fields whose value changed: re-point or remove.
        for vtag in event.modified_vtags() {
            if vt.vtags().contains_key(vtag) && case_new.version_tags().contains(vtag) {
                plan = plan.index_vtag(*vtag);
            } else {
                plan = plan.delete_vtag(*vtag);
            }
        }

        Ok(plan)
    }

    /// Apply a reduced plan. The caller holds the record's lock.
    fn apply_plan(
        &self,
        abs: &AbsoluteRecordId,
        vt: Option<&VTaggedRecord>,
        plan: &UpdatePlan,
    ) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        if plan.deletes_record() {
            self.indexer.delete_record(abs.table(), abs.record_id())?;
        }
        for vtag in plan.vtags_to_delete() {
            self.indexer
                .delete_vtag_entry(abs.table(), abs.record_id(), vtag)?;
        }
        if !plan.vtags_to_index().is_empty() {
            if let Some(vt) = vt {
                self.indexer.index(abs.table(), vt, plan.vtags_to_index())?;
            }
        }
        Ok(())
    }

    /// Direct mutations of the record's own entry run under its lock,
    /// released unconditionally; unlock failures are logged, never
    /// escalated into the retry path.
    fn with_lock(&self, abs: &AbsoluteRecordId, f: impl FnOnce(&Self) -> Result<()>) -> Result<()> {
        self.locker.lock(abs, &self.stop)?;
        let result = f(self);
        self.locker.unlock_log_failure(abs);
        result
    }

    /// Propagate this record's change to the records whose index
    /// entries were derived from it. `event == None` is the delete
    /// sentinel: every vtag counts as changed and the field filter is
    /// not applied.
    fn update_denormalized_data(
        &self,
        source: &AbsoluteRecordId,
        event: Option<&RecordEvent>,
    ) -> Result<()> {
        let Some(deref_map) = &self.deref_map else {
            return Ok(());
        };

        let changed_fields = event.map(RecordEvent::all_updated_fields);
        let mut accumulated: BTreeMap<AbsoluteRecordId, BTreeSet<SchemaId>> = BTreeMap::new();

        for vtag in self.indexer.conf().vtags() {
            let structurally_changed = match event {
                None => true,
                Some(e) => e.modified_vtags().contains(vtag),
            };
            let cursor = if structurally_changed {
                // Any of this record's fields might have mattered.
                deref_map.find_dependants(source)?
            } else {
                match &changed_fields {
                    Some(fields) if !fields.is_empty() => {
                        deref_map.find_dependants_of(source, fields, *vtag)?
                    }
                    _ => continue,
                }
            };
            self.drain_dependants(cursor, *vtag, &mut accumulated)?;
        }

        for (dependant, vtags) in accumulated {
            if self.stop.is_stopped() {
                return Err(EngineError::Interrupted);
            }
            let mut follow_up = RecordEvent::new(RecordEventType::Index, dependant.table());
            for vtag in vtags {
                follow_up = follow_up.with_vtag_to_index(vtag);
            }
            follow_up = follow_up.with_filter_data(IndexFilterData {
                subscription_inclusions: BTreeSet::from([self.subscription_id.clone()]),
            });

            match self
                .publisher
                .publish(&dependant.record_id().to_bytes(), &follow_up)
            {
                Ok(()) => {
                    debug!(source = %source, dependant = %dependant, "published re-index request");
                    self.metrics.last_reindex_requested.set(unix_millis());
                }
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    // One dependant's failure must not starve the rest.
                    error!(source = %source, dependant = %dependant, error = %e,
                        "failed to publish re-index request");
                    self.metrics.errors.inc();
                }
            }
        }
        Ok(())
    }

    fn drain_dependants(
        &self,
        mut cursor: Box<dyn DependantCursor>,
        vtag: SchemaId,
        accumulated: &mut BTreeMap<AbsoluteRecordId, BTreeSet<SchemaId>>,
    ) -> Result<()> {
        let result = (|| {
            while cursor.has_next()? {
                if self.stop.is_stopped() {
                    return Err(EngineError::Interrupted);
                }
                if let Some(dependant) = cursor.next()? {
                    accumulated.entry(dependant).or_default().insert(vtag);
                }
            }
            Ok(())
        })();
        cursor.close();
        result
    }
}

impl EventHandler for IndexUpdater {
    fn handle(&self, key: &[u8], payload: &[u8]) -> Result<()> {
        self.process_event(key, payload)
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
