//! Full-stack scenarios: in-memory record store, SQLite dependency
//! map, tantivy shards, in-process change log, IndexUpdater.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use recidx_engine::features::conf::IndexerConfBuilder;
use recidx_engine::features::events::{ChangeLog, Consumer, EventHandler, EventPublisher};
use recidx_engine::features::indexer::{Indexer, ShardWriter, TantivyShardManager};
use recidx_engine::features::locking::{IndexLocker, InProcessLockManager, LockManager};
use recidx_engine::features::repository::{
    FieldTypes, FilterStateProvider, InMemoryRecordStore, RecordStore,
};
use recidx_engine::features::sharding::ShardSelector;
use recidx_engine::features::updater::IndexUpdater;
use recidx_engine::StopSignal;
use recidx_model::{AbsoluteRecordId, FieldType, FieldValue, RecordEvent, RecordId, Scope, SchemaId};
use recidx_storage::{DependencyMap, SqliteDependencyMap};

const SUBSCRIPTION: &str = "sub-main";
const TABLE: &str = "records";

struct Env {
    _dir: TempDir,
    store: Arc<InMemoryRecordStore>,
    shards: Arc<TantivyShardManager>,
    log: Arc<ChangeLog>,
    updater: Arc<IndexUpdater>,
}

fn field_types() -> Arc<FieldTypes> {
    Arc::new(
        FieldTypes::new()
            .with(FieldType::new("name", Scope::NonVersioned))
            .with(FieldType::new("link", Scope::NonVersioned))
            .with(FieldType::vtag("nv")),
    )
}

fn env() -> Env {
    let types = field_types();
    let conf = Arc::new(
        IndexerConfBuilder::build(
            br#"{
                "cases": [{"recordTypes": ["Doc"], "vtags": ["nv"]}],
                "fields": [
                    {"name": "name", "field": "name"},
                    {"name": "deref", "follows": [{"link": "link"}], "field": "name"}
                ]
            }"#,
            &types,
        )
        .expect("valid configuration"),
    );

    let dir = TempDir::new().expect("temp dir");
    let selector = ShardSelector::single("shard1");
    let shards = Arc::new(
        TantivyShardManager::open(dir.path(), selector.shards(), &conf).expect("open shards"),
    );
    let store = Arc::new(InMemoryRecordStore::new(Arc::clone(&types)));
    let deref_map: Arc<dyn DependencyMap> =
        Arc::new(SqliteDependencyMap::in_memory().expect("deref map"));
    let log = Arc::new(ChangeLog::new());
    let manager: Arc<dyn LockManager> = Arc::new(InProcessLockManager::new());

    let indexer = Arc::new(Indexer::new(
        "end-to-end",
        conf,
        store.clone() as Arc<dyn RecordStore>,
        Arc::clone(&types),
        selector,
        shards.clone() as Arc<dyn ShardWriter>,
        Some(Arc::clone(&deref_map)),
    ));
    let updater = Arc::new(IndexUpdater::new(
        "end-to-end",
        indexer,
        store.clone() as Arc<dyn RecordStore>,
        store.clone() as Arc<dyn FilterStateProvider>,
        types,
        Some(deref_map),
        IndexLocker::new(manager, true),
        log.clone() as Arc<dyn EventPublisher>,
        SUBSCRIPTION,
        StopSignal::new(),
    ));

    Env { _dir: dir, store, shards, log, updater }
}

fn abs(id: &str) -> AbsoluteRecordId {
    AbsoluteRecordId::new(TABLE, RecordId::master(id))
}

fn publish(env: &Env, id: &AbsoluteRecordId, event: &RecordEvent) {
    env.log
        .publish(&id.record_id().to_bytes(), event)
        .expect("publish");
}

/// Process everything currently in the log, follow-up events
/// included, in publication order.
fn drain(env: &Env) {
    while let Some(entry) = env.log.poll(Duration::from_millis(20)) {
        env.updater
            .process_event(&entry.key, &entry.payload)
            .expect("event processing");
        env.log.complete();
    }
}

fn hits(env: &Env, field: &str, text: &str) -> Vec<String> {
    env.shards.search_text(field, text, 100).expect("search")
}

fn name_id() -> SchemaId {
    SchemaId::from_name("name")
}

fn nv() -> SchemaId {
    SchemaId::from_name("nv")
}

#[test]
fn full_lifecycle_with_dereference_propagation() {
    let env = env();
    let r1 = abs("r1");
    let r2 = abs("r2");

    // Create R1 with name=apple under tag nv.
    let event = env.store.create(
        &r1,
        "Doc",
        BTreeMap::from([
            (name_id(), FieldValue::String("apple".into())),
            (nv(), FieldValue::Long(0)),
        ]),
    );
    publish(&env, &r1, &event);
    drain(&env);
    assert_eq!(hits(&env, "name", "apple").len(), 1);

    // Rename to pear: the entry is replaced, not duplicated.
    let event = env
        .store
        .update(&r1, BTreeMap::from([(name_id(), FieldValue::String("pear".into()))]), false)
        .expect("r1 exists");
    publish(&env, &r1, &event);
    drain(&env);
    assert_eq!(hits(&env, "name", "apple").len(), 0);
    assert_eq!(hits(&env, "name", "pear").len(), 1);

    // Create R2 linking to R1: its dereferenced field carries pear.
    let event = env.store.create(
        &r2,
        "Doc",
        BTreeMap::from([
            (SchemaId::from_name("link"), FieldValue::Link(r1.record_id().clone())),
            (nv(), FieldValue::Long(0)),
        ]),
    );
    publish(&env, &r2, &event);
    drain(&env);
    let deref_hits = hits(&env, "deref", "pear");
    assert_eq!(deref_hits.len(), 1);
    assert!(deref_hits[0].contains("r2"));

    // Rename R1 again: the follow-up re-index request rebuilds R2.
    let event = env
        .store
        .update(&r1, BTreeMap::from([(name_id(), FieldValue::String("tomato".into()))]), false)
        .expect("r1 exists");
    publish(&env, &r1, &event);
    drain(&env);
    assert_eq!(hits(&env, "deref", "pear").len(), 0);
    assert_eq!(hits(&env, "deref", "tomato").len(), 1);

    // Delete R1: its entry goes, and R2's deref field is cleared.
    let event = env.store.delete(&r1).expect("r1 exists");
    publish(&env, &r1, &event);
    drain(&env);
    assert_eq!(hits(&env, "name", "tomato").len(), 0);
    assert_eq!(hits(&env, "deref", "tomato").len(), 0);
    assert!(env
        .shards
        .keys_for_record(TABLE, r1.record_id())
        .expect("search")
        .is_empty());

    // Delete R2: the index is empty for both records.
    let event = env.store.delete(&r2).expect("r2 exists");
    publish(&env, &r2, &event);
    drain(&env);
    assert_eq!(env.shards.num_docs().expect("num docs"), 0);
}

#[test]
fn reprocessing_the_same_event_is_idempotent() {
    let env = env();
    let r1 = abs("r1");
    let event = env.store.create(
        &r1,
        "Doc",
        BTreeMap::from([
            (name_id(), FieldValue::String("apple".into())),
            (nv(), FieldValue::Long(0)),
        ]),
    );

    // At-least-once delivery: the same event arrives twice.
    publish(&env, &r1, &event);
    publish(&env, &r1, &event);
    drain(&env);

    assert_eq!(env.shards.num_docs().expect("num docs"), 1);
    assert_eq!(hits(&env, "name", "apple").len(), 1);
}

#[test]
fn entries_converge_to_present_and_tracked_vtags() {
    let env = env();
    let r1 = abs("r1");

    let event = env.store.create(
        &r1,
        "Doc",
        BTreeMap::from([
            (name_id(), FieldValue::String("apple".into())),
            (nv(), FieldValue::Long(0)),
        ]),
    );
    publish(&env, &r1, &event);
    drain(&env);
    assert_eq!(env.shards.keys_for_record(TABLE, r1.record_id()).expect("keys").len(), 1);

    // Removing the vtag field leaves nothing to maintain.
    let event = env.store.delete_field(&r1, nv()).expect("field exists");
    publish(&env, &r1, &event);
    drain(&env);
    assert!(env.shards.keys_for_record(TABLE, r1.record_id()).expect("keys").is_empty());

    // Re-adding it converges back to exactly one entry.
    let event = env
        .store
        .update(&r1, BTreeMap::from([(nv(), FieldValue::Long(0))]), false)
        .expect("r1 exists");
    publish(&env, &r1, &event);
    drain(&env);
    assert_eq!(env.shards.keys_for_record(TABLE, r1.record_id()).expect("keys").len(), 1);
}

#[test]
fn unrelated_source_changes_do_not_rebuild_dependants() {
    let env = env();
    let r1 = abs("r1");
    let r2 = abs("r2");

    let event = env.store.create(
        &r1,
        "Doc",
        BTreeMap::from([
            (name_id(), FieldValue::String("pear".into())),
            (nv(), FieldValue::Long(0)),
        ]),
    );
    publish(&env, &r1, &event);
    let event = env.store.create(
        &r2,
        "Doc",
        BTreeMap::from([
            (SchemaId::from_name("link"), FieldValue::Link(r1.record_id().clone())),
            (nv(), FieldValue::Long(0)),
        ]),
    );
    publish(&env, &r2, &event);
    drain(&env);
    assert_eq!(hits(&env, "deref", "pear").len(), 1);

    // A field no index expression reads.
    let unrelated = SchemaId::new();
    let event = env
        .store
        .update(&r1, BTreeMap::from([(unrelated, FieldValue::Long(42))]), false)
        .expect("r1 exists");
    publish(&env, &r1, &event);

    let entry = env.log.poll(Duration::from_millis(20)).expect("the update itself");
    env.updater.process_event(&entry.key, &entry.payload).expect("processing");
    env.log.complete();

    // No follow-up was published.
    assert!(env.log.poll(Duration::from_millis(20)).is_none());
    assert_eq!(hits(&env, "deref", "pear").len(), 1);
}

#[test]
fn concurrent_events_for_one_record_serialize() {
    let env = env();
    let r1 = abs("r1");

    let event = env.store.create(
        &r1,
        "Doc",
        BTreeMap::from([
            (name_id(), FieldValue::String("name0".into())),
            (nv(), FieldValue::Long(0)),
        ]),
    );
    publish(&env, &r1, &event);
    for i in 1..=10 {
        let event = env
            .store
            .update(
                &r1,
                BTreeMap::from([(name_id(), FieldValue::String(format!("name{i}")))]),
                false,
            )
            .expect("r1 exists");
        publish(&env, &r1, &event);
    }

    let stop = StopSignal::new();
    let consumer = Consumer::start(
        Arc::clone(&env.log),
        env.updater.clone() as Arc<dyn EventHandler>,
        4,
        stop.clone(),
    )
    .expect("start consumer");
    assert!(env.log.wait_idle(Duration::from_secs(10)), "log drained");
    consumer.stop();

    // One entry, reflecting the final write.
    assert_eq!(env.shards.keys_for_record(TABLE, r1.record_id()).expect("keys").len(), 1);
    assert_eq!(hits(&env, "name", "name10").len(), 1);
    assert_eq!(hits(&env, "name", "name5").len(), 0);
}
