//! Both engines must be observably identical apart from generated ids.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use stowage::{
    Database, Entity, Error, FieldType, Fields, LogEngine, ManualClock, MemoryRegister, Patch,
    SchemaDescriptor, StorageEngine, Value, fields,
};

fn schema() -> SchemaDescriptor {
    SchemaDescriptor::new([
        ("title", FieldType::Text),
        ("notes", FieldType::Text),
        ("priority", FieldType::Integer),
        ("estimate", FieldType::Real),
        ("done", FieldType::Boolean),
    ])
    .unwrap()
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap()
}

/// One engine of each kind, each on its own manual clock
async fn engines() -> Vec<(Box<dyn StorageEngine>, Arc<ManualClock>)> {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let relational = db.engine("tasks", schema()).unwrap().with_clock(clock.clone());
    relational.initialize().await.unwrap();

    let log_clock = Arc::new(ManualClock::new(start()));
    let log = LogEngine::new(Arc::new(MemoryRegister::new()), "tasks")
        .unwrap()
        .with_schema(schema())
        .with_clock(log_clock.clone());
    log.initialize().await.unwrap();

    vec![
        (Box::new(relational) as Box<dyn StorageEngine>, clock),
        (Box::new(log) as Box<dyn StorageEngine>, log_clock),
    ]
}

/// Everything observable about an entity except its id
fn observe(entities: &[Entity]) -> Vec<(Fields, DateTime<Utc>, DateTime<Utc>)> {
    entities
        .iter()
        .map(|e| (e.fields.clone(), e.created_at, e.updated_at))
        .collect()
}

fn titles(entities: &[Entity]) -> Vec<&str> {
    entities.iter().filter_map(|e| e.text("title")).collect()
}

/// Replay one operation sequence and record what the caller could see
async fn replay(engine: &dyn StorageEngine, clock: &ManualClock) -> Vec<Vec<(Fields, DateTime<Utc>, DateTime<Utc>)>> {
    let mut seen = Vec::new();

    let mut ids = Vec::new();
    for (title, priority, done) in [("Buy milk", 2, false), ("Write report", 1, true), ("Call Alice", 3, false)] {
        clock.advance(Duration::seconds(1));
        let id = engine
            .create(fields([
                ("title", Value::from(title)),
                ("priority", Value::from(priority)),
                ("done", Value::from(done)),
            ]))
            .await
            .unwrap();
        ids.push(id);
    }
    seen.push(observe(&engine.get_all().await.unwrap()));

    clock.advance(Duration::milliseconds(1500));
    let updated = engine
        .update(&ids[0], Patch::new().set("notes", "semi-skimmed").set("estimate", 5))
        .await
        .unwrap();
    seen.push(observe(std::slice::from_ref(&updated)));

    clock.advance(Duration::seconds(1));
    engine.update(&ids[1], Patch::new().clear("notes")).await.unwrap();

    seen.push(observe(&engine.search("MILK", &["title", "notes"]).await.unwrap()));
    seen.push(observe(&engine.search("skim", &["notes"]).await.unwrap()));
    seen.push(observe(&engine.get_by_field("done", Value::from(false)).await.unwrap()));
    seen.push(observe(&engine.get_by_field("notes", Value::Null).await.unwrap()));

    assert!(engine.delete(&ids[2]).await.unwrap());
    assert!(!engine.delete(&ids[2]).await.unwrap());
    seen.push(observe(&engine.get_all().await.unwrap()));
    seen
}

#[tokio::test]
async fn test_backends_agree_on_replayed_sequence() {
    let mut results = Vec::new();
    for (engine, clock) in engines().await {
        results.push(replay(engine.as_ref(), &clock).await);
    }
    assert_eq!(results[0], results[1]);
}

#[tokio::test]
async fn test_scenario_a_first_create() {
    for (engine, _) in engines().await {
        engine.create(fields([("title", Value::from("Buy milk"))])).await.unwrap();

        let all = engine.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text("title"), Some("Buy milk"));
        assert!(!all[0].id.is_empty());
        assert_eq!(all[0].created_at, start());
        assert_eq!(all[0].created_at, all[0].updated_at);
    }
}

#[tokio::test]
async fn test_scenario_b_update_isolation() {
    for (engine, clock) in engines().await {
        let alpha = engine
            .create(fields([("title", Value::from("Alpha")), ("priority", Value::from(1))]))
            .await
            .unwrap();
        let beta = engine.create(fields([("title", Value::from("Beta"))])).await.unwrap();
        let before = engine.get_by_id(&alpha).await.unwrap().unwrap();

        clock.advance(Duration::milliseconds(10));
        engine.update(&alpha, Patch::new().set("title", "Gamma")).await.unwrap();

        let after = engine.get_by_id(&alpha).await.unwrap().unwrap();
        assert_eq!(after.text("title"), Some("Gamma"));
        assert_eq!(after.fields.get("priority"), before.fields.get("priority"));
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);

        let beta = engine.get_by_id(&beta).await.unwrap().unwrap();
        assert_eq!(beta.text("title"), Some("Beta"));
    }
}

#[tokio::test]
async fn test_scenario_c_bulk_create_order() {
    for (engine, _) in engines().await {
        let list = (1..=3).map(|n| fields([("priority", Value::from(n))])).collect();
        let ids = engine.bulk_create(list).await.unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(engine.count().await.unwrap(), 3);

        for (n, id) in (1..=3).zip(&ids) {
            let entity = engine.get_by_id(id).await.unwrap().unwrap();
            assert_eq!(entity.fields.get("priority"), Some(&Value::Integer(n)));
        }
    }
}

#[tokio::test]
async fn test_scenario_d_delete() {
    for (engine, _) in engines().await {
        let alpha = engine.create(fields([("title", Value::from("Alpha"))])).await.unwrap();
        engine.create(fields([("title", Value::from("Beta"))])).await.unwrap();
        let before = engine.count().await.unwrap();

        assert!(engine.delete(&alpha).await.unwrap());
        assert!(engine.get_by_id(&alpha).await.unwrap().is_none());
        assert_eq!(engine.count().await.unwrap(), before - 1);

        let err = engine.update(&alpha, Patch::new().set("title", "x")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}

#[tokio::test]
async fn test_ordering_is_newest_first() {
    for (engine, clock) in engines().await {
        for title in ["first", "second", "third"] {
            engine.create(fields([("title", Value::from(title))])).await.unwrap();
            clock.advance(Duration::milliseconds(1));
        }
        let all = engine.get_all().await.unwrap();
        assert_eq!(titles(&all), vec!["third", "second", "first"]);
        assert!(all.windows(2).all(|w| w[0].created_at > w[1].created_at));
    }
}

#[tokio::test]
async fn test_search_correctness() {
    for (engine, clock) in engines().await {
        let rows = [
            ("abc at start", "nothing"),
            ("nothing", "ends with ABC"),
            ("a_b%c", "literal wildcards"),
            ("unrelated", "also unrelated"),
            ("École STRASSE Über", "non-ascii"),
        ];
        for (title, notes) in rows {
            clock.advance(Duration::seconds(1));
            engine
                .create(fields([("title", Value::from(title)), ("notes", Value::from(notes))]))
                .await
                .unwrap();
        }

        let hits = engine.search("abc", &["title", "notes"]).await.unwrap();
        assert_eq!(titles(&hits), vec!["nothing", "abc at start"]);

        let hits = engine.search("_b%", &["title"]).await.unwrap();
        assert_eq!(titles(&hits), vec!["a_b%c"]);

        let hits = engine.search("école", &["title"]).await.unwrap();
        assert_eq!(titles(&hits), vec!["École STRASSE Über"]);
        let hits = engine.search("ÜBER", &["title", "notes"]).await.unwrap();
        assert_eq!(titles(&hits), vec!["École STRASSE Über"]);

        assert!(engine.search("abc", &[]).await.unwrap().is_empty());
        assert_eq!(engine.search("", &["title"]).await.unwrap().len(), 5);

        let err = engine.search("abc", &["colour"]).await.unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));
    }
}

#[tokio::test]
async fn test_idempotent_delete_and_clear() {
    for (engine, _) in engines().await {
        engine.clear().await.unwrap();
        assert!(!engine.delete("never-existed").await.unwrap());

        engine.create(fields([("title", Value::from("x"))])).await.unwrap();
        engine.clear().await.unwrap();
        engine.clear().await.unwrap();
        assert_eq!(engine.count().await.unwrap(), 0);
        assert!(engine.get_all().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_updated_at_never_moves_backwards() {
    for (engine, clock) in engines().await {
        let id = engine.create(fields([("title", Value::from("x"))])).await.unwrap();
        clock.advance(Duration::seconds(-30));
        let entity = engine.update(&id, Patch::new().set("title", "y")).await.unwrap();
        assert_eq!(entity.updated_at, start());
    }
}

#[tokio::test]
async fn test_mixed_case_collection_rejected_by_both_engines() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(db.engine("Tasks", schema()), Err(Error::Schema(_))));
    assert!(matches!(
        LogEngine::new(Arc::new(MemoryRegister::new()), "Tasks"),
        Err(Error::Schema(_))
    ));
    assert!(db.engine("tasks", schema()).is_ok());
}
