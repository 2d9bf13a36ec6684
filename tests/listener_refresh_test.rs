mod common;

use std::sync::atomic::AtomicBool;

use rand::SeedableRng;
use rand::rngs::StdRng;

use lyra::query::filter::Filter;
use lyra::{
    Collection, DataValue, Datalayer, Document, ErrorKind, Listener, Model, Refresh, VectorIndex,
};

use common::{COLLECTION, INDEX, INPUT_DIM, OUTPUT_DIM, example_for, get, random_vector, setup};

fn new_document(id: &str, seed: u64) -> Document {
    let mut rng = StdRng::seed_from_u64(seed);
    Document::new_with_id(id)
        .add_field("x", random_vector(&mut rng, INPUT_DIM))
        .add_field("y", 1)
        .add_field("n", 0)
}

#[test]
fn test_outputs_are_stored_under_deterministic_field() -> lyra::Result<()> {
    let db = setup(4)?;
    let doc = get(&db, "d1")?.unwrap();

    for key in ["x", "z"] {
        let output = doc
            .get_path(&format!("_outputs.{key}.linear_a"))
            .expect("listener output");
        assert!(matches!(output, DataValue::Encoded(p) if p.encoder() == "f32[16]"));
        assert_eq!(output.to_vector().map(|v| v.len()), Some(OUTPUT_DIM));
    }
    assert_eq!(db.vector_index(INDEX)?.table().len(), 4);
    Ok(())
}

#[test]
fn test_insert_with_refresh_is_searchable() -> lyra::Result<()> {
    let db = setup(10)?;
    let docs = Collection::new(COLLECTION);

    let outcome = docs
        .insert_many(vec![new_document("fresh", 99)])
        .execute(&db)?
        .into_write()?;
    assert_eq!(outcome.ids, vec!["fresh"]);
    // Only the new document was transformed.
    assert!(outcome.reports().iter().any(|r| r.processed == 1));

    let example = example_for(&db, "fresh")?;
    let cursor = docs.like(example, INDEX, 1).find().execute(&db)?.into_cursor()?;
    assert_eq!(cursor.ids(), vec!["fresh"]);
    Ok(())
}

#[test]
fn test_skipped_refresh_waits_for_explicit_run() -> lyra::Result<()> {
    let db = setup(10)?;
    let docs = Collection::new(COLLECTION);

    let outcome = db
        .execute_with(&docs.insert_many(vec![new_document("bulk", 5)]), Refresh::Skip)?
        .into_write()?;
    assert!(outcome.reports().is_empty());
    assert!(!db.vector_index(INDEX)?.table().contains("bulk"));

    let example = example_for(&db, "bulk")?;
    let cursor = docs.like(example.clone(), INDEX, 1).find().execute(&db)?.into_cursor()?;
    assert_ne!(cursor.ids(), vec!["bulk"]);

    let reports = db.refresh(COLLECTION)?;
    assert_eq!(reports.len(), 2);
    let cursor = docs.like(example, INDEX, 1).find().execute(&db)?.into_cursor()?;
    assert_eq!(cursor.ids(), vec!["bulk"]);
    Ok(())
}

#[test]
fn test_listener_run_is_idempotent() -> lyra::Result<()> {
    let db = setup(6)?;
    let path = db.listener("linear_a/x")?.output_path();
    let outputs = |db: &Datalayer| -> lyra::Result<Vec<Option<Vec<f32>>>> {
        Collection::new(COLLECTION)
            .find()
            .execute(db)?
            .into_cursor()?
            .iter()
            .map(|doc| Ok(doc?.get_path(&path).and_then(|v| v.to_vector())))
            .collect()
    };

    let before = outputs(&db)?;
    let report = db.run_listener("linear_a/x", None)?;
    assert_eq!(report.processed, 6);
    assert!(report.is_success());
    let after = outputs(&db)?;

    assert_eq!(before, after);
    assert!(after.iter().all(Option::is_some));
    assert_eq!(db.vector_index(INDEX)?.table().len(), 6);
    Ok(())
}

#[test]
fn test_partial_failure_keeps_other_documents() -> lyra::Result<()> {
    let db = Datalayer::in_memory()?;
    db.add(Model::from_fn("picky", |v: &DataValue| {
        let x = v.to_vector().ok_or_else(|| anyhow::anyhow!("not a vector"))?;
        anyhow::ensure!(x[0] >= 0.0, "negative leading component");
        Ok(DataValue::Vector(x))
    }))?;

    let docs = Collection::new("points");
    docs.insert_many(vec![
        Document::new_with_id("a").add_field("x", vec![1.0f32, 2.0]),
        Document::new_with_id("b").add_field("x", vec![-1.0f32, 0.0]),
        Document::new_with_id("c").add_field("x", vec![3.0f32, 1.0]),
        Document::new_with_id("d").add_field("label", "no vector"),
    ])
    .execute(&db)?;

    let report = db
        .add(Listener::new("picky", "x", docs.find())?)?
        .unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed_ids(), vec!["b"]);
    assert_eq!(
        report.failures[0].error.kind(),
        ErrorKind::TransformationFailure
    );

    db.add(VectorIndex::new("points_x", "picky/x"))?;
    let table = db.vector_index("points_x")?.table().len();
    assert_eq!(table, 2);

    let outcome = docs
        .insert_many(vec![
            Document::new_with_id("e").add_field("x", vec![-2.0f32, 1.0]),
            Document::new_with_id("f").add_field("x", vec![2.0f32, 1.0]),
        ])
        .execute(&db)?
        .into_write()?;
    assert_eq!(outcome.reports()[0].failed_ids(), vec!["e"]);
    assert_eq!(outcome.reports()[0].processed, 1);

    let stored = docs
        .find_where(Filter::all().exists("_outputs.x.picky", true))
        .execute(&db)?
        .into_cursor()?;
    assert_eq!(stored.ids(), vec!["a", "c", "f"]);
    Ok(())
}

#[test]
fn test_stop_flag_interrupts_run() -> lyra::Result<()> {
    let db = setup(4)?;
    let listener = db.listener("linear_a/z")?;

    let report = listener.run_until(&db, None, &AtomicBool::new(true))?;
    assert!(report.interrupted);
    assert_eq!(report.processed, 0);
    assert!(!report.is_success());

    let report = listener.on_insert(&db, &["d2".to_string()])?;
    assert_eq!(report.processed, 1);
    Ok(())
}
