//! Concurrent access to a shared Datalayer.

use std::sync::{Arc, Barrier};
use std::thread;

use lyra::query::filter::Filter;
use lyra::vector::VectorTable;
use lyra::{Collection, DataValue, Datalayer, Document, Listener, Model, VectorIndex};

const DIM: usize = 8;

fn identity() -> Model {
    Model::from_fn("identity", |v: &DataValue| {
        v.to_vector()
            .map(DataValue::Vector)
            .ok_or_else(|| anyhow::anyhow!("not a vector"))
    })
    .with_dimension(DIM)
}

fn point(id: &str, seed: usize) -> Document {
    let x: Vec<f32> = (0..DIM).map(|j| ((seed * 31 + j * 7) % 13) as f32 + 1.0).collect();
    Document::new_with_id(id).add_field("x", x)
}

fn points_with_listener(count: usize) -> lyra::Result<Datalayer> {
    let db = Datalayer::in_memory()?;
    db.add(identity())?;
    let points = Collection::new("points");
    points
        .insert_many((0..count).map(|i| point(&format!("p{i}"), i)).collect())
        .execute(&db)?;
    db.add(Listener::new("identity", "x", points.find())?)?;
    Ok(db)
}

fn indexed_ids(db: &Datalayer, index: &str, ids: &[String]) -> lyra::Result<Vec<String>> {
    let entry = db.vector_index(index)?;
    Ok(ids
        .iter()
        .filter(|id| entry.table().contains(id))
        .cloned()
        .collect())
}

/// Documents written while an index is being registered end up indexed.
#[test]
fn test_insert_during_index_registration_is_indexed() -> lyra::Result<()> {
    let db = points_with_listener(5_000)?;
    let barrier = Arc::new(Barrier::new(2));

    let registrar = {
        let db = db.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            db.add(VectorIndex::new("points_x", "identity/x"))
        })
    };
    let writer = {
        let db = db.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> lyra::Result<Vec<String>> {
            barrier.wait();
            let mut late = Vec::new();
            for i in 0..50 {
                let id = format!("late{i}");
                Collection::new("points")
                    .insert_many(vec![point(&id, 10_000 + i)])
                    .execute(&db)?;
                late.push(id);
            }
            Ok(late)
        })
    };

    registrar.join().expect("registrar panicked")?;
    let late = writer.join().expect("writer panicked")?;

    assert_eq!(indexed_ids(&db, "points_x", &late)?, late);
    assert_eq!(db.vector_index("points_x")?.table().len(), 5_050);
    Ok(())
}

/// Parallel inserts with synchronous refresh are all searchable afterwards.
#[test]
fn test_concurrent_inserts_with_refresh() -> lyra::Result<()> {
    let db = points_with_listener(0)?;
    db.add(VectorIndex::new("points_x", "identity/x"))?;
    let writers = 4;
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> lyra::Result<Vec<String>> {
                barrier.wait();
                let mut ids = Vec::new();
                for i in 0..25 {
                    let id = format!("w{w}-{i}");
                    let outcome = Collection::new("points")
                        .insert_many(vec![point(&id, w * 100 + i)])
                        .execute(&db)?
                        .into_write()?;
                    assert!(outcome.reports().iter().all(|r| r.is_success()));
                    ids.push(id);
                }
                Ok(ids)
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().expect("writer panicked")?);
    }

    assert_eq!(indexed_ids(&db, "points_x", &all)?.len(), 100);
    let stored = Collection::new("points")
        .find_where(Filter::all().exists("_outputs.x.identity", true))
        .execute(&db)?
        .into_cursor()?;
    assert_eq!(stored.len(), 100);
    Ok(())
}

/// A listener run racing a delete never resurrects the deleted vectors.
#[test]
fn test_delete_during_refresh_stays_deleted() -> lyra::Result<()> {
    let db = points_with_listener(2_000)?;
    db.add(VectorIndex::new("points_x", "identity/x"))?;
    let barrier = Arc::new(Barrier::new(2));

    let refresher = {
        let db = db.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> lyra::Result<()> {
            barrier.wait();
            for _ in 0..3 {
                db.refresh("points")?;
            }
            Ok(())
        })
    };
    let deleter = {
        let db = db.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> lyra::Result<Vec<String>> {
            barrier.wait();
            let mut deleted = Vec::new();
            for i in (0..2_000).step_by(10) {
                let batch: Vec<String> = (i..i + 5).map(|j| format!("p{j}")).collect();
                deleted.extend(
                    Collection::new("points")
                        .delete_many(Filter::ids(batch))
                        .execute(&db)?
                        .into_deleted()?,
                );
            }
            Ok(deleted)
        })
    };

    refresher.join().expect("refresher panicked")?;
    let deleted = deleter.join().expect("deleter panicked")?;

    assert_eq!(deleted.len(), 1_000);
    assert!(indexed_ids(&db, "points_x", &deleted)?.is_empty());
    assert_eq!(db.vector_index("points_x")?.table().len(), 1_000);
    Ok(())
}

/// Readers see either the old or the new vector, never a mix.
#[test]
fn test_search_during_upsert_never_sees_torn_vectors() {
    let table = Arc::new(VectorTable::new());
    let low: Vec<f32> = (0..DIM).map(|j| if j < DIM / 2 { 1.0 } else { 0.0 }).collect();
    let high: Vec<f32> = low.iter().map(|x| 1.0 - x).collect();
    table.upsert("a", &low).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let writer = {
        let table = Arc::clone(&table);
        let barrier = Arc::clone(&barrier);
        let (low, high) = (low.clone(), high.clone());
        thread::spawn(move || {
            barrier.wait();
            for i in 0..10_000 {
                let v = if i % 2 == 0 { &high } else { &low };
                table.upsert("a", v).unwrap();
            }
        })
    };

    barrier.wait();
    for _ in 0..10_000 {
        let hits = table.search(&low, 1).unwrap();
        let score = hits[0].score;
        assert!(
            score.abs() < 1e-5 || (score - 1.0).abs() < 1e-5,
            "observed a torn vector, score {score}"
        );
    }
    writer.join().expect("writer panicked");
}
