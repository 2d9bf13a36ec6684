#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lyra::query::filter::Filter;
use lyra::{
    Collection, DataValue, Datalayer, Document, Listener, Model, VectorEncoder, VectorIndex,
};

pub const COLLECTION: &str = "documents";
pub const INDEX: &str = "test_vector_search";
pub const INPUT_DIM: usize = 32;
pub const OUTPUT_DIM: usize = 16;

pub fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

/// A fixed random linear map from 32 to 16 dimensions.
pub fn linear_model(seed: u64) -> Model {
    let mut rng = StdRng::seed_from_u64(seed);
    let weights: Vec<Vec<f32>> = (0..OUTPUT_DIM)
        .map(|_| random_vector(&mut rng, INPUT_DIM))
        .collect();

    Model::from_fn("linear_a", move |input: &DataValue| {
        let x = input
            .to_vector()
            .ok_or_else(|| anyhow::anyhow!("linear_a expects a vector"))?;
        anyhow::ensure!(
            x.len() == INPUT_DIM,
            "linear_a expects {INPUT_DIM} inputs, got {}",
            x.len()
        );
        let y = weights
            .iter()
            .map(|row| row.iter().zip(&x).map(|(w, v)| w * v).sum())
            .collect();
        Ok(DataValue::Vector(y))
    })
    .with_encoder(format!("f32[{OUTPUT_DIM}]"))
    .with_dimension(OUTPUT_DIM)
}

/// Documents `d0..d{n-1}` with encoded vectors `x` and `z`, `y = i % 2` and
/// `n = i % 4`.
pub fn documents(count: usize, seed: u64) -> Vec<Document> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let x = random_vector(&mut rng, INPUT_DIM);
            let z = random_vector(&mut rng, INPUT_DIM);
            Document::new_with_id(format!("d{i}"))
                .add_field("x", DataValue::encoded(format!("f32[{INPUT_DIM}]"), x))
                .add_field("z", DataValue::encoded(format!("f32[{INPUT_DIM}]"), z))
                .add_field("y", (i % 2) as i64)
                .add_field("n", (i % 4) as i64)
        })
        .collect()
}

/// A Datalayer holding `count` documents, both listeners and the vector
/// index.
pub fn setup(count: usize) -> lyra::Result<Datalayer> {
    let db = Datalayer::in_memory()?;
    db.add(VectorEncoder::new(INPUT_DIM))?;
    db.add(VectorEncoder::new(OUTPUT_DIM))?;
    db.add(linear_model(42))?;

    let docs = Collection::new(COLLECTION);
    docs.insert_many(documents(count, 7)).execute(&db)?;

    db.add(Listener::new("linear_a", "x", docs.find())?)?;
    db.add(Listener::new("linear_a", "z", docs.find())?)?;
    db.add(VectorIndex::new(INDEX, "linear_a/x").with_compatible("linear_a/z"))?;
    Ok(db)
}

/// Fetch one document by identifier.
pub fn get(db: &Datalayer, id: &str) -> lyra::Result<Option<Document>> {
    Collection::new(COLLECTION)
        .find_one_where(Filter::ids([id]))
        .execute(db)?
        .into_one()
}

/// The raw `x` vector of a stored document, as a like example.
pub fn example_for(db: &Datalayer, id: &str) -> lyra::Result<Document> {
    let doc = get(db, id)?.ok_or_else(|| lyra::LyraError::not_found(id.to_string()))?;
    let x = doc
        .get("x")
        .and_then(|v| v.to_vector())
        .ok_or_else(|| lyra::LyraError::not_found(format!("x of {id}")))?;
    Ok(Document::new().add_field("x", x))
}

pub fn ids(cursor: &lyra::Cursor) -> Vec<String> {
    cursor.ids().into_iter().map(str::to_string).collect()
}
