//! The Datalayer: registries, backend handle and query execution context.
//!
//! A [`Datalayer`] owns the encoder, model, listener and vector index
//! registries together with the storage [`Backend`]. Queries are plain values
//! and only touch storage when executed through a Datalayer.
//!
//! ```
//! use std::sync::Arc;
//!
//! use lyra::{Collection, Datalayer, DataValue, Document, Listener, Model, VectorIndex};
//!
//! # fn main() -> lyra::Result<()> {
//! let db = Datalayer::in_memory()?;
//! db.add(Model::from_fn("identity", |v: &DataValue| {
//!     Ok(DataValue::Vector(v.to_vector().unwrap_or_default()))
//! }))?;
//! db.add(Listener::new("identity", "x", Collection::new("docs").find())?)?;
//! db.add(VectorIndex::new("docs_x", "identity/x"))?;
//!
//! let docs = Collection::new("docs");
//! docs.insert_many(vec![
//!     Document::new_with_id("a").add_field("x", vec![1.0f32, 0.0]),
//!     Document::new_with_id("b").add_field("x", vec![0.0f32, 1.0]),
//! ])
//! .execute(&db)?;
//!
//! let cursor = docs
//!     .like(Document::new().add_field("x", vec![0.9f32, 0.1]), "docs_x", 1)
//!     .find()
//!     .execute(&db)?
//!     .into_cursor()?;
//! assert_eq!(cursor.ids(), vec!["a"]);
//! # Ok(())
//! # }
//! ```

pub mod config;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::data::Document;
use crate::encoding::{BytesEncoder, Encoder, EncoderRegistry, JsonEncoder, VectorEncoder};
use crate::error::{LyraError, Result};
use crate::listener::{Listener, ListenerEntry, RunReport, output_vector};
use crate::model::Model;
use crate::query::Query;
use crate::query::cursor::{QueryResult, RefreshStatus};
use crate::query::executor::{self, Plan};
use crate::storage::{Backend, FindRequest, MemoryBackend};
use crate::vector::{SimilarityHit, VectorIndex, VectorTable};

pub use self::config::{DatalayerConfig, DatalayerConfigBuilder, Refresh};

/// Anything that can be registered with [`Datalayer::add`].
#[derive(Debug, Clone)]
pub enum Component {
    Encoder(Arc<dyn Encoder>),
    Model(Model),
    Listener(Listener),
    VectorIndex(VectorIndex),
}

impl From<Arc<dyn Encoder>> for Component {
    fn from(encoder: Arc<dyn Encoder>) -> Self {
        Component::Encoder(encoder)
    }
}

impl From<VectorEncoder> for Component {
    fn from(encoder: VectorEncoder) -> Self {
        Component::Encoder(Arc::new(encoder))
    }
}

impl From<BytesEncoder> for Component {
    fn from(encoder: BytesEncoder) -> Self {
        Component::Encoder(Arc::new(encoder))
    }
}

impl From<JsonEncoder> for Component {
    fn from(encoder: JsonEncoder) -> Self {
        Component::Encoder(Arc::new(encoder))
    }
}

impl From<Model> for Component {
    fn from(model: Model) -> Self {
        Component::Model(model)
    }
}

impl From<Listener> for Component {
    fn from(listener: Listener) -> Self {
        Component::Listener(listener)
    }
}

impl From<VectorIndex> for Component {
    fn from(index: VectorIndex) -> Self {
        Component::VectorIndex(index)
    }
}

/// Registry a component lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Encoder,
    Model,
    Listener,
    VectorIndex,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Encoder => "encoder",
            ComponentKind::Model => "model",
            ComponentKind::Listener => "listener",
            ComponentKind::VectorIndex => "vector index",
        };
        f.write_str(name)
    }
}

/// A registered vector index and its live vectors.
#[derive(Debug)]
pub struct VectorIndexEntry {
    definition: VectorIndex,
    collection: String,
    table: VectorTable,
}

impl VectorIndexEntry {
    pub fn definition(&self) -> &VectorIndex {
        &self.definition
    }

    /// Collection selected by the indexing listener.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn table(&self) -> &VectorTable {
        &self.table
    }
}

/// Handle on a background listener refresh.
#[derive(Debug)]
pub struct RefreshHandle {
    receiver: Receiver<Result<Vec<RunReport>>>,
}

impl RefreshHandle {
    /// Block until the refresh finishes.
    pub fn wait(self) -> Result<Vec<RunReport>> {
        self.receiver.recv().map_err(|_| {
            LyraError::transformation("background refresh ended without reporting")
        })?
    }

    /// The refresh result, if it has finished.
    pub fn try_wait(&self) -> Option<Result<Vec<RunReport>>> {
        self.receiver.try_recv().ok()
    }
}

struct Inner {
    config: DatalayerConfig,
    backend: Arc<dyn Backend>,
    encoders: Arc<EncoderRegistry>,
    models: RwLock<HashMap<String, Model>>,
    listeners: RwLock<Vec<Arc<ListenerEntry>>>,
    vector_indexes: RwLock<HashMap<String, Arc<VectorIndexEntry>>>,
    registration: Mutex<()>,
    pool: ThreadPool,
}

/// Execution context for queries. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Datalayer {
    inner: Arc<Inner>,
}

impl fmt::Debug for Datalayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datalayer")
            .field("backend", &self.inner.backend)
            .field("encoders", &self.inner.encoders.identifiers())
            .field("models", &self.show(ComponentKind::Model))
            .field("listeners", &self.show(ComponentKind::Listener))
            .field("vector_indexes", &self.show(ComponentKind::VectorIndex))
            .finish()
    }
}

impl Datalayer {
    /// Create a Datalayer over `backend`.
    pub fn new(backend: Arc<dyn Backend>, config: DatalayerConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.refresh_workers)
            .thread_name(|i| format!("lyra-refresh-{i}"))
            .build()
            .map_err(|err| {
                LyraError::invalid_config(format!("failed to build refresh pool: {err}"))
            })?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                backend,
                encoders: Arc::new(EncoderRegistry::new()),
                models: RwLock::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
                vector_indexes: RwLock::new(HashMap::new()),
                registration: Mutex::new(()),
                pool,
            }),
        })
    }

    /// A Datalayer over a fresh [`MemoryBackend`] with default configuration.
    pub fn in_memory() -> Result<Self> {
        Self::new(Arc::new(MemoryBackend::new()), DatalayerConfig::default())
    }

    pub fn config(&self) -> &DatalayerConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn encoders(&self) -> &Arc<EncoderRegistry> {
        &self.inner.encoders
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.inner.pool
    }

    // --- Registration ---

    /// Register a component.
    ///
    /// A new listener runs once over the documents it selects and its report
    /// is returned. A new vector index is loaded from the outputs its
    /// indexing listener has already stored.
    pub fn add(&self, component: impl Into<Component>) -> Result<Option<RunReport>> {
        match component.into() {
            Component::Encoder(encoder) => {
                let _guard = self.inner.registration.lock();
                if self.inner.encoders.register(encoder.clone())? {
                    debug!("registered encoder '{}'", encoder.identifier());
                }
                Ok(None)
            }
            Component::Model(model) => {
                self.add_model(model)?;
                Ok(None)
            }
            Component::Listener(listener) => self.add_listener(listener),
            Component::VectorIndex(index) => {
                self.add_vector_index(index)?;
                Ok(None)
            }
        }
    }

    fn add_model(&self, model: Model) -> Result<()> {
        let _guard = self.inner.registration.lock();
        if let Some(encoder) = model.encoder()
            && !self.inner.encoders.contains(encoder)
        {
            return Err(LyraError::invalid_reference(format!(
                "model '{}' uses unregistered encoder '{encoder}'",
                model.identifier()
            )));
        }

        let mut models = self.inner.models.write();
        if let Some(existing) = models.get(model.identifier()) {
            let same = Arc::ptr_eq(existing.transform(), model.transform())
                && existing.encoder() == model.encoder()
                && existing.dimension() == model.dimension();
            if same {
                return Ok(());
            }
            return Err(LyraError::already_exists(format!(
                "model '{}'",
                model.identifier()
            )));
        }
        debug!("registered model '{}'", model.identifier());
        models.insert(model.identifier().to_string(), model);
        Ok(())
    }

    fn add_listener(&self, listener: Listener) -> Result<Option<RunReport>> {
        let listener = listener.with_outputs_field(&self.inner.config.outputs_field);
        let entry = {
            let _guard = self.inner.registration.lock();
            if !self.inner.models.read().contains_key(listener.model()) {
                return Err(LyraError::invalid_reference(format!(
                    "listener '{}' uses unregistered model '{}'",
                    listener.identifier(),
                    listener.model()
                )));
            }

            let mut listeners = self.inner.listeners.write();
            if let Some(existing) = listeners
                .iter()
                .find(|e| e.listener.identifier() == listener.identifier())
            {
                if existing.listener == listener {
                    return Ok(None);
                }
                return Err(LyraError::already_exists(format!(
                    "listener '{}'",
                    listener.identifier()
                )));
            }
            let entry = Arc::new(ListenerEntry::new(listener));
            listeners.push(entry.clone());
            debug!("registered listener '{}'", entry.listener.identifier());
            entry
        };

        let report = entry.run(self, None, &AtomicBool::new(false))?;
        Ok(Some(report))
    }

    fn add_vector_index(&self, index: VectorIndex) -> Result<()> {
        let _guard = self.inner.registration.lock();
        let indexing = self.listener_entry(index.indexing_listener()).map_err(|_| {
            LyraError::invalid_reference(format!(
                "vector index '{}' uses unregistered listener '{}'",
                index.identifier(),
                index.indexing_listener()
            ))
        })?;
        let compatible = self.listener_entry(index.compatible_listener()).map_err(|_| {
            LyraError::invalid_reference(format!(
                "vector index '{}' uses unregistered listener '{}'",
                index.identifier(),
                index.compatible_listener()
            ))
        })?;

        let indexing_dim = self.model(indexing.listener.model())?.dimension();
        let compatible_dim = self.model(compatible.listener.model())?.dimension();
        if let (Some(a), Some(b)) = (indexing_dim, compatible_dim)
            && a != b
        {
            return Err(LyraError::invalid_reference(format!(
                "vector index '{}': listener '{}' produces {a} dimensions, '{}' produces {b}",
                index.identifier(),
                index.indexing_listener(),
                index.compatible_listener()
            )));
        }

        if let Some(existing) = self.inner.vector_indexes.read().get(index.identifier()) {
            if existing.definition == index {
                return Ok(());
            }
            return Err(LyraError::already_exists(format!(
                "vector index '{}'",
                index.identifier()
            )));
        }

        let entry = Arc::new(VectorIndexEntry {
            collection: indexing.listener.collection().to_string(),
            definition: index,
            table: VectorTable::new(),
        });
        // Write-backs of the indexing listener wait until the index is
        // visible to them, so none lands between the load and the insert.
        let _writes = indexing.lock_writes();
        let loaded = self.load_index(&entry, &indexing.listener)?;
        info!(
            "vector index '{}' loaded {loaded} vectors",
            entry.definition.identifier()
        );
        self.inner
            .vector_indexes
            .write()
            .insert(entry.definition.identifier().to_string(), entry);
        Ok(())
    }

    /// Populate `entry` from outputs already stored by `listener`.
    fn load_index(&self, entry: &VectorIndexEntry, listener: &Listener) -> Result<usize> {
        let path = listener.output_path();
        let filter = listener.select().select_filter().exists(path.clone(), true);
        let records = self
            .backend()
            .find(&entry.collection, &FindRequest::new(filter))?;

        let mut loaded = 0;
        for record in &records {
            let Some(id) = record.id() else {
                continue;
            };
            let result = self.encoders().decode_document(record).and_then(|doc| {
                let vector = output_vector(&doc, &path).ok_or_else(|| {
                    LyraError::encoding(format!("stored output at '{path}' is not a vector"))
                })?;
                entry.table.upsert(id, &vector)
            });
            match result {
                Ok(()) => loaded += 1,
                Err(err) => warn!(
                    "vector index '{}': skipping document '{id}': {err}",
                    entry.definition.identifier()
                ),
            }
        }
        Ok(loaded)
    }

    /// Deregister a component.
    ///
    /// Fails with `InvalidReference` while another component still refers to
    /// it, and with `NotFound` if nothing is registered under `identifier`.
    pub fn remove(&self, kind: ComponentKind, identifier: &str) -> Result<()> {
        let _guard = self.inner.registration.lock();
        let missing = || LyraError::not_found(format!("{kind} '{identifier}'"));
        match kind {
            ComponentKind::Encoder => {
                if let Some(model) = self
                    .inner
                    .models
                    .read()
                    .values()
                    .find(|m| m.encoder() == Some(identifier))
                {
                    return Err(LyraError::invalid_reference(format!(
                        "encoder '{identifier}' is used by model '{}'",
                        model.identifier()
                    )));
                }
                self.inner.encoders.remove(identifier).ok_or_else(missing)?;
            }
            ComponentKind::Model => {
                if let Some(entry) = self
                    .inner
                    .listeners
                    .read()
                    .iter()
                    .find(|e| e.listener.model() == identifier)
                {
                    return Err(LyraError::invalid_reference(format!(
                        "model '{identifier}' is used by listener '{}'",
                        entry.listener.identifier()
                    )));
                }
                self.inner
                    .models
                    .write()
                    .remove(identifier)
                    .ok_or_else(missing)?;
            }
            ComponentKind::Listener => {
                if let Some(index) = self
                    .inner
                    .vector_indexes
                    .read()
                    .values()
                    .find(|e| e.definition.listeners().contains(&identifier))
                {
                    return Err(LyraError::invalid_reference(format!(
                        "listener '{identifier}' is used by vector index '{}'",
                        index.definition.identifier()
                    )));
                }
                let mut listeners = self.inner.listeners.write();
                let pos = listeners
                    .iter()
                    .position(|e| e.listener.identifier() == identifier)
                    .ok_or_else(missing)?;
                listeners.remove(pos);
            }
            ComponentKind::VectorIndex => {
                self.inner
                    .vector_indexes
                    .write()
                    .remove(identifier)
                    .ok_or_else(missing)?;
            }
        }
        debug!("removed {kind} '{identifier}'");
        Ok(())
    }

    // --- Lookups ---

    pub fn encoder(&self, identifier: &str) -> Result<Arc<dyn Encoder>> {
        self.inner.encoders.get(identifier)
    }

    pub fn model(&self, identifier: &str) -> Result<Model> {
        self.inner
            .models
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| LyraError::not_found(format!("model '{identifier}'")))
    }

    pub fn listener(&self, identifier: &str) -> Result<Listener> {
        Ok(self.listener_entry(identifier)?.listener.clone())
    }

    pub(crate) fn listener_entry(&self, identifier: &str) -> Result<Arc<ListenerEntry>> {
        self.inner
            .listeners
            .read()
            .iter()
            .find(|e| e.listener.identifier() == identifier)
            .cloned()
            .ok_or_else(|| LyraError::not_found(format!("listener '{identifier}'")))
    }

    pub fn vector_index(&self, identifier: &str) -> Result<Arc<VectorIndexEntry>> {
        self.inner
            .vector_indexes
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| LyraError::not_found(format!("vector index '{identifier}'")))
    }

    /// Identifiers registered under `kind`. Listeners are listed in
    /// registration order, everything else sorted.
    pub fn show(&self, kind: ComponentKind) -> Vec<String> {
        match kind {
            ComponentKind::Encoder => self.inner.encoders.identifiers(),
            ComponentKind::Model => {
                let mut ids: Vec<String> = self.inner.models.read().keys().cloned().collect();
                ids.sort();
                ids
            }
            ComponentKind::Listener => self
                .inner
                .listeners
                .read()
                .iter()
                .map(|e| e.listener.identifier().to_string())
                .collect(),
            ComponentKind::VectorIndex => {
                let mut ids: Vec<String> =
                    self.inner.vector_indexes.read().keys().cloned().collect();
                ids.sort();
                ids
            }
        }
    }

    pub(crate) fn indexes_fed_by(&self, listener: &str) -> Vec<Arc<VectorIndexEntry>> {
        self.inner
            .vector_indexes
            .read()
            .values()
            .filter(|e| e.definition.indexing_listener() == listener)
            .cloned()
            .collect()
    }

    fn listeners_on(&self, collection: &str) -> Vec<Arc<ListenerEntry>> {
        self.inner
            .listeners
            .read()
            .iter()
            .filter(|e| e.listener.collection() == collection)
            .cloned()
            .collect()
    }

    // --- Execution ---

    /// Execute `query` with the configured default refresh mode.
    pub fn execute(&self, query: &Query) -> Result<QueryResult> {
        self.execute_with(query, self.inner.config.default_refresh)
    }

    /// Execute `query`, choosing how listeners are refreshed after writes.
    pub fn execute_with(&self, query: &Query, refresh: Refresh) -> Result<QueryResult> {
        let plan = Plan::compile(query)?;
        debug!(
            "executing [{}] on '{}'",
            query
                .ops()
                .iter()
                .map(|op| op.name())
                .collect::<Vec<_>>()
                .join(", "),
            query.collection()
        );
        executor::execute(self, query.collection(), plan, refresh)
    }

    /// Re-run every listener over `collection`.
    pub fn refresh(&self, collection: &str) -> Result<Vec<RunReport>> {
        self.run_listeners(collection, None)
    }

    /// Run one listener, over everything it selects or only over `ids`.
    pub fn run_listener(&self, identifier: &str, ids: Option<&[String]>) -> Result<RunReport> {
        self.listener_entry(identifier)?
            .run(self, ids, &AtomicBool::new(false))
    }

    fn run_listeners(&self, collection: &str, ids: Option<&[String]>) -> Result<Vec<RunReport>> {
        let stop = AtomicBool::new(false);
        self.listeners_on(collection)
            .iter()
            .map(|entry| entry.run(self, ids, &stop))
            .collect()
    }

    pub(crate) fn refresh_after_write(
        &self,
        collection: &str,
        ids: &[String],
        refresh: Refresh,
    ) -> Result<RefreshStatus> {
        match refresh {
            Refresh::Skip => Ok(RefreshStatus::Skipped),
            Refresh::Sync => Ok(RefreshStatus::Completed(
                self.run_listeners(collection, Some(ids))?,
            )),
            Refresh::Background => {
                let (sender, receiver) = crossbeam_channel::bounded(1);
                let datalayer = self.clone();
                let collection = collection.to_string();
                let ids = ids.to_vec();
                self.inner.pool.spawn(move || {
                    let result = datalayer.run_listeners(&collection, Some(&ids));
                    let _ = sender.send(result);
                });
                Ok(RefreshStatus::Pending(RefreshHandle { receiver }))
            }
        }
    }

    /// Drop deleted documents from every index over `collection`.
    ///
    /// Runs under the indexing listener's write lock, so a write-back that
    /// read the document before the delete cannot re-add it afterwards.
    pub(crate) fn forget_vectors(&self, collection: &str, ids: &[String]) {
        let entries: Vec<Arc<VectorIndexEntry>> = self
            .inner
            .vector_indexes
            .read()
            .values()
            .filter(|e| e.collection == collection)
            .cloned()
            .collect();
        for entry in entries {
            let listener = self.listener_entry(entry.definition.indexing_listener()).ok();
            let _writes = listener.as_ref().map(|l| l.lock_writes());
            for id in ids {
                entry.table.remove(id);
            }
        }
    }

    // --- Similarity ---

    /// Nearest neighbours of `example` in the vector index `index`.
    pub fn search(&self, index: &str, example: &Document, n: usize) -> Result<Vec<SimilarityHit>> {
        let entry = self.vector_index(index)?;
        let query = self.example_vector(&entry, example)?;
        entry.table.search(&query, n)
    }

    /// Rank `candidates` by similarity to `example` in the vector index
    /// `index`.
    pub fn rank(
        &self,
        index: &str,
        example: &Document,
        candidates: &[String],
        n: usize,
    ) -> Result<Vec<SimilarityHit>> {
        let entry = self.vector_index(index)?;
        let query = self.example_vector(&entry, example)?;
        entry.table.rank(&query, candidates, n)
    }

    /// Encode a query-time example through the compatible listener's model.
    fn example_vector(&self, entry: &VectorIndexEntry, example: &Document) -> Result<Vec<f32>> {
        let definition = &entry.definition;
        let compatible = self.listener_entry(definition.compatible_listener())?;
        let indexing = self.listener_entry(definition.indexing_listener())?;

        let example = self.encoders().decode_document(example)?;
        let input = example
            .get_path(compatible.listener.key())
            .or_else(|| example.get_path(indexing.listener.key()))
            .ok_or_else(|| {
                LyraError::invalid_query(format!(
                    "like example for '{}' has no field '{}'",
                    definition.identifier(),
                    compatible.listener.key()
                ))
            })?;

        let model = self.model(compatible.listener.model())?;
        let output = model.predict(input).map_err(|err| {
            LyraError::transformation(format!(
                "model '{}' failed on like example: {err}",
                model.identifier()
            ))
        })?;
        output.to_vector().ok_or_else(|| {
            LyraError::encoding(format!(
                "model '{}' did not produce a vector",
                model.identifier()
            ))
        })
    }
}
