//! Listeners: standing computations that keep model outputs up to date.
//!
//! A listener binds a model to an input key and a select query. Running it
//! applies the model to the key of every selected document and writes the
//! output back under `"{outputs}.{key}.{model}"`. Vector indexes fed by the
//! listener are updated in the same call.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

use crate::data::{DataValue, Document};
use crate::datalayer::Datalayer;
use crate::error::{LyraError, Result};
use crate::query::filter::Filter;
use crate::query::{Query, QueryOp};
use crate::storage::FindRequest;

const DEFAULT_OUTPUTS_FIELD: &str = "_outputs";

/// A model applied to one key of the documents selected by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Listener {
    identifier: String,
    model: String,
    key: String,
    select: Query,
    outputs_field: String,
}

impl Listener {
    /// Create a listener applying `model` to `key` over the documents
    /// selected by `select`.
    ///
    /// The select query must consist of a single `find` stage.
    pub fn new(model: impl Into<String>, key: impl Into<String>, select: Query) -> Result<Self> {
        let model = model.into();
        let key = key.into();
        if !matches!(select.ops(), [] | [QueryOp::Find(_)]) {
            return Err(LyraError::invalid_query(format!(
                "listener select for '{model}/{key}' must be a single find"
            )));
        }
        if key.is_empty() {
            return Err(LyraError::invalid_query("listener key must not be empty"));
        }
        Ok(Self {
            identifier: format!("{model}/{key}"),
            model,
            key,
            select,
            outputs_field: DEFAULT_OUTPUTS_FIELD.to_string(),
        })
    }

    pub(crate) fn with_outputs_field(mut self, field: &str) -> Self {
        self.outputs_field = field.to_string();
        self
    }

    /// `"{model}/{key}"`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn select(&self) -> &Query {
        &self.select
    }

    pub fn collection(&self) -> &str {
        self.select.collection()
    }

    /// Dot path under which outputs are written.
    pub fn output_path(&self) -> String {
        format!("{}.{}.{}", self.outputs_field, self.key, self.model)
    }

    /// Rebuild outputs for every selected document, or only for `ids`.
    pub fn run(&self, datalayer: &Datalayer, ids: Option<&[String]>) -> Result<RunReport> {
        self.run_until(datalayer, ids, &AtomicBool::new(false))
    }

    /// Like [`Listener::run`], checking `stop` between batches.
    pub fn run_until(
        &self,
        datalayer: &Datalayer,
        ids: Option<&[String]>,
        stop: &AtomicBool,
    ) -> Result<RunReport> {
        let entry = datalayer.listener_entry(&self.identifier)?;
        entry.run(datalayer, ids, stop)
    }

    /// Incremental refresh for freshly inserted documents.
    pub fn on_insert(&self, datalayer: &Datalayer, new_ids: &[String]) -> Result<RunReport> {
        self.run(datalayer, Some(new_ids))
    }
}

/// A document the listener could not process.
#[derive(Debug)]
pub struct DocumentFailure {
    pub id: String,
    pub error: LyraError,
}

/// Summary of one listener run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub listener: String,
    /// Documents whose output was written.
    pub processed: usize,
    /// Documents lacking the input key.
    pub skipped: usize,
    pub failures: Vec<DocumentFailure>,
    /// The run stopped early on request.
    pub interrupted: bool,
}

impl RunReport {
    fn new(listener: &str) -> Self {
        Self {
            listener: listener.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }

    /// Identifiers of failed documents.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.id.as_str()).collect()
    }

    fn fail(&mut self, id: &str, error: LyraError) {
        warn!("listener {}: document '{id}' failed: {error}", self.listener);
        self.failures.push(DocumentFailure {
            id: id.to_string(),
            error,
        });
    }
}

/// A registered listener with its write-back lock.
#[derive(Debug)]
pub(crate) struct ListenerEntry {
    pub listener: Listener,
    write_lock: Mutex<()>,
}

impl ListenerEntry {
    pub fn new(listener: Listener) -> Self {
        Self {
            listener,
            write_lock: Mutex::new(()),
        }
    }

    /// Hold off write-back for this listener while the guard lives.
    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    pub fn run(
        &self,
        datalayer: &Datalayer,
        ids: Option<&[String]>,
        stop: &AtomicBool,
    ) -> Result<RunReport> {
        let listener = &self.listener;
        let model = datalayer.model(listener.model())?;
        let collection = listener.collection();
        let output_path = listener.output_path();
        let batch_size = datalayer.config().listener_batch_size;

        let mut filter = listener.select().select_filter();
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(RunReport::new(listener.identifier()));
            }
            filter = filter.and(Filter::ids(ids.iter().cloned()));
        }
        let records = datalayer
            .backend()
            .find(collection, &FindRequest::new(filter))?;
        debug!(
            "listener {}: {} documents selected",
            listener.identifier(),
            records.len()
        );

        let mut report = RunReport::new(listener.identifier());
        for batch in records.chunks(batch_size) {
            if stop.load(Ordering::Relaxed) {
                report.interrupted = true;
                break;
            }

            let mut inputs: Vec<(&str, DataValue)> = Vec::with_capacity(batch.len());
            for record in batch {
                let Some(id) = record.id() else {
                    continue;
                };
                let doc = match datalayer.encoders().decode_document(record) {
                    Ok(doc) => doc,
                    Err(err) => {
                        report.fail(id, err);
                        continue;
                    }
                };
                match doc.get_path(listener.key()) {
                    Some(value) => inputs.push((id, value.clone())),
                    None => report.skipped += 1,
                }
            }

            let outputs: Vec<(&str, Result<DataValue>)> = datalayer.pool().install(|| {
                inputs
                    .par_iter()
                    .map(|(id, input)| (*id, model.predict(input)))
                    .collect()
            });

            let _guard = self.write_lock.lock();
            let indexes = datalayer.indexes_fed_by(listener.identifier());
            for (id, output) in outputs {
                let output = match output {
                    Ok(output) => output,
                    Err(err) => {
                        report.fail(
                            id,
                            LyraError::transformation(format!(
                                "model '{}' failed on document '{id}': {err}",
                                model.identifier()
                            )),
                        );
                        continue;
                    }
                };

                let stored = match model.encoder() {
                    Some(encoder) => match datalayer
                        .encoders()
                        .encode_value(&DataValue::encoded(encoder, output.clone()))
                    {
                        Ok(stored) => stored,
                        Err(err) => {
                            report.fail(id, err);
                            continue;
                        }
                    },
                    None => output.clone(),
                };

                if !datalayer
                    .backend()
                    .set_field(collection, id, &output_path, stored)?
                {
                    // Deleted while the batch was being transformed.
                    continue;
                }

                let mut indexed = true;
                for index in &indexes {
                    let result = output
                        .to_vector()
                        .ok_or_else(|| {
                            LyraError::encoding(format!(
                                "output of '{}' is not a vector",
                                listener.identifier()
                            ))
                        })
                        .and_then(|vector| index.table().upsert(id, &vector));
                    if let Err(err) = result {
                        report.fail(id, err);
                        indexed = false;
                        break;
                    }
                }
                if indexed {
                    report.processed += 1;
                }
            }
        }

        if report.interrupted {
            warn!(
                "listener {} interrupted after {} documents",
                listener.identifier(),
                report.processed
            );
        }
        info!(
            "listener {}: processed={} skipped={} failed={}",
            listener.identifier(),
            report.processed,
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }
}

/// Read a listener output back from a decoded document as a vector.
pub(crate) fn output_vector(doc: &Document, output_path: &str) -> Option<Vec<f32>> {
    doc.get_path(output_path)?.to_vector()
}
