//! Query interpreter.
//!
//! [`Plan::compile`] validates the operation sequence of a [`Query`] and
//! folds it into one of a few executable shapes; [`execute`] runs a plan
//! against a [`Datalayer`].

use std::collections::HashMap;

use log::debug;

use crate::data::{DataValue, Document};
use crate::datalayer::{Datalayer, Refresh};
use crate::error::{LyraError, Result};
use crate::query::cursor::{Cursor, QueryResult, WriteOutcome};
use crate::query::filter::Filter;
use crate::query::{LikeClause, Query, QueryOp, SortKey};
use crate::storage::FindRequest;
use crate::util::id::ensure_id;

/// Whether similarity gates the candidates or ranks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LikeStage {
    /// `like` before `find`: nearest neighbours first, then the filter.
    Pre,
    /// `find` before `like`: filter first, then rank the survivors.
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReadPlan {
    pub filter: Filter,
    pub like: Option<(LikeClause, LikeStage)>,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
    pub one: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Plan {
    Insert(Vec<Document>),
    Update { filter: Filter, set: Document },
    Delete(Filter),
    Distinct { field: String, filter: Filter },
    Read(ReadPlan),
}

impl Plan {
    pub fn compile(query: &Query) -> Result<Plan> {
        let ops = query.ops();
        if ops.is_empty() {
            return Err(LyraError::invalid_query(format!(
                "query on '{}' has no operations",
                query.collection()
            )));
        }

        if let Some(mutation) = ops.iter().find(|op| op.is_mutation()) {
            return match ops {
                [QueryOp::Insert(docs)] => Ok(Plan::Insert(docs.clone())),
                [QueryOp::Update { filter, set }] => Ok(Plan::Update {
                    filter: filter.clone(),
                    set: set.clone(),
                }),
                [QueryOp::Delete(filter)] => Ok(Plan::Delete(filter.clone())),
                _ => Err(LyraError::invalid_query(format!(
                    "{} cannot be chained with other operations",
                    mutation.name()
                ))),
            };
        }

        let mut find: Option<(usize, &Filter, bool)> = None;
        let mut like: Option<(usize, &LikeClause)> = None;
        let mut distinct: Option<&str> = None;
        let mut sort = Vec::new();
        let mut limit: Option<usize> = None;

        for (pos, op) in ops.iter().enumerate() {
            match op {
                QueryOp::Find(filter) | QueryOp::FindOne(filter) => {
                    if find.is_some() {
                        return Err(LyraError::invalid_query(
                            "a query may contain only one find or find_one",
                        ));
                    }
                    find = Some((pos, filter, matches!(op, QueryOp::FindOne(_))));
                }
                QueryOp::Like(clause) => {
                    if like.is_some() {
                        return Err(LyraError::invalid_query(
                            "a query may contain only one like",
                        ));
                    }
                    if clause.n == 0 {
                        return Err(LyraError::invalid_query("like requires n >= 1"));
                    }
                    like = Some((pos, clause));
                }
                QueryOp::Distinct(field) => {
                    if distinct.is_some() {
                        return Err(LyraError::invalid_query(
                            "a query may contain only one distinct",
                        ));
                    }
                    distinct = Some(field.as_str());
                }
                QueryOp::Sort(key) => sort.push(key.clone()),
                QueryOp::Limit(n) => limit = Some(limit.map_or(*n, |l| l.min(*n))),
                QueryOp::Insert(_) | QueryOp::Update { .. } | QueryOp::Delete(_) => {
                    return Err(LyraError::invalid_query(format!(
                        "{} cannot be chained with other operations",
                        op.name()
                    )));
                }
            }
        }

        let filter = find.map(|(_, f, _)| f.clone()).unwrap_or_default();
        let one = find.is_some_and(|(_, _, one)| one);

        if let Some(field) = distinct {
            if like.is_some() || !sort.is_empty() || limit.is_some() || one {
                return Err(LyraError::invalid_query(
                    "distinct combines only with find",
                ));
            }
            return Ok(Plan::Distinct {
                field: field.to_string(),
                filter,
            });
        }

        let like = like.map(|(pos, clause)| {
            let stage = match find {
                Some((find_pos, _, _)) if find_pos < pos => LikeStage::Post,
                _ => LikeStage::Pre,
            };
            (clause.clone(), stage)
        });

        Ok(Plan::Read(ReadPlan {
            filter,
            like,
            sort,
            limit: if one { Some(1) } else { limit },
            one,
        }))
    }
}

/// Run `plan` against the collection named `collection`.
pub(crate) fn execute(
    datalayer: &Datalayer,
    collection: &str,
    plan: Plan,
    refresh: Refresh,
) -> Result<QueryResult> {
    match plan {
        Plan::Insert(docs) => insert(datalayer, collection, docs, refresh),
        Plan::Update { filter, set } => {
            let set = datalayer.encoders().encode_document(&set)?;
            let ids = datalayer
                .backend()
                .update_many(collection, &filter, &set)?;
            debug!("updated {} documents in '{collection}'", ids.len());
            let refresh = datalayer.refresh_after_write(collection, &ids, refresh)?;
            Ok(QueryResult::Updated(WriteOutcome { ids, refresh }))
        }
        Plan::Delete(filter) => {
            let ids = datalayer.backend().delete_many(collection, &filter)?;
            datalayer.forget_vectors(collection, &ids);
            debug!("deleted {} documents from '{collection}'", ids.len());
            Ok(QueryResult::Deleted(ids))
        }
        Plan::Distinct { field, filter } => {
            let values = datalayer.backend().distinct(collection, &field, &filter)?;
            let values = values
                .into_iter()
                .map(|value| decode_value(datalayer, value))
                .collect::<Result<Vec<_>>>()?;
            Ok(QueryResult::Distinct(values))
        }
        Plan::Read(read) => {
            let one = read.one;
            let cursor = match read.like.clone() {
                None => plain_read(datalayer, collection, read)?,
                Some((clause, LikeStage::Pre)) => pre_like(datalayer, collection, &clause, read)?,
                Some((clause, LikeStage::Post)) => post_like(datalayer, collection, &clause, read)?,
            };
            if one {
                return cursor.iter().next().transpose().map(QueryResult::One);
            }
            Ok(QueryResult::Cursor(cursor))
        }
    }
}

fn insert(
    datalayer: &Datalayer,
    collection: &str,
    docs: Vec<Document>,
    refresh: Refresh,
) -> Result<QueryResult> {
    // Encode everything first so a bad payload writes nothing.
    let records = docs
        .into_iter()
        .map(|doc| datalayer.encoders().encode_document(&ensure_id(doc)))
        .collect::<Result<Vec<_>>>()?;
    let ids = datalayer.backend().insert_many(collection, records)?;
    debug!("inserted {} documents into '{collection}'", ids.len());
    let refresh = datalayer.refresh_after_write(collection, &ids, refresh)?;
    Ok(QueryResult::Inserted(WriteOutcome { ids, refresh }))
}

fn plain_read(datalayer: &Datalayer, collection: &str, read: ReadPlan) -> Result<Cursor> {
    let request = FindRequest::new(read.filter)
        .sort(read.sort)
        .limit(read.limit);
    let records = datalayer.backend().find(collection, &request)?;
    Ok(Cursor::new(records, datalayer.encoders().clone()))
}

fn pre_like(
    datalayer: &Datalayer,
    collection: &str,
    clause: &LikeClause,
    read: ReadPlan,
) -> Result<Cursor> {
    let hits = datalayer.search(&clause.vector_index, &clause.example, clause.n)?;
    let filter = read
        .filter
        .clone()
        .and(Filter::ids(hits.iter().map(|hit| hit.id.clone())));
    let records = datalayer
        .backend()
        .find(collection, &FindRequest::new(filter))?;

    let mut by_id: HashMap<String, Document> = records
        .into_iter()
        .filter_map(|doc| Some((doc.id()?.to_string(), doc)))
        .collect();
    let ranked: Vec<(String, f32)> = hits
        .into_iter()
        .filter(|hit| by_id.contains_key(&hit.id))
        .map(|hit| (hit.id, hit.score))
        .collect();
    let ordered = ranked
        .iter()
        .filter_map(|(id, _)| by_id.remove(id))
        .collect();

    Ok(finish_ranked(datalayer, ordered, ranked, &read))
}

fn post_like(
    datalayer: &Datalayer,
    collection: &str,
    clause: &LikeClause,
    read: ReadPlan,
) -> Result<Cursor> {
    let records = datalayer
        .backend()
        .find(collection, &FindRequest::new(read.filter.clone()))?;
    let candidates: Vec<String> = records
        .iter()
        .filter_map(|doc| doc.id().map(str::to_string))
        .collect();
    let hits = datalayer.rank(&clause.vector_index, &clause.example, &candidates, clause.n)?;

    let mut by_id: HashMap<String, Document> = records
        .into_iter()
        .filter_map(|doc| Some((doc.id()?.to_string(), doc)))
        .collect();
    let ranked: Vec<(String, f32)> = hits.into_iter().map(|hit| (hit.id, hit.score)).collect();
    let ordered = ranked
        .iter()
        .filter_map(|(id, _)| by_id.remove(id))
        .collect();

    Ok(finish_ranked(datalayer, ordered, ranked, &read))
}

/// Apply sort and limit to a similarity-ordered result.
fn finish_ranked(
    datalayer: &Datalayer,
    mut records: Vec<Document>,
    ranked: Vec<(String, f32)>,
    read: &ReadPlan,
) -> Cursor {
    if !read.sort.is_empty() {
        records.sort_by(|a, b| {
            read.sort
                .iter()
                .map(|key| key.compare(a, b))
                .find(|ord| ord.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    if let Some(limit) = read.limit {
        records.truncate(limit);
    }
    Cursor::new(records, datalayer.encoders().clone()).with_scores(ranked)
}

fn decode_value(datalayer: &Datalayer, value: DataValue) -> Result<DataValue> {
    if !matches!(value, DataValue::Encoded(_)) {
        return Ok(value);
    }
    let doc = Document::new().add_field("v", value);
    let decoded = datalayer.encoders().decode_document(&doc)?;
    Ok(decoded.get("v").cloned().unwrap_or(DataValue::Null))
}
