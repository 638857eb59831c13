//! Query planning: validate raw datapoints, build the id-indexed validated set and the
//! ordered query list, then cut out this process's shard.
//!
//! Every shard process repeats the whole plan over the same input file; no state is
//! exchanged between shards, so filtering and ordering must be deterministic.

use std::collections::HashMap;

use crate::dataset::{DatasetSchema, Datapoint, Query, RawDatapoint};
use crate::error::{EvalError, Result};
use crate::runlog::RunLogger;

/// Number of queries kept in debug mode.
pub const DEBUG_QUERY_LIMIT: usize = 10;

/// Which slice of the query list this process owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub num_shards: usize,
    pub shard_id: usize,
}

impl ShardSpec {
    pub fn new(num_shards: usize, shard_id: usize) -> Result<Self> {
        if num_shards == 0 {
            return Err(EvalError::Config("num_shards must be at least 1".to_string()));
        }
        if shard_id >= num_shards {
            return Err(EvalError::Config(format!(
                "shard_id {} out of range for {} shards",
                shard_id, num_shards
            )));
        }
        Ok(Self { num_shards, shard_id })
    }

    pub fn single() -> Self {
        Self { num_shards: 1, shard_id: 0 }
    }

    pub fn is_sharded(&self) -> bool {
        self.num_shards > 1
    }

    /// Contiguous range of `total` queries owned by this shard.
    ///
    /// `shard_size = ceil(total / num_shards)`; the last shards may be short or empty.
    pub fn range(&self, total: usize) -> ShardRange {
        if !self.is_sharded() {
            return ShardRange { start: 0, end: total };
        }
        let shard_size = total.div_ceil(self.num_shards);
        let start = (self.shard_id * shard_size).min(total);
        let end = (start + shard_size).min(total);
        ShardRange { start, end }
    }
}

impl Default for ShardSpec {
    fn default() -> Self {
        Self::single()
    }
}

/// Half-open index range `[start, end)` over the ordered query list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRange {
    pub start: usize,
    pub end: usize,
}

/// Knobs for one planning pass.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions<'a> {
    /// Overrides the dataset's default question transform.
    pub transform_override: Option<&'a str>,
    /// Keep only the first few queries.
    pub debug: bool,
    pub shard: ShardSpec,
}

/// Output of the planner.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Validated, transformed datapoints keyed by id.
    pub validated: HashMap<String, Datapoint>,
    /// This shard's queries, in input order.
    pub queries: Vec<Query>,
    /// Query count before debug truncation and sharding.
    pub total_queries: usize,
    /// Range of the (possibly truncated) list assigned to this shard.
    pub range: ShardRange,
    /// The query list came from the retriever backend rather than the datapoints.
    pub backend_queries: bool,
}

impl QueryPlan {
    /// True when the final query list is a strict subset of the full list.
    pub fn is_narrowed(&self) -> bool {
        self.queries.len() != self.total_queries
    }
}

/// Validate, transform and shard a dataset.
///
/// When `provided_queries` is `Some`, the backend owns its query representation: the list
/// is used verbatim and no queries are built from datapoints (validation still runs, the
/// validated set is still needed to assemble predictions).
pub fn plan<S: DatasetSchema + ?Sized>(
    raw_data: Vec<RawDatapoint>,
    schema: &S,
    provided_queries: Option<Vec<Query>>,
    options: &PlanOptions<'_>,
    log: &RunLogger,
) -> Result<QueryPlan> {
    let backend_queries = provided_queries.is_some();
    let mut queries = provided_queries.unwrap_or_default();
    let mut validated: HashMap<String, Datapoint> = HashMap::with_capacity(raw_data.len());
    let raw_count = raw_data.len();

    for raw in raw_data {
        if !schema.validate_datapoint(&raw, log) {
            continue;
        }
        let id = raw.id.clone();
        // A schema that accepts a row must accept everything the typed form requires.
        let datapoint = raw.into_datapoint().map_err(|e| {
            EvalError::InvalidInput(format!("[{}] validated datapoint does not decode: {}", id, e))
        })?;
        let datapoint = schema.transform_query(datapoint, options.transform_override, log);
        if validated.contains_key(&datapoint.id) {
            return Err(EvalError::DuplicateId {
                dataset: schema.name().to_string(),
                id: datapoint.id,
            });
        }
        if !backend_queries {
            queries.push(Query::new(datapoint.id.clone(), datapoint.input.clone()));
        }
        validated.insert(datapoint.id.clone(), datapoint);
    }

    log.debug(format_args!(
        "validated {} of {} datapoints",
        validated.len(),
        raw_count
    ));

    let total_queries = queries.len();
    if options.debug {
        queries.truncate(DEBUG_QUERY_LIMIT);
        log.info(format_args!("debug mode: keeping first {} queries", queries.len()));
    }

    let range = options.shard.range(queries.len());
    if options.shard.is_sharded() {
        queries = queries.drain(range.start..range.end).collect();
    }

    Ok(QueryPlan {
        validated,
        queries,
        total_queries,
        range,
        backend_queries,
    })
}
