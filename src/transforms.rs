//! Split and consolidate transforms.
//!
//! Each transform is implemented as a struct that implements the
//! [Transform](crate::transform::Transform) trait.

use crate::array::LabeledArray;
use crate::consolidate::consolidate_variables;
use crate::engine::Engine;
use crate::error::RechunkError;
use crate::grouping::{consolidate_group, consolidation_key};
use crate::key::{Key, Vars};
use crate::metrics::{record_consolidated, record_split};
use crate::models::ChunkScheme;
use crate::split::{split_chunks, split_variables};
use crate::transform::Transform;

use tracing::debug;

/// Split chunks into smaller chunks.
///
/// Splitting is local to each record and needs no shuffle.
#[derive(Clone, Debug)]
pub struct SplitChunks {
    chunks: ChunkScheme,
}

impl SplitChunks {
    pub fn new(chunks: ChunkScheme) -> Self {
        Self { chunks }
    }
}

impl<C: LabeledArray> Transform<C> for SplitChunks {
    fn name(&self) -> &'static str {
        "split_chunks"
    }

    fn apply<E: Engine>(
        &self,
        engine: &E,
        records: Vec<(Key, C)>,
    ) -> Result<Vec<(Key, C)>, RechunkError> {
        let chunks = &self.chunks;
        let outputs = engine.flat_map(records, |(key, chunk)| {
            split_chunks(key, chunk, chunks)?.collect()
        })?;
        record_split(Transform::<C>::name(self), outputs.len());
        debug!(records = outputs.len(), chunks = ?self.chunks, "split chunks");
        Ok(outputs)
    }
}

/// Consolidate chunks into larger chunks.
///
/// Records are shuffled by their [consolidation key](consolidation_key) and each group is
/// merged into one record.
#[derive(Clone, Debug)]
pub struct ConsolidateChunks {
    chunks: ChunkScheme,
}

impl ConsolidateChunks {
    pub fn new(chunks: ChunkScheme) -> Self {
        Self { chunks }
    }
}

impl<C: LabeledArray> Transform<C> for ConsolidateChunks {
    fn name(&self) -> &'static str {
        "consolidate_chunks"
    }

    fn apply<E: Engine>(
        &self,
        engine: &E,
        records: Vec<(Key, C)>,
    ) -> Result<Vec<(Key, C)>, RechunkError> {
        let chunks = &self.chunks;
        let keyed = records
            .into_iter()
            .map(|(key, chunk)| (consolidation_key(&key, chunks), (key, chunk)))
            .collect();
        let groups = engine.group_by_key(keyed)?;
        let outputs = engine.flat_map(groups, |(group_key, group)| {
            Ok(vec![consolidate_group(&group_key, group, chunks)?])
        })?;
        record_consolidated(Transform::<C>::name(self), outputs.len());
        debug!(records = outputs.len(), chunks = ?self.chunks, "consolidated chunks");
        Ok(outputs)
    }
}

/// Split every chunk into one chunk per variable.
#[derive(Clone, Debug, Default)]
pub struct SplitVariables;

impl<C: LabeledArray> Transform<C> for SplitVariables {
    fn name(&self) -> &'static str {
        "split_variables"
    }

    fn apply<E: Engine>(
        &self,
        engine: &E,
        records: Vec<(Key, C)>,
    ) -> Result<Vec<(Key, C)>, RechunkError> {
        let outputs = engine.flat_map(records, |(key, chunk)| split_variables(key, chunk))?;
        record_split(Transform::<C>::name(self), outputs.len());
        Ok(outputs)
    }
}

/// Merge chunks at the same offsets holding different variables.
#[derive(Clone, Debug, Default)]
pub struct ConsolidateVariables;

impl<C: LabeledArray> Transform<C> for ConsolidateVariables {
    fn name(&self) -> &'static str {
        "consolidate_variables"
    }

    fn apply<E: Engine>(
        &self,
        engine: &E,
        records: Vec<(Key, C)>,
    ) -> Result<Vec<(Key, C)>, RechunkError> {
        let keyed = records
            .into_iter()
            .map(|(key, chunk)| (key.with_vars(Vars::All), (key, chunk)))
            .collect();
        let groups = engine.group_by_key(keyed)?;
        let outputs = engine.flat_map(groups, |(_, group)| {
            Ok(vec![consolidate_variables(group)?])
        })?;
        record_consolidated(Transform::<C>::name(self), outputs.len());
        Ok(outputs)
    }
}

/// Check that every key is consistent with its chunk.
///
/// Each offset must name a dimension of the chunk, and an explicit variable subset must match
/// the variables the chunk holds.
pub fn validate_chunk<C: LabeledArray>(key: &Key, chunk: &C) -> Result<(), RechunkError> {
    let sizes = chunk.sizes();
    if let Some(dim) = key.offsets().keys().find(|dim| !sizes.contains_key(*dim)) {
        return Err(RechunkError::invalid_argument(format!(
            "key {} has an offset for dimension {} but the chunk has dimensions {:?}",
            key,
            dim,
            sizes.keys().collect::<Vec<_>>()
        )));
    }
    if let Vars::Explicit(names) = key.vars() {
        let variables = chunk.variables();
        if *names != variables {
            return Err(RechunkError::invalid_argument(format!(
                "key {} does not match the chunk variables {:?}",
                key, variables
            )));
        }
    }
    Ok(())
}

/// Validate each record with [validate_chunk], passing them through unchanged.
#[derive(Clone, Debug, Default)]
pub struct ValidateEachChunk;

impl<C: LabeledArray> Transform<C> for ValidateEachChunk {
    fn name(&self) -> &'static str {
        "validate_each_chunk"
    }

    fn apply<E: Engine>(
        &self,
        engine: &E,
        records: Vec<(Key, C)>,
    ) -> Result<Vec<(Key, C)>, RechunkError> {
        engine.flat_map(records, |(key, chunk)| {
            validate_chunk(&key, &chunk)?;
            Ok(vec![(key, chunk)])
        })
    }
}
