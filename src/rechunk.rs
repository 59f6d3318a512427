//! Rechunking a keyed collection from one chunk scheme to another.

use crate::array::LabeledArray;
use crate::engine::Engine;
use crate::error::RechunkError;
use crate::key::Key;
use crate::models::{ChunkScheme, DimSizes};
use crate::metrics::record_split;
use crate::planner::{plan_rechunk, PlannerConfig, RechunkPlan, StageKind};
use crate::split::split_chunks;
use crate::transform::Transform;
use crate::transforms::ConsolidateChunks;

use std::borrow::Cow;
use tracing::{info, info_span, warn};

/// Stage chunks restricted to the dimensions of one record.
///
/// Records holding an explicit subset of variables may lack some dimensions of the dataset.
/// They are rechunked only along the dimensions they have.
fn record_chunks<'a, C: LabeledArray>(
    chunks: &'a ChunkScheme,
    key: &Key,
    chunk: &C,
) -> Cow<'a, ChunkScheme> {
    if key.vars().is_all() {
        return Cow::Borrowed(chunks);
    }
    let sizes = chunk.sizes();
    if chunks.dims().all(|dim| sizes.contains_key(dim)) {
        return Cow::Borrowed(chunks);
    }
    Cow::Owned(
        chunks
            .iter()
            .filter(|(dim, _)| sizes.contains_key(*dim))
            .map(|(dim, size)| (dim.clone(), *size))
            .collect(),
    )
}

/// Rechunk a dataset by running the stages of a [RechunkPlan].
///
/// The plan is computed once, when the transform is created. Split stages are local to each
/// record; consolidate stages shuffle records with the engine. Records of single variables
/// are only rechunked along their own dimensions.
#[derive(Clone, Debug)]
pub struct Rechunk {
    plan: RechunkPlan,
    max_mem: u64,
}

impl Rechunk {
    /// Returns a new Rechunk transform.
    ///
    /// # Arguments
    ///
    /// * `sizes`: Extent of the virtual dataset along each dimension
    /// * `source`: Current chunk scheme
    /// * `target`: Desired chunk scheme
    /// * `itemsize`: Size in bytes of one element
    /// * `config`: Planner configuration
    pub fn new(
        sizes: &DimSizes,
        source: &ChunkScheme,
        target: &ChunkScheme,
        itemsize: usize,
        config: &PlannerConfig,
    ) -> Result<Self, RechunkError> {
        let plan = plan_rechunk(sizes, source, target, itemsize, config)?;
        info!(stages = plan.len(), "planned rechunk");
        Ok(Self {
            plan,
            max_mem: config.max_mem,
        })
    }

    pub fn plan(&self) -> &RechunkPlan {
        &self.plan
    }
}

impl<C: LabeledArray> Transform<C> for Rechunk {
    fn name(&self) -> &'static str {
        "rechunk"
    }

    fn apply<E: Engine>(
        &self,
        engine: &E,
        records: Vec<(Key, C)>,
    ) -> Result<Vec<(Key, C)>, RechunkError> {
        let mut records = records;
        for (index, stage) in self.plan.iter().enumerate() {
            let span = info_span!("stage", index, kind = %stage.kind);
            let _enter = span.enter();
            let before = records.len();
            records = match stage.kind {
                StageKind::Split => {
                    let chunks = &stage.chunks;
                    let outputs = engine.flat_map(records, |(key, chunk)| {
                        let chunks = record_chunks(chunks, &key, &chunk);
                        split_chunks(key, chunk, &chunks)?.collect()
                    })?;
                    record_split(Transform::<C>::name(self), outputs.len());
                    outputs
                }
                StageKind::Consolidate => {
                    // Records without a consolidated dimension form groups of their own.
                    let records =
                        ConsolidateChunks::new(stage.chunks.clone()).apply(engine, records)?;
                    for (key, chunk) in &records {
                        let nbytes = chunk.nbytes() as u64;
                        if nbytes > self.max_mem {
                            warn!(
                                %key,
                                nbytes,
                                max_mem = self.max_mem,
                                "consolidated chunk exceeds the memory budget"
                            );
                        }
                    }
                    records
                }
            };
            info!(
                before,
                after = records.len(),
                estimated = stage.records,
                "applied stage"
            );
        }
        Ok(records)
    }
}
