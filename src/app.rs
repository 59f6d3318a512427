//! Implementation of the command line subcommands.

use crate::array::{Dataset, Element, LabeledArray};
use crate::cli::{RechunkArgs, RunArgs};
use crate::engine::{DirectEngine, Engine, RayonEngine};
use crate::error::RechunkError;
use crate::key::JsonKeyCoder;
use crate::models::{DType, DimSizes};
use crate::planner::{plan_rechunk, RechunkPlan};
use crate::rechunk::Rechunk;
use crate::source::dataset_to_chunks;
use crate::store::{ChunkWriter, MemoryStore};
use crate::transform::{Then, Transform};
use crate::transforms::ValidateEachChunk;

use ndarray::{Array, IxDyn};
use num_traits::FromPrimitive;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Element values of the synthetic dataset wrap around at this value so that every data type
/// represents them exactly.
const VALUE_MODULUS: usize = 100_000;

/// Outcome of a verified end-to-end rechunk.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// Element data type
    pub dtype: DType,
    /// Engine that executed the pipeline
    pub engine: &'static str,
    /// Number of stages in the plan
    pub stages: usize,
    /// Number of records before rechunking
    pub records_in: usize,
    /// Number of records after rechunking
    pub records_out: usize,
    /// Total size of the dataset in bytes
    pub nbytes: usize,
}

/// Returns the stage plan for the `plan` subcommand.
pub fn plan(args: &RechunkArgs) -> Result<RechunkPlan, RechunkError> {
    let config = args.planner_config()?;
    plan_rechunk(
        &args.sizes,
        &args.source,
        &args.target,
        args.dtype.size_of(),
        &config,
    )
}

/// Rechunk a synthetic dataset and check that the result covers it exactly.
///
/// This function dispatches on the runtime `dtype` to a concrete element type, then on the
/// engine selected.
pub fn run(args: &RunArgs) -> Result<RunSummary, RechunkError> {
    match args.rechunk.dtype {
        DType::Int32 => run_t::<i32>(args),
        DType::Int64 => run_t::<i64>(args),
        DType::Uint32 => run_t::<u32>(args),
        DType::Uint64 => run_t::<u64>(args),
        DType::Float32 => run_t::<f32>(args),
        DType::Float64 => run_t::<f64>(args),
    }
}

fn run_t<T: Element + FromPrimitive>(args: &RunArgs) -> Result<RunSummary, RechunkError> {
    let coder = Arc::new(JsonKeyCoder);
    if args.use_rayon {
        let engine = RayonEngine::new(coder, args.threads)?;
        info!(threads = engine.threads(), "using rayon engine");
        run_with_engine::<T, _>(args, &engine)
    } else {
        run_with_engine::<T, _>(args, &DirectEngine::new(coder))
    }
}

fn run_with_engine<T, E>(args: &RunArgs, engine: &E) -> Result<RunSummary, RechunkError>
where
    T: Element + FromPrimitive,
    E: Engine,
{
    let rechunk_args = &args.rechunk;
    let dataset = synthetic_dataset::<T>(&rechunk_args.sizes)?;
    let rechunk = Rechunk::new(
        &rechunk_args.sizes,
        &rechunk_args.source,
        &rechunk_args.target,
        rechunk_args.dtype.size_of(),
        &rechunk_args.planner_config()?,
    )?;
    let stages = rechunk.plan().len();

    let records = dataset_to_chunks(&dataset, &rechunk_args.source, args.split_vars)?;
    let records_in = records.len();
    let pipeline = Then::new(Then::new(ValidateEachChunk, rechunk), ValidateEachChunk);
    let records = pipeline.apply(engine, records)?;

    let mut store = MemoryStore::from_template(&dataset);
    store.write_all(&records)?;
    if store.finish()? != dataset {
        return Err(RechunkError::failed_precondition(
            "rechunked data differs from the input dataset",
        ));
    }

    let summary = RunSummary {
        dtype: rechunk_args.dtype,
        engine: engine.name(),
        stages,
        records_in,
        records_out: records.len(),
        nbytes: dataset.nbytes(),
    };
    info!(?summary, "verified rechunk");
    Ok(summary)
}

/// Returns a dataset with two variables spanning every dimension in `sizes`.
fn synthetic_dataset<T: Element + FromPrimitive>(
    sizes: &DimSizes,
) -> Result<Dataset<T>, RechunkError> {
    let dims: Vec<&String> = sizes.keys().collect();
    let shape: Vec<usize> = sizes.values().copied().collect();
    let len: usize = shape.iter().product();
    let values = |offset: usize| {
        Array::from_iter((0..len).map(|i| {
            T::from_usize((i + offset) % VALUE_MODULUS).unwrap_or_else(T::zero)
        }))
        .into_shape(IxDyn(&shape))
    };
    Dataset::new()
        .with_variable("data", dims.iter().copied(), values(0)?)?
        .with_variable("shifted", dims, values(1)?)
}
