//! Planning the stages of a rechunk.
//!
//! Converting between chunk schemes that are incompatible along several dimensions at once
//! would need intermediate chunks as small as one element along each of them. The planner
//! instead walks from source to target through geometrically spaced intermediate schemes,
//! choosing the fewest stages that keep every intermediate chunk reasonably large while no
//! chunk exceeds the memory budget.

use crate::error::RechunkError;
use crate::models::{ChunkScheme, ChunkSize, DimSizes};

use itertools::izip;
use serde::{Deserialize, Serialize};
use std::iter;
use strum_macros::Display;
use tracing::{debug, warn};
use validator::{Validate, ValidationError};

/// Default memory budget per task in bytes.
pub const DEFAULT_MAX_MEM: u64 = 64 * 1024 * 1024;

/// Default upper bound on the number of intermediate steps searched.
pub const DEFAULT_MAX_STAGES: usize = 5;

/// Planner configuration
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
#[validate(schema(function = "validate_planner_config"))]
pub struct PlannerConfig {
    /// Maximum size in bytes of any chunk held by one task
    #[validate(range(min = 1, message = "max_mem must be greater than 0"))]
    pub max_mem: u64,
    /// Intermediate chunks smaller than this many bytes are avoided when possible.
    /// Defaults to 1% of `max_mem`.
    pub min_mem: Option<u64>,
    /// Maximum number of split/consolidate steps to search
    #[validate(range(min = 1, max = 32, message = "max_stages must be between 1 and 32"))]
    pub max_stages: usize,
    /// Treat oversized source or target chunks as errors rather than warnings
    pub strict: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_mem: DEFAULT_MAX_MEM,
            min_mem: None,
            max_stages: DEFAULT_MAX_STAGES,
            strict: false,
        }
    }
}

impl PlannerConfig {
    /// Returns the effective minimum intermediate chunk size in bytes.
    pub fn min_mem(&self) -> u64 {
        self.min_mem.unwrap_or(self.max_mem / 100)
    }
}

fn validate_planner_config(config: &PlannerConfig) -> Result<(), ValidationError> {
    if config.min_mem() > config.max_mem {
        let mut error = ValidationError::new("min_mem must not be greater than max_mem");
        error.add_param("min_mem".into(), &config.min_mem());
        error.add_param("max_mem".into(), &config.max_mem);
        return Err(error);
    }
    Ok(())
}

/// Kind of a rechunk stage
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Split each record locally
    Split,
    /// Shuffle records by consolidation key and merge each group
    Consolidate,
}

/// One step of a rechunk plan
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Stage {
    pub kind: StageKind,
    /// Chunk lengths applied by this stage. Dimensions not named are untouched.
    pub chunks: ChunkScheme,
    /// Estimated number of records after this stage
    pub records: u64,
}

/// Ordered sequence of stages converting one chunk scheme into another
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RechunkPlan {
    pub stages: Vec<Stage>,
}

impl RechunkPlan {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }
}

impl<'a> IntoIterator for &'a RechunkPlan {
    type Item = &'a Stage;
    type IntoIter = std::slice::Iter<'a, Stage>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}

/// Greatest common divisor.
fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Number of pieces a dimension of `extent` is cut into by the union of the `a` and `b` grids.
fn intersections(a: usize, b: usize, extent: usize) -> u64 {
    if extent == 0 {
        return 0;
    }
    let lcm = a / gcd(a, b) * b;
    let last = extent - 1;
    (last / a + last / b - last / lcm + 1) as u64
}

/// Returns the value nearest to `value` of the form `k * small` where `k` divides
/// `large / small`, so that the result lies on both grids. Ties go to the smaller value.
///
/// Values are returned unchanged when neither length divides the other.
fn snap(value: usize, a: usize, b: usize) -> usize {
    let (small, large) = (a.min(b), a.max(b));
    if large % small != 0 {
        return value;
    }
    let ratio = large / small;
    let mut best = small;
    let mut k = 1;
    while k * k <= ratio {
        if ratio % k == 0 {
            for candidate in [k * small, ratio / k * small] {
                if (candidate.abs_diff(value), candidate) < (best.abs_diff(value), best) {
                    best = candidate;
                }
            }
        }
        k += 1;
    }
    best
}

/// Dataset extents in dimension order, with chunk lengths held as aligned vectors.
struct Grid {
    dims: Vec<String>,
    extents: Vec<usize>,
    itemsize: u64,
}

impl Grid {
    fn new(sizes: &DimSizes, itemsize: usize) -> Self {
        Self {
            dims: sizes.keys().cloned().collect(),
            extents: sizes.values().copied().collect(),
            itemsize: itemsize as u64,
        }
    }

    /// Resolve a scheme to one length per dimension.
    fn resolve(
        &self,
        scheme: &ChunkScheme,
        name: &str,
        clamp: bool,
    ) -> Result<Vec<usize>, RechunkError> {
        if let Some(dim) = scheme.dims().find(|dim| !self.dims.contains(dim)) {
            return Err(RechunkError::invalid_argument(format!(
                "{} chunks name dimension {} which is not in the dataset sizes {:?}",
                name, dim, self.dims
            )));
        }
        izip!(&self.dims, &self.extents)
            .map(|(dim, &extent)| {
                let len = scheme.get(dim).unwrap_or(ChunkSize::Full).resolve(extent);
                if len > extent && !clamp {
                    return Err(RechunkError::invalid_argument(format!(
                        "{} chunk length {} along {} exceeds the dimension extent {}",
                        name, len, dim, extent
                    )));
                }
                Ok(len.min(extent).max(1))
            })
            .collect()
    }

    fn bytes(&self, lengths: &[usize]) -> u64 {
        lengths
            .iter()
            .fold(self.itemsize, |acc, &len| acc.saturating_mul(len as u64))
    }

    /// Number of records when chunked with the given lengths.
    fn records(&self, lengths: &[usize]) -> u64 {
        izip!(lengths, &self.extents).fold(1u64, |acc, (&len, &extent)| {
            acc.saturating_mul(extent.div_ceil(len) as u64)
        })
    }

    /// Number of records when split along the boundaries of both `pre` and `post`.
    fn intermediate_records(&self, pre: &[usize], post: &[usize]) -> u64 {
        izip!(pre, post, &self.extents).fold(1u64, |acc, (&a, &b, &extent)| {
            acc.saturating_mul(intersections(a, b, extent))
        })
    }

    /// Grow source chunks along dimensions where the target is larger.
    ///
    /// Each such length becomes the largest multiple of the source length that divides the
    /// target length, while the chunk stays within the budget.
    fn read_chunks(&self, source: &[usize], target: &[usize], max_mem: u64) -> Vec<usize> {
        let mut read = source.to_vec();
        for (i, (&s, &t)) in source.iter().zip(target).enumerate() {
            if t <= s {
                continue;
            }
            let grown = (2..=t / s)
                .rev()
                .map(|k| k * s)
                .filter(|len| t % len == 0)
                .find(|&len| {
                    let mut trial = read.clone();
                    trial[i] = len;
                    self.bytes(&trial) <= max_mem
                });
            if let Some(len) = grown {
                read[i] = len;
            }
        }
        read
    }

    /// Chunk lengths after each of `stages` steps from `read` to `target`.
    fn waypoints(&self, read: &[usize], target: &[usize], stages: usize) -> Vec<Vec<usize>> {
        (1..stages)
            .map(|i| {
                let frac = i as f64 / stages as f64;
                izip!(read, target, &self.extents)
                    .map(|(&r, &t, &extent)| {
                        if r == t {
                            return r;
                        }
                        let raw = ((r as f64).powf(1.0 - frac) * (t as f64).powf(frac)).round();
                        snap(raw as usize, r, t).clamp(1, extent.max(1))
                    })
                    .collect()
            })
            .chain(iter::once(target.to_vec()))
            .collect()
    }

    fn scheme<F>(&self, mut size: F) -> ChunkScheme
    where
        F: FnMut(usize) -> Option<ChunkSize>,
    {
        self.dims
            .iter()
            .enumerate()
            .filter_map(|(i, dim)| size(i).map(|size| (dim.clone(), size)))
            .collect()
    }
}

/// Accumulates stages, merging adjacent consolidations where one subsumes the other.
struct PlanBuilder<'a> {
    grid: &'a Grid,
    stages: Vec<Stage>,
}

impl<'a> PlanBuilder<'a> {
    fn new(grid: &'a Grid) -> Self {
        Self {
            grid,
            stages: Vec::new(),
        }
    }

    /// Emit the stages taking chunks of lengths `pre` to chunks of lengths `post`.
    ///
    /// A split is needed along a dimension unless every `post` boundary is already a `pre`
    /// boundary; a consolidation is needed unless every `pre` boundary is a `post` boundary.
    fn transition(&mut self, pre: &[usize], post: &[usize]) {
        let extents = &self.grid.extents;
        let split = self.grid.scheme(|i| {
            let (a, b) = (pre[i], post[i]);
            if a != b && b < extents[i] && b % a != 0 {
                ChunkSize::from_len(b)
            } else {
                None
            }
        });
        let consolidate = self.grid.scheme(|i| {
            let (a, b) = (pre[i], post[i]);
            if a == b || a >= extents[i] || a % b == 0 {
                None
            } else if b >= extents[i] {
                Some(ChunkSize::Full)
            } else {
                ChunkSize::from_len(b)
            }
        });

        if !split.is_empty() {
            let after: Vec<usize> = self
                .grid
                .dims
                .iter()
                .enumerate()
                .map(|(i, dim)| if split.get(dim).is_some() { post[i] } else { pre[i] })
                .collect();
            let records = self.grid.intermediate_records(pre, &after);
            self.stages.push(Stage {
                kind: StageKind::Split,
                chunks: split,
                records,
            });
        }
        if !consolidate.is_empty() {
            self.push_consolidate(consolidate, self.grid.records(post));
        }
    }

    fn push_consolidate(&mut self, chunks: ChunkScheme, records: u64) {
        if let Some(last) = self.stages.last_mut() {
            let subsumes = |dim: &String, later: &ChunkSize| match (last.chunks.get(dim), later) {
                (None, _) | (Some(_), ChunkSize::Full) => true,
                (Some(ChunkSize::Len(earlier)), ChunkSize::Len(later)) => {
                    later.get() % earlier.get() == 0
                }
                (Some(ChunkSize::Full), ChunkSize::Len(_)) => false,
            };
            if last.kind == StageKind::Consolidate && chunks.iter().all(|(d, s)| subsumes(d, s)) {
                for (dim, size) in chunks.iter() {
                    last.chunks.insert(dim.clone(), *size);
                }
                last.records = records;
                return;
            }
        }
        self.stages.push(Stage {
            kind: StageKind::Consolidate,
            chunks,
            records,
        });
    }

    fn finish(self) -> RechunkPlan {
        RechunkPlan {
            stages: self.stages,
        }
    }
}

/// Report a chunk over the memory budget, as an error if the configuration is strict.
fn advisory(config: &PlannerConfig, message: String) -> Result<(), RechunkError> {
    if config.strict {
        return Err(RechunkError::resource_exhausted(message));
    }
    warn!("{}", message);
    Ok(())
}

/// Choose the waypoints from `read` to `target`, ending with `target`.
fn search(
    grid: &Grid,
    read: &[usize],
    target: &[usize],
    threshold: u64,
    config: &PlannerConfig,
) -> Result<Vec<Vec<usize>>, RechunkError> {
    let mut previous: Option<(Vec<Vec<usize>>, u64)> = None;
    for stages in 1..=config.max_stages {
        let waypoints = grid.waypoints(read, target, stages);
        let intermediate = &waypoints[..waypoints.len() - 1];
        if intermediate
            .iter()
            .any(|lengths| grid.bytes(lengths) > config.max_mem)
        {
            debug!(stages, "intermediate chunks exceed the memory budget");
            continue;
        }

        let mut smallest = u64::MAX;
        let mut records = 0u64;
        let mut pre = read;
        for post in &waypoints {
            let shared: Vec<usize> = pre.iter().zip(post).map(|(a, b)| *a.min(b)).collect();
            smallest = smallest.min(grid.bytes(&shared));
            records = records.saturating_add(grid.intermediate_records(pre, post));
            pre = post.as_slice();
        }
        debug!(stages, smallest, records, threshold, "evaluated rechunk plan");
        if smallest >= threshold {
            return Ok(waypoints);
        }

        if let Some((best, best_records)) = previous.take() {
            if records > best_records {
                warn!(
                    stages = stages - 1,
                    "stopping search before intermediate chunks reach {} bytes as more stages \
                     increase the number of records",
                    threshold
                );
                return Ok(best);
            }
        }
        previous = Some((waypoints, records));
    }
    Err(RechunkError::resource_exhausted(format!(
        "no plan with at most {} stages keeps intermediate chunks above {} bytes within a \
         budget of {} bytes",
        config.max_stages, threshold, config.max_mem
    )))
}

/// Plan the stages converting a dataset chunked by `source` into one chunked by `target`.
///
/// Dimensions missing from a scheme, or set to [ChunkSize::Full], are taken whole. Source
/// lengths above the extent are clamped. `itemsize` is the size in bytes of one element of the
/// largest variable.
///
/// # Errors
///
/// * [RechunkError::InvalidArgument] for unknown dimensions, target lengths above the extent
///   or an `itemsize` that is zero or over budget.
/// * [RechunkError::InvalidConfig] if the configuration does not validate.
/// * [RechunkError::ResourceExhausted] if no plan converges within `max_stages`, or in strict
///   mode if source or target chunks exceed `max_mem`.
pub fn plan_rechunk(
    sizes: &DimSizes,
    source: &ChunkScheme,
    target: &ChunkScheme,
    itemsize: usize,
    config: &PlannerConfig,
) -> Result<RechunkPlan, RechunkError> {
    config.validate()?;
    if itemsize == 0 {
        return Err(RechunkError::invalid_argument(
            "itemsize must be greater than 0",
        ));
    }
    if itemsize as u64 > config.max_mem {
        return Err(RechunkError::invalid_argument(format!(
            "itemsize {} exceeds the memory budget of {} bytes",
            itemsize, config.max_mem
        )));
    }

    let grid = Grid::new(sizes, itemsize);
    let source = grid.resolve(source, "source", true)?;
    let target = grid.resolve(target, "target", false)?;
    for (name, lengths) in [("source", &source), ("target", &target)] {
        let bytes = grid.bytes(lengths);
        if bytes > config.max_mem {
            advisory(
                config,
                format!(
                    "{} chunks of {} bytes exceed the memory budget of {} bytes",
                    name, bytes, config.max_mem
                ),
            )?;
        }
    }

    let threshold = config
        .min_mem()
        .min(grid.bytes(&source).min(grid.bytes(&target)));
    let read = grid.read_chunks(&source, &target, config.max_mem);
    let waypoints = search(&grid, &read, &target, threshold, config)?;

    let mut builder = PlanBuilder::new(&grid);
    builder.transition(&source, &read);
    let mut pre = read.as_slice();
    for post in &waypoints {
        builder.transition(pre, post);
        pre = post.as_slice();
    }
    let plan = builder.finish();
    debug!(stages = plan.len(), "planned rechunk");
    Ok(plan)
}
