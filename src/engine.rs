//! Parallel execution engines.
//!
//! An [Engine] provides the two primitives a rechunk pipeline needs: an element-wise fan-out
//! and a shuffle that groups records by [Key]. Keys are shuffled by their canonical encoding
//! from the engine's [KeyCoder], so equal keys always meet in one group. The order of groups,
//! and of values within a group, is unspecified.

use crate::error::RechunkError;
use crate::key::{Key, KeyCoder};
use crate::metrics::record_groups;

use hashbrown::HashMap;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Groups of values keyed by encoded key bytes.
type Groups<V> = HashMap<Vec<u8>, (Key, Vec<V>)>;

/// Add one value to its group.
fn insert<V>(groups: &mut Groups<V>, bytes: Vec<u8>, key: Key, value: V) {
    groups
        .entry(bytes)
        .or_insert_with(|| (key, Vec::new()))
        .1
        .push(value);
}

/// Convert shuffled groups into their output form, keyed by the decoded canonical key.
fn finish_groups<V>(
    engine: &str,
    coder: &dyn KeyCoder,
    groups: Groups<V>,
) -> Result<Vec<(Key, Vec<V>)>, RechunkError> {
    record_groups(engine, groups.len());
    debug!(engine, groups = groups.len(), "shuffled records");
    groups
        .into_iter()
        .map(|(bytes, (_, values))| Ok((coder.decode(&bytes)?, values)))
        .collect()
}

/// Execution primitives for rechunk pipelines.
pub trait Engine: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// The coder used to shuffle keys.
    fn coder(&self) -> &dyn KeyCoder;

    /// Apply `f` to every input independently and concatenate the outputs.
    ///
    /// The first error returned by `f` fails the whole operation.
    fn flat_map<I, O, F>(&self, inputs: Vec<I>, f: F) -> Result<Vec<O>, RechunkError>
    where
        I: Send,
        O: Send,
        F: Fn(I) -> Result<Vec<O>, RechunkError> + Send + Sync;

    /// Collect all values sharing a key into one group.
    fn group_by_key<V: Send>(
        &self,
        records: Vec<(Key, V)>,
    ) -> Result<Vec<(Key, Vec<V>)>, RechunkError>;
}

/// Serial engine running every operation on the calling thread.
pub struct DirectEngine {
    coder: Arc<dyn KeyCoder>,
}

impl DirectEngine {
    pub fn new(coder: Arc<dyn KeyCoder>) -> Self {
        Self { coder }
    }
}

impl Engine for DirectEngine {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn coder(&self) -> &dyn KeyCoder {
        self.coder.as_ref()
    }

    fn flat_map<I, O, F>(&self, inputs: Vec<I>, f: F) -> Result<Vec<O>, RechunkError>
    where
        I: Send,
        O: Send,
        F: Fn(I) -> Result<Vec<O>, RechunkError> + Send + Sync,
    {
        let mut outputs = Vec::new();
        for input in inputs {
            outputs.extend(f(input)?);
        }
        Ok(outputs)
    }

    fn group_by_key<V: Send>(
        &self,
        records: Vec<(Key, V)>,
    ) -> Result<Vec<(Key, Vec<V>)>, RechunkError> {
        let mut groups = Groups::new();
        for (key, value) in records {
            let bytes = self.coder.encode(&key)?;
            insert(&mut groups, bytes, key, value);
        }
        finish_groups(self.name(), self.coder(), groups)
    }
}

/// Engine running operations on a dedicated Rayon thread pool.
pub struct RayonEngine {
    coder: Arc<dyn KeyCoder>,
    pool: rayon::ThreadPool,
}

impl RayonEngine {
    /// Returns a new RayonEngine.
    ///
    /// # Arguments
    ///
    /// * `coder`: Coder used to shuffle keys
    /// * `threads`: Number of worker threads. Defaults to the number of CPUs.
    pub fn new(coder: Arc<dyn KeyCoder>, threads: Option<usize>) -> Result<Self, RechunkError> {
        let threads = threads.unwrap_or_else(num_cpus::get);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("chunkbeam-worker-{}", index))
            .build()?;
        debug!(threads, "created worker thread pool");
        Ok(Self { coder, pool })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Engine for RayonEngine {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn coder(&self) -> &dyn KeyCoder {
        self.coder.as_ref()
    }

    fn flat_map<I, O, F>(&self, inputs: Vec<I>, f: F) -> Result<Vec<O>, RechunkError>
    where
        I: Send,
        O: Send,
        F: Fn(I) -> Result<Vec<O>, RechunkError> + Send + Sync,
    {
        let outputs: Vec<Vec<O>> = self
            .pool
            .install(|| {
                inputs
                    .into_par_iter()
                    .map(f)
                    .collect::<Result<Vec<_>, RechunkError>>()
            })?;
        Ok(outputs.into_iter().flatten().collect())
    }

    fn group_by_key<V: Send>(
        &self,
        records: Vec<(Key, V)>,
    ) -> Result<Vec<(Key, Vec<V>)>, RechunkError> {
        let coder = self.coder.as_ref();
        let groups = self.pool.install(|| {
            records
                .into_par_iter()
                .try_fold(
                    Groups::new,
                    |mut groups: Groups<V>, (key, value): (Key, V)| -> Result<_, RechunkError> {
                        let bytes = coder.encode(&key)?;
                        insert(&mut groups, bytes, key, value);
                        Ok(groups)
                    },
                )
                .try_reduce(Groups::new, |mut groups, other| {
                    for (bytes, (key, values)) in other {
                        groups
                            .entry(bytes)
                            .or_insert_with(|| (key, Vec::new()))
                            .1
                            .extend(values);
                    }
                    Ok(groups)
                })
        })?;
        finish_groups(self.name(), self.coder(), groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::key::JsonKeyCoder;

    fn direct() -> DirectEngine {
        DirectEngine::new(Arc::new(JsonKeyCoder))
    }

    fn rayon_engine() -> RayonEngine {
        RayonEngine::new(Arc::new(JsonKeyCoder), Some(2)).unwrap()
    }

    fn check_flat_map<E: Engine>(engine: &E) {
        let mut outputs = engine
            .flat_map(vec![1, 2, 3], |n: usize| Ok(vec![n; n]))
            .unwrap();
        outputs.sort();
        assert_eq!(vec![1, 2, 2, 3, 3, 3], outputs);
    }

    fn check_flat_map_error<E: Engine>(engine: &E) {
        let err = engine
            .flat_map(vec![1, 2, 3], |n: usize| {
                if n == 2 {
                    Err(RechunkError::failed_precondition("two"))
                } else {
                    Ok(vec![n])
                }
            })
            .unwrap_err();
        assert_eq!(ErrorCode::FailedPrecondition, err.code());
    }

    fn check_group_by_key<E: Engine>(engine: &E) {
        let a = Key::from_offsets([("x", 0), ("y", 4)]).unwrap();
        // Equal to `a` once zero offsets are dropped.
        let a2 = Key::from_offsets([("y", 4)]).unwrap();
        let b = Key::from_offsets([("x", 4)]).unwrap();
        let records = vec![(a.clone(), 1), (b.clone(), 2), (a2, 3), (b.clone(), 4)];
        let mut groups = engine.group_by_key(records).unwrap();
        groups.sort();
        for (_, values) in groups.iter_mut() {
            values.sort();
        }
        let mut expected = vec![(a, vec![1, 3]), (b, vec![2, 4])];
        expected.sort();
        assert_eq!(expected, groups);
    }

    #[test]
    fn direct_flat_map() {
        check_flat_map(&direct());
        check_flat_map_error(&direct());
    }

    #[test]
    fn rayon_flat_map() {
        check_flat_map(&rayon_engine());
        check_flat_map_error(&rayon_engine());
    }

    #[test]
    fn direct_group_by_key() {
        check_group_by_key(&direct());
    }

    #[test]
    fn rayon_group_by_key() {
        check_group_by_key(&rayon_engine());
    }

    #[test]
    fn group_by_key_empty() {
        let groups = direct().group_by_key::<()>(vec![]).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn rayon_threads() {
        let engine = RayonEngine::new(Arc::new(JsonKeyCoder), Some(3)).unwrap();
        assert_eq!(3, engine.threads());
        assert_eq!("rayon", engine.name());
    }
}
