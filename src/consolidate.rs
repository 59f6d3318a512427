//! Consolidating contiguous chunks into larger chunks.
//!
//! Concatenation order is always derived from key offsets, never from the order in which
//! records arrive, so the result does not depend on how an engine delivered a group.

use crate::array::LabeledArray;
use crate::error::RechunkError;
use crate::key::{Key, Vars};

use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Merge one group of records into a single record.
///
/// The records must tile a rectangle: along every dimension on which their offsets vary they
/// must be contiguous, without gaps or overlaps, and agree on their extents along all other
/// dimensions. The merged key takes the minimum offset along each consolidated dimension. A
/// group with a single record is returned unchanged.
///
/// # Errors
///
/// Returns [RechunkError::FailedPrecondition] if the group is empty, mixes variable subsets, or
/// is not a consistent tiling.
pub fn consolidate_chunks<C: LabeledArray>(
    inputs: Vec<(Key, C)>,
) -> Result<(Key, C), RechunkError> {
    let vars = match inputs.first() {
        Some((key, _)) => key.vars().clone(),
        None => {
            return Err(RechunkError::failed_precondition(
                "cannot consolidate an empty group of chunks",
            ))
        }
    };
    let mut inputs = inputs;
    if inputs.len() == 1 {
        if let Some(record) = inputs.pop() {
            return Ok(record);
        }
    }
    if let Some((key, _)) = inputs.iter().find(|(key, _)| *key.vars() != vars) {
        return Err(RechunkError::failed_precondition(format!(
            "cannot consolidate chunks with different variables: {} and {}",
            vars,
            key.vars()
        )));
    }

    let dims: BTreeSet<String> = inputs
        .iter()
        .flat_map(|(key, _)| key.offsets().keys().cloned())
        .collect();
    let mut records = inputs;
    for dim in &dims {
        records = consolidate_along(records, dim)?;
    }
    match (records.pop(), records.len()) {
        (Some(record), 0) => Ok(record),
        (_, remaining) => Err(RechunkError::failed_precondition(format!(
            "chunks do not tile a rectangle: {} chunks remain after consolidation",
            remaining + 1
        ))),
    }
}

/// Concatenate records along one dimension, one output per set of other offsets.
fn consolidate_along<C: LabeledArray>(
    records: Vec<(Key, C)>,
    dim: &str,
) -> Result<Vec<(Key, C)>, RechunkError> {
    let mut groups: BTreeMap<Key, Vec<(Key, C)>> = BTreeMap::new();
    for (key, chunk) in records {
        groups
            .entry(key.with_offset(dim, None))
            .or_default()
            .push((key, chunk));
    }
    groups
        .into_values()
        .map(|group| concat_contiguous(group, dim))
        .collect()
}

/// Concatenate records that differ only in their offset along `dim`.
fn concat_contiguous<C: LabeledArray>(
    mut group: Vec<(Key, C)>,
    dim: &str,
) -> Result<(Key, C), RechunkError> {
    if group.len() == 1 {
        if let Some(record) = group.pop() {
            return Ok(record);
        }
    }
    group.sort_by_key(|(key, _)| key.offset(dim));

    let first_sizes = group[0].1.sizes();
    let mut expected = group[0].0.offset(dim);
    for (key, chunk) in &group {
        let sizes = chunk.sizes();
        let length = *sizes.get(dim).ok_or_else(|| {
            RechunkError::failed_precondition(format!(
                "chunk {} has no dimension {} to consolidate along",
                key, dim
            ))
        })?;
        let offset = key.offset(dim);
        if offset < expected {
            return Err(RechunkError::failed_precondition(format!(
                "chunk {} overlaps the preceding chunk along {} (expected offset {})",
                key, dim, expected
            )));
        }
        if offset > expected {
            return Err(RechunkError::failed_precondition(format!(
                "gap along {} before chunk {} (expected offset {})",
                dim, key, expected
            )));
        }
        let mismatched = sizes.len() != first_sizes.len()
            || sizes
                .iter()
                .any(|(other, size)| other != dim && first_sizes.get(other) != Some(size));
        if mismatched {
            return Err(RechunkError::failed_precondition(format!(
                "chunk {} has sizes {:?} which do not match {:?} outside {}",
                key, sizes, first_sizes, dim
            )));
        }
        expected = offset + length;
    }

    trace!(dim, records = group.len(), "concatenating chunks");
    let key = group[0].0.clone();
    let parts = group.into_iter().map(|(_, chunk)| chunk).collect();
    Ok((key, C::concat(parts, dim)?))
}

/// Merge records holding disjoint variable subsets at the same offsets.
///
/// The merged key's variable subset is the union of the inputs'.
///
/// # Errors
///
/// Returns [RechunkError::FailedPrecondition] if the group is empty, the offsets differ, or the
/// variable subsets overlap.
pub fn consolidate_variables<C: LabeledArray>(
    mut inputs: Vec<(Key, C)>,
) -> Result<(Key, C), RechunkError> {
    let base = match inputs.first() {
        Some((key, _)) => key.with_vars(Vars::All),
        None => {
            return Err(RechunkError::failed_precondition(
                "cannot consolidate an empty group of chunks",
            ))
        }
    };
    if inputs.len() == 1 {
        if let Some(record) = inputs.pop() {
            return Ok(record);
        }
    }

    inputs.sort_by(|(a, _), (b, _)| a.vars().cmp(b.vars()));
    let mut union = BTreeSet::new();
    for (key, _) in &inputs {
        if key.with_vars(Vars::All) != base {
            return Err(RechunkError::failed_precondition(format!(
                "cannot merge variables of chunks at different offsets: {} and {}",
                base, key
            )));
        }
        let Vars::Explicit(names) = key.vars() else {
            return Err(RechunkError::failed_precondition(format!(
                "chunk {} already holds all variables",
                key
            )));
        };
        for name in names {
            if !union.insert(name.clone()) {
                return Err(RechunkError::failed_precondition(format!(
                    "variable {} is held by more than one chunk",
                    name
                )));
            }
        }
    }

    let key = inputs[0].0.with_vars(Vars::Explicit(union));
    let parts = inputs.into_iter().map(|(_, chunk)| chunk).collect();
    Ok((key, C::merge(parts)?))
}

/// Merge records covering a whole dataset into a single record.
///
/// Records are consolidated per variable subset, then the subsets are merged.
pub fn consolidate_fully<C: LabeledArray>(
    inputs: Vec<(Key, C)>,
) -> Result<(Key, C), RechunkError> {
    let mut by_vars: BTreeMap<Vars, Vec<(Key, C)>> = BTreeMap::new();
    for (key, chunk) in inputs {
        by_vars.entry(key.vars().clone()).or_default().push((key, chunk));
    }
    let consolidated = by_vars
        .into_values()
        .map(consolidate_chunks)
        .collect::<Result<Vec<_>, _>>()?;
    consolidate_variables(consolidated)
}
