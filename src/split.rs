//! Splitting chunks into smaller chunks.

use crate::array::LabeledArray;
use crate::error::RechunkError;
use crate::key::{Key, Vars};
use crate::models::{ChunkScheme, ChunkSize};

use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// Lazy sequence of split records.
pub type SplitIter<C> = Box<dyn Iterator<Item = Result<(Key, C), RechunkError>> + Send>;

/// Returns the pieces of `start..stop` cut at every multiple of `multiple`.
///
/// Boundaries are in virtual-dataset coordinates, so pieces from neighbouring chunks line up
/// with the same global grid.
fn split_bounds(start: usize, stop: usize, multiple: usize) -> Vec<Range<usize>> {
    let mut bounds = vec![start];
    let first = start.div_ceil(multiple) * multiple;
    bounds.extend((first..stop).step_by(multiple).filter(|bound| *bound > start));
    bounds.push(stop);
    bounds.windows(2).map(|w| w[0]..w[1]).collect()
}

/// Split one record into records no longer than the requested length along each named
/// dimension.
///
/// Each output key takes the input offset plus the position of the piece within the chunk.
/// Dimensions set to [ChunkSize::Full] are not split. Pieces along different dimensions are
/// combined as a Cartesian product. The returned iterator slices the chunk lazily.
///
/// # Errors
///
/// Returns [RechunkError::InvalidArgument] if the scheme names a dimension the chunk does not
/// have.
pub fn split_chunks<C: LabeledArray>(
    key: Key,
    chunk: C,
    chunks: &ChunkScheme,
) -> Result<SplitIter<C>, RechunkError> {
    let sizes = chunk.sizes();
    let mut dims = Vec::new();
    let mut pieces = Vec::new();
    for (dim, size) in chunks.iter() {
        let extent = *sizes.get(dim).ok_or_else(|| {
            RechunkError::invalid_argument(format!(
                "cannot split along {}: chunk {} has dimensions {:?}",
                dim,
                key,
                sizes.keys().collect::<Vec<_>>()
            ))
        })?;
        let ChunkSize::Len(len) = *size else {
            continue;
        };
        let len = len.get();
        let start = key.offset(dim);
        dims.push(dim.clone());
        pieces.push(split_bounds(start, start + extent, len));
    }

    if pieces.iter().all(|bounds| bounds.len() <= 1) {
        // Nothing to split, but keys always carry the offsets of split dimensions.
        let key = dims.iter().fold(key, |key, dim| {
            let offset = key.offset(dim);
            key.with_offset(dim, Some(offset))
        });
        return Ok(Box::new(std::iter::once(Ok((key, chunk)))));
    }

    let iter = pieces
        .into_iter()
        .multi_cartesian_product()
        .map(move |ranges| -> Result<(Key, C), RechunkError> {
            let mut new_key = key.clone();
            let mut local = BTreeMap::new();
            for (dim, range) in dims.iter().zip(ranges) {
                let base = key.offset(dim);
                new_key = new_key.with_offset(dim, Some(range.start));
                local.insert(dim.clone(), range.start - base..range.end - base);
            }
            Ok((new_key, chunk.isel(&local)?))
        });
    Ok(Box::new(iter))
}

/// Split one record into one record per variable.
///
/// Each output key holds exactly one variable name; offsets are inherited unchanged.
pub fn split_variables<C: LabeledArray>(
    key: Key,
    chunk: C,
) -> Result<Vec<(Key, C)>, RechunkError> {
    chunk
        .variables()
        .into_iter()
        .map(|name| {
            let names = BTreeSet::from([name]);
            let part = chunk.select_variables(&names)?;
            Ok((key.with_vars(Vars::Explicit(names)), part))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Dataset;
    use crate::error::ErrorCode;
    use crate::test_utils;

    use ndarray::array;

    fn split_all(
        key: Key,
        chunk: Dataset<i32>,
        chunks: &ChunkScheme,
    ) -> Vec<(Key, Dataset<i32>)> {
        split_chunks(key, chunk, chunks)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn split_bounds_aligned() {
        assert_eq!(vec![0..4, 4..8], split_bounds(0, 8, 4));
        assert_eq!(vec![0..3, 3..6, 6..8], split_bounds(0, 8, 3));
    }

    #[test]
    fn split_bounds_unaligned_start() {
        assert_eq!(vec![4..5, 5..8], split_bounds(4, 8, 5));
        assert_eq!(vec![4..8], split_bounds(4, 8, 10));
    }

    #[test]
    fn split_bounds_empty() {
        assert_eq!(vec![3..3], split_bounds(3, 3, 2));
    }

    #[test]
    fn split_one_dim() {
        let ds = test_utils::arange_dataset(&[("x", 8), ("y", 2)]);
        let chunks = ChunkScheme::from_raw([("x", 3)]).unwrap();
        let result = split_all(Key::new(), ds, &chunks);
        let offsets: Vec<usize> = result.iter().map(|(key, _)| key.offset("x")).collect();
        assert_eq!(vec![0, 3, 6], offsets);
        assert_eq!(
            &array![[0, 1], [2, 3], [4, 5]].into_dyn(),
            result[0].1.variable("foo").unwrap().data()
        );
        assert_eq!(
            &array![[12, 13], [14, 15]].into_dyn(),
            result[2].1.variable("foo").unwrap().data()
        );
    }

    #[test]
    fn split_keeps_other_offsets_and_vars() {
        let ds = test_utils::arange_dataset(&[("x", 4), ("y", 2)]);
        let key = Key::from_offsets([("x", 4), ("y", 6)])
            .unwrap()
            .with_vars(Vars::explicit(["foo"]));
        let chunks = ChunkScheme::from_raw([("x", 2)]).unwrap();
        let result = split_all(key, ds, &chunks);
        assert_eq!(2, result.len());
        for ((key, _), x) in result.iter().zip([4, 6]) {
            assert_eq!(x, key.offset("x"));
            assert_eq!(6, key.offset("y"));
            assert_eq!(&Vars::explicit(["foo"]), key.vars());
        }
    }

    #[test]
    fn split_cartesian_product() {
        let ds = test_utils::arange_dataset(&[("x", 4), ("y", 4)]);
        let chunks = ChunkScheme::from_raw([("x", 2), ("y", 3)]).unwrap();
        let result = split_all(Key::new(), ds, &chunks);
        let offsets: Vec<(usize, usize)> = result
            .iter()
            .map(|(key, _)| (key.offset("x"), key.offset("y")))
            .collect();
        assert_eq!(vec![(0, 0), (0, 3), (2, 0), (2, 3)], offsets);
        let sizes = result[1].1.sizes();
        assert_eq!(Some(&2), sizes.get("x"));
        assert_eq!(Some(&1), sizes.get("y"));
    }

    #[test]
    fn split_aligns_to_global_grid() {
        let ds = test_utils::arange_dataset(&[("x", 4)]);
        let key = Key::from_offsets([("x", 4)]).unwrap();
        let chunks = ChunkScheme::from_raw([("x", 5)]).unwrap();
        let result = split_all(key, ds, &chunks);
        assert_eq!(2, result.len());
        assert_eq!(4, result[0].0.offset("x"));
        assert_eq!(5, result[1].0.offset("x"));
        assert_eq!(
            &array![1, 2, 3].into_dyn(),
            result[1].1.variable("foo").unwrap().data()
        );
    }

    #[test]
    fn split_full_is_noop() {
        let ds = test_utils::arange_dataset(&[("x", 4)]);
        let chunks = ChunkScheme::from_raw([("x", -1)]).unwrap();
        let result = split_all(Key::new(), ds.clone(), &chunks);
        assert_eq!(vec![(Key::new(), ds)], result);
    }

    #[test]
    fn split_larger_than_chunk_sets_offset() {
        let ds = test_utils::arange_dataset(&[("x", 4)]);
        let chunks = ChunkScheme::from_raw([("x", 10)]).unwrap();
        let result = split_all(Key::new(), ds.clone(), &chunks);
        assert_eq!(1, result.len());
        assert_eq!(Some(&0), result[0].0.offsets().get("x"));
        assert_eq!(ds, result[0].1);
    }

    #[test]
    fn split_zero_length_rejected() {
        let err = ChunkScheme::from_raw([("x", 0)]).unwrap_err();
        assert_eq!(ErrorCode::InvalidArgument, err.code());
    }

    #[test]
    fn split_unknown_dim() {
        let ds = test_utils::arange_dataset(&[("x", 4)]);
        let chunks = ChunkScheme::from_raw([("z", 2)]).unwrap();
        let err = split_chunks(Key::new(), ds, &chunks).err().unwrap();
        assert_eq!(ErrorCode::InvalidArgument, err.code());
    }

    #[test]
    fn split_variables_one_per_var() {
        let ds = test_utils::two_variable_dataset(&[("x", 4)]);
        let key = Key::from_offsets([("x", 8)]).unwrap();
        let result = split_variables(key, ds).unwrap();
        assert_eq!(2, result.len());
        assert_eq!(&Vars::explicit(["bar"]), result[0].0.vars());
        assert_eq!(&Vars::explicit(["foo"]), result[1].0.vars());
        assert_eq!(8, result[1].0.offset("x"));
        assert_eq!(
            BTreeSet::from(["foo".to_string()]),
            result[1].1.variables()
        );
    }
}
