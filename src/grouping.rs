//! Grouping chunks for consolidation.
//!
//! Records that consolidate into one output chunk share a consolidation key: their key with
//! the offsets along consolidated dimensions either removed (whole-extent consolidation) or
//! rounded down to the start of the target chunk. Grouping by this key with an engine shuffle
//! delivers each group of contiguous records to a single task.

use crate::array::LabeledArray;
use crate::consolidate::consolidate_chunks;
use crate::error::RechunkError;
use crate::key::Key;
use crate::models::{ChunkScheme, ChunkSize};

/// Returns the key shared by all records that consolidate into the same output chunk.
///
/// Offsets along dimensions set to [ChunkSize::Full] are removed. Offsets along dimensions
/// set to a length are rounded down to a multiple of it. Other offsets and the variable subset
/// are retained.
pub fn consolidation_key(key: &Key, chunks: &ChunkScheme) -> Key {
    chunks
        .iter()
        .fold(key.clone(), |consolidated, (dim, size)| match size {
            ChunkSize::Full => consolidated.with_offset(dim, None),
            ChunkSize::Len(len) => {
                let len = len.get();
                let offset = key.offset(dim) / len * len;
                consolidated.with_offset(dim, Some(offset))
            }
        })
}

/// Consolidate one group of records sharing `group_key`.
///
/// Along dimensions consolidated to a length, the merged chunk must start at the group's
/// boundary and be no longer than the length.
///
/// # Errors
///
/// Returns [RechunkError::FailedPrecondition] if the group is not a consistent tiling or does
/// not fit the requested chunks.
pub fn consolidate_group<C: LabeledArray>(
    group_key: &Key,
    group: Vec<(Key, C)>,
    chunks: &ChunkScheme,
) -> Result<(Key, C), RechunkError> {
    let (key, chunk) = consolidate_chunks(group)?;
    let sizes = chunk.sizes();
    for (dim, size) in chunks.iter() {
        let ChunkSize::Len(len) = *size else {
            continue;
        };
        let len = len.get();
        let start = key.offset(dim);
        if start != group_key.offset(dim) {
            return Err(RechunkError::failed_precondition(format!(
                "consolidated chunk {} does not start on a multiple of {} along {}",
                key, len, dim
            )));
        }
        if let Some(&extent) = sizes.get(dim) {
            if extent > len {
                return Err(RechunkError::failed_precondition(format!(
                    "consolidated chunk {} has length {} along {}, more than {}",
                    key, extent, dim, len
                )));
            }
        }
    }
    Ok((key, chunk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::key::Vars;
    use crate::test_utils;

    #[test]
    fn key_full_removes_offset() {
        let key = Key::from_offsets([("x", 4), ("y", 2)])
            .unwrap()
            .with_vars(Vars::explicit(["foo"]));
        let chunks = ChunkScheme::from_raw([("x", -1)]).unwrap();
        let expected = Key::from_offsets([("y", 2)])
            .unwrap()
            .with_vars(Vars::explicit(["foo"]));
        let consolidated = consolidation_key(&key, &chunks);
        assert_eq!(expected, consolidated);
        assert!(!consolidated.offsets().contains_key("x"));
    }

    #[test]
    fn key_len_rounds_down() {
        let chunks = ChunkScheme::from_raw([("x", 5)]).unwrap();
        for (offset, expected) in [(0, 0), (4, 0), (5, 5), (9, 5), (10, 10)] {
            let key = Key::from_offsets([("x", offset)]).unwrap();
            assert_eq!(expected, consolidation_key(&key, &chunks).offset("x"));
        }
    }

    #[test]
    fn group_within_bounds() {
        let ds = test_utils::arange_dataset(&[("x", 10)]);
        let records = test_utils::chunk_dataset(&ds, &ChunkScheme::from_raw([("x", 2)]).unwrap());
        let chunks = ChunkScheme::from_raw([("x", 10)]).unwrap();
        let (key, result) = consolidate_group(&Key::new(), records, &chunks).unwrap();
        assert_eq!(Key::new(), key);
        assert_eq!(ds, result);
    }

    #[test]
    fn group_too_long() {
        let ds = test_utils::arange_dataset(&[("x", 8)]);
        let records = test_utils::chunk_dataset(&ds, &ChunkScheme::from_raw([("x", 4)]).unwrap());
        let chunks = ChunkScheme::from_raw([("x", 5)]).unwrap();
        let err = consolidate_group(&Key::new(), records, &chunks).unwrap_err();
        assert_eq!(ErrorCode::FailedPrecondition, err.code());
    }

    #[test]
    fn group_misaligned() {
        let ds = test_utils::arange_dataset(&[("x", 4)]);
        let key = Key::from_offsets([("x", 3)]).unwrap();
        let chunks = ChunkScheme::from_raw([("x", 5)]).unwrap();
        let err = consolidate_group(&Key::new(), vec![(key, ds)], &chunks).unwrap_err();
        assert_eq!(ErrorCode::FailedPrecondition, err.code());
    }
}
