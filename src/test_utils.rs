use crate::array::Dataset;
use crate::key::Key;
use crate::models::ChunkScheme;
use crate::split::split_chunks;

use ndarray::{Array, ArrayD, IxDyn};

/// Create an array of consecutive integers with the given dimension extents.
fn arange(sizes: &[(&str, usize)], scale: i32) -> ArrayD<i32> {
    let shape: Vec<usize> = sizes.iter().map(|(_, size)| *size).collect();
    let len: usize = shape.iter().product();
    Array::from_iter((0..len as i32).map(|value| value * scale))
        .into_shape(IxDyn(&shape))
        .unwrap()
}

/// Create a Dataset with a single variable `foo` counting up from zero.
pub(crate) fn arange_dataset(sizes: &[(&str, usize)]) -> Dataset<i32> {
    let dims = sizes.iter().map(|(dim, _)| *dim);
    Dataset::new()
        .with_variable("foo", dims, arange(sizes, 1))
        .unwrap()
}

/// Create a Dataset with variables `foo` and `bar` sharing all dimensions.
pub(crate) fn two_variable_dataset(sizes: &[(&str, usize)]) -> Dataset<i32> {
    let dims = sizes.iter().map(|(dim, _)| *dim);
    arange_dataset(sizes)
        .with_variable("bar", dims, arange(sizes, -10))
        .unwrap()
}

/// Cut a whole Dataset into keyed chunks.
pub(crate) fn chunk_dataset(ds: &Dataset<i32>, chunks: &ChunkScheme) -> Vec<(Key, Dataset<i32>)> {
    split_chunks(Key::new(), ds.clone(), chunks)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}
