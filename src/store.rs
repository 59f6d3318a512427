//! Writing keyed chunks to rectangular storage.

use crate::array::{Dataset, Element, LabeledArray};
use crate::error::RechunkError;
use crate::key::Key;

use ndarray::{ArrayD, AxisDescription, Slice};
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::debug;

/// Sink writing each chunk to its rectangular position in a larger array.
pub trait ChunkWriter<C> {
    /// Write one chunk at the position given by its key.
    fn write(&mut self, key: &Key, chunk: &C) -> Result<(), RechunkError>;

    /// Write a collection of chunks, stopping at the first error.
    fn write_all<'a, I>(&mut self, records: I) -> Result<(), RechunkError>
    where
        I: IntoIterator<Item = &'a (Key, C)>,
        C: 'a,
    {
        for (key, chunk) in records {
            self.write(key, chunk)?;
        }
        Ok(())
    }
}

/// Destination array for one variable, with a mask of written elements.
struct Buffer<T> {
    dims: Vec<String>,
    data: ArrayD<T>,
    written: ArrayD<bool>,
}

/// In-memory store with the layout of a template dataset.
///
/// Every element may be written once. Use [MemoryStore::finish] to check the store is complete
/// and retrieve the dataset.
pub struct MemoryStore<T> {
    variables: BTreeMap<String, Buffer<T>>,
}

impl<T: Element> MemoryStore<T> {
    /// Returns an empty store with the variables, dimensions and extents of `template`.
    pub fn from_template(template: &Dataset<T>) -> Self {
        let variables = template
            .iter()
            .map(|(name, variable)| {
                let shape = variable.data().shape();
                let buffer = Buffer {
                    dims: variable.dims().to_vec(),
                    data: ArrayD::zeros(shape),
                    written: ArrayD::from_elem(shape, false),
                };
                (name.clone(), buffer)
            })
            .collect();
        Self { variables }
    }

    /// Number of elements written so far, across all variables.
    pub fn written(&self) -> usize {
        self.variables
            .values()
            .map(|buffer| buffer.written.iter().filter(|w| **w).count())
            .sum()
    }

    /// Returns the stored dataset.
    ///
    /// # Errors
    ///
    /// Returns [RechunkError::FailedPrecondition] if any element was never written.
    pub fn finish(self) -> Result<Dataset<T>, RechunkError> {
        let mut dataset = Dataset::new();
        for (name, buffer) in self.variables {
            let missing = buffer.written.iter().filter(|w| !**w).count();
            if missing > 0 {
                return Err(RechunkError::failed_precondition(format!(
                    "{} elements of variable {} were never written",
                    missing, name
                )));
            }
            dataset = dataset.with_variable(name, buffer.dims, buffer.data)?;
        }
        Ok(dataset)
    }
}

/// Index ranges of a chunk within one variable of the store.
fn buffer_ranges(
    name: &str,
    buffer: &Buffer<impl Element>,
    region: &BTreeMap<String, Range<usize>>,
    dims: &[String],
) -> Result<Vec<Range<usize>>, RechunkError> {
    if dims != buffer.dims.as_slice() {
        return Err(RechunkError::invalid_argument(format!(
            "variable {} has dimensions {:?} in the chunk but {:?} in the store",
            name, dims, buffer.dims
        )));
    }
    buffer
        .dims
        .iter()
        .zip(buffer.data.shape())
        .map(|(dim, &extent)| {
            let range = region.get(dim).cloned().unwrap_or(0..extent);
            if range.end > extent {
                return Err(RechunkError::invalid_argument(format!(
                    "chunk covers {:?} along {} but variable {} has extent {}",
                    range, dim, name, extent
                )));
            }
            Ok(range)
        })
        .collect()
}

impl<T: Element> ChunkWriter<Dataset<T>> for MemoryStore<T> {
    fn write(&mut self, key: &Key, chunk: &Dataset<T>) -> Result<(), RechunkError> {
        let region = key.region(&chunk.sizes())?;

        // Check every variable before writing any, so a failed write leaves the store unchanged.
        let mut writes = Vec::new();
        for (name, variable) in chunk.iter() {
            let buffer = self.variables.get(name).ok_or_else(|| {
                RechunkError::invalid_argument(format!("store has no variable {}", name))
            })?;
            let ranges = buffer_ranges(name, buffer, &region, variable.dims())?;
            let slice = |ax: AxisDescription| Slice::from(ranges[ax.axis.index()].clone());
            if buffer.written.slice_each_axis(slice).iter().any(|w| *w) {
                return Err(RechunkError::failed_precondition(format!(
                    "chunk {} overlaps data already written to variable {}",
                    key, name
                )));
            }
            writes.push((name, variable, ranges));
        }

        for (name, variable, ranges) in writes {
            if let Some(buffer) = self.variables.get_mut(name) {
                let slice = |ax: AxisDescription| Slice::from(ranges[ax.axis.index()].clone());
                buffer
                    .data
                    .slice_each_axis_mut(slice)
                    .assign(variable.data());
                buffer.written.slice_each_axis_mut(slice).fill(true);
            }
        }
        debug!(%key, "wrote chunk");
        Ok(())
    }
}
