//! Creating keyed chunk collections from in-memory datasets.

use crate::array::LabeledArray;
use crate::error::RechunkError;
use crate::key::Key;
use crate::models::ChunkScheme;
use crate::split::{split_chunks, split_variables};

use tracing::debug;

/// Cut an in-memory dataset into keyed chunks.
///
/// With `split_vars`, every variable becomes its own set of chunks, chunked only along the
/// dimensions that variable has. Otherwise all variables share chunks.
///
/// # Errors
///
/// Returns [RechunkError::InvalidArgument] if the scheme names a dimension the dataset does not
/// have.
pub fn dataset_to_chunks<C: LabeledArray>(
    dataset: &C,
    chunks: &ChunkScheme,
    split_vars: bool,
) -> Result<Vec<(Key, C)>, RechunkError> {
    let sizes = dataset.sizes();
    if let Some(dim) = chunks.dims().find(|dim| !sizes.contains_key(*dim)) {
        return Err(RechunkError::invalid_argument(format!(
            "cannot chunk along {}: dataset has dimensions {:?}",
            dim,
            sizes.keys().collect::<Vec<_>>()
        )));
    }

    let records = if split_vars {
        let mut records = Vec::new();
        for (key, variable) in split_variables(Key::new(), dataset.clone())? {
            let own = variable.sizes();
            let own_chunks: ChunkScheme = chunks
                .iter()
                .filter(|(dim, _)| own.contains_key(*dim))
                .map(|(dim, size)| (dim.clone(), *size))
                .collect();
            for record in split_chunks(key, variable, &own_chunks)? {
                records.push(record?);
            }
        }
        records
    } else {
        split_chunks(Key::new(), dataset.clone(), chunks)?.collect::<Result<Vec<_>, _>>()?
    };
    debug!(records = records.len(), split_vars, "chunked dataset");
    Ok(records)
}
