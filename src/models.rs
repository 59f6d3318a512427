//! Data types and associated functions and methods

use crate::error::RechunkError;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::str::FromStr;
use strum_macros::Display;

/// Supported numerical data types
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// [i32]
    Int32,
    /// [i64]
    Int64,
    /// [u32]
    Uint32,
    /// [u64]
    Uint64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
}

impl DType {
    /// Returns the size of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Int32 => std::mem::size_of::<i32>(),
            Self::Int64 => std::mem::size_of::<i64>(),
            Self::Uint32 => std::mem::size_of::<u32>(),
            Self::Uint64 => std::mem::size_of::<u64>(),
            Self::Float32 => std::mem::size_of::<f32>(),
            Self::Float64 => std::mem::size_of::<f64>(),
        }
    }
}

/// Desired chunk length along one dimension
///
/// In raw (integer) form the sentinel `-1` means the entire extent.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ChunkSize {
    /// Entire extent, unchunked
    Full,
    /// Chunks of at most this many elements
    Len(NonZeroUsize),
}

impl ChunkSize {
    /// Returns a finite chunk length, or `None` if `len` is zero.
    pub fn from_len(len: usize) -> Option<Self> {
        NonZeroUsize::new(len).map(Self::Len)
    }

    /// Returns the concrete chunk length for a dimension of the given extent.
    pub fn resolve(self, extent: usize) -> usize {
        match self {
            Self::Full => extent,
            Self::Len(len) => len.get(),
        }
    }
}

impl TryFrom<i64> for ChunkSize {
    type Error = RechunkError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            -1 => Ok(Self::Full),
            len if len > 0 => usize::try_from(len)
                .ok()
                .and_then(Self::from_len)
                .ok_or_else(|| {
                    RechunkError::invalid_argument(format!("chunk length {} is too large", len))
                }),
            len => Err(RechunkError::invalid_argument(format!(
                "chunk length must be positive or -1, got {}",
                len
            ))),
        }
    }
}

impl From<ChunkSize> for i64 {
    fn from(size: ChunkSize) -> Self {
        match size {
            ChunkSize::Full => -1,
            ChunkSize::Len(len) => len.get() as i64,
        }
    }
}

/// Mapping from dimension name to desired chunk length
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChunkScheme(BTreeMap<String, ChunkSize>);

impl ChunkScheme {
    /// Returns a new, empty ChunkScheme.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a ChunkScheme built from raw lengths, where `-1` means the entire extent.
    ///
    /// # Errors
    ///
    /// Returns [RechunkError::InvalidArgument] if any length is zero or negative (other than
    /// `-1`).
    pub fn from_raw<I, S>(raw: I) -> Result<Self, RechunkError>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        raw.into_iter()
            .map(|(dim, len)| {
                let dim = dim.into();
                ChunkSize::try_from(len)
                    .map(|size| (dim.clone(), size))
                    .map_err(|err| {
                        RechunkError::invalid_argument(format!("dimension {}: {}", dim, err))
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }

    /// Insert a chunk size for a dimension.
    pub fn insert(&mut self, dim: impl Into<String>, size: ChunkSize) {
        self.0.insert(dim.into(), size);
    }

    /// Returns the chunk size for a dimension, if present.
    pub fn get(&self, dim: &str) -> Option<ChunkSize> {
        self.0.get(dim).copied()
    }

    /// Iterate over (dimension, chunk size) pairs in dimension order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ChunkSize)> {
        self.0.iter()
    }

    /// Iterate over dimension names in order.
    pub fn dims(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, ChunkSize)> for ChunkScheme {
    fn from_iter<I: IntoIterator<Item = (String, ChunkSize)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromStr for ChunkScheme {
    type Err = RechunkError;

    /// Parse a scheme of the form `x=4,y=-1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_raw(parse_dim_map(s)?)
    }
}

/// Mapping from dimension name to the total extent of the virtual dataset.
pub type DimSizes = BTreeMap<String, usize>;

/// Parse dataset sizes of the form `x=8,y=2`.
pub fn parse_dim_sizes(s: &str) -> Result<DimSizes, RechunkError> {
    parse_dim_map(s)?
        .into_iter()
        .map(|(dim, size)| {
            usize::try_from(size).map(|size| (dim.clone(), size)).map_err(|_| {
                RechunkError::invalid_argument(format!(
                    "size of dimension {} must not be negative, got {}",
                    dim, size
                ))
            })
        })
        .collect()
}

/// Parse `name=int` pairs separated by commas.
fn parse_dim_map(s: &str) -> Result<Vec<(String, i64)>, RechunkError> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (dim, value) = item.split_once('=').ok_or_else(|| {
                RechunkError::invalid_argument(format!("expected name=value, got {:?}", item))
            })?;
            let dim = dim.trim();
            if dim.is_empty() {
                return Err(RechunkError::invalid_argument(format!(
                    "missing dimension name in {:?}",
                    item
                )));
            }
            let value = value.trim().parse::<i64>().map_err(|_| {
                RechunkError::invalid_argument(format!("expected an integer in {:?}", item))
            })?;
            Ok((dim.to_string(), value))
        })
        .collect()
}
