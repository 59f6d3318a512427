//! Chunk keys.
//!
//! A [Key] identifies where one physical chunk sits within a virtual dataset: its starting
//! offset along each chunked dimension and the subset of variables it holds. Keys are used as
//! shuffle keys, so equality, hashing and the canonical encoding produced by a [KeyCoder] must
//! not depend on how a key was built.

use crate::error::RechunkError;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

/// The variables held by a chunk.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vars {
    /// Every variable of the virtual dataset
    #[default]
    All,
    /// Exactly this subset of variables
    Explicit(BTreeSet<String>),
}

impl Vars {
    /// Returns a Vars holding exactly the given names.
    pub fn explicit<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Explicit(names.into_iter().map(Into::into).collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl From<Option<BTreeSet<String>>> for Vars {
    fn from(vars: Option<BTreeSet<String>>) -> Self {
        match vars {
            Some(vars) => Self::Explicit(vars),
            None => Self::All,
        }
    }
}

impl From<BTreeSet<String>> for Vars {
    fn from(vars: BTreeSet<String>) -> Self {
        Self::Explicit(vars)
    }
}

impl fmt::Display for Vars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Explicit(vars) => {
                write!(f, "{{")?;
                for (i, var) in vars.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", var)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Address of one chunk within a virtual dataset.
///
/// Dimensions absent from the offsets have offset 0. Equality, hashing and ordering ignore
/// zero-valued offsets, so `{x: 0}` and `{}` address the same chunk.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Key {
    offsets: BTreeMap<String, usize>,
    #[serde(default)]
    vars: Vars,
}

/// Converts a signed offset into a valid one.
fn check_offset(dim: &str, offset: i64) -> Result<usize, RechunkError> {
    usize::try_from(offset).map_err(|_| {
        RechunkError::invalid_argument(format!(
            "offset for dimension {} must not be negative, got {}",
            dim, offset
        ))
    })
}

impl Key {
    /// Returns a key at the origin holding all variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a key with the given offsets, holding all variables.
    ///
    /// # Errors
    ///
    /// Returns [RechunkError::InvalidArgument] if any offset is negative.
    pub fn from_offsets<I, S>(offsets: I) -> Result<Self, RechunkError>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self::new().with_offsets(offsets.into_iter().map(|(dim, offset)| (dim, Some(offset))))
    }

    /// Returns a copy of this key with offsets updated entry by entry.
    ///
    /// `None` removes the dimension (offset 0, unchunked). Dimensions not mentioned are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [RechunkError::InvalidArgument] if any supplied offset is negative.
    pub fn with_offsets<I, S>(&self, offsets: I) -> Result<Self, RechunkError>
    where
        I: IntoIterator<Item = (S, Option<i64>)>,
        S: Into<String>,
    {
        let mut new_offsets = self.offsets.clone();
        for (dim, offset) in offsets {
            let dim = dim.into();
            match offset {
                Some(offset) => {
                    let offset = check_offset(&dim, offset)?;
                    new_offsets.insert(dim, offset);
                }
                None => {
                    new_offsets.remove(&dim);
                }
            }
        }
        Ok(Self {
            offsets: new_offsets,
            vars: self.vars.clone(),
        })
    }

    /// Returns a copy of this key with one offset replaced or removed.
    pub(crate) fn with_offset(&self, dim: &str, offset: Option<usize>) -> Self {
        let mut key = self.clone();
        match offset {
            Some(offset) => key.offsets.insert(dim.to_string(), offset),
            None => key.offsets.remove(dim),
        };
        key
    }

    /// Returns a copy of this key with the variable subset replaced.
    ///
    /// `None` means all variables.
    pub fn with_vars(&self, vars: impl Into<Vars>) -> Self {
        Self {
            offsets: self.offsets.clone(),
            vars: vars.into(),
        }
    }

    /// Offsets as stored, including any explicit zeros.
    pub fn offsets(&self) -> &BTreeMap<String, usize> {
        &self.offsets
    }

    /// Returns the offset along a dimension, 0 if absent.
    pub fn offset(&self, dim: &str) -> usize {
        self.offsets.get(dim).copied().unwrap_or(0)
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    /// Offsets with zero-valued entries dropped.
    pub fn canonical_offsets(&self) -> impl Iterator<Item = (&String, &usize)> + Clone {
        self.offsets.iter().filter(|(_, offset)| **offset != 0)
    }

    /// Returns this key in canonical form, with zero-valued offsets dropped.
    pub fn canonical(&self) -> Self {
        Self {
            offsets: self
                .canonical_offsets()
                .map(|(dim, offset)| (dim.clone(), *offset))
                .collect(),
            vars: self.vars.clone(),
        }
    }

    /// Returns the index ranges within the virtual dataset covered by a chunk with this key.
    ///
    /// # Arguments
    ///
    /// * `sizes`: Extent of the chunk along each of its dimensions
    ///
    /// # Errors
    ///
    /// Returns [RechunkError::InvalidArgument] if the key has an offset along a dimension the
    /// chunk does not have.
    pub fn region(
        &self,
        sizes: &BTreeMap<String, usize>,
    ) -> Result<BTreeMap<String, Range<usize>>, RechunkError> {
        if let Some((dim, _)) = self
            .canonical_offsets()
            .find(|(dim, _)| !sizes.contains_key(*dim))
        {
            return Err(RechunkError::invalid_argument(format!(
                "key {} has an offset for dimension {} which the chunk does not have",
                self, dim
            )));
        }
        Ok(sizes
            .iter()
            .map(|(dim, size)| {
                let start = self.offset(dim);
                (dim.clone(), start..start + size)
            })
            .collect())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_offsets().eq(other.canonical_offsets()) && self.vars == other.vars
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (dim, offset) in self.canonical_offsets() {
            dim.hash(state);
            offset.hash(state);
        }
        self.vars.hash(state);
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_offsets()
            .cmp(other.canonical_offsets())
            .then_with(|| self.vars.cmp(&other.vars))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(offsets={{")?;
        for (i, (dim, offset)) in self.offsets.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", dim, offset)?;
        }
        write!(f, "}}, vars={})", self.vars)
    }
}

/// Encodes keys to the canonical bytes used for shuffling.
///
/// Implementations must encode equal keys to identical bytes. A coder is handed to an
/// [Engine](crate::engine::Engine) when it is constructed.
pub trait KeyCoder: Send + Sync {
    /// Encode a key.
    fn encode(&self, key: &Key) -> Result<Vec<u8>, RechunkError>;

    /// Decode a key previously produced by `encode`.
    fn decode(&self, bytes: &[u8]) -> Result<Key, RechunkError>;
}

/// JSON encoding of the canonical form of a key.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonKeyCoder;

impl KeyCoder for JsonKeyCoder {
    fn encode(&self, key: &Key) -> Result<Vec<u8>, RechunkError> {
        Ok(serde_json::to_vec(&key.canonical())?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Key, RechunkError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    use serde_test::{assert_tokens, Token};
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(key: &Key) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn new_key_is_origin_all_vars() {
        let key = Key::new();
        assert!(key.offsets().is_empty());
        assert!(key.vars().is_all());
        assert_eq!(0, key.offset("x"));
    }

    #[test]
    fn from_offsets_negative() {
        let err = Key::from_offsets([("x", -1)]).unwrap_err();
        assert_eq!(ErrorCode::InvalidArgument, err.code());
    }

    #[test]
    fn with_offsets_updates_entries() {
        let key = Key::from_offsets([("x", 1), ("y", 2)]).unwrap();
        let updated = key.with_offsets([("x", Some(3))]).unwrap();
        assert_eq!(3, updated.offset("x"));
        assert_eq!(2, updated.offset("y"));
        // The receiver is untouched.
        assert_eq!(1, key.offset("x"));
    }

    #[test]
    fn with_offsets_none_removes() {
        let key = Key::from_offsets([("x", 4), ("y", 2)]).unwrap();
        let updated = key.with_offsets([("x", None::<i64>)]).unwrap();
        assert!(!updated.offsets().contains_key("x"));
        assert_eq!(2, updated.offset("y"));
    }

    #[test]
    fn with_offsets_negative() {
        let key = Key::new();
        let err = key.with_offsets([("x", Some(-5))]).unwrap_err();
        assert_eq!(ErrorCode::InvalidArgument, err.code());
    }

    #[test]
    fn remove_then_set_equals_direct() {
        let key = Key::from_offsets([("x", 2), ("y", 7)]).unwrap();
        let updated = key
            .with_offsets([("x", None)])
            .unwrap()
            .with_offsets([("x", Some(5))])
            .unwrap();
        assert_eq!(Key::from_offsets([("x", 5), ("y", 7)]).unwrap(), updated);
        assert_eq!(7, updated.offset("y"));
    }

    #[test]
    fn with_vars() {
        let key = Key::from_offsets([("x", 2)]).unwrap();
        let names: BTreeSet<String> = ["foo".to_string()].into();
        let explicit = key.with_vars(names.clone());
        assert_eq!(&Vars::Explicit(names), explicit.vars());
        assert_eq!(2, explicit.offset("x"));
        let all = explicit.with_vars(None::<BTreeSet<String>>);
        assert!(all.vars().is_all());
        assert_eq!(key, all);
    }

    #[test]
    fn zero_offsets_are_ignored_by_equality() {
        let a = Key::from_offsets([("x", 0), ("y", 3)]).unwrap();
        let b = Key::from_offsets([("y", 3)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(Ordering::Equal, a.cmp(&b));
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = Key::from_offsets([("x", 1), ("y", 3)]).unwrap();
        let b = Key::from_offsets([("y", 3), ("x", 1)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn vars_distinguish_keys() {
        let a = Key::new();
        let b = Key::new().with_vars(Vars::explicit(["foo"]));
        let c = Key::new().with_vars(Vars::explicit(["bar"]));
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(b, Key::new().with_vars(Vars::explicit(["foo"])));
    }

    #[test]
    fn ordering_by_offsets() {
        let a = Key::from_offsets([("x", 0)]).unwrap();
        let b = Key::from_offsets([("x", 4)]).unwrap();
        let c = Key::from_offsets([("x", 8)]).unwrap();
        let mut keys = vec![c.clone(), a.clone(), b.clone()];
        keys.sort();
        assert_eq!(vec![a, b, c], keys);
    }

    #[test]
    fn display() {
        let key = Key::from_offsets([("y", 0), ("x", 4)])
            .unwrap()
            .with_vars(Vars::explicit(["foo", "bar"]));
        assert_eq!("Key(offsets={x: 4, y: 0}, vars={bar, foo})", key.to_string());
        assert_eq!("Key(offsets={}, vars=all)", Key::new().to_string());
    }

    #[test]
    fn region() {
        let key = Key::from_offsets([("x", 4)]).unwrap();
        let sizes = BTreeMap::from([("x".to_string(), 4), ("y".to_string(), 2)]);
        let region = key.region(&sizes).unwrap();
        assert_eq!(Some(&(4..8)), region.get("x"));
        assert_eq!(Some(&(0..2)), region.get("y"));
    }

    #[test]
    fn region_unknown_dim() {
        let key = Key::from_offsets([("z", 1)]).unwrap();
        let sizes = BTreeMap::from([("x".to_string(), 4)]);
        assert_eq!(
            ErrorCode::InvalidArgument,
            key.region(&sizes).unwrap_err().code()
        );
    }

    #[test]
    fn key_tokens() {
        let key = Key::from_offsets([("x", 4)]).unwrap();
        assert_tokens(
            &key,
            &[
                Token::Struct {
                    name: "Key",
                    len: 2,
                },
                Token::Str("offsets"),
                Token::Map { len: Some(1) },
                Token::Str("x"),
                Token::U64(4),
                Token::MapEnd,
                Token::Str("vars"),
                Token::UnitVariant {
                    name: "Vars",
                    variant: "all",
                },
                Token::StructEnd,
            ],
        );
    }

    #[test]
    fn json_coder_is_canonical() {
        let coder = JsonKeyCoder;
        let a = Key::from_offsets([("y", 0), ("x", 4)]).unwrap();
        let b = Key::from_offsets([("x", 4)]).unwrap();
        assert_eq!(coder.encode(&a).unwrap(), coder.encode(&b).unwrap());
        assert_eq!(
            br#"{"offsets":{"x":4},"vars":"all"}"#.to_vec(),
            coder.encode(&a).unwrap()
        );
    }

    #[test]
    fn json_coder_decode() {
        let coder = JsonKeyCoder;
        let key = Key::from_offsets([("x", 4), ("t", 0)])
            .unwrap()
            .with_vars(Vars::explicit(["foo"]));
        let decoded = coder.decode(&coder.encode(&key).unwrap()).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn json_coder_decode_rejects_negative_offsets() {
        let coder = JsonKeyCoder;
        let err = coder
            .decode(br#"{"offsets":{"x":-4},"vars":"all"}"#)
            .unwrap_err();
        assert_eq!(ErrorCode::InvalidArgument, err.code());
    }
}
