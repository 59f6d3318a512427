//! Labeled arrays and the [LabeledArray] contract.
//!
//! The splitting and consolidation logic only needs a handful of operations from the in-memory
//! array type: named sizes, rectangular slicing, concatenation along one named dimension,
//! merging of variables and byte size. [Dataset] provides these over [ndarray] arrays.

use crate::error::RechunkError;

use ndarray::{ArrayD, ArrayViewD, Axis, Slice};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// Trait for array elements.
pub trait Element:
    Clone + Copy + PartialEq + num_traits::Zero + std::fmt::Debug + Send + Sync + 'static
{
}

/// Blanket implementation of Element.
impl<T> Element for T where
    T: Clone + Copy + PartialEq + num_traits::Zero + std::fmt::Debug + Send + Sync + 'static
{
}

/// Operations required of the in-memory labeled array type.
///
/// Implementations must be pure: each method returns a new value and leaves `self` untouched.
pub trait LabeledArray: Clone + Send + Sync + Sized + 'static {
    /// Extent along each named dimension.
    fn sizes(&self) -> BTreeMap<String, usize>;

    /// Names of the variables held.
    fn variables(&self) -> BTreeSet<String>;

    /// Returns the rectangular sub-block given by index ranges per dimension.
    ///
    /// Dimensions not named are taken whole.
    fn isel(&self, ranges: &BTreeMap<String, Range<usize>>) -> Result<Self, RechunkError>;

    /// Returns only the named variables.
    fn select_variables(&self, names: &BTreeSet<String>) -> Result<Self, RechunkError>;

    /// Concatenates blocks along one dimension, in the order given.
    fn concat(parts: Vec<Self>, dim: &str) -> Result<Self, RechunkError>;

    /// Merges blocks holding disjoint variables over the same index ranges.
    fn merge(parts: Vec<Self>) -> Result<Self, RechunkError>;

    /// Total size of the data in bytes.
    fn nbytes(&self) -> usize;
}

/// A named n-dimensional array.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable<T> {
    dims: Vec<String>,
    data: ArrayD<T>,
}

impl<T: Element> Variable<T> {
    /// Returns a new Variable.
    ///
    /// # Errors
    ///
    /// Returns [RechunkError::InvalidArgument] if the number of dimension names does not match
    /// the dimensionality of the data, or a name is repeated.
    pub fn new<S: Into<String>>(
        dims: impl IntoIterator<Item = S>,
        data: ArrayD<T>,
    ) -> Result<Self, RechunkError> {
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        if dims.len() != data.ndim() {
            return Err(RechunkError::invalid_argument(format!(
                "{} dimension names given for an array with {} dimensions",
                dims.len(),
                data.ndim()
            )));
        }
        let unique: BTreeSet<&String> = dims.iter().collect();
        if unique.len() != dims.len() {
            return Err(RechunkError::invalid_argument(format!(
                "repeated dimension name in {:?}",
                dims
            )));
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn data(&self) -> &ArrayD<T> {
        &self.data
    }

    /// Returns the axis index of a dimension.
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Returns the extent along each dimension.
    pub fn sizes(&self) -> impl Iterator<Item = (&String, usize)> {
        self.dims.iter().zip(self.data.shape().iter().copied())
    }

    fn isel(&self, ranges: &BTreeMap<String, Range<usize>>) -> Result<Self, RechunkError> {
        let mut view = self.data.view();
        for (axis, dim) in self.dims.iter().enumerate() {
            if let Some(range) = ranges.get(dim) {
                let length = view.len_of(Axis(axis));
                if range.start > range.end || range.end > length {
                    return Err(RechunkError::invalid_argument(format!(
                        "range {:?} out of bounds for dimension {} of length {}",
                        range, dim, length
                    )));
                }
                view.slice_axis_inplace(
                    Axis(axis),
                    Slice::from(range.start as isize..range.end as isize),
                );
            }
        }
        Ok(Self {
            dims: self.dims.clone(),
            data: view.to_owned(),
        })
    }
}

/// A collection of variables sharing named dimensions.
///
/// All variables using a dimension have the same extent along it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset<T> {
    variables: BTreeMap<String, Variable<T>>,
}

impl<T: Element> Dataset<T> {
    /// Returns a new, empty Dataset.
    pub fn new() -> Self {
        Self {
            variables: BTreeMap::new(),
        }
    }

    /// Returns this dataset with a variable added.
    ///
    /// # Errors
    ///
    /// Returns [RechunkError::InvalidArgument] if the variable is not valid, or disagrees with
    /// existing variables on the extent of a shared dimension.
    pub fn with_variable<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        dims: impl IntoIterator<Item = S>,
        data: ArrayD<T>,
    ) -> Result<Self, RechunkError> {
        let variable = Variable::new(dims, data)?;
        self.insert(name.into(), variable)?;
        Ok(self)
    }

    fn insert(&mut self, name: String, variable: Variable<T>) -> Result<(), RechunkError> {
        let sizes = self.sizes();
        for (dim, size) in variable.sizes() {
            if let Some(existing) = sizes.get(dim) {
                if *existing != size {
                    return Err(RechunkError::invalid_argument(format!(
                        "variable {} has extent {} along {} but the dataset has {}",
                        name, size, dim, existing
                    )));
                }
            }
        }
        self.variables.insert(name, variable);
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable<T>> {
        self.variables.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable<T>)> {
        self.variables.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Concatenate the arrays of one variable along an axis.
fn concat_variable<T: Element>(
    name: &str,
    parts: &[&Variable<T>],
    dim: &str,
) -> Result<Variable<T>, RechunkError> {
    let first = parts[0];
    if let Some(part) = parts.iter().find(|part| part.dims != first.dims) {
        return Err(RechunkError::failed_precondition(format!(
            "variable {} has dimensions {:?} and {:?} in different chunks",
            name, first.dims, part.dims
        )));
    }
    match first.axis_of(dim) {
        Some(axis) => {
            let views: Vec<ArrayViewD<T>> = parts.iter().map(|part| part.data.view()).collect();
            let data = ndarray::concatenate(Axis(axis), &views).map_err(|err| {
                RechunkError::failed_precondition(format!(
                    "cannot concatenate variable {} along {}: {}",
                    name, dim, err
                ))
            })?;
            Ok(Variable {
                dims: first.dims.clone(),
                data,
            })
        }
        // Variables without the concatenation dimension must agree in every chunk.
        None => {
            if parts.iter().any(|part| part.data != first.data) {
                return Err(RechunkError::failed_precondition(format!(
                    "variable {} lacks dimension {} but differs between chunks",
                    name, dim
                )));
            }
            Ok(first.clone())
        }
    }
}

impl<T: Element> LabeledArray for Dataset<T> {
    fn sizes(&self) -> BTreeMap<String, usize> {
        self.variables
            .values()
            .flat_map(|variable| variable.sizes())
            .map(|(dim, size)| (dim.clone(), size))
            .collect()
    }

    fn variables(&self) -> BTreeSet<String> {
        self.variables.keys().cloned().collect()
    }

    fn isel(&self, ranges: &BTreeMap<String, Range<usize>>) -> Result<Self, RechunkError> {
        let sizes = self.sizes();
        if let Some(dim) = ranges.keys().find(|dim| !sizes.contains_key(*dim)) {
            return Err(RechunkError::invalid_argument(format!(
                "dataset has no dimension {}",
                dim
            )));
        }
        let variables = self
            .variables
            .iter()
            .map(|(name, variable)| Ok((name.clone(), variable.isel(ranges)?)))
            .collect::<Result<_, RechunkError>>()?;
        Ok(Self { variables })
    }

    fn select_variables(&self, names: &BTreeSet<String>) -> Result<Self, RechunkError> {
        names
            .iter()
            .map(|name| match self.variables.get(name) {
                Some(variable) => Ok((name.clone(), variable.clone())),
                None => Err(RechunkError::invalid_argument(format!(
                    "dataset has no variable {}",
                    name
                ))),
            })
            .collect::<Result<_, _>>()
            .map(|variables| Self { variables })
    }

    fn concat(parts: Vec<Self>, dim: &str) -> Result<Self, RechunkError> {
        let first = parts.first().ok_or_else(|| {
            RechunkError::failed_precondition("cannot concatenate zero chunks".to_string())
        })?;
        if parts.len() == 1 {
            return Ok(first.clone());
        }
        let names = first.variables();
        if let Some(part) = parts.iter().find(|part| part.variables() != names) {
            return Err(RechunkError::failed_precondition(format!(
                "cannot concatenate chunks with variables {:?} and {:?}",
                names,
                part.variables()
            )));
        }
        let mut result = Self::new();
        for name in names {
            let variables: Vec<&Variable<T>> =
                parts.iter().map(|part| &part.variables[&name]).collect();
            let variable = concat_variable(&name, &variables, dim)?;
            result.insert(name, variable).map_err(|err| {
                RechunkError::failed_precondition(format!("inconsistent chunk extents: {}", err))
            })?;
        }
        Ok(result)
    }

    fn merge(parts: Vec<Self>) -> Result<Self, RechunkError> {
        let mut result = Self::new();
        for part in parts {
            for (name, variable) in part.variables {
                if result.variables.contains_key(&name) {
                    return Err(RechunkError::failed_precondition(format!(
                        "variable {} is present in more than one chunk",
                        name
                    )));
                }
                result.insert(name, variable).map_err(|err| {
                    RechunkError::failed_precondition(format!(
                        "inconsistent chunk extents: {}",
                        err
                    ))
                })?;
            }
        }
        Ok(result)
    }

    fn nbytes(&self) -> usize {
        self.variables
            .values()
            .map(|variable| variable.data.len() * std::mem::size_of::<T>())
            .sum()
    }
}
