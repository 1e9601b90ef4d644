#![forbid(unsafe_code)]

use sf_types::{
    DType, Scalar, TypeError, Value, cast_scalar_owned, classify, resolve_column, resolve_scalars,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("position {position} out of bounds for length {len}")]
    IndexOutOfRange { position: i64, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Validate a caller-supplied position against a length.
///
/// Negative positions are rejected rather than counted from the end.
pub fn checked_position(position: i64, len: usize) -> Result<usize, ColumnError> {
    usize::try_from(position)
        .ok()
        .filter(|&pos| pos < len)
        .ok_or(ColumnError::IndexOutOfRange { position, len })
}

/// One resolved column: a type and values already expressed in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
}

impl Column {
    /// Construct a column of a given type, casting every value into it.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let values = values
            .into_iter()
            .map(|value| cast_scalar_owned(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { dtype, values })
    }

    /// Classify raw values and resolve the column type from them.
    pub fn from_values(values: Vec<Value>) -> Result<Self, ColumnError> {
        let (dtype, values) = resolve_column(values)?;
        Ok(Self { dtype, values })
    }

    /// Resolve the column type from already-classified cells.
    #[must_use]
    pub fn from_scalars(values: Vec<Scalar>) -> Self {
        let (dtype, values) = resolve_scalars(values);
        Self { dtype, values }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, position: usize) -> Option<&Scalar> {
        self.values.get(position)
    }

    pub fn get(&self, position: i64) -> Result<&Scalar, ColumnError> {
        let pos = checked_position(position, self.len())?;
        Ok(&self.values[pos])
    }

    /// Overwrite one cell.
    ///
    /// A value that fits the column type is cast and stored in place. One that
    /// does not triggers re-resolution of the whole column with the new value,
    /// which may widen it (`Int64` to `Float64`) or turn it `Object`.
    pub fn set(&mut self, position: i64, value: Value) -> Result<(), ColumnError> {
        let pos = checked_position(position, self.len())?;
        let scalar = classify(value)?;
        match cast_scalar_owned(scalar.clone(), self.dtype) {
            Ok(cast) => self.values[pos] = cast,
            Err(_) => {
                let mut values = self.values.clone();
                values[pos] = scalar;
                *self = Self::from_scalars(values);
            }
        }
        Ok(())
    }

    /// Values at the given positions, in order, keeping this column's type.
    #[must_use]
    pub fn take(&self, positions: &[usize]) -> Self {
        Self {
            dtype: self.dtype,
            values: positions
                .iter()
                .filter_map(|&pos| self.values.get(pos).cloned())
                .collect(),
        }
    }

    /// First `n` values (all of them if `n` exceeds the length).
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self {
            dtype: self.dtype,
            values: self.values.iter().take(n).cloned().collect(),
        }
    }

    /// Per-cell equality against one value.
    #[must_use]
    pub fn eq_scalar(&self, other: &Scalar) -> Vec<bool> {
        self.values
            .iter()
            .map(|value| value.semantic_eq(other))
            .collect()
    }

    /// Stack columns and re-resolve the type across the union of values.
    #[must_use]
    pub fn concat(columns: &[&Self]) -> Self {
        let total = columns.iter().map(|column| column.len()).sum();
        let mut values = Vec::with_capacity(total);
        for column in columns {
            values.extend_from_slice(column.values());
        }
        Self::from_scalars(values)
    }

    /// Value-level equality with NaN == NaN.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.len() == other.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|(a, b)| a.semantic_eq(b))
    }
}
