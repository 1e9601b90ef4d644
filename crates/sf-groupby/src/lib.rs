#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::error::Error;

use sf_columnar::{Column, ColumnError};
use sf_frame::{DataFrame, FrameError};
use sf_index::{Index, IndexLabel};
use sf_types::{Scalar, ScalarKey, Value, nancount, nanmax, nanmean, nanmin, nansum};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupByOptions {
    /// Skip rows whose key is null instead of giving them their own bucket.
    pub dropna: bool,
}

#[derive(Debug, Error)]
pub enum GroupByError {
    #[error("group key column '{0}' not found")]
    KeyNotFound(IndexLabel),
    #[error("no group for key {0}")]
    GroupNotFound(String),
    #[error("apply failed for group {key}: {source}")]
    Apply {
        key: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// What a group-by `apply` callback reduces one bucket to.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupOutput {
    /// One value, placed in output column `0`.
    Scalar(Value),
    /// One row of labelled values.
    Record(Vec<(IndexLabel, Value)>),
}

impl From<Value> for GroupOutput {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

/// Aggregation selector for [`GroupBy::agg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Mean,
    Count,
    Min,
    Max,
    First,
    Last,
    /// Rows per bucket, as a single `size` column.
    Size,
}

impl AggFunc {
    fn numeric_only(self) -> bool {
        matches!(self, Self::Sum | Self::Mean | Self::Min | Self::Max)
    }
}

/// Index label for a group key. Keys that are neither ints nor strings use
/// their display text; the null bucket is labelled `NaN`.
#[must_use]
pub fn key_label(key: &Scalar) -> IndexLabel {
    match key {
        Scalar::Int64(v) => IndexLabel::Int64(*v),
        Scalar::Utf8(v) => IndexLabel::Utf8(v.clone()),
        Scalar::Null => IndexLabel::Utf8("NaN".to_owned()),
        other => IndexLabel::Utf8(other.to_string()),
    }
}

/// Rows of a frame partitioned by the distinct values of one column.
#[derive(Debug, Clone)]
pub struct GroupBy<'a> {
    frame: &'a DataFrame,
    key: IndexLabel,
    keys: Vec<Scalar>,
    buckets: Vec<Vec<usize>>,
}

pub fn groupby(
    frame: &DataFrame,
    key: impl Into<IndexLabel>,
) -> Result<GroupBy<'_>, GroupByError> {
    groupby_with_options(frame, key, GroupByOptions::default())
}

/// Buckets keep first-seen key order; rows keep their order inside a bucket.
pub fn groupby_with_options(
    frame: &DataFrame,
    key: impl Into<IndexLabel>,
    options: GroupByOptions,
) -> Result<GroupBy<'_>, GroupByError> {
    let key = key.into();
    let column = frame
        .column(&key)
        .ok_or_else(|| GroupByError::KeyNotFound(key.clone()))?;

    let mut slots = HashMap::<ScalarKey<'_>, usize>::new();
    let mut keys = Vec::new();
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    for (row, value) in column.values().iter().enumerate() {
        if options.dropna && value.is_missing() {
            continue;
        }
        let slot = *slots.entry(value.key()).or_insert_with(|| {
            keys.push(value.clone());
            buckets.push(Vec::new());
            buckets.len() - 1
        });
        buckets[slot].push(row);
    }

    Ok(GroupBy {
        frame,
        key,
        keys,
        buckets,
    })
}

impl<'a> GroupBy<'a> {
    #[must_use]
    pub fn key_column(&self) -> &IndexLabel {
        &self.key
    }

    #[must_use]
    pub fn ngroups(&self) -> usize {
        self.keys.len()
    }

    /// Distinct keys in first-seen order.
    #[must_use]
    pub fn keys(&self) -> &[Scalar] {
        &self.keys
    }

    /// Row positions of every bucket, keyed like [`Self::keys`].
    pub fn indices(&self) -> impl Iterator<Item = (&Scalar, &[usize])> + '_ {
        self.keys
            .iter()
            .zip(self.buckets.iter().map(Vec::as_slice))
    }

    /// Every bucket as its own frame, carrying the original index labels.
    pub fn groups(&self) -> Result<Vec<(Scalar, DataFrame)>, GroupByError> {
        self.indices()
            .map(|(key, rows)| Ok((key.clone(), self.frame.take_rows(rows)?)))
            .collect()
    }

    pub fn get_group(&self, key: &Scalar) -> Result<DataFrame, GroupByError> {
        let wanted = key.key();
        let (_, rows) = self
            .indices()
            .find(|(candidate, _)| candidate.key() == wanted)
            .ok_or_else(|| GroupByError::GroupNotFound(key_label(key).to_string()))?;
        Ok(self.frame.take_rows(rows)?)
    }

    fn output_index(&self) -> Index {
        Index::new(self.keys.iter().map(key_label).collect())
    }

    /// Reduce every bucket with `f` into one output row per key.
    ///
    /// Scalar outputs land in column `0`; record outputs are unioned by label
    /// in first-seen order with nulls for labels a bucket did not produce.
    pub fn apply<F, E>(&self, mut f: F) -> Result<DataFrame, GroupByError>
    where
        F: FnMut(&Scalar, &DataFrame) -> Result<GroupOutput, E>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let mut order: Vec<IndexLabel> = Vec::new();
        let mut cells: HashMap<IndexLabel, Vec<Value>> = HashMap::new();

        for (row, (key, bucket)) in self.groups()?.into_iter().enumerate() {
            let output = f(&key, &bucket).map_err(|source| GroupByError::Apply {
                key: key_label(&key).to_string(),
                source: source.into(),
            })?;
            let record = match output {
                GroupOutput::Scalar(value) => vec![(IndexLabel::Int64(0), value)],
                GroupOutput::Record(pairs) => pairs,
            };
            for (label, value) in record {
                let column = cells.entry(label.clone()).or_insert_with(|| {
                    order.push(label);
                    Vec::with_capacity(self.ngroups())
                });
                column.resize(row, Value::Null);
                column.push(value);
            }
        }

        let mut columns = Vec::with_capacity(order.len());
        for label in order {
            let mut values = cells.remove(&label).unwrap_or_default();
            values.resize(self.ngroups(), Value::Null);
            columns.push((label, Column::from_values(values)?));
        }
        Ok(DataFrame::from_columns(self.output_index(), columns)?)
    }

    /// Built-in reductions over every non-key column.
    ///
    /// Sum, Mean, Min and Max skip non-numeric columns. Count ignores nulls
    /// and NaN. First and Last pick the first and last non-missing value.
    pub fn agg(&self, func: AggFunc) -> Result<DataFrame, GroupByError> {
        if func == AggFunc::Size {
            let sizes = self
                .buckets
                .iter()
                .map(|rows| Scalar::Int64(i64::try_from(rows.len()).unwrap_or(i64::MAX)))
                .collect();
            return Ok(DataFrame::from_columns(
                self.output_index(),
                vec![(IndexLabel::from("size"), Column::from_scalars(sizes))],
            )?);
        }

        let mut columns = Vec::new();
        for label in self.frame.columns() {
            if *label == self.key {
                continue;
            }
            let Some(column) = self.frame.column(label) else {
                continue;
            };
            if func.numeric_only() && !column.dtype().is_numeric() {
                continue;
            }
            let reduced = self
                .buckets
                .iter()
                .map(|rows| {
                    let values: Vec<Scalar> =
                        rows.iter().map(|&row| column.values()[row].clone()).collect();
                    reduce(func, &values)
                })
                .collect();
            columns.push((label.clone(), Column::from_scalars(reduced)));
        }
        Ok(DataFrame::from_columns(self.output_index(), columns)?)
    }
}

fn reduce(func: AggFunc, values: &[Scalar]) -> Scalar {
    match func {
        AggFunc::Sum => nansum(values),
        AggFunc::Mean => nanmean(values),
        AggFunc::Count => nancount(values),
        AggFunc::Min => nanmin(values),
        AggFunc::Max => nanmax(values),
        AggFunc::First => values
            .iter()
            .find(|v| !v.is_missing())
            .cloned()
            .unwrap_or(Scalar::Null),
        AggFunc::Last => values
            .iter()
            .rev()
            .find(|v| !v.is_missing())
            .cloned()
            .unwrap_or(Scalar::Null),
        AggFunc::Size => Scalar::Int64(i64::try_from(values.len()).unwrap_or(i64::MAX)),
    }
}
