#![forbid(unsafe_code)]

mod render;
mod series;

use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt;
use std::rc::Rc;

use sf_columnar::{Column, ColumnError};
use sf_index::{Index, IndexError, IndexLabel};
use sf_runtime::{EvidenceLedger, Receiver, RuntimeError, RuntimePolicy};
use sf_types::{DType, Scalar, ScalarKey, TypeError, Value};
use thiserror::Error;

pub use render::{DisplayOptions, float_precision_for};
pub use series::{Series, SeriesMethod};

/// Which axis a positional argument addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Row,
    Column,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Row => "row",
            Self::Column => "column",
        })
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{axis} position {position} out of bounds for length {len}")]
    IndexOutOfRange {
        axis: Axis,
        position: i64,
        len: usize,
    },
    #[error("{what} length {actual} does not match expected length {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error(
        "cannot call DataFrame.Get with bool. If you are trying `df[df[column] == val], instead use `df[df[column].equals(val)]`"
    )]
    AmbiguousBooleanContext,
    #[error("column '{0}' not found")]
    ColumnNotFound(IndexLabel),
    #[error("row selection needs a bool series, got dtype {0}")]
    NonBooleanMask(DType),
    #[error("apply on column '{column}' failed at row {position}: {source}")]
    Apply {
        column: IndexLabel,
        position: usize,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn checked(position: i64, len: usize, axis: Axis) -> Result<usize, FrameError> {
    usize::try_from(position)
        .ok()
        .filter(|&pos| pos < len)
        .ok_or(FrameError::IndexOutOfRange {
            axis,
            position,
            len,
        })
}

pub(crate) fn row_position(position: i64, len: usize) -> Result<usize, FrameError> {
    checked(position, len, Axis::Row)
}

/// Run `f` over every value of `column`, stopping at the first failure.
pub(crate) fn apply_column<F, T, E>(
    column: &Column,
    label: &IndexLabel,
    mut f: F,
) -> Result<Column, FrameError>
where
    F: FnMut(&Scalar) -> Result<T, E>,
    T: Into<Value>,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    let mut out = Vec::with_capacity(column.len());
    for (position, value) in column.values().iter().enumerate() {
        let mapped = f(value).map_err(|source| FrameError::Apply {
            column: label.clone(),
            position,
            source: source.into(),
        })?;
        out.push(mapped.into());
    }
    Ok(Column::from_values(out)?)
}

fn label_value(label: &IndexLabel) -> Value {
    match label {
        IndexLabel::Int64(v) => Value::Int(*v),
        IndexLabel::Utf8(v) => Value::Str(v.clone()),
    }
}

fn ensure_unique(labels: &[IndexLabel]) -> Result<(), FrameError> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in labels {
        if !seen.insert(label) {
            return Err(FrameError::SchemaMismatch(format!(
                "duplicate column label '{label}'"
            )));
        }
    }
    Ok(())
}

fn describe(labels: &[IndexLabel]) -> String {
    let inner: Vec<String> = labels.iter().map(ToString::to_string).collect();
    format!("[{}]", inner.join(", "))
}

/// What a frame is built from.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Row-major cells; short rows are padded with nulls.
    Rows(Vec<Vec<Value>>),
    /// One column.
    List(Vec<Value>),
    Series(Series),
    Frame(DataFrame),
}

impl From<Vec<Vec<Value>>> for DataSource {
    fn from(rows: Vec<Vec<Value>>) -> Self {
        Self::Rows(rows)
    }
}

impl From<Vec<Value>> for DataSource {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}

impl From<Series> for DataSource {
    fn from(series: Series) -> Self {
        Self::Series(series)
    }
}

impl From<DataFrame> for DataSource {
    fn from(frame: DataFrame) -> Self {
        Self::Frame(frame)
    }
}

/// Argument to [`DataFrame::get_item`].
#[derive(Debug, Clone)]
pub enum Key {
    Column(IndexLabel),
    Mask(Series),
    /// The result of a scalar comparison; always rejected.
    Bool(bool),
}

impl From<IndexLabel> for Key {
    fn from(label: IndexLabel) -> Self {
        Self::Column(label)
    }
}

impl From<&str> for Key {
    fn from(label: &str) -> Self {
        Self::Column(label.into())
    }
}

impl From<String> for Key {
    fn from(label: String) -> Self {
        Self::Column(label.into())
    }
}

impl From<i64> for Key {
    fn from(label: i64) -> Self {
        Self::Column(label.into())
    }
}

impl From<Series> for Key {
    fn from(mask: Series) -> Self {
        Self::Mask(mask)
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Series(Series),
    Frame(DataFrame),
}

/// Right-hand side of `df[label] = ...`.
#[derive(Debug, Clone)]
pub enum ColumnInput {
    Values(Vec<Value>),
    Series(Series),
    /// Repeated for every row.
    Scalar(Value),
}

impl From<Vec<Value>> for ColumnInput {
    fn from(values: Vec<Value>) -> Self {
        Self::Values(values)
    }
}

impl From<Series> for ColumnInput {
    fn from(series: Series) -> Self {
        Self::Series(series)
    }
}

impl From<Value> for ColumnInput {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

/// Implemented frame operations, by the name callers dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameMethod {
    Append,
    Apply,
    At,
    Columns,
    DropDuplicates,
    Get,
    GroupBy,
    Head,
    IterTuples,
    Merge,
    ResetIndex,
    Shape,
    ToCsv,
}

const FRAME_METHODS: &[(&str, FrameMethod)] = &[
    ("append", FrameMethod::Append),
    ("apply", FrameMethod::Apply),
    ("at", FrameMethod::At),
    ("columns", FrameMethod::Columns),
    ("drop_duplicates", FrameMethod::DropDuplicates),
    ("get", FrameMethod::Get),
    ("groupby", FrameMethod::GroupBy),
    ("head", FrameMethod::Head),
    ("itertuples", FrameMethod::IterTuples),
    ("merge", FrameMethod::Merge),
    ("reset_index", FrameMethod::ResetIndex),
    ("shape", FrameMethod::Shape),
    ("to_csv", FrameMethod::ToCsv),
];

impl FrameMethod {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        FRAME_METHODS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, method)| *method)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        FRAME_METHODS
            .iter()
            .find(|(_, method)| *method == self)
            .map_or("", |(name, _)| name)
    }
}

/// Columns sharing one index.
///
/// Every column has the index's length. Series handed out by [`DataFrame::get`]
/// hold the same `Rc<Index>` as the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    index: Rc<Index>,
    columns: BTreeMap<IndexLabel, Column>,
    column_order: Vec<IndexLabel>,
}

impl Default for DataFrame {
    fn default() -> Self {
        Self::empty()
    }
}

impl DataFrame {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            index: Rc::new(Index::range(0)),
            columns: BTreeMap::new(),
            column_order: Vec::new(),
        }
    }

    /// Build a frame from rows, a list, a series or another frame.
    ///
    /// `columns` and `index` override the default `0..n` labels and must
    /// match the resulting width and height.
    pub fn new(
        source: DataSource,
        columns: Option<Vec<IndexLabel>>,
        index: Option<Vec<IndexLabel>>,
    ) -> Result<Self, FrameError> {
        let (handle, labelled) = match source {
            DataSource::Rows(rows) => {
                let mut width = rows.iter().map(Vec::len).max().unwrap_or(0);
                if rows.is_empty() {
                    width = columns.as_ref().map_or(0, Vec::len);
                }
                let height = rows.len();
                let mut per_column: Vec<Vec<Value>> =
                    (0..width).map(|_| Vec::with_capacity(height)).collect();
                for row in rows {
                    let padding = width - row.len();
                    for (j, value) in row
                        .into_iter()
                        .chain(std::iter::repeat_n(Value::Null, padding))
                        .enumerate()
                    {
                        per_column[j].push(value);
                    }
                }
                let built = per_column
                    .into_iter()
                    .enumerate()
                    .map(|(j, values)| Ok((IndexLabel::position(j), Column::from_values(values)?)))
                    .collect::<Result<Vec<_>, FrameError>>()?;
                (Rc::new(Index::range(height)), built)
            }
            DataSource::List(values) => {
                let column = Column::from_values(values)?;
                (
                    Rc::new(Index::range(column.len())),
                    vec![(IndexLabel::position(0), column)],
                )
            }
            DataSource::Series(series) => {
                let label = series.name().cloned().unwrap_or(IndexLabel::Int64(0));
                (
                    Rc::clone(series.index_handle()),
                    vec![(label, series.column().clone())],
                )
            }
            DataSource::Frame(frame) => {
                let pairs = frame
                    .column_order
                    .iter()
                    .filter_map(|label| {
                        frame
                            .columns
                            .get(label)
                            .map(|column| (label.clone(), column.clone()))
                    })
                    .collect();
                (Rc::clone(&frame.index), pairs)
            }
        };

        let labelled = match columns {
            Some(names) => {
                if names.len() != labelled.len() {
                    return Err(FrameError::ShapeMismatch {
                        what: "column labels",
                        expected: labelled.len(),
                        actual: names.len(),
                    });
                }
                names
                    .into_iter()
                    .zip(labelled)
                    .map(|(name, (_, column))| (name, column))
                    .collect()
            }
            None => labelled,
        };

        let handle = match index {
            Some(labels) => {
                if labels.len() != handle.len() {
                    return Err(FrameError::ShapeMismatch {
                        what: "index labels",
                        expected: handle.len(),
                        actual: labels.len(),
                    });
                }
                Rc::new(Index::new(labels))
            }
            None => handle,
        };

        Self::from_parts(handle, labelled)
    }

    /// Shorthand for [`Self::new`] with [`DataSource::Rows`].
    pub fn from_rows(
        rows: Vec<Vec<Value>>,
        columns: Option<Vec<IndexLabel>>,
        index: Option<Vec<IndexLabel>>,
    ) -> Result<Self, FrameError> {
        Self::new(DataSource::Rows(rows), columns, index)
    }

    /// Assemble a frame from ready-made columns.
    pub fn from_columns(
        index: Index,
        columns: Vec<(IndexLabel, Column)>,
    ) -> Result<Self, FrameError> {
        Self::from_parts(Rc::new(index), columns)
    }

    pub(crate) fn from_parts(
        index: Rc<Index>,
        columns: Vec<(IndexLabel, Column)>,
    ) -> Result<Self, FrameError> {
        let column_order: Vec<IndexLabel> = columns.iter().map(|(label, _)| label.clone()).collect();
        ensure_unique(&column_order)?;
        for (_, column) in &columns {
            if column.len() != index.len() {
                return Err(FrameError::ShapeMismatch {
                    what: "column",
                    expected: index.len(),
                    actual: column.len(),
                });
            }
        }
        Ok(Self {
            index,
            columns: columns.into_iter().collect(),
            column_order,
        })
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn index_handle(&self) -> &Rc<Index> {
        &self.index
    }

    /// Row count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.column_order.len()
    }

    /// `(rows, columns)`.
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        (self.len(), self.num_columns())
    }

    #[must_use]
    pub fn columns(&self) -> &[IndexLabel] {
        &self.column_order
    }

    #[must_use]
    pub fn column(&self, label: &IndexLabel) -> Option<&Column> {
        self.columns.get(label)
    }

    fn column_at(&self, col: i64) -> Result<(&IndexLabel, &Column), FrameError> {
        let pos = checked(col, self.num_columns(), Axis::Column)?;
        let label = &self.column_order[pos];
        let column = self
            .columns
            .get(label)
            .ok_or_else(|| FrameError::ColumnNotFound(label.clone()))?;
        Ok((label, column))
    }

    pub fn at2d(&self, row: i64, col: i64) -> Result<&Scalar, FrameError> {
        let pos = row_position(row, self.len())?;
        let (_, column) = self.column_at(col)?;
        Ok(&column.values()[pos])
    }

    /// Overwrite one cell. A value whose kind conflicts with the column type
    /// re-types the column, which is how opaque objects enter typed columns.
    pub fn set_at2d(&mut self, row: i64, col: i64, value: impl Into<Value>) -> Result<(), FrameError> {
        row_position(row, self.len())?;
        let label = self.column_at(col)?.0.clone();
        let column = self
            .columns
            .get_mut(&label)
            .ok_or(FrameError::ColumnNotFound(label))?;
        column.set(row, value.into())?;
        Ok(())
    }

    /// One column as a series on the frame's index.
    pub fn get(&self, label: impl Into<IndexLabel>) -> Result<Series, FrameError> {
        let label = label.into();
        let column = self
            .columns
            .get(&label)
            .ok_or_else(|| FrameError::ColumnNotFound(label.clone()))?;
        Series::new(Some(label), Rc::clone(&self.index), column.clone())
    }

    /// `df[key]`: a column by label or rows by bool mask.
    pub fn get_item(&self, key: impl Into<Key>) -> Result<Selection, FrameError> {
        match key.into() {
            Key::Column(label) => self.get(label).map(Selection::Series),
            Key::Mask(mask) => self.select(&mask).map(Selection::Frame),
            Key::Bool(_) => Err(FrameError::AmbiguousBooleanContext),
        }
    }

    /// Rows where `mask` is true. Nulls in the mask count as false.
    pub fn select(&self, mask: &Series) -> Result<Self, FrameError> {
        if mask.len() != self.len() {
            return Err(FrameError::ShapeMismatch {
                what: "mask",
                expected: self.len(),
                actual: mask.len(),
            });
        }
        let mut positions = Vec::new();
        for (pos, value) in mask.values().iter().enumerate() {
            match value {
                Scalar::Bool(true) => positions.push(pos),
                Scalar::Bool(false) | Scalar::Null => {}
                _ => return Err(FrameError::NonBooleanMask(mask.dtype())),
            }
        }
        self.take_rows(&positions)
    }

    /// Rows at the given positions, in order, with their index labels.
    pub fn take_rows(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let index = self.index.take(positions)?;
        let columns = self
            .ordered_columns()
            .map(|(label, column)| (label.clone(), column.take(positions)))
            .collect();
        Self::from_parts(Rc::new(index), columns)
    }

    fn ordered_columns(&self) -> impl Iterator<Item = (&IndexLabel, &Column)> + '_ {
        self.column_order
            .iter()
            .filter_map(|label| self.columns.get(label).map(|column| (label, column)))
    }

    pub fn get_key(&self, position: i64) -> Result<IndexLabel, FrameError> {
        let pos = row_position(position, self.len())?;
        Ok(self.index.label(pos)?.clone())
    }

    /// Relabel one row. Series obtained earlier keep the index they were
    /// handed.
    pub fn set_key(&mut self, position: i64, label: impl Into<IndexLabel>) -> Result<(), FrameError> {
        let pos = row_position(position, self.len())?;
        Rc::make_mut(&mut self.index).set_label(pos, label.into())?;
        Ok(())
    }

    /// First `n` rows on a fresh index slice.
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self {
            index: Rc::new(self.index.head(n)),
            columns: self
                .columns
                .iter()
                .map(|(label, column)| (label.clone(), column.head(n)))
                .collect(),
            column_order: self.column_order.clone(),
        }
    }

    /// Rows of `self` followed by rows of `other`.
    ///
    /// Both frames need the same column labels in the same order. Column
    /// types are re-resolved over both inputs.
    pub fn append(&self, other: &Self, ignore_index: bool) -> Result<Self, FrameError> {
        if self.column_order != other.column_order {
            return Err(FrameError::SchemaMismatch(format!(
                "cannot append columns {} to columns {}",
                describe(&other.column_order),
                describe(&self.column_order)
            )));
        }
        let index = if ignore_index {
            Index::range(self.len() + other.len())
        } else {
            Index::concat(&[self.index(), other.index()])
        };
        let columns = self
            .ordered_columns()
            .zip(other.ordered_columns())
            .map(|((label, left), (_, right))| (label.clone(), Column::concat(&[left, right])))
            .collect();
        Self::from_parts(Rc::new(index), columns)
    }

    /// Replace the index with `0..n`. Unless `drop` is set the old labels
    /// become a leading column named `index` (or `level_0` if taken).
    pub fn reset_index(&self, drop: bool) -> Result<Self, FrameError> {
        let index = Rc::new(Index::range(self.len()));
        let mut columns: Vec<(IndexLabel, Column)> = self
            .ordered_columns()
            .map(|(label, column)| (label.clone(), column.clone()))
            .collect();
        if !drop {
            let name = ["index", "level_0"]
                .into_iter()
                .map(IndexLabel::from)
                .find(|candidate| !self.columns.contains_key(candidate))
                .ok_or_else(|| {
                    FrameError::SchemaMismatch(
                        "cannot insert index column: 'index' and 'level_0' already exist"
                            .to_owned(),
                    )
                })?;
            let old = Column::from_values(self.index.labels().iter().map(label_value).collect())?;
            columns.insert(0, (name, old));
        }
        Self::from_parts(index, columns)
    }

    /// Drop rows equal to an earlier row over `subset` (all columns when
    /// `None` or empty). The first occurrence is kept and order is preserved.
    pub fn drop_duplicates(&self, subset: Option<&[IndexLabel]>) -> Result<Self, FrameError> {
        let keys: Vec<&IndexLabel> = match subset {
            Some(labels) if !labels.is_empty() => labels.iter().collect(),
            _ => self.column_order.iter().collect(),
        };
        let key_columns = keys
            .into_iter()
            .map(|label| {
                self.columns
                    .get(label)
                    .ok_or_else(|| FrameError::ColumnNotFound(label.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::<Vec<ScalarKey<'_>>>::with_capacity(self.len());
        let positions: Vec<usize> = (0..self.len())
            .filter(|&row| {
                let key = key_columns
                    .iter()
                    .map(|column| column.values()[row].key())
                    .collect();
                seen.insert(key)
            })
            .collect();
        self.take_rows(&positions)
    }

    /// New frame with `f` applied to every value of one column.
    pub fn apply<F, T, E>(&self, label: impl Into<IndexLabel>, f: F) -> Result<Self, FrameError>
    where
        F: FnMut(&Scalar) -> Result<T, E>,
        T: Into<Value>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let label = label.into();
        let column = self
            .columns
            .get(&label)
            .ok_or_else(|| FrameError::ColumnNotFound(label.clone()))?;
        let mapped = apply_column(column, &label, f)?;
        let mut out = self.clone();
        out.columns.insert(label, mapped);
        Ok(out)
    }

    /// `df[label] = input`: replaces a column in place or appends a new one.
    ///
    /// A frame with no columns and no rows takes its length from the input.
    pub fn set_column(
        &mut self,
        label: impl Into<IndexLabel>,
        input: impl Into<ColumnInput>,
    ) -> Result<(), FrameError> {
        let label = label.into();
        let adopt_length = self.column_order.is_empty() && self.is_empty();
        let column = match input.into() {
            ColumnInput::Values(values) => Column::from_values(values)?,
            ColumnInput::Series(series) => series.column().clone(),
            ColumnInput::Scalar(value) => Column::from_values(vec![value; self.len()])?,
        };
        if adopt_length {
            self.index = Rc::new(Index::range(column.len()));
        } else if column.len() != self.len() {
            return Err(FrameError::ShapeMismatch {
                what: "column",
                expected: self.len(),
                actual: column.len(),
            });
        }
        if self.columns.insert(label.clone(), column).is_none() {
            self.column_order.push(label);
        }
        Ok(())
    }

    /// Rows as `(index label, cells in column order)`.
    pub fn itertuples(&self) -> impl Iterator<Item = (&IndexLabel, Vec<&Scalar>)> + '_ {
        self.index.labels().iter().enumerate().map(move |(row, label)| {
            let cells = self
                .ordered_columns()
                .map(|(_, column)| &column.values()[row])
                .collect();
            (label, cells)
        })
    }

    pub fn method(&self, name: &str) -> Result<FrameMethod, FrameError> {
        FrameMethod::from_name(name).ok_or_else(|| {
            RuntimePolicy::default()
                .missing_method(Receiver::DataFrame, name)
                .into()
        })
    }

    /// Like [`Self::method`], logging refusals to `ledger`.
    pub fn method_with_policy(
        &self,
        name: &str,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<FrameMethod, FrameError> {
        FrameMethod::from_name(name)
            .ok_or_else(|| policy.decide_missing_method(Receiver::DataFrame, name, ledger).into())
    }

    #[must_use]
    pub fn to_string_with(&self, options: &DisplayOptions) -> String {
        render::render_frame(self, options)
    }
}

impl fmt::Display for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(&DisplayOptions::default()))
    }
}

/// Stack frames row-wise.
///
/// Columns are the union of every input's labels in first-seen order; cells
/// a frame lacks are null. Each column is re-resolved over all its values.
pub fn concat_dataframes(frames: &[&DataFrame]) -> Result<DataFrame, FrameError> {
    let total: usize = frames.iter().map(|frame| frame.len()).sum();
    let index = Index::concat(&frames.iter().map(|frame| frame.index()).collect::<Vec<_>>());

    let mut union = Vec::new();
    let mut seen = HashSet::new();
    for frame in frames {
        for label in frame.columns() {
            if seen.insert(label) {
                union.push(label.clone());
            }
        }
    }

    let columns = union
        .into_iter()
        .map(|label| {
            let mut values = Vec::with_capacity(total);
            for frame in frames {
                match frame.column(&label) {
                    Some(column) => values.extend_from_slice(column.values()),
                    None => values.extend(std::iter::repeat_n(Scalar::Null, frame.len())),
                }
            }
            (label, Column::from_scalars(values))
        })
        .collect();

    DataFrame::from_parts(Rc::new(index), columns)
}
