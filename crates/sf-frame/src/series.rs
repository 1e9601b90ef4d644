use std::error::Error;
use std::fmt;
use std::rc::Rc;

use sf_columnar::Column;
use sf_index::{Index, IndexLabel};
use sf_runtime::{EvidenceLedger, Receiver, RuntimePolicy};
use sf_types::{DType, Scalar, Value, classify};

use crate::render::{DisplayOptions, render_series};
use crate::{DataFrame, FrameError, apply_column, row_position};

/// One named, typed, indexed column.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    name: Option<IndexLabel>,
    index: Rc<Index>,
    column: Column,
}

impl Series {
    pub fn new(
        name: Option<IndexLabel>,
        index: Rc<Index>,
        column: Column,
    ) -> Result<Self, FrameError> {
        if index.len() != column.len() {
            return Err(FrameError::ShapeMismatch {
                what: "series values",
                expected: index.len(),
                actual: column.len(),
            });
        }
        Ok(Self {
            name,
            index,
            column,
        })
    }

    /// Build from raw values; `labels` defaults to `0..n`.
    pub fn from_values(
        name: Option<IndexLabel>,
        labels: Option<Vec<IndexLabel>>,
        values: Vec<Value>,
    ) -> Result<Self, FrameError> {
        let column = Column::from_values(values)?;
        let index = labels.map_or_else(|| Index::range(column.len()), Index::new);
        Self::new(name, Rc::new(index), column)
    }

    pub fn from_list(values: Vec<Value>) -> Result<Self, FrameError> {
        Self::from_values(None, None, values)
    }

    #[must_use]
    pub fn name(&self) -> Option<&IndexLabel> {
        self.name.as_ref()
    }

    pub fn rename(&mut self, name: impl Into<IndexLabel>) {
        self.name = Some(name.into());
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// The shared index handle; frames hand out series that point at theirs.
    #[must_use]
    pub fn index_handle(&self) -> &Rc<Index> {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        self.column.values()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.column.dtype()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }

    pub fn get(&self, position: i64) -> Result<&Scalar, FrameError> {
        let pos = row_position(position, self.len())?;
        Ok(&self.column.values()[pos])
    }

    pub fn set(&mut self, position: i64, value: impl Into<Value>) -> Result<(), FrameError> {
        row_position(position, self.len())?;
        self.column.set(position, value.into())?;
        Ok(())
    }

    /// Per-row equality against one value, as a bool series on the same index.
    ///
    /// This is the way to build a row mask: `df.select(&df.get("a")?.equals(1)?)`.
    pub fn equals(&self, value: impl Into<Value>) -> Result<Self, FrameError> {
        let needle = classify(value.into())?;
        let mask = self
            .column
            .eq_scalar(&needle)
            .into_iter()
            .map(Scalar::Bool)
            .collect();
        Ok(Self {
            name: self.name.clone(),
            index: Rc::clone(&self.index),
            column: Column::new(DType::Bool, mask)?,
        })
    }

    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self {
            name: self.name.clone(),
            index: Rc::new(self.index.head(n)),
            column: self.column.head(n),
        }
    }

    /// Transform every value; the result type is re-resolved.
    pub fn apply<F, T, E>(&self, f: F) -> Result<Self, FrameError>
    where
        F: FnMut(&Scalar) -> Result<T, E>,
        T: Into<Value>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let label = self.frame_label();
        let column = apply_column(&self.column, &label, f)?;
        Ok(Self {
            name: self.name.clone(),
            index: Rc::clone(&self.index),
            column,
        })
    }

    /// A one-column frame sharing this series' index.
    pub fn to_frame(&self) -> Result<DataFrame, FrameError> {
        DataFrame::from_parts(
            Rc::clone(&self.index),
            vec![(self.frame_label(), self.column.clone())],
        )
    }

    pub fn method(&self, name: &str) -> Result<SeriesMethod, FrameError> {
        SeriesMethod::from_name(name)
            .ok_or_else(|| RuntimePolicy::default().missing_method(Receiver::Series, name).into())
    }

    pub fn method_with_policy(
        &self,
        name: &str,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<SeriesMethod, FrameError> {
        SeriesMethod::from_name(name)
            .ok_or_else(|| policy.decide_missing_method(Receiver::Series, name, ledger).into())
    }

    #[must_use]
    pub fn to_string_with(&self, options: &DisplayOptions) -> String {
        render_series(self, options)
    }

    fn frame_label(&self) -> IndexLabel {
        self.name.clone().unwrap_or(IndexLabel::Int64(0))
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(&DisplayOptions::default()))
    }
}

/// Implemented series operations, by the name callers dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesMethod {
    Apply,
    Equals,
    Get,
    Head,
    Rename,
    Set,
    ToFrame,
}

const SERIES_METHODS: &[(&str, SeriesMethod)] = &[
    ("apply", SeriesMethod::Apply),
    ("equals", SeriesMethod::Equals),
    ("get", SeriesMethod::Get),
    ("head", SeriesMethod::Head),
    ("rename", SeriesMethod::Rename),
    ("set", SeriesMethod::Set),
    ("to_frame", SeriesMethod::ToFrame),
];

impl SeriesMethod {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        SERIES_METHODS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, method)| *method)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        SERIES_METHODS
            .iter()
            .find(|(_, method)| *method == self)
            .map_or("", |(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use sf_index::IndexLabel;
    use sf_runtime::{EvidenceLedger, IssueKind, RuntimePolicy};
    use sf_types::{DType, Scalar, Value};

    use super::{Series, SeriesMethod};
    use crate::FrameError;

    fn letters() -> Series {
        Series::from_list(vec!["a".into(), "b".into(), "c".into()]).expect("series")
    }

    #[test]
    fn get_and_set_are_bounds_checked() {
        let mut series = letters();
        assert_eq!(series.len(), 3);
        assert_eq!(series.get(2).expect("in range"), &Scalar::Utf8("c".into()));
        assert!(matches!(
            series.get(3),
            Err(FrameError::IndexOutOfRange { position: 3, len: 3, .. })
        ));
        assert!(matches!(
            series.set(-1, "z"),
            Err(FrameError::IndexOutOfRange { position: -1, .. })
        ));
        series.set(0, "z").expect("set");
        assert_eq!(series.values()[0], Scalar::Utf8("z".into()));
        assert_eq!(series.dtype(), DType::Utf8);
    }

    #[test]
    fn set_with_conflicting_kind_re_types() {
        let mut series = Series::from_list(vec![1.into(), 2.into()]).expect("ints");
        assert_eq!(series.dtype(), DType::Int64);
        series.set(1, "two").expect("set");
        assert_eq!(series.dtype(), DType::Object);
        assert_eq!(series.values()[0], Scalar::Int64(1));
    }

    #[test]
    fn equals_builds_bool_mask_on_same_index() {
        let series = Series::from_values(
            Some("kind".into()),
            Some(vec!["x".into(), "y".into(), "z".into()]),
            vec!["cat".into(), "dog".into(), "cat".into()],
        )
        .expect("series");
        let mask = series.equals("cat").expect("mask");
        assert_eq!(mask.dtype(), DType::Bool);
        assert_eq!(
            mask.values(),
            &[Scalar::Bool(true), Scalar::Bool(false), Scalar::Bool(true)]
        );
        assert!(Rc::ptr_eq(mask.index_handle(), series.index_handle()));
        assert_eq!(mask.name(), Some(&IndexLabel::from("kind")));
    }

    #[test]
    fn empty_mask_is_still_bool() {
        let empty = Series::from_list(Vec::new()).expect("empty");
        assert_eq!(empty.equals(1).expect("mask").dtype(), DType::Bool);
    }

    #[test]
    fn rename_and_to_frame() {
        let mut series = letters();
        assert_eq!(series.name(), None);
        assert_eq!(
            series.to_frame().expect("frame").columns(),
            &[IndexLabel::Int64(0)]
        );
        series.rename("letter");
        let frame = series.to_frame().expect("frame");
        assert_eq!(frame.columns(), &[IndexLabel::from("letter")]);
        assert_eq!(frame.size(), (3, 1));
    }

    #[test]
    fn apply_surfaces_first_failure() {
        let series = Series::from_list(vec![1.into(), 0.into(), 2.into()]).expect("ints");
        let halved = series
            .apply(|v| Ok::<_, String>(v.to_f64().map_err(|e| e.to_string())? / 2.0))
            .expect("apply");
        assert_eq!(halved.dtype(), DType::Float64);

        let err = series
            .apply(|v| match v {
                Scalar::Int64(0) => Err("zero".to_owned()),
                other => Ok(Value::from(other.clone())),
            })
            .expect_err("fails at zero");
        match err {
            FrameError::Apply { position, .. } => assert_eq!(position, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn renders_with_footer() {
        let mut series = Series::from_list(vec![1.5.into(), Value::Null, 10.26.into()])
            .expect("floats");
        assert_eq!(series.to_string(), "0     1.5\n1        \n2    10.3\ndtype: float64\n");
        series.rename("x");
        assert!(series.to_string().ends_with("Name: x, dtype: float64\n"));
    }

    #[test]
    fn method_dispatch() {
        let series = letters();
        assert_eq!(series.method("equals").expect("known"), SeriesMethod::Equals);
        assert_eq!(SeriesMethod::ToFrame.name(), "to_frame");

        let err = series.method("unique").expect_err("unbuilt");
        assert!(err.to_string().starts_with("series.unique is not implemented."));

        let mut ledger = EvidenceLedger::new();
        let _ = series.method_with_policy("mean", &RuntimePolicy::strict(), &mut ledger);
        assert_eq!(ledger.records()[0].issue.kind, IssueKind::NotImplemented);
    }
}
