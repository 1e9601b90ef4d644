#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A row label, also used to label columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Int64(i64),
    Utf8(String),
}

impl IndexLabel {
    /// Label for a zero-based position.
    #[must_use]
    pub fn position(pos: usize) -> Self {
        Self::Int64(i64::try_from(pos).unwrap_or(i64::MAX))
    }
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<&IndexLabel> for IndexLabel {
    fn from(value: &IndexLabel) -> Self {
        value.clone()
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("index position {position} out of bounds for length {len}")]
    OutOfRange { position: usize, len: usize },
}

/// Ordered row labels. Labels need not be unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<IndexLabel>,
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        Self { labels }
    }

    /// Default `0..len` index.
    #[must_use]
    pub fn range(len: usize) -> Self {
        Self::new((0..len).map(IndexLabel::position).collect())
    }

    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::new(values.into_iter().map(IndexLabel::from).collect())
    }

    #[must_use]
    pub fn from_utf8(values: Vec<String>) -> Self {
        Self::new(values.into_iter().map(IndexLabel::from).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    pub fn label(&self, position: usize) -> Result<&IndexLabel, IndexError> {
        self.labels.get(position).ok_or(IndexError::OutOfRange {
            position,
            len: self.labels.len(),
        })
    }

    pub fn set_label(&mut self, position: usize, label: IndexLabel) -> Result<(), IndexError> {
        let len = self.labels.len();
        let slot = self
            .labels
            .get_mut(position)
            .ok_or(IndexError::OutOfRange { position, len })?;
        *slot = label;
        Ok(())
    }

    /// `true` when the labels are exactly `0..len`.
    #[must_use]
    pub fn is_default_range(&self) -> bool {
        self.labels
            .iter()
            .enumerate()
            .all(|(pos, label)| *label == IndexLabel::position(pos))
    }

    /// Labels at the given positions, in order. Positions must be in bounds.
    pub fn take(&self, positions: &[usize]) -> Result<Self, IndexError> {
        let labels = positions
            .iter()
            .map(|&pos| self.label(pos).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(labels))
    }

    /// First `n` labels (all of them if `n` exceeds the length).
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self::new(self.labels.iter().take(n).cloned().collect())
    }

    /// Labels of every index in order; duplicates are kept.
    #[must_use]
    pub fn concat(indexes: &[&Self]) -> Self {
        let total = indexes.iter().map(|index| index.len()).sum();
        let mut labels = Vec::with_capacity(total);
        for index in indexes {
            labels.extend_from_slice(index.labels());
        }
        Self::new(labels)
    }
}

impl From<Vec<IndexLabel>> for Index {
    fn from(labels: Vec<IndexLabel>) -> Self {
        Self::new(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::{Index, IndexError, IndexLabel};

    #[test]
    fn range_index_counts_from_zero() {
        let index = Index::range(3);
        assert_eq!(
            index.labels(),
            &[
                IndexLabel::from(0_i64),
                IndexLabel::from(1_i64),
                IndexLabel::from(2_i64)
            ]
        );
        assert!(index.is_default_range());
        assert!(!Index::from_i64(vec![1, 2]).is_default_range());
    }

    #[test]
    fn duplicate_labels_are_allowed() {
        let mut index = Index::new(vec!["a".into(), "b".into()]);
        index.set_label(1, "a".into()).expect("in bounds");
        assert_eq!(index.labels(), &[IndexLabel::from("a"), IndexLabel::from("a")]);
    }

    #[test]
    fn label_access_is_bounds_checked() {
        let mut index = Index::range(2);
        assert_eq!(index.label(1).expect("label"), &IndexLabel::Int64(1));
        assert_eq!(
            index.label(2).expect_err("out of range"),
            IndexError::OutOfRange { position: 2, len: 2 }
        );
        assert!(index.set_label(5, "x".into()).is_err());
    }

    #[test]
    fn take_head_and_concat_preserve_order() {
        let index = Index::from_utf8(vec!["x".into(), "y".into(), "z".into()]);
        let taken = index.take(&[2, 0]).expect("take");
        assert_eq!(taken.labels(), &[IndexLabel::from("z"), IndexLabel::from("x")]);
        assert_eq!(index.head(10).len(), 3);
        assert_eq!(index.head(1).labels(), &[IndexLabel::from("x")]);

        let joined = Index::concat(&[&index, &Index::range(1)]);
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.labels()[3], IndexLabel::Int64(0));
    }

    #[test]
    fn labels_display_plainly() {
        assert_eq!(IndexLabel::from(12_i64).to_string(), "12");
        assert_eq!(IndexLabel::from("name").to_string(), "name");
    }
}
