#![forbid(unsafe_code)]

use std::{collections::HashMap, mem::size_of};

use bumpalo::{Bump, collections::Vec as BumpVec};
use sf_columnar::Column;
use sf_frame::{DataFrame, FrameError};
use sf_index::{Index, IndexLabel};
use sf_runtime::{DecisionAction, EvidenceLedger, RuntimeError, RuntimePolicy};
use sf_types::ScalarKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for JoinExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Appended to non-key labels present on both sides, left then right.
    pub suffixes: (String, String),
    pub execution: JoinExecutionOptions,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            suffixes: ("_x".to_owned(), "_y".to_owned()),
            execution: JoinExecutionOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinExecutionTrace {
    used_arena: bool,
    output_rows: usize,
    estimated_bytes: usize,
}

/// Inner join of `left` and `right` on the column labelled `on`.
pub fn merge(
    left: &DataFrame,
    right: &DataFrame,
    on: impl Into<IndexLabel>,
) -> Result<DataFrame, JoinError> {
    merge_with_options(left, right, on, &MergeOptions::default())
}

pub fn merge_with_options(
    left: &DataFrame,
    right: &DataFrame,
    on: impl Into<IndexLabel>,
    options: &MergeOptions,
) -> Result<DataFrame, JoinError> {
    let on = on.into();
    let plan = JoinPlan::build(left, right, &on)?;
    let (merged, _) = plan.execute(left, right, &on, options)?;
    Ok(merged)
}

/// Like [`merge_with_options`], but the estimated output size is first
/// admitted by `policy` and the decision lands in `ledger`.
pub fn merge_with_policy(
    left: &DataFrame,
    right: &DataFrame,
    on: impl Into<IndexLabel>,
    options: &MergeOptions,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Result<(DataFrame, DecisionAction), JoinError> {
    let on = on.into();
    let plan = JoinPlan::build(left, right, &on)?;
    let action = policy.decide_join_admission(plan.output_rows, ledger)?;
    let (merged, _) = plan.execute(left, right, &on, options)?;
    Ok((merged, action))
}

fn key_column<'f>(
    frame: &'f DataFrame,
    on: &IndexLabel,
    side: &str,
) -> Result<&'f Column, FrameError> {
    frame.column(on).ok_or_else(|| {
        FrameError::SchemaMismatch(format!("merge key '{on}' missing from {side} frame"))
    })
}

/// Right-side key lookup plus the exact output size, computed before any
/// position vector is allocated.
struct JoinPlan<'r> {
    left_keys: &'r Column,
    right_map: HashMap<ScalarKey<'r>, Vec<usize>>,
    output_rows: usize,
}

impl<'r> JoinPlan<'r> {
    fn build(
        left: &'r DataFrame,
        right: &'r DataFrame,
        on: &IndexLabel,
    ) -> Result<Self, FrameError> {
        let left_keys = key_column(left, on, "left")?;
        let right_keys = key_column(right, on, "right")?;

        // Missing keys (null or NaN) never match anything.
        let mut right_map = HashMap::<ScalarKey<'r>, Vec<usize>>::new();
        for (pos, value) in right_keys.values().iter().enumerate() {
            if !value.is_missing() {
                right_map.entry(value.key()).or_default().push(pos);
            }
        }

        let output_rows = left_keys
            .values()
            .iter()
            .filter(|value| !value.is_missing())
            .filter_map(|value| right_map.get(&value.key()))
            .map(Vec::len)
            .sum();

        Ok(Self {
            left_keys,
            right_map,
            output_rows,
        })
    }

    fn matches(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.left_keys
            .values()
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_missing())
            .filter_map(|(left_pos, value)| {
                self.right_map
                    .get(&value.key())
                    .map(|matches| matches.iter().map(move |&right_pos| (left_pos, right_pos)))
            })
            .flatten()
    }

    fn execute(
        &self,
        left: &DataFrame,
        right: &DataFrame,
        on: &IndexLabel,
        options: &MergeOptions,
    ) -> Result<(DataFrame, JoinExecutionTrace), JoinError> {
        let estimated_bytes = estimate_intermediate_bytes(self.output_rows);
        let use_arena =
            options.execution.use_arena && estimated_bytes <= options.execution.arena_budget_bytes;

        let columns = if use_arena {
            let arena = Bump::new();
            let mut left_positions = BumpVec::<usize>::with_capacity_in(self.output_rows, &arena);
            let mut right_positions = BumpVec::<usize>::with_capacity_in(self.output_rows, &arena);
            for (l, r) in self.matches() {
                left_positions.push(l);
                right_positions.push(r);
            }
            assemble(
                left,
                right,
                on,
                left_positions.as_slice(),
                right_positions.as_slice(),
                &options.suffixes,
            )
        } else {
            let mut left_positions = Vec::with_capacity(self.output_rows);
            let mut right_positions = Vec::with_capacity(self.output_rows);
            for (l, r) in self.matches() {
                left_positions.push(l);
                right_positions.push(r);
            }
            assemble(
                left,
                right,
                on,
                &left_positions,
                &right_positions,
                &options.suffixes,
            )
        };

        let merged = DataFrame::from_columns(Index::range(self.output_rows), columns)?;
        Ok((
            merged,
            JoinExecutionTrace {
                used_arena: use_arena,
                output_rows: self.output_rows,
                estimated_bytes,
            },
        ))
    }
}

fn estimate_intermediate_bytes(output_rows: usize) -> usize {
    output_rows.saturating_mul(size_of::<usize>().saturating_mul(2))
}

fn suffixed(label: &IndexLabel, suffix: &str) -> IndexLabel {
    IndexLabel::Utf8(format!("{label}{suffix}"))
}

/// All left columns, then right columns other than the key.
fn assemble(
    left: &DataFrame,
    right: &DataFrame,
    on: &IndexLabel,
    left_positions: &[usize],
    right_positions: &[usize],
    suffixes: &(String, String),
) -> Vec<(IndexLabel, Column)> {
    let collides = |label: &IndexLabel| {
        label != on && left.column(label).is_some() && right.column(label).is_some()
    };

    let mut columns = Vec::with_capacity(left.num_columns() + right.num_columns());
    for label in left.columns() {
        let Some(column) = left.column(label) else {
            continue;
        };
        let out_label = if collides(label) {
            suffixed(label, &suffixes.0)
        } else {
            label.clone()
        };
        columns.push((out_label, column.take(left_positions)));
    }
    for label in right.columns() {
        if label == on {
            continue;
        }
        let Some(column) = right.column(label) else {
            continue;
        };
        let out_label = if collides(label) {
            suffixed(label, &suffixes.1)
        } else {
            label.clone()
        };
        columns.push((out_label, column.take(right_positions)));
    }
    columns
}

#[cfg(test)]
mod tests {
    use sf_frame::{DataFrame, FrameError};
    use sf_index::IndexLabel;
    use sf_runtime::{DecisionAction, EvidenceLedger, RuntimeError, RuntimePolicy};
    use sf_types::{DType, Scalar, Value};

    use super::{
        JoinError, JoinExecutionOptions, JoinPlan, MergeOptions, merge, merge_with_options,
        merge_with_policy,
    };

    fn labels(names: &[&str]) -> Vec<IndexLabel> {
        names.iter().map(|name| IndexLabel::from(*name)).collect()
    }

    fn people() -> DataFrame {
        DataFrame::from_rows(
            vec![
                vec![1.into(), "ann".into()],
                vec![2.into(), "bo".into()],
                vec![1.into(), "cy".into()],
                vec![Value::Null, "dee".into()],
            ],
            Some(labels(&["id", "name"])),
            None,
        )
        .expect("people")
    }

    fn orders() -> DataFrame {
        DataFrame::from_rows(
            vec![
                vec![1.into(), 9.5.into(), "ok".into()],
                vec![3.into(), 1.25.into(), "late".into()],
                vec![1.into(), 4.0.into(), "ok".into()],
                vec![Value::Null, 2.5.into(), "lost".into()],
            ],
            Some(labels(&["id", "amount", "name"])),
            None,
        )
        .expect("orders")
    }

    fn column_values(frame: &DataFrame, label: &str) -> Vec<Scalar> {
        frame
            .column(&IndexLabel::from(label))
            .expect("column")
            .values()
            .to_vec()
    }

    #[test]
    fn inner_join_emits_cross_product_in_left_order() {
        let out = merge(&people(), &orders(), "id").expect("merge");
        assert_eq!(out.len(), 4);
        assert_eq!(out.columns(), &labels(&["id", "name_x", "amount", "name_y"])[..]);
        assert_eq!(
            column_values(&out, "name_x"),
            vec![
                Scalar::Utf8("ann".into()),
                Scalar::Utf8("ann".into()),
                Scalar::Utf8("cy".into()),
                Scalar::Utf8("cy".into()),
            ]
        );
        assert_eq!(
            column_values(&out, "amount"),
            vec![
                Scalar::Float64(9.5),
                Scalar::Float64(4.0),
                Scalar::Float64(9.5),
                Scalar::Float64(4.0),
            ]
        );
        assert!(out.index().is_default_range());
    }

    #[test]
    fn null_keys_never_match() {
        let out = merge(&people(), &orders(), "id").expect("merge");
        assert!(column_values(&out, "id").iter().all(|v| !v.is_null()));
        assert_eq!(out.column(&"id".into()).map(|c| c.dtype()), Some(DType::Int64));
    }

    #[test]
    fn int_and_integral_float_keys_match() {
        let left = DataFrame::from_rows(vec![vec![2.into()]], Some(labels(&["k"])), None)
            .expect("left");
        let right = DataFrame::from_rows(
            vec![vec![2.5.into(), "no".into()], vec![2.0.into(), "yes".into()]],
            Some(labels(&["k", "v"])),
            None,
        )
        .expect("right");
        let out = merge(&left, &right, "k").expect("merge");
        assert_eq!(column_values(&out, "v"), vec![Scalar::Utf8("yes".into())]);
    }

    #[test]
    fn custom_suffixes() {
        let options = MergeOptions {
            suffixes: ("_person".to_owned(), "_order".to_owned()),
            ..MergeOptions::default()
        };
        let out = merge_with_options(&people(), &orders(), "id", &options).expect("merge");
        assert_eq!(
            out.columns(),
            &labels(&["id", "name_person", "amount", "name_order"])[..]
        );
    }

    #[test]
    fn missing_key_is_schema_mismatch() {
        let err = merge(&people(), &orders(), "amount").expect_err("left lacks amount");
        match err {
            JoinError::Frame(FrameError::SchemaMismatch(message)) => {
                assert_eq!(message, "merge key 'amount' missing from left frame");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unmatched_keys_yield_empty_frame_with_columns() {
        let left = DataFrame::from_rows(vec![vec![7.into()]], Some(labels(&["k"])), None)
            .expect("left");
        let out = merge(&left, &orders(), "k").expect_err("right lacks k");
        assert!(matches!(out, JoinError::Frame(FrameError::SchemaMismatch(_))));

        let none = DataFrame::from_rows(vec![vec![7.into()]], Some(labels(&["id"])), None)
            .expect("left");
        let out = merge(&none, &orders(), "id").expect("merge");
        assert!(out.is_empty());
        assert_eq!(out.columns(), &labels(&["id", "amount", "name"])[..]);
    }

    #[test]
    fn arena_and_global_allocator_agree() {
        let (left, right) = (people(), orders());
        let on = IndexLabel::from("id");
        let plan = JoinPlan::build(&left, &right, &on).expect("plan");

        let (arena_out, arena_trace) = plan
            .execute(&left, &right, &on, &MergeOptions::default())
            .expect("arena");
        let global = MergeOptions {
            execution: JoinExecutionOptions {
                use_arena: false,
                arena_budget_bytes: 0,
            },
            ..MergeOptions::default()
        };
        let (global_out, global_trace) =
            plan.execute(&left, &right, &on, &global).expect("global");

        assert_eq!(arena_out, global_out);
        assert!(arena_trace.used_arena);
        assert!(!global_trace.used_arena);
        assert_eq!(arena_trace.output_rows, 4);
    }

    #[test]
    fn arena_falls_back_when_budget_is_too_small() {
        let (left, right) = (people(), orders());
        let on = IndexLabel::from("id");
        let plan = JoinPlan::build(&left, &right, &on).expect("plan");
        let options = MergeOptions {
            execution: JoinExecutionOptions {
                use_arena: true,
                arena_budget_bytes: 1,
            },
            ..MergeOptions::default()
        };
        let (_, trace) = plan.execute(&left, &right, &on, &options).expect("fallback");
        assert!(!trace.used_arena);
        assert!(trace.estimated_bytes > options.execution.arena_budget_bytes);
    }

    #[test]
    fn policy_caps_join_size() {
        let mut ledger = EvidenceLedger::new();
        let strict = RuntimePolicy::strict().with_join_row_cap(3);
        let err = merge_with_policy(
            &people(),
            &orders(),
            "id",
            &MergeOptions::default(),
            &strict,
            &mut ledger,
        )
        .expect_err("four rows over a cap of three");
        assert!(matches!(
            err,
            JoinError::Runtime(RuntimeError::JoinRejected {
                estimated_rows: 4,
                cap: 3
            })
        ));

        let hardened = RuntimePolicy::hardened(Some(3));
        let (out, action) = merge_with_policy(
            &people(),
            &orders(),
            "id",
            &MergeOptions::default(),
            &hardened,
            &mut ledger,
        )
        .expect("hardened admits");
        assert_eq!(action, DecisionAction::Repair);
        assert_eq!(out.len(), 4);
        assert_eq!(ledger.len(), 2);
    }
}
