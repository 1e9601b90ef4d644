#![forbid(unsafe_code)]

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where users are sent to ask for an unbuilt operation.
pub const DEFAULT_ISSUE_TRACKER: &str = "https://github.com/qri-io/starlib/issues";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    Strict,
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Reject,
    /// Admitted although a limit was exceeded.
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    NotImplemented,
    UnknownMethod,
    JoinCardinality,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityIssue {
    pub kind: IssueKind,
    pub subject: String,
    pub detail: String,
}

/// One structured log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub ts_unix_ms: u64,
    pub mode: RuntimeMode,
    pub action: DecisionAction,
    pub issue: CompatibilityIssue,
}

/// Append-only record of the decisions taken on behalf of a caller.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    records: Vec<DecisionRecord>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: DecisionRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One JSON object per line, oldest first.
    pub fn to_jsonl(&self) -> Result<String, RuntimeError> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// The kind of value a method is looked up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Receiver {
    DataFrame,
    Series,
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DataFrame => "dataframe",
            Self::Series => "series",
        })
    }
}

// Both tables must stay sorted: lookups use binary search.
const DATAFRAME_NOT_IMPLEMENTED: &[&str] = &[
    "abs", "add", "add_prefix", "add_suffix", "agg", "aggregate", "align", "all", "any",
    "applymap", "asfreq", "asof", "assign", "astype", "at_time", "backfill", "between_time",
    "bfill", "bool", "boxplot", "clip", "combine", "combine_first", "compare", "convert_dtypes",
    "copy", "corr", "corrwith", "count", "cov", "cummax", "cummin", "cumprod", "cumsum",
    "describe", "diff", "div", "divide", "dot", "drop", "droplevel", "dropna", "dtypes",
    "duplicated", "eq", "eval", "ewm", "expanding", "explode", "ffill", "fillna", "filter",
    "first", "first_valid_index", "floordiv", "ge", "gt", "hist", "idxmax", "idxmin",
    "infer_objects", "info", "insert", "interpolate", "isin", "isna", "isnull", "items",
    "iterrows", "join", "keys", "kurt", "last", "le", "lookup", "lt", "mask", "max", "mean",
    "median", "melt", "memory_usage", "min", "mod", "mode", "mul", "ne", "nlargest", "notna",
    "notnull", "nsmallest", "nunique", "pad", "pct_change", "pipe", "pivot", "pivot_table",
    "pop", "pow", "prod", "quantile", "query", "rank", "reindex", "rename", "rename_axis",
    "replace", "resample", "rolling", "round", "sample", "set_axis", "set_index", "shift",
    "skew", "sort_index", "sort_values", "squeeze", "stack", "std", "sub", "sum", "swapaxes",
    "tail", "to_dict", "to_json", "to_numpy", "transform", "transpose", "truncate", "unstack",
    "update", "value_counts", "var", "where", "xs",
];

const SERIES_NOT_IMPLEMENTED: &[&str] = &[
    "abs", "add", "argmax", "argmin", "astype", "between", "clip", "copy", "count", "cumsum",
    "describe", "diff", "drop", "dropna", "ffill", "fillna", "idxmax", "idxmin", "isin", "isna",
    "map", "max", "mean", "median", "min", "mode", "nunique", "quantile", "rank", "replace",
    "round", "shift", "sort_values", "std", "sum", "tail", "to_list", "unique", "value_counts",
    "var", "where",
];

/// Recognized-but-unbuilt method names for a receiver.
#[must_use]
pub fn not_implemented_names(receiver: Receiver) -> &'static [&'static str] {
    match receiver {
        Receiver::DataFrame => DATAFRAME_NOT_IMPLEMENTED,
        Receiver::Series => SERIES_NOT_IMPLEMENTED,
    }
}

#[must_use]
pub fn is_not_implemented(receiver: Receiver, name: &str) -> bool {
    not_implemented_names(receiver).binary_search(&name).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePolicy {
    pub mode: RuntimeMode,
    pub join_row_cap: Option<usize>,
    pub issue_tracker_url: String,
}

impl RuntimePolicy {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: RuntimeMode::Strict,
            join_row_cap: None,
            issue_tracker_url: DEFAULT_ISSUE_TRACKER.to_owned(),
        }
    }

    #[must_use]
    pub fn hardened(join_row_cap: Option<usize>) -> Self {
        Self {
            mode: RuntimeMode::Hardened,
            join_row_cap,
            issue_tracker_url: DEFAULT_ISSUE_TRACKER.to_owned(),
        }
    }

    #[must_use]
    pub fn with_join_row_cap(mut self, cap: usize) -> Self {
        self.join_row_cap = Some(cap);
        self
    }

    #[must_use]
    pub fn with_issue_tracker(mut self, url: impl Into<String>) -> Self {
        self.issue_tracker_url = url.into();
        self
    }

    /// The error for a method that is either unbuilt or unknown.
    #[must_use]
    pub fn missing_method(&self, receiver: Receiver, name: &str) -> RuntimeError {
        if is_not_implemented(receiver, name) {
            RuntimeError::NotImplemented {
                receiver,
                name: name.to_owned(),
                tracker: self.issue_tracker_url.clone(),
            }
        } else {
            RuntimeError::UnknownMethod {
                receiver,
                name: name.to_owned(),
            }
        }
    }

    /// Same as [`Self::missing_method`], recording the refusal in the ledger.
    pub fn decide_missing_method(
        &self,
        receiver: Receiver,
        name: &str,
        ledger: &mut EvidenceLedger,
    ) -> RuntimeError {
        let err = self.missing_method(receiver, name);
        let kind = match err {
            RuntimeError::NotImplemented { .. } => IssueKind::NotImplemented,
            _ => IssueKind::UnknownMethod,
        };
        ledger.push(self.record(
            DecisionAction::Reject,
            CompatibilityIssue {
                kind,
                subject: format!("{receiver}.{name}"),
                detail: err.to_string(),
            },
        ));
        err
    }

    /// Admit or refuse a join producing `estimated_rows` rows.
    ///
    /// Strict mode refuses anything over the cap; hardened mode admits it and
    /// records a `Repair`.
    pub fn decide_join_admission(
        &self,
        estimated_rows: usize,
        ledger: &mut EvidenceLedger,
    ) -> Result<DecisionAction, RuntimeError> {
        let over_cap = self.join_row_cap.filter(|&cap| estimated_rows > cap);
        let action = match (over_cap, self.mode) {
            (None, _) => DecisionAction::Allow,
            (Some(_), RuntimeMode::Strict) => DecisionAction::Reject,
            (Some(_), RuntimeMode::Hardened) => DecisionAction::Repair,
        };
        let detail = match self.join_row_cap {
            Some(cap) => format!("estimated_rows={estimated_rows} cap={cap}"),
            None => format!("estimated_rows={estimated_rows}"),
        };
        ledger.push(self.record(
            action,
            CompatibilityIssue {
                kind: IssueKind::JoinCardinality,
                subject: "merge".to_owned(),
                detail,
            },
        ));

        match (action, over_cap) {
            (DecisionAction::Reject, Some(cap)) => Err(RuntimeError::JoinRejected {
                estimated_rows,
                cap,
            }),
            _ => Ok(action),
        }
    }

    fn record(&self, action: DecisionAction, issue: CompatibilityIssue) -> DecisionRecord {
        DecisionRecord {
            ts_unix_ms: now_unix_ms().unwrap_or_default(),
            mode: self.mode,
            action,
            issue,
        }
    }
}

impl Default for RuntimePolicy {
    fn default() -> Self {
        Self::strict()
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(
        "{receiver}.{name} is not implemented. If you need this functionality to exist, file an issue at '{tracker}' with the title '{receiver}.{name} needs implementation'. Please first search if an issue exists already"
    )]
    NotImplemented {
        receiver: Receiver,
        name: String,
        tracker: String,
    },
    #[error("{receiver} has no method '{name}'")]
    UnknownMethod { receiver: Receiver, name: String },
    #[error("join would produce {estimated_rows} rows, over the cap of {cap}")]
    JoinRejected { estimated_rows: usize, cap: usize },
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(u64::try_from(ms).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::{
        DATAFRAME_NOT_IMPLEMENTED, DecisionAction, EvidenceLedger, IssueKind, Receiver,
        RuntimeError, RuntimeMode, RuntimePolicy, SERIES_NOT_IMPLEMENTED, is_not_implemented,
    };

    #[test]
    fn registries_are_sorted_and_unique() {
        for table in [DATAFRAME_NOT_IMPLEMENTED, SERIES_NOT_IMPLEMENTED] {
            assert!(
                table.windows(2).all(|pair| pair[0] < pair[1]),
                "registry out of order"
            );
        }
    }

    #[test]
    fn implemented_names_are_not_registered() {
        for name in [
            "append",
            "apply",
            "drop_duplicates",
            "groupby",
            "head",
            "merge",
            "reset_index",
        ] {
            assert!(!is_not_implemented(Receiver::DataFrame, name), "{name}");
        }
        assert!(is_not_implemented(Receiver::DataFrame, "ffill"));
        assert!(is_not_implemented(Receiver::Series, "unique"));
    }

    #[test]
    fn not_implemented_message_names_the_operation() {
        let err = RuntimePolicy::strict().missing_method(Receiver::DataFrame, "ffill");
        assert_eq!(
            err.to_string(),
            "dataframe.ffill is not implemented. If you need this functionality to exist, file an issue at 'https://github.com/qri-io/starlib/issues' with the title 'dataframe.ffill needs implementation'. Please first search if an issue exists already"
        );
    }

    #[test]
    fn tracker_is_configurable() {
        let policy = RuntimePolicy::strict().with_issue_tracker("https://example.org/issues");
        let err = policy.missing_method(Receiver::Series, "unique");
        assert!(err.to_string().contains("'https://example.org/issues'"));
        assert!(err.to_string().starts_with("series.unique is not implemented."));
    }

    #[test]
    fn unknown_names_are_distinct_from_unbuilt_ones() {
        let err = RuntimePolicy::default().missing_method(Receiver::DataFrame, "frobnicate");
        assert!(matches!(err, RuntimeError::UnknownMethod { .. }));
        assert_eq!(err.to_string(), "dataframe has no method 'frobnicate'");
    }

    #[test]
    fn missing_method_lookups_are_logged() {
        let mut ledger = EvidenceLedger::new();
        let policy = RuntimePolicy::strict();
        let _ = policy.decide_missing_method(Receiver::DataFrame, "pivot", &mut ledger);
        let _ = policy.decide_missing_method(Receiver::DataFrame, "nope", &mut ledger);

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.records()[0].issue.kind, IssueKind::NotImplemented);
        assert_eq!(ledger.records()[0].issue.subject, "dataframe.pivot");
        assert_eq!(ledger.records()[1].issue.kind, IssueKind::UnknownMethod);
        assert!(
            ledger
                .records()
                .iter()
                .all(|r| r.action == DecisionAction::Reject)
        );
    }

    #[test]
    fn strict_rejects_oversize_join() {
        let mut ledger = EvidenceLedger::new();
        let policy = RuntimePolicy::strict().with_join_row_cap(10);

        let ok = policy.decide_join_admission(10, &mut ledger).expect("at cap");
        assert_eq!(ok, DecisionAction::Allow);

        let err = policy
            .decide_join_admission(11, &mut ledger)
            .expect_err("over cap");
        assert!(matches!(
            err,
            RuntimeError::JoinRejected {
                estimated_rows: 11,
                cap: 10
            }
        ));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.records()[1].action, DecisionAction::Reject);
    }

    #[test]
    fn hardened_admits_oversize_join() {
        let mut ledger = EvidenceLedger::new();
        let policy = RuntimePolicy::hardened(Some(2));
        let action = policy
            .decide_join_admission(50, &mut ledger)
            .expect("hardened admits");
        assert_eq!(action, DecisionAction::Repair);
        assert_eq!(ledger.records()[0].mode, RuntimeMode::Hardened);
        assert_eq!(ledger.records()[0].issue.detail, "estimated_rows=50 cap=2");
    }

    #[test]
    fn uncapped_policy_always_allows() {
        let mut ledger = EvidenceLedger::new();
        let action = RuntimePolicy::strict()
            .decide_join_admission(usize::MAX, &mut ledger)
            .expect("no cap");
        assert_eq!(action, DecisionAction::Allow);
    }

    #[test]
    fn ledger_exports_json_lines() {
        let mut ledger = EvidenceLedger::new();
        let policy = RuntimePolicy::hardened(None);
        let _ = policy.decide_missing_method(Receiver::Series, "mean", &mut ledger);
        let _ = policy.decide_join_admission(3, &mut ledger);

        let text = ledger.to_jsonl().expect("serialize");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["mode"], "hardened");
        assert_eq!(first["action"], "reject");
        assert_eq!(first["issue"]["kind"], "not_implemented");
        assert_eq!(first["issue"]["subject"], "series.mean");
        assert!(first["ts_unix_ms"].as_u64().is_some());
    }
}
