#![forbid(unsafe_code)]

use std::any::Any;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sf_frame::{DataFrame, FrameError, Key, Series};
use sf_groupby::{AggFunc, GroupByError, groupby};
use sf_index::IndexLabel;
use sf_io::{IoError, read_csv_str};
use sf_join::{JoinError, MergeOptions, merge_with_policy};
use sf_runtime::{EvidenceLedger, Receiver, RuntimeMode, RuntimePolicy};
use sf_types::{ObjectRef, Opaque, Value};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    /// Join row cap handed to hardened-mode fixtures.
    pub hardened_join_cap: usize,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            hardened_join_cap: 100_000,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
}

/// Engine failure observed while running one fixture.
#[derive(Debug, Error)]
pub enum CaseError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    GroupBy(#[from] GroupByError),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error(transparent)]
    Csv(#[from] IoError),
    #[error(transparent)]
    Fixture(#[from] HarnessError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOperation {
    FromRows,
    FromList,
    Append,
    Head,
    ResetIndex,
    DropDuplicates,
    Merge,
    GroupbyAgg,
    ReadCsv,
    MethodLookup,
    SelectBool,
}

/// A JSON array or object stored in a frame as an opaque value.
#[derive(Debug)]
pub struct JsonObject(pub serde_json::Value);

impl Opaque for JsonObject {
    fn type_name(&self) -> &str {
        "json"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn render(&self) -> String {
        self.0.to_string()
    }
}

/// Convert a fixture cell.
///
/// `{"$foreign": {"type": .., "repr": ..}}` stands for a host value the engine
/// must refuse. Any other array or object becomes a [`JsonObject`].
pub fn json_to_value(cell: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match cell {
        Json::Null => Value::Null,
        Json::Bool(v) => Value::Bool(*v),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        Json::String(s) => Value::Str(s.clone()),
        Json::Object(map) => match map.get("$foreign") {
            Some(foreign) => Value::foreign(
                foreign.get("type").and_then(Json::as_str).unwrap_or("unknown"),
                foreign.get("repr").and_then(Json::as_str).unwrap_or_default(),
            ),
            None => Value::Object(ObjectRef::new(JsonObject(cell.clone()))),
        },
        Json::Array(_) => Value::Object(ObjectRef::new(JsonObject(cell.clone()))),
    }
}

pub fn json_to_label(label: &serde_json::Value) -> Result<IndexLabel, HarnessError> {
    match label {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(IndexLabel::Int64)
            .ok_or_else(|| HarnessError::FixtureFormat(format!("label {n} is not an integer"))),
        serde_json::Value::String(s) => Ok(IndexLabel::Utf8(s.clone())),
        other => Err(HarnessError::FixtureFormat(format!(
            "label must be an integer or string, got {other}"
        ))),
    }
}

fn labels(raw: Option<&[serde_json::Value]>) -> Result<Option<Vec<IndexLabel>>, HarnessError> {
    raw.map(|values| values.iter().map(json_to_label).collect())
        .transpose()
}

fn rows(raw: &[Vec<serde_json::Value>]) -> Vec<Vec<Value>> {
    raw.iter()
        .map(|row| row.iter().map(json_to_value).collect())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketFixture {
    pub case_id: String,
    pub mode: RuntimeMode,
    pub operation: FixtureOperation,
    #[serde(default)]
    pub rows: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    pub list: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub columns: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub index: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub other_rows: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    pub other_columns: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub ignore_index: bool,
    #[serde(default)]
    pub drop: bool,
    #[serde(default)]
    pub head_n: Option<usize>,
    #[serde(default)]
    pub subset: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub merge_on: Option<serde_json::Value>,
    #[serde(default)]
    pub groupby_key: Option<serde_json::Value>,
    #[serde(default)]
    pub agg: Option<String>,
    #[serde(default)]
    pub csv_input: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub expected_render: Option<String>,
    #[serde(default)]
    pub expected_shape: Option<(usize, usize)>,
    #[serde(default)]
    pub expected_error_contains: Option<String>,
}

impl PacketFixture {
    fn frame(&self) -> Result<DataFrame, CaseError> {
        let raw = self
            .rows
            .as_deref()
            .ok_or_else(|| missing_field(&self.case_id, "rows"))?;
        Ok(DataFrame::from_rows(
            rows(raw),
            labels(self.columns.as_deref())?,
            labels(self.index.as_deref())?,
        )?)
    }

    fn other_frame(&self) -> Result<DataFrame, CaseError> {
        let raw = self
            .other_rows
            .as_deref()
            .ok_or_else(|| missing_field(&self.case_id, "other_rows"))?;
        Ok(DataFrame::from_rows(
            rows(raw),
            labels(self.other_columns.as_deref())?,
            None,
        )?)
    }

    fn label(&self, raw: Option<&serde_json::Value>, field: &str) -> Result<IndexLabel, CaseError> {
        let raw = raw.ok_or_else(|| missing_field(&self.case_id, field))?;
        Ok(json_to_label(raw)?)
    }
}

fn missing_field(case_id: &str, field: &str) -> HarnessError {
    HarnessError::FixtureFormat(format!("case {case_id} needs '{field}'"))
}

fn parse_agg(name: &str) -> Result<AggFunc, HarnessError> {
    Ok(match name {
        "sum" => AggFunc::Sum,
        "mean" => AggFunc::Mean,
        "count" => AggFunc::Count,
        "min" => AggFunc::Min,
        "max" => AggFunc::Max,
        "first" => AggFunc::First,
        "last" => AggFunc::Last,
        "size" => AggFunc::Size,
        other => {
            return Err(HarnessError::FixtureFormat(format!(
                "unknown aggregation '{other}'"
            )));
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub mode: RuntimeMode,
    pub operation: FixtureOperation,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    /// Policy decisions recorded while the case ran.
    pub ledger_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    pub fn to_json(&self) -> Result<String, HarnessError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn run_suite(config: &HarnessConfig) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(&config.fixture_root)?;
    let results: Vec<CaseResult> = fixtures
        .iter()
        .map(|fixture| run_fixture(config, fixture))
        .collect();
    let passed = results
        .iter()
        .filter(|result| result.status == CaseStatus::Pass)
        .count();
    Ok(SuiteReport {
        suite: "golden".to_owned(),
        fixture_count: results.len(),
        passed,
        failed: results.len() - passed,
        results,
    })
}

pub fn load_fixtures(root: &Path) -> Result<Vec<PacketFixture>, HarnessError> {
    let mut fixtures = Vec::new();
    for path in list_fixture_files(root)? {
        let body = fs::read_to_string(&path)?;
        fixtures.push(serde_json::from_str::<PacketFixture>(&body)?);
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[must_use]
pub fn run_fixture(config: &HarnessConfig, fixture: &PacketFixture) -> CaseResult {
    let policy = match fixture.mode {
        RuntimeMode::Strict => RuntimePolicy::strict(),
        RuntimeMode::Hardened => RuntimePolicy::hardened(Some(config.hardened_join_cap)),
    };
    let mut ledger = EvidenceLedger::new();
    let outcome = run_operation(fixture, &policy, &mut ledger);
    let mismatch = check_expectations(fixture, outcome).err();

    CaseResult {
        case_id: fixture.case_id.clone(),
        mode: fixture.mode,
        operation: fixture.operation,
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        ledger_entries: ledger.len(),
    }
}

fn run_operation(
    fixture: &PacketFixture,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Result<DataFrame, CaseError> {
    match fixture.operation {
        FixtureOperation::FromRows => fixture.frame(),
        FixtureOperation::FromList => {
            let raw = fixture
                .list
                .as_deref()
                .ok_or_else(|| missing_field(&fixture.case_id, "list"))?;
            let series = Series::from_list(raw.iter().map(json_to_value).collect())?;
            Ok(series.to_frame()?)
        }
        FixtureOperation::Append => {
            let frame = fixture.frame()?;
            Ok(frame.append(&fixture.other_frame()?, fixture.ignore_index)?)
        }
        FixtureOperation::Head => Ok(fixture.frame()?.head(fixture.head_n.unwrap_or(5))),
        FixtureOperation::ResetIndex => Ok(fixture.frame()?.reset_index(fixture.drop)?),
        FixtureOperation::DropDuplicates => {
            let subset = labels(fixture.subset.as_deref())?;
            Ok(fixture.frame()?.drop_duplicates(subset.as_deref())?)
        }
        FixtureOperation::Merge => {
            let on = fixture.label(fixture.merge_on.as_ref(), "merge_on")?;
            let (merged, _) = merge_with_policy(
                &fixture.frame()?,
                &fixture.other_frame()?,
                on,
                &MergeOptions::default(),
                policy,
                ledger,
            )?;
            Ok(merged)
        }
        FixtureOperation::GroupbyAgg => {
            let key = fixture.label(fixture.groupby_key.as_ref(), "groupby_key")?;
            let func = parse_agg(fixture.agg.as_deref().unwrap_or("size"))?;
            let frame = fixture.frame()?;
            Ok(groupby(&frame, key)?.agg(func)?)
        }
        FixtureOperation::ReadCsv => {
            let input = fixture
                .csv_input
                .as_deref()
                .ok_or_else(|| missing_field(&fixture.case_id, "csv_input"))?;
            Ok(read_csv_str(input)?)
        }
        FixtureOperation::MethodLookup => {
            let name = fixture
                .method
                .as_deref()
                .ok_or_else(|| missing_field(&fixture.case_id, "method"))?;
            let frame = fixture.frame()?;
            match fixture.receiver.as_deref().and_then(receiver_for) {
                Some(Receiver::Series) => {
                    let first = frame.columns().first().cloned().unwrap_or(IndexLabel::Int64(0));
                    frame
                        .get(first)?
                        .method_with_policy(name, policy, ledger)?;
                }
                _ => {
                    frame.method_with_policy(name, policy, ledger)?;
                }
            }
            Ok(frame)
        }
        FixtureOperation::SelectBool => {
            let frame = fixture.frame()?;
            frame.get_item(Key::Bool(true))?;
            Ok(frame)
        }
    }
}

fn check_expectations(
    fixture: &PacketFixture,
    outcome: Result<DataFrame, CaseError>,
) -> Result<(), String> {
    let frame = match (outcome, &fixture.expected_error_contains) {
        (Err(err), Some(needle)) => {
            let message = err.to_string();
            return if message.contains(needle.as_str()) {
                Ok(())
            } else {
                Err(format!("error {message:?} does not contain {needle:?}"))
            };
        }
        (Err(err), None) => return Err(format!("unexpected error: {err}")),
        (Ok(_), Some(needle)) => return Err(format!("expected an error containing {needle:?}")),
        (Ok(frame), None) => frame,
    };

    if let Some(expected) = &fixture.expected_render {
        let got = frame.to_string();
        if &got != expected {
            return Err(format!("render mismatch: expected {expected:?}, got {got:?}"));
        }
    }
    if let Some(expected) = fixture.expected_shape {
        let got = frame.size();
        if got != expected {
            return Err(format!("shape mismatch: expected {expected:?}, got {got:?}"));
        }
    }
    Ok(())
}

/// Receivers named by method-lookup fixtures.
#[must_use]
pub fn receiver_for(name: &str) -> Option<Receiver> {
    match name {
        "dataframe" => Some(Receiver::DataFrame),
        "series" => Some(Receiver::Series),
        _ => None,
    }
}
