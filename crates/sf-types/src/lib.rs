#![forbid(unsafe_code)]

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resolved type of a whole column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    Int64,
    Float64,
    Utf8,
    /// Mixed or opaque values kept exactly as given.
    Object,
}

impl DType {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Utf8 => "string",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// A host value the engine stores by reference and never inspects.
///
/// Implementors only need to name their type and expose themselves as `Any`
/// so callers can downcast what they stored:
///
/// ```
/// use std::any::Any;
/// use sf_types::Opaque;
///
/// #[derive(Debug)]
/// struct Animal {
///     name: String,
/// }
///
/// impl Opaque for Animal {
///     fn type_name(&self) -> &str {
///         "Animal"
///     }
///
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
/// ```
pub trait Opaque: Any + fmt::Debug {
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    /// Text shown for this value when a frame is rendered.
    fn render(&self) -> String {
        format!("{self:?}")
    }
}

/// Shared handle to an opaque object. Equality is reference identity.
#[derive(Clone)]
pub struct ObjectRef(Rc<dyn Opaque>);

impl ObjectRef {
    pub fn new<T: Opaque>(value: T) -> Self {
        Self(Rc::new(value))
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.0.type_name()
    }

    #[must_use]
    pub fn render(&self) -> String {
        self.0.render()
    }

    #[must_use]
    pub fn downcast_ref<T: Opaque>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation; stable for the lifetime of the object.
    #[must_use]
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectRef").field(&self.0).finish()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Raw value handed in by the embedding caller, before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(ObjectRef),
    /// A host value the caller could not map to any storable kind.
    Foreign { type_name: String, repr: String },
}

impl Value {
    pub fn foreign(type_name: impl Into<String>, repr: impl Into<String>) -> Self {
        Self::Foreign {
            type_name: type_name.into(),
            repr: repr.into(),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Self::Object(value)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Null => Self::Null,
            Scalar::Bool(v) => Self::Bool(v),
            Scalar::Int64(v) => Self::Int(v),
            Scalar::Float64(v) => Self::Float(v),
            Scalar::Utf8(v) => Self::Str(v),
            Scalar::Object(v) => Self::Object(v),
        }
    }
}

/// One classified cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    #[serde(skip)]
    Object(ObjectRef),
}

impl Scalar {
    /// The column type this cell would resolve to on its own; `None` for nulls.
    #[must_use]
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(DType::Bool),
            Self::Int64(_) => Some(DType::Int64),
            Self::Float64(_) => Some(DType::Float64),
            Self::Utf8(_) => Some(DType::Utf8),
            Self::Object(_) => Some(DType::Object),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Value equality that ignores the numeric representation.
    ///
    /// `Int64(3)` equals `Float64(3.0)`, NaN equals NaN, and objects compare by
    /// reference.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Self::Int64(a), Self::Float64(b)) | (Self::Float64(b), Self::Int64(a)) => {
                float_to_int(*b) == Some(*a)
            }
            _ => self == other,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Null => Err(TypeError::ValueIsMissing),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
            Self::Object(v) => Err(TypeError::NonNumericValue {
                value: v.render(),
                dtype: DType::Object,
            }),
        }
    }
}

/// Hashable view of a cell that agrees with [`Scalar::semantic_eq`].
///
/// Integral floats hash as their integer, every NaN hashes alike and objects
/// hash by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKey<'a> {
    Null,
    Bool(bool),
    Int64(i64),
    FloatBits(u64),
    Utf8(&'a str),
    Object(usize),
}

impl Scalar {
    #[must_use]
    pub fn key(&self) -> ScalarKey<'_> {
        match self {
            Self::Null => ScalarKey::Null,
            Self::Bool(v) => ScalarKey::Bool(*v),
            Self::Int64(v) => ScalarKey::Int64(*v),
            Self::Float64(v) => match float_to_int(*v) {
                Some(i) => ScalarKey::Int64(i),
                None if v.is_nan() => ScalarKey::FloatBits(f64::NAN.to_bits()),
                None => ScalarKey::FloatBits(v.to_bits()),
            },
            Self::Utf8(v) => ScalarKey::Utf8(v.as_str()),
            Self::Object(v) => ScalarKey::Object(v.address()),
        }
    }
}

/// The value's own textual form, as shown in object columns.
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => f.write_str(v),
            Self::Object(v) => f.write_str(&v.render()),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("invalid object {repr} of type {type_name}")]
    InvalidObject { repr: String, type_name: String },
    #[error("cannot cast scalar of dtype {from} to {to}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("value {value:?} has non-numeric dtype {dtype}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing")]
    ValueIsMissing,
}

/// Classify one raw value into a cell.
pub fn classify(value: Value) -> Result<Scalar, TypeError> {
    Ok(match value {
        Value::Null => Scalar::Null,
        Value::Bool(v) => Scalar::Bool(v),
        Value::Int(v) => Scalar::Int64(v),
        Value::Float(v) => Scalar::Float64(v),
        Value::Str(v) => Scalar::Utf8(v),
        Value::Object(v) => Scalar::Object(v),
        Value::Foreign { type_name, repr } => {
            return Err(TypeError::InvalidObject { repr, type_name });
        }
    })
}

/// Classify every value of one logical column and resolve its type.
///
/// The first unclassifiable value aborts the whole call.
pub fn resolve_column(values: Vec<Value>) -> Result<(DType, Vec<Scalar>), TypeError> {
    let scalars = values
        .into_iter()
        .map(classify)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(resolve_scalars(scalars))
}

/// Resolve already-classified cells to one column type, re-expressing
/// numeric cells in that type.
#[must_use]
pub fn resolve_scalars(values: Vec<Scalar>) -> (DType, Vec<Scalar>) {
    let dtype = infer_dtype(&values);
    let coerced = match dtype {
        DType::Int64 | DType::Float64 => values
            .into_iter()
            .map(|value| widen_numeric(value, dtype))
            .collect(),
        _ => values,
    };
    (dtype, coerced)
}

/// 2^53: the largest magnitude below which every integer is exact in f64.
const MAX_EXACT_F64_INT: u64 = 1 << 53;

#[derive(Debug, Default)]
struct Inference {
    bools: bool,
    ints: bool,
    floats: bool,
    strings: bool,
    objects: bool,
    fractional: bool,
    wide_int: bool,
}

#[must_use]
pub fn infer_dtype(values: &[Scalar]) -> DType {
    let mut seen = Inference::default();
    for value in values {
        match value {
            Scalar::Null => {}
            Scalar::Bool(_) => seen.bools = true,
            Scalar::Int64(v) => {
                seen.ints = true;
                if v.unsigned_abs() > MAX_EXACT_F64_INT {
                    seen.wide_int = true;
                }
            }
            Scalar::Float64(v) => {
                seen.floats = true;
                if float_to_int(*v).is_none() {
                    seen.fractional = true;
                }
            }
            Scalar::Utf8(_) => seen.strings = true,
            Scalar::Object(_) => seen.objects = true,
        }
    }

    if seen.objects {
        return DType::Object;
    }
    let numeric = seen.ints || seen.floats;
    let families = [seen.bools, numeric, seen.strings]
        .iter()
        .filter(|present| **present)
        .count();
    match families {
        0 => DType::Utf8,
        1 if seen.strings => DType::Utf8,
        1 if seen.bools => DType::Bool,
        1 if !seen.fractional => DType::Int64,
        1 if seen.ints && seen.wide_int => DType::Object,
        1 => DType::Float64,
        _ => DType::Object,
    }
}

fn float_to_int(value: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
    if value.is_finite()
        && value.fract() == 0.0
        && value >= i64::MIN as f64
        && value < i64::MAX as f64
    {
        Some(value as i64)
    } else {
        None
    }
}

fn widen_numeric(value: Scalar, target: DType) -> Scalar {
    match (value, target) {
        (Scalar::Int64(v), DType::Float64) => Scalar::Float64(v as f64),
        (Scalar::Float64(v), DType::Int64) => match float_to_int(v) {
            Some(i) => Scalar::Int64(i),
            None => Scalar::Float64(v),
        },
        (other, _) => other,
    }
}

/// Cast one cell into an existing column type without re-resolving the column.
pub fn cast_scalar_owned(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    let Some(from) = value.dtype() else {
        return Ok(value);
    };
    if from == target || target == DType::Object {
        return Ok(value);
    }

    match (value, target) {
        (Scalar::Int64(v), DType::Float64) => {
            if v.unsigned_abs() > MAX_EXACT_F64_INT {
                Err(TypeError::InvalidCast { from, to: target })
            } else {
                Ok(Scalar::Float64(v as f64))
            }
        }
        (Scalar::Float64(v), DType::Int64) => float_to_int(v)
            .map(Scalar::Int64)
            .ok_or(TypeError::LossyFloatToInt { value: v }),
        _ => Err(TypeError::InvalidCast { from, to: target }),
    }
}

pub fn cast_scalar(value: &Scalar, target: DType) -> Result<Scalar, TypeError> {
    cast_scalar_owned(value.clone(), target)
}

// ── Nanops: null-skipping reductions ───────────────────────────────────

fn collect_finite(values: &[Scalar]) -> Vec<f64> {
    values
        .iter()
        .filter(|v| !v.is_missing())
        .filter_map(|v| v.to_f64().ok())
        .collect()
}

#[must_use]
pub fn nansum(values: &[Scalar]) -> Scalar {
    Scalar::Float64(collect_finite(values).iter().sum())
}

#[must_use]
pub fn nanmean(values: &[Scalar]) -> Scalar {
    let nums = collect_finite(values);
    if nums.is_empty() {
        return Scalar::Null;
    }
    let sum: f64 = nums.iter().sum();
    Scalar::Float64(sum / nums.len() as f64)
}

#[must_use]
pub fn nancount(values: &[Scalar]) -> Scalar {
    let n = values.iter().filter(|v| !v.is_missing()).count();
    Scalar::Int64(n as i64)
}

#[must_use]
pub fn nanmin(values: &[Scalar]) -> Scalar {
    let nums = collect_finite(values);
    if nums.is_empty() {
        return Scalar::Null;
    }
    Scalar::Float64(nums.iter().copied().fold(f64::INFINITY, f64::min))
}

#[must_use]
pub fn nanmax(values: &[Scalar]) -> Scalar {
    let nums = collect_finite(values);
    if nums.is_empty() {
        return Scalar::Null;
    }
    Scalar::Float64(nums.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}
