use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

pub const SYNTHETIC_ID_PREFIX: &str = "new-";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractPeriod(pub u32);

impl fmt::Display for ContractPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// A row of the rebate grid: a monthly plan price bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRange {
    pub value: u64,
    pub label: String,
}

impl PlanRange {
    pub fn new(value: u64) -> Self {
        Self { value, label: default_label(value) }
    }

    pub fn with_label(value: u64, label: impl Into<String>) -> Self {
        Self { value, label: label.into() }
    }

    /// Parses a stored plan-range key: plain digits (`"11000"`, `"11,000"`) or a
    /// thousands label (`"11K"`, `"11.5k"`).
    pub fn parse_key(raw: &str) -> Option<u64> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(thousands) = trimmed.strip_suffix(['K', 'k']) {
            return parse_thousands(thousands.trim());
        }

        trimmed.replace(',', "").parse::<u64>().ok()
    }
}

fn default_label(value: u64) -> String {
    if value >= 1_000 && value % 100 == 0 {
        let thousands = value / 1_000;
        let hundreds = (value % 1_000) / 100;
        if hundreds == 0 {
            format!("{thousands}K")
        } else {
            format!("{thousands}.{hundreds}K")
        }
    } else {
        value.to_string()
    }
}

fn parse_thousands(raw: &str) -> Option<u64> {
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (raw, ""),
    };
    if whole.is_empty() || fraction.len() > 3 {
        return None;
    }
    if !fraction.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }

    let whole = whole.parse::<u64>().ok()?.checked_mul(1_000)?;
    if fraction.is_empty() {
        return Some(whole);
    }
    let scale = 10u64.pow(3 - fraction.len() as u32);
    let fraction = fraction.parse::<u64>().ok()? * scale;
    whole.checked_add(fraction)
}

/// How a plan range is stored in a flat record. Historical data may carry the
/// label or a numeric string instead of the number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PlanRangeKey {
    Value(u64),
    Text(String),
}

impl PlanRangeKey {
    pub fn matches(&self, range: &PlanRange) -> bool {
        match self {
            Self::Value(value) => *value == range.value,
            Self::Text(text) => {
                let text = text.trim();
                text.eq_ignore_ascii_case(range.label.trim())
                    || PlanRange::parse_key(text) == Some(range.value)
            }
        }
    }

    pub fn resolve(&self) -> Option<u64> {
        match self {
            Self::Value(value) => Some(*value),
            Self::Text(text) => PlanRange::parse_key(text),
        }
    }

    /// The label carried by a legacy text key, if the key is a label rather
    /// than a number.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Value(_) => None,
            Self::Text(text) if text.trim().replace(',', "").parse::<u64>().is_ok() => None,
            Self::Text(text) => Some(text.trim()),
        }
    }
}

impl<'de> Deserialize<'de> for PlanRangeKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(number) => whole_number(&number)
                .map(Self::Value)
                .ok_or_else(|| de::Error::custom(format!("plan_range `{number}` is not a whole non-negative number"))),
            Value::String(text) => Ok(Self::Text(text)),
            other => Err(de::Error::custom(format!("unsupported plan_range `{other}`"))),
        }
    }
}

impl From<u64> for PlanRangeKey {
    fn from(value: u64) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for PlanRangeKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub plan_range: u64,
    pub contract_period: ContractPeriod,
}

impl CellKey {
    pub fn new(plan_range: u64, contract_period: u32) -> Self {
        Self { plan_range, contract_period: ContractPeriod(contract_period) }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.plan_range, self.contract_period)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordId {
    Persisted(u64),
    Synthetic(String),
}

impl RecordId {
    pub fn synthetic() -> Self {
        Self::Synthetic(format!("{SYNTHETIC_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic(_))
    }
}

impl Serialize for RecordId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Persisted(id) => serializer.serialize_u64(*id),
            Self::Synthetic(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(number) => number
                .as_u64()
                .map(Self::Persisted)
                .ok_or_else(|| de::Error::custom(format!("record id `{number}` is not a u64"))),
            Value::String(text) if text.starts_with(SYNTHETIC_ID_PREFIX) => {
                Ok(Self::Synthetic(text))
            }
            Value::String(text) => text
                .trim()
                .parse::<u64>()
                .map(Self::Persisted)
                .map_err(|_| de::Error::custom(format!("unsupported record id `{text}`"))),
            other => Err(de::Error::custom(format!("unsupported record id `{other}`"))),
        }
    }
}

/// The flat `{plan_range, contract_period, rebate_amount}` shape the backend
/// stores and returns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRecord {
    pub plan_range: PlanRangeKey,
    #[serde(deserialize_with = "lenient_period")]
    pub contract_period: ContractPeriod,
    #[serde(deserialize_with = "lenient_amount")]
    pub rebate_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
}

impl MatrixRecord {
    pub fn new(plan_range: impl Into<PlanRangeKey>, contract_period: u32, rebate_amount: u64) -> Self {
        Self {
            plan_range: plan_range.into(),
            contract_period: ContractPeriod(contract_period),
            rebate_amount,
            id: None,
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Coerces free-form amount input: negative or non-numeric becomes 0 and
/// fractions are truncated.
pub fn coerce_amount_input(raw: &str) -> u64 {
    let trimmed = raw.trim().replace(',', "");
    if let Ok(value) = trimmed.parse::<u64>() {
        return value;
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value.trunc() as u64,
        _ => 0,
    }
}

fn lenient_amount<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(number) => {
            if let Some(value) = number.as_u64() {
                Ok(value)
            } else if number.as_i64().is_some() {
                Ok(0)
            } else {
                Ok(number.as_f64().map(|value| coerce_amount_input(&value.to_string())).unwrap_or(0))
            }
        }
        Value::String(text) => Ok(coerce_amount_input(&text)),
        other => Err(de::Error::custom(format!("unsupported rebate_amount `{other}`"))),
    }
}

/// `12` and `12.0` both read as 12; fractional or negative values do not.
fn whole_number(number: &serde_json::Number) -> Option<u64> {
    number.as_u64().or_else(|| whole_float(number.as_f64()?))
}

fn whole_float(value: f64) -> Option<u64> {
    let in_range = value.is_finite() && value >= 0.0 && value <= u64::MAX as f64;
    (in_range && value.fract() == 0.0).then_some(value as u64)
}

fn lenient_period<'de, D>(deserializer: D) -> Result<ContractPeriod, D::Error>
where
    D: Deserializer<'de>,
{
    let months = match Value::deserialize(deserializer)? {
        Value::Number(number) => whole_number(&number),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<u64>().ok().or_else(|| whole_float(text.parse::<f64>().ok()?))
        }
        _ => None,
    };
    months
        .and_then(|months| u32::try_from(months).ok())
        .map(ContractPeriod)
        .ok_or_else(|| de::Error::custom("contract_period must be a non-negative month count"))
}
