use std::{cmp::Ordering, fmt, str::FromStr};

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const TIME_FORMAT: &str = "%H:%M:%S";
/// Storage layouts keep sub-second precision only when present so that
/// lexicographic comparison of stored text matches chronological order.
pub const STORED_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
pub const STORED_TIME_FORMAT: &str = "%H:%M:%S%.f";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl Eq for Value {}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Decimal(d) => d.normalize().to_string(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
            Value::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
            Value::Time(t) => t.format(TIME_FORMAT).to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Calendar date carried by the value, if it has one.
    pub fn date_component(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_) | Value::Decimal(_))
    }

    /// Ordering between values that are meaningfully comparable.
    ///
    /// Numbers compare across representations and dates compare with
    /// datetimes at midnight; any other mix yields `None`.
    pub fn natural_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::DateTime(b)) => Some(a.and_time(NaiveTime::MIN).cmp(b)),
            (Value::DateTime(a), Value::Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::MIN))),
            (left, right) if left.is_numeric() && right.is_numeric() => {
                let (l, r) = (left.as_f64()?, right.as_f64()?);
                Some(l.total_cmp(&r))
            }
            _ => None,
        }
    }
}

impl Value {
    /// Position of the value's comparison class: numbers, then calendar
    /// values, then times of day, then text.
    fn class_rank(&self) -> u8 {
        match self {
            Value::Integer(_) | Value::Float(_) | Value::Decimal(_) => 0,
            Value::Date(_) | Value::DateTime(_) => 1,
            Value::Time(_) => 2,
            Value::String(_) => 3,
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Integer(_) => 0,
            Value::Float(_) => 1,
            Value::Decimal(_) => 2,
            Value::Date(_) => 3,
            Value::DateTime(_) => 4,
            Value::Time(_) => 5,
            Value::String(_) => 6,
        }
    }
}

/// Total order: by class first, naturally within a class, and by variant
/// when two representations hold the same quantity. Numbers compare as
/// `f64` before their exact representation so mixed numeric runs stay
/// transitive.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.class_rank()
            .cmp(&other.class_rank())
            .then_with(|| match (self.as_f64(), other.as_f64()) {
                (Some(left), Some(right)) => left.total_cmp(&right),
                _ => self.natural_cmp(other).unwrap_or(Ordering::Equal),
            })
            .then_with(|| self.variant_rank().cmp(&other.variant_rank()))
            .then_with(|| self.natural_cmp(other).unwrap_or(Ordering::Equal))
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComparableValue(pub Option<Value>);

impl Ord for ComparableValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(left), Some(right)) => left.cmp(right),
        }
    }
}

impl PartialOrd for ComparableValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"];
    let trimmed = value.trim();
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%d-%m-%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];
    let trimmed = value.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

pub fn parse_naive_time(value: &str) -> Result<NaiveTime> {
    const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];
    let trimmed = value.trim();
    for fmt in TIME_FORMATS {
        if let Ok(parsed) = NaiveTime::parse_from_str(trimmed, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as time"))
}

/// Datetime literal or bare date; bare dates widen to the start or the end
/// of that day.
pub fn parse_date_bound(value: &str, as_end: bool) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains('T') || trimmed.contains(' ') {
        return parse_naive_datetime(trimmed).ok();
    }
    let date = parse_naive_date(trimmed).ok()?;
    Some(if as_end {
        date.and_time(end_of_day())
    } else {
        date.and_time(NaiveTime::MIN)
    })
}

pub fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN)
}

/// Looks like a bare `YYYY-MM-DD` literal without a time component.
pub fn is_bare_date(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.len() == 10 && !trimmed.contains('T') && !trimmed.contains(' ')
}

pub fn parse_decimal_literal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

/// Converts an arbitrary-precision decimal into a locally storable number.
/// Integral values that fit become integers; the rest lose precision to f64.
pub fn normalize_decimal(value: Decimal) -> Value {
    if value.fract().is_zero()
        && let Some(integer) = value.to_i64()
    {
        return Value::Integer(integer);
    }
    value
        .to_f64()
        .map(Value::Float)
        .unwrap_or_else(|| Value::String(value.to_string()))
}
