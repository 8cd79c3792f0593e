//! Filter compiler.
//!
//! Saved filters come from a report definition, request-time filters from
//! the caller. Both compile into [`Predicate`]s over stored columns and are
//! combined by conjunction, saved filters first. Filters on unknown or
//! derived fields, unsupported operators and malformed literals are dropped
//! rather than reported.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{self, FieldKind, FieldRef, TRIP_COLUMNS},
    data::{
        Value, is_bare_date, normalize_decimal, parse_date_bound, parse_decimal_literal,
        parse_naive_date, parse_naive_time,
    },
};

const RUNTIME_FROM_PREFIX: &str = "rt_from_";
const RUNTIME_TO_PREFIX: &str = "rt_to_";
const RUNTIME_OP_PREFIX: &str = "rt_op_";
const RUNTIME_VALUE_PREFIX: &str = "rt_val_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    Between,
    IsNull,
    NotNull,
}

impl FilterOperator {
    /// Case-insensitive; an empty operator means equality.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let op = match lowered.as_str() {
            "" | "=" | "==" => FilterOperator::Eq,
            "!=" | "<>" => FilterOperator::NotEq,
            "<" => FilterOperator::Lt,
            "<=" => FilterOperator::Le,
            ">" => FilterOperator::Gt,
            ">=" => FilterOperator::Ge,
            "like" => FilterOperator::Like,
            "not_like" => FilterOperator::NotLike,
            "between" => FilterOperator::Between,
            "is_null" => FilterOperator::IsNull,
            "not_null" => FilterOperator::NotNull,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::NotEq => "!=",
            FilterOperator::Lt => "<",
            FilterOperator::Le => "<=",
            FilterOperator::Gt => ">",
            FilterOperator::Ge => ">=",
            FilterOperator::Like => "like",
            FilterOperator::NotLike => "not_like",
            FilterOperator::Between => "between",
            FilterOperator::IsNull => "is_null",
            FilterOperator::NotNull => "not_null",
        }
    }

    fn comparison(self) -> Option<Comparison> {
        match self {
            FilterOperator::Eq => Some(Comparison::Eq),
            FilterOperator::NotEq => Some(Comparison::NotEq),
            FilterOperator::Lt => Some(Comparison::Lt),
            FilterOperator::Le => Some(Comparison::Le),
            FilterOperator::Gt => Some(Comparison::Gt),
            FilterOperator::Ge => Some(Comparison::Ge),
            _ => None,
        }
    }
}

/// Filter payload: a scalar literal or an explicit `[start, end]` pair.
///
/// Range operators also accept the older `"start,end"` scalar layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Range(String, String),
    Scalar(String),
}

impl FilterValue {
    fn scalar(&self) -> Option<&str> {
        match self {
            FilterValue::Scalar(value) => Some(value.trim()).filter(|v| !v.is_empty()),
            FilterValue::Range(..) => None,
        }
    }

    fn bounds(&self) -> Option<(&str, &str)> {
        match self {
            FilterValue::Range(start, end) => Some((start.trim(), end.trim())),
            FilterValue::Scalar(value) => {
                let (start, end) = value.split_once(',')?;
                if end.contains(',') {
                    return None;
                }
                Some((start.trim(), end.trim()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub field: String,
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub value: Option<FilterValue>,
}

impl FilterSpec {
    pub fn new(field: impl Into<String>, op: FilterOperator, value: Option<FilterValue>) -> Self {
        Self {
            field: field.into(),
            op: op.as_str().to_string(),
            value,
        }
    }

    pub fn scalar(field: impl Into<String>, op: FilterOperator, value: impl Into<String>) -> Self {
        Self::new(field, op, Some(FilterValue::Scalar(value.into())))
    }

    pub fn operator(&self) -> Option<FilterOperator> {
        FilterOperator::parse(&self.op)
    }
}

/// One entry of a report's saved filter list.
///
/// Bare strings are the older layout: they carry no condition of their own
/// and only mark the field as eligible for request-time filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SavedFilter {
    Spec(FilterSpec),
    Legacy(String),
}

impl SavedFilter {
    pub fn field(&self) -> &str {
        match self {
            SavedFilter::Spec(spec) => &spec.field,
            SavedFilter::Legacy(field) => field,
        }
    }
}

/// Ad-hoc filter supplied with a single render request.
///
/// Date fields use `from`/`to`; every other kind uses `op` (default `=`)
/// and `value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeFilter {
    pub op: Option<String>,
    pub value: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeFilters {
    by_field: BTreeMap<String, RuntimeFilter>,
}

impl RuntimeFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, filter: RuntimeFilter) -> Self {
        self.by_field.insert(field.into(), filter);
        self
    }

    pub fn get(&self, field: &str) -> Option<&RuntimeFilter> {
        self.by_field.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.by_field.is_empty()
    }

    /// Collects `rt_from_<field>`, `rt_to_<field>`, `rt_op_<field>` and
    /// `rt_val_<field>` request parameters; other keys are ignored.
    pub fn from_params<'a>(params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut filters = Self::new();
        for (key, value) in params {
            let (field, slot) = if let Some(field) = key.strip_prefix(RUNTIME_FROM_PREFIX) {
                (field, 0)
            } else if let Some(field) = key.strip_prefix(RUNTIME_TO_PREFIX) {
                (field, 1)
            } else if let Some(field) = key.strip_prefix(RUNTIME_OP_PREFIX) {
                (field, 2)
            } else if let Some(field) = key.strip_prefix(RUNTIME_VALUE_PREFIX) {
                (field, 3)
            } else {
                continue;
            };
            if field.is_empty() {
                continue;
            }
            let entry = filters.by_field.entry(field.to_string()).or_default();
            let value = Some(value.to_string());
            match slot {
                0 => entry.from = value,
                1 => entry.to = value,
                2 => entry.op = value,
                _ => entry.value = value,
            }
        }
        filters
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::NotEq => "!=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

/// Store-native condition on one stored column.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    IsNull(&'static str),
    NotNull(&'static str),
    /// `on_date` compares the calendar date of the column rather than the
    /// full stored value.
    Compare {
        column: &'static str,
        op: Comparison,
        value: Value,
        on_date: bool,
    },
    Like {
        column: &'static str,
        pattern: String,
        negated: bool,
    },
}

impl Predicate {
    pub fn column(&self) -> &'static str {
        match *self {
            Predicate::IsNull(column) | Predicate::NotNull(column) => column,
            Predicate::Compare { column, .. } | Predicate::Like { column, .. } => column,
        }
    }
}

/// Compiles saved filters followed by the request-time filters of every
/// field named in the saved list.
pub fn compile(dataset: &str, saved: &[SavedFilter], runtime: &RuntimeFilters) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    for entry in saved {
        let SavedFilter::Spec(spec) = entry else {
            continue;
        };
        let Some((column, kind)) = stored_column(dataset, &spec.field) else {
            continue;
        };
        let Some(op) = spec.operator() else {
            debug!("Ignoring filter on '{}' with unknown operator '{}'", spec.field, spec.op);
            continue;
        };
        compile_condition(column, kind, op, spec.value.as_ref(), &mut predicates);
    }

    if !runtime.is_empty() {
        for field in eligible_fields(saved) {
            let Some(filter) = runtime.get(field) else {
                continue;
            };
            let Some((column, kind)) = stored_column(dataset, field) else {
                continue;
            };
            compile_runtime(column, kind, filter, &mut predicates);
        }
    }
    predicates
}

/// Fields accepting request-time filters, in saved order without repeats.
pub fn eligible_fields(saved: &[SavedFilter]) -> Vec<&str> {
    let mut fields: Vec<&str> = Vec::new();
    for entry in saved {
        let field = entry.field();
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    fields
}

fn stored_column(dataset: &str, field: &str) -> Option<(&'static str, FieldKind)> {
    match catalog::resolve(dataset, field) {
        Some(FieldRef::Stored(index)) => {
            let column = &TRIP_COLUMNS[index];
            Some((column.name, column.class.kind()))
        }
        Some(FieldRef::Derived(derived)) => {
            debug!("Ignoring filter on derived field '{}'", derived.name());
            None
        }
        None => {
            debug!("Ignoring filter on unknown field '{field}'");
            None
        }
    }
}

fn compile_condition(
    column: &'static str,
    kind: FieldKind,
    op: FilterOperator,
    value: Option<&FilterValue>,
    out: &mut Vec<Predicate>,
) {
    if op == FilterOperator::IsNull {
        out.push(Predicate::IsNull(column));
        return;
    }
    if op == FilterOperator::NotNull {
        out.push(Predicate::NotNull(column));
        return;
    }
    let before = out.len();
    match kind {
        FieldKind::Date => compile_date(column, op, value, out),
        FieldKind::Time => compile_time(column, op, value, out),
        FieldKind::Number | FieldKind::Text => compile_scalar(column, kind, op, value, out),
    }
    if out.len() == before {
        debug!(
            "Dropped '{}' filter on '{column}' with value {value:?}",
            op.as_str()
        );
    }
}

fn compile_date(
    column: &'static str,
    op: FilterOperator,
    value: Option<&FilterValue>,
    out: &mut Vec<Predicate>,
) {
    if op == FilterOperator::Between {
        let Some((start, end)) = value.and_then(FilterValue::bounds) else {
            return;
        };
        if let Some(start) = parse_date_bound(start, false) {
            out.push(compare(column, Comparison::Ge, Value::DateTime(start), false));
        }
        if let Some(end) = parse_date_bound(end, true) {
            out.push(compare(column, Comparison::Le, Value::DateTime(end), false));
        }
        return;
    }
    let Some(comparison) = op.comparison() else {
        return;
    };
    let as_end = matches!(comparison, Comparison::Lt | Comparison::Le);
    let Some(bound) = value
        .and_then(FilterValue::scalar)
        .and_then(|raw| parse_date_bound(raw, as_end))
    else {
        return;
    };
    let predicate = match comparison {
        Comparison::Eq | Comparison::NotEq => {
            compare(column, comparison, Value::Date(bound.date()), true)
        }
        _ => compare(column, comparison, Value::DateTime(bound), false),
    };
    out.push(predicate);
}

fn compile_time(
    column: &'static str,
    op: FilterOperator,
    value: Option<&FilterValue>,
    out: &mut Vec<Predicate>,
) {
    if op == FilterOperator::Between {
        let Some((start, end)) = value.and_then(FilterValue::bounds) else {
            return;
        };
        if let Ok(start) = parse_naive_time(start) {
            out.push(compare(column, Comparison::Ge, Value::Time(start), false));
        }
        if let Ok(end) = parse_naive_time(end) {
            out.push(compare(column, Comparison::Le, Value::Time(end), false));
        }
        return;
    }
    let Some(comparison) = op.comparison() else {
        return;
    };
    if let Some(time) = value
        .and_then(FilterValue::scalar)
        .and_then(|raw| parse_naive_time(raw).ok())
    {
        out.push(compare(column, comparison, Value::Time(time), false));
    }
}

fn compile_scalar(
    column: &'static str,
    kind: FieldKind,
    op: FilterOperator,
    value: Option<&FilterValue>,
    out: &mut Vec<Predicate>,
) {
    let Some(raw) = value.and_then(FilterValue::scalar) else {
        return;
    };
    match op {
        FilterOperator::Like | FilterOperator::NotLike => out.push(Predicate::Like {
            column,
            pattern: format!("%{raw}%"),
            negated: op == FilterOperator::NotLike,
        }),
        _ => {
            if let Some(comparison) = op.comparison() {
                out.push(compare(column, comparison, literal(kind, raw), false));
            }
        }
    }
}

/// Number fields bind numeric literals as numbers and anything else as text.
fn literal(kind: FieldKind, raw: &str) -> Value {
    if kind == FieldKind::Number
        && let Some(number) = parse_decimal_literal(raw)
    {
        return normalize_decimal(number);
    }
    Value::String(raw.to_string())
}

fn compile_runtime(
    column: &'static str,
    kind: FieldKind,
    filter: &RuntimeFilter,
    out: &mut Vec<Predicate>,
) {
    if kind == FieldKind::Date {
        compile_runtime_range(column, filter, out);
        return;
    }
    let raw_op = filter.op.as_deref().unwrap_or("");
    let Some(op) = FilterOperator::parse(raw_op) else {
        debug!("Ignoring request filter on '{column}' with unknown operator '{raw_op}'");
        return;
    };
    let value = filter.value.as_deref().unwrap_or("").trim();
    if value.is_empty() && !matches!(op, FilterOperator::IsNull | FilterOperator::NotNull) {
        return;
    }
    let value = FilterValue::Scalar(value.to_string());
    compile_condition(column, kind, op, Some(&value), out);
}

/// Date request filters: a bare-date bound switches both bounds to
/// calendar-date comparison, otherwise full timestamps are compared.
fn compile_runtime_range(column: &'static str, filter: &RuntimeFilter, out: &mut Vec<Predicate>) {
    let start = filter.from.as_deref().map(str::trim).filter(|v| !v.is_empty());
    let end = filter.to.as_deref().map(str::trim).filter(|v| !v.is_empty());
    let date_only = start.is_some_and(is_bare_date) || end.is_some_and(is_bare_date);

    if date_only {
        if let Some(day) = start.and_then(|raw| parse_naive_date(raw).ok()) {
            out.push(compare(column, Comparison::Ge, Value::Date(day), true));
        }
        if let Some(day) = end.and_then(|raw| parse_naive_date(raw).ok()) {
            out.push(compare(column, Comparison::Le, Value::Date(day), true));
        }
        return;
    }
    if let Some(bound) = start.and_then(|raw| parse_date_bound(raw, false)) {
        out.push(compare(column, Comparison::Ge, Value::DateTime(bound), false));
    }
    if let Some(bound) = end.and_then(|raw| parse_date_bound(raw, true)) {
        out.push(compare(column, Comparison::Le, Value::DateTime(bound), false));
    }
}

fn compare(column: &'static str, op: Comparison, value: Value, on_date: bool) -> Predicate {
    Predicate::Compare {
        column,
        op,
        value,
        on_date,
    }
}
