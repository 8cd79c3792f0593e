//! Cross-tabulation of report rows: one output row per row-key tuple, one
//! column group per distinct column-dimension value.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use log::debug;

use crate::{
    catalog,
    data::{ComparableValue, Value},
    derived::FieldSource,
    export::format_cell,
    report::{Aggregate, MAX_PIVOT_VALUES, PivotValueSpec, ReportSettings},
};

/// One cell of the pivot output.
#[derive(Debug, Clone, PartialEq)]
pub enum PivotCell {
    /// No source row carried this row key and column value.
    NoGroup,
    /// Row-key value or aggregate result; `None` is a null aggregate.
    Value(Option<Value>),
}

impl PivotCell {
    pub fn value(&self) -> Option<&Value> {
        match self {
            PivotCell::NoGroup => None,
            PivotCell::Value(value) => value.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<PivotCell>>,
}

impl PivotTable {
    /// An empty header means pivoting was not possible.
    pub fn is_available(&self) -> bool {
        !self.headers.is_empty()
    }
}

/// Checked pivot configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotPlan {
    pub row_fields: Vec<String>,
    pub col_field: String,
    pub values: Vec<PivotValueSpec>,
}

impl PivotPlan {
    /// `None` when row fields, column field or value specs are missing.
    pub fn new(row_fields: Vec<String>, col_field: Option<String>, values: Vec<PivotValueSpec>) -> Option<Self> {
        let col_field = col_field.filter(|field| !field.trim().is_empty())?;
        if row_fields.is_empty() || values.is_empty() {
            return None;
        }
        Some(Self {
            row_fields,
            col_field,
            values: values.into_iter().take(MAX_PIVOT_VALUES).collect(),
        })
    }

    /// Plan for a saved definition. Value specs whose aggregate does not fit
    /// the field kind are dropped here as well as at save time.
    pub fn from_settings(settings: &ReportSettings) -> Option<Self> {
        if !settings.pivot_enabled {
            return None;
        }
        let values = settings
            .pivot_values
            .iter()
            .filter(|spec| {
                let kind = catalog::kind(&settings.dataset, &spec.field);
                let accepted = spec.agg.accepts(kind);
                if !accepted {
                    debug!("Dropping pivot value {} over {} field", spec.display_label(), kind.as_str());
                }
                accepted
            })
            .cloned()
            .collect();
        Self::new(
            settings.pivot_row_fields.clone(),
            settings.pivot_col_field.clone(),
            values,
        )
    }

    /// Every field the row source must provide, without repeats.
    pub fn source_fields(&self) -> Vec<&str> {
        self.row_fields
            .iter()
            .chain(std::iter::once(&self.col_field))
            .chain(self.values.iter().map(|spec| &spec.field))
            .map(String::as_str)
            .unique()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    rows: i64,
    numeric: usize,
    int_sum: Option<i64>,
    sum: f64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            int_sum: Some(0),
            ..Self::default()
        }
    }

    fn add(&mut self, value: Option<&Value>) {
        self.rows += 1;
        let Some(value) = value.filter(|value| value.is_numeric()) else {
            return;
        };
        let Some(number) = value.as_f64() else {
            return;
        };
        self.numeric += 1;
        self.sum += number;
        self.int_sum = match (self.int_sum, value) {
            (Some(total), Value::Integer(n)) => total.checked_add(*n),
            _ => None,
        };
        if self.min.as_ref().is_none_or(|current| value < current) {
            self.min = Some(value.clone());
        }
        if self.max.as_ref().is_none_or(|current| value > current) {
            self.max = Some(value.clone());
        }
    }

    fn finish(&self, agg: Aggregate) -> Option<Value> {
        match agg {
            Aggregate::Count => Some(Value::Integer(self.rows)),
            _ if self.numeric == 0 => None,
            Aggregate::Sum => Some(match self.int_sum {
                Some(total) => Value::Integer(total),
                None => Value::Float(self.sum),
            }),
            Aggregate::Avg => Some(Value::Float(self.sum / self.numeric as f64)),
            Aggregate::Min => self.min.clone(),
            Aggregate::Max => self.max.clone(),
        }
    }
}

type RowKey = Vec<ComparableValue>;

/// Groups `rows` by row key and column value and aggregates each value spec.
///
/// Rows come from a source that has already applied filters and the row
/// limit. Derived fields must be materialized by the source.
pub fn build_pivot<R, I>(plan: &PivotPlan, rows: I) -> PivotTable
where
    R: FieldSource,
    I: IntoIterator<Item = R>,
{
    let value = |row: &R, field: &str| ComparableValue(row.field(field).cloned());

    let mut column_values: BTreeSet<ComparableValue> = BTreeSet::new();
    let mut groups: BTreeMap<RowKey, BTreeMap<ComparableValue, Vec<Accumulator>>> = BTreeMap::new();
    for row in rows {
        let key = plan
            .row_fields
            .iter()
            .map(|field| value(&row, field))
            .collect::<RowKey>();
        let column = value(&row, &plan.col_field);
        column_values.insert(column.clone());
        let accumulators = groups
            .entry(key)
            .or_default()
            .entry(column)
            .or_insert_with(|| vec![Accumulator::new(); plan.values.len()]);
        for (accumulator, spec) in accumulators.iter_mut().zip(&plan.values) {
            accumulator.add(row.field(&spec.field));
        }
    }

    let mut headers = plan.row_fields.clone();
    for column in &column_values {
        let formatted = format_cell(column.0.as_ref());
        for spec in &plan.values {
            let label = spec.display_label();
            headers.push(if formatted.is_empty() {
                label
            } else {
                format!("{formatted} {label}")
            });
        }
    }

    let mut keyed = groups
        .into_iter()
        .map(|(key, cells)| {
            let sort_key = key
                .iter()
                .map(|part| format_cell(part.0.as_ref()))
                .collect::<Vec<_>>();
            (sort_key, key, cells)
        })
        .collect::<Vec<_>>();
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let rows: Vec<Vec<PivotCell>> = keyed
        .into_iter()
        .map(|(_, key, cells)| {
            let mut out = key
                .into_iter()
                .map(|part| PivotCell::Value(part.0))
                .collect::<Vec<_>>();
            for column in &column_values {
                match cells.get(column) {
                    Some(accumulators) => out.extend(
                        accumulators
                            .iter()
                            .zip(&plan.values)
                            .map(|(acc, spec)| PivotCell::Value(acc.finish(spec.agg))),
                    ),
                    None => out.extend(plan.values.iter().map(|_| PivotCell::NoGroup)),
                }
            }
            out
        })
        .collect();

    debug!(
        "Pivot produced {} row(s) across {} column value(s)",
        rows.len(),
        column_values.len()
    );
    PivotTable { headers, rows }
}

/// Pivot for a saved definition, or an empty (unavailable) table when the
/// definition does not describe a complete pivot.
pub fn pivot_for<R, I>(settings: &ReportSettings, rows: I) -> PivotTable
where
    R: FieldSource,
    I: IntoIterator<Item = R>,
{
    match PivotPlan::from_settings(settings) {
        Some(plan) => build_pivot(&plan, rows),
        None => PivotTable::default(),
    }
}
