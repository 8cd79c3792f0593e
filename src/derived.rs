use std::{borrow::Borrow, collections::HashMap, hash::Hash};

use chrono::NaiveTime;

use crate::{
    catalog::{Column, FieldKind},
    data::{Value, parse_naive_time},
};

const BOARDING_REALIZED: &str = "instapgerealiseerd";
const ALIGHTING_REALIZED: &str = "uitstapgerealiseerd";
const ARRIVAL: &str = "aankomst";
const LOCATION_FROM: &str = "locatie_van";
const LOCATION_TO: &str = "locatie_naar";

/// Read access to the stored fields of one materialized row.
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<&Value>;
}

impl<K> FieldSource for HashMap<K, Value>
where
    K: Borrow<str> + Hash + Eq,
{
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Values computed from other fields of the same row; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedField {
    ElapsedDuration,
    Location,
}

impl DerivedField {
    pub const ALL: [DerivedField; 2] = [DerivedField::ElapsedDuration, DerivedField::Location];

    pub fn name(self) -> &'static str {
        match self {
            DerivedField::ElapsedDuration => "reistijd_calc",
            DerivedField::Location => "locatie_calc",
        }
    }

    pub fn kind(self) -> FieldKind {
        FieldKind::Text
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|derived| derived.name() == name)
    }

    /// Stored columns a query must select for this field to be computable.
    pub fn inputs(self) -> &'static [&'static str] {
        match self {
            DerivedField::ElapsedDuration => &[BOARDING_REALIZED, ALIGHTING_REALIZED],
            DerivedField::Location => &[ARRIVAL, LOCATION_FROM, LOCATION_TO],
        }
    }

    pub fn evaluate(self, row: &impl FieldSource) -> Option<Value> {
        match self {
            DerivedField::ElapsedDuration => elapsed_duration(
                row.field(BOARDING_REALIZED).and_then(as_time),
                row.field(ALIGHTING_REALIZED).and_then(as_time),
            )
            .map(Value::String),
            DerivedField::Location => resolve_location(
                row.field(ARRIVAL),
                row.field(LOCATION_FROM),
                row.field(LOCATION_TO),
            )
            .cloned(),
        }
    }
}

fn as_time(value: &Value) -> Option<NaiveTime> {
    match value {
        Value::Time(t) => Some(*t),
        Value::DateTime(dt) => Some(dt.time()),
        Value::String(s) => parse_naive_time(s).ok(),
        _ => None,
    }
}

/// `HH:MM:SS` between boarding and alighting on the same calendar day.
/// A negative span (a trip crossing midnight) is treated as absent.
pub fn elapsed_duration(boarding: Option<NaiveTime>, alighting: Option<NaiveTime>) -> Option<String> {
    let (boarding, alighting) = (boarding?, alighting?);
    let total = (alighting - boarding).num_seconds();
    if total < 0 {
        return None;
    }
    Some(format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    ))
}

/// Destination once arrival is recorded, origin otherwise.
pub fn resolve_location<'a>(
    arrival: Option<&Value>,
    from: Option<&'a Value>,
    to: Option<&'a Value>,
) -> Option<&'a Value> {
    let arrived = arrival.is_some_and(|value| !value.as_display().trim().is_empty());
    if arrived { to } else { from }
}

/// Names of the cells in a fetched row: the selected columns followed by
/// the derived fields computed from them.
#[derive(Debug, Clone, Default)]
pub struct RowLayout {
    names: Vec<&'static str>,
    derived: Vec<DerivedField>,
}

impl RowLayout {
    pub fn new(columns: &[&'static Column], derived: impl IntoIterator<Item = DerivedField>) -> Self {
        let mut derived_fields: Vec<DerivedField> = Vec::new();
        for field in derived {
            if !derived_fields.contains(&field) {
                derived_fields.push(field);
            }
        }
        let names = columns
            .iter()
            .map(|column| column.name)
            .chain(derived_fields.iter().map(|field| field.name()))
            .collect();
        Self {
            names,
            derived: derived_fields,
        }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| *candidate == name)
    }

    /// Appends the derived values to `cells`, which must hold the
    /// selected columns in order.
    pub fn materialize(&self, cells: Vec<Option<Value>>) -> MaterializedRow<'_> {
        let mut row = MaterializedRow { layout: self, cells };
        let computed = self
            .derived
            .iter()
            .map(|field| field.evaluate(&row))
            .collect::<Vec<_>>();
        row.cells.extend(computed);
        row
    }
}

#[derive(Debug, Clone)]
pub struct MaterializedRow<'a> {
    layout: &'a RowLayout,
    cells: Vec<Option<Value>>,
}

impl MaterializedRow<'_> {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.layout
            .position(name)
            .and_then(|idx| self.cells.get(idx))
            .and_then(Option::as_ref)
    }
}

impl FieldSource for MaterializedRow<'_> {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}
