use log::debug;
use serde::{Deserialize, Serialize};

use crate::catalog::{self, FieldRef, TRIP_COLUMNS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(rename = "dir", default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub column: &'static str,
    pub direction: SortDirection,
}

/// Ordering clause for a report: every group field ascending in listed
/// order, then the explicit sort specs in listed order. Unknown and derived
/// fields are skipped since the store cannot order by them.
pub fn compile(dataset: &str, group_fields: &[String], sort_specs: &[SortSpec]) -> Vec<OrderKey> {
    let groups = group_fields
        .iter()
        .map(|field| (field.as_str(), SortDirection::Asc));
    let sorts = sort_specs
        .iter()
        .map(|spec| (spec.field.as_str(), spec.direction));

    groups
        .chain(sorts)
        .filter_map(|(field, direction)| match catalog::resolve(dataset, field) {
            Some(FieldRef::Stored(index)) => Some(OrderKey {
                column: TRIP_COLUMNS[index].name,
                direction,
            }),
            _ => {
                debug!("Skipping ordering on non-stored field '{field}'");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DEFAULT_DATASET;

    fn key(column: &'static str, direction: SortDirection) -> OrderKey {
        OrderKey { column, direction }
    }

    #[test]
    fn group_fields_lead_in_listed_order() {
        let groups = vec!["vervoerder".to_string(), "ritdatum".to_string()];
        let sorts = vec![
            SortSpec::new("ritnummer", SortDirection::Desc),
            SortSpec::new("status", SortDirection::Asc),
        ];
        assert_eq!(
            compile(DEFAULT_DATASET, &groups, &sorts),
            vec![
                key("vervoerder", SortDirection::Asc),
                key("ritdatum", SortDirection::Asc),
                key("ritnummer", SortDirection::Desc),
                key("status", SortDirection::Asc),
            ]
        );
    }

    #[test]
    fn grouped_field_keeps_group_position_even_when_sorted_descending() {
        let groups = vec!["vervoerder".to_string()];
        let sorts = vec![SortSpec::new("vervoerder", SortDirection::Desc)];
        let keys = compile(DEFAULT_DATASET, &groups, &sorts);
        assert_eq!(keys[0], key("vervoerder", SortDirection::Asc));
    }

    #[test]
    fn unknown_and_derived_fields_are_skipped() {
        let sorts = vec![
            SortSpec::new("locatie_calc", SortDirection::Asc),
            SortSpec::new("gone_column", SortDirection::Desc),
            SortSpec::new("ritdatum", SortDirection::Desc),
        ];
        assert_eq!(
            compile(DEFAULT_DATASET, &[], &sorts),
            vec![key("ritdatum", SortDirection::Desc)]
        );
    }

    #[test]
    fn sort_spec_reads_persisted_dir_key() {
        let spec: SortSpec = serde_json::from_str(r#"{"field": "ritdatum", "dir": "desc"}"#).unwrap();
        assert_eq!(spec.direction, SortDirection::Desc);
        let spec: SortSpec = serde_json::from_str(r#"{"field": "ritdatum"}"#).unwrap();
        assert_eq!(spec.direction, SortDirection::Asc);
    }
}
