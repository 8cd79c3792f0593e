//! Report definitions: the persisted, declarative description of a report
//! and its save-time validation.

use std::{collections::HashSet, fmt};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{self, DEFAULT_DATASET, FieldKind, FieldRef},
    error::{EngineError, EngineResult},
    filter::SavedFilter,
    order::SortSpec,
};

pub const DEFAULT_ROW_LIMIT: usize = 1000;
pub const NAME_MAX_CHARS: usize = 255;
pub const MAX_PIVOT_VALUES: usize = 3;
const COPY_SUFFIX: &str = " (copy)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }

    pub fn requires_numeric(self) -> bool {
        self != Aggregate::Count
    }

    /// Whether this aggregate may be computed over a field of `kind`.
    pub fn accepts(self, kind: FieldKind) -> bool {
        !self.requires_numeric() || kind == FieldKind::Number
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotValueSpec {
    pub field: String,
    #[serde(default)]
    pub agg: Aggregate,
    #[serde(default)]
    pub label: Option<String>,
}

impl PivotValueSpec {
    pub fn new(field: impl Into<String>, agg: Aggregate) -> Self {
        Self {
            field: field.into(),
            agg,
            label: None,
        }
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Explicit label, or `agg(field)`.
    pub fn display_label(&self) -> String {
        match self.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => format!("{}({})", self.agg, self.field),
        }
    }
}

/// Editable part of a report definition, in its persisted shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub name: String,
    pub dataset: String,
    /// Values below one fall back to [`DEFAULT_ROW_LIMIT`] on save.
    pub row_limit: i64,
    pub include_fields: Vec<String>,
    pub filter_fields: Vec<SavedFilter>,
    pub group_fields: Vec<String>,
    pub sort_fields: Vec<SortSpec>,
    pub pivot_enabled: bool,
    pub pivot_row_fields: Vec<String>,
    pub pivot_col_field: Option<String>,
    pub pivot_values: Vec<PivotValueSpec>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            dataset: DEFAULT_DATASET.to_string(),
            row_limit: DEFAULT_ROW_LIMIT as i64,
            include_fields: Vec::new(),
            filter_fields: Vec::new(),
            group_fields: Vec::new(),
            sort_fields: Vec::new(),
            pivot_enabled: false,
            pivot_row_fields: Vec::new(),
            pivot_col_field: None,
            pivot_values: Vec::new(),
        }
    }
}

impl ReportSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Normalizes the settings in place and checks every save-time
    /// invariant. Nothing is persisted when this fails.
    pub fn validate(&mut self) -> EngineResult<()> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(EngineError::validation("report name is required"));
        }
        if self.name.chars().count() > NAME_MAX_CHARS {
            return Err(EngineError::validation(format!(
                "report name exceeds {NAME_MAX_CHARS} characters"
            )));
        }
        if !catalog::is_known_dataset(&self.dataset) {
            return Err(EngineError::validation(format!(
                "unknown dataset '{}'",
                self.dataset
            )));
        }
        if self.row_limit < 1 {
            self.row_limit = DEFAULT_ROW_LIMIT as i64;
        }
        if self.include_fields.is_empty() && !self.pivot_enabled {
            return Err(EngineError::validation(
                "select at least one field or enable the pivot",
            ));
        }
        let mut seen = HashSet::new();
        for field in &self.include_fields {
            if !seen.insert(field.as_str()) {
                return Err(EngineError::validation(format!(
                    "field '{field}' is included more than once"
                )));
            }
            self.resolve(field)?;
        }
        if self.pivot_enabled {
            self.validate_pivot()?;
        }
        Ok(())
    }

    fn validate_pivot(&self) -> EngineResult<()> {
        if self.pivot_row_fields.is_empty() {
            return Err(EngineError::validation("pivot needs at least one row field"));
        }
        for field in &self.pivot_row_fields {
            self.resolve_pivot_field(field)?;
        }
        let Some(column) = self.pivot_col_field.as_deref().filter(|f| !f.trim().is_empty())
        else {
            return Err(EngineError::validation("pivot needs a column field"));
        };
        self.resolve_pivot_field(column)?;
        if self.pivot_values.is_empty() || self.pivot_values.len() > MAX_PIVOT_VALUES {
            return Err(EngineError::validation(format!(
                "pivot needs between 1 and {MAX_PIVOT_VALUES} value fields"
            )));
        }
        for value in &self.pivot_values {
            let field = self.resolve_pivot_field(&value.field)?;
            if !value.agg.accepts(field.kind()) {
                return Err(EngineError::validation(format!(
                    "aggregate '{}' requires a numeric field, '{}' is {}",
                    value.agg,
                    value.field,
                    field.kind().as_str()
                )));
            }
        }
        Ok(())
    }

    fn resolve(&self, field: &str) -> EngineResult<FieldRef> {
        catalog::resolve(&self.dataset, field)
            .ok_or_else(|| EngineError::validation(format!("unknown field '{field}'")))
    }

    fn resolve_pivot_field(&self, field: &str) -> EngineResult<FieldRef> {
        let resolved = self.resolve(field)?;
        if resolved.is_derived() {
            return Err(EngineError::validation(format!(
                "calculated field '{field}' cannot be used in a pivot"
            )));
        }
        Ok(resolved)
    }

    /// Deep copy with a " (copy)" name, cut to the name limit.
    pub fn duplicated(&self) -> Self {
        let mut copy = self.clone();
        copy.name = format!("{}{COPY_SUFFIX}", self.name)
            .chars()
            .take(NAME_MAX_CHARS)
            .collect();
        copy
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub id: i64,
    pub created_at: NaiveDateTime,
    #[serde(flatten)]
    pub settings: ReportSettings,
}

impl ReportDefinition {
    pub fn row_limit(&self) -> usize {
        usize::try_from(self.settings.row_limit)
            .ok()
            .filter(|limit| *limit >= 1)
            .unwrap_or(DEFAULT_ROW_LIMIT)
    }

    /// Row cap for one render: a positive override wins, anything else
    /// falls back to the definition's limit.
    pub fn effective_limit(&self, limit_override: Option<i64>) -> usize {
        limit_override
            .and_then(|limit| usize::try_from(limit).ok())
            .filter(|limit| *limit >= 1)
            .unwrap_or_else(|| self.row_limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pivot_settings() -> ReportSettings {
        ReportSettings {
            pivot_enabled: true,
            pivot_row_fields: vec!["vervoerder".into()],
            pivot_col_field: Some("status".into()),
            pivot_values: vec![PivotValueSpec::new("afstand", Aggregate::Sum)],
            ..ReportSettings::named("Per carrier")
        }
    }

    #[test]
    fn name_and_fields_are_required() {
        let mut settings = ReportSettings::named("   ");
        settings.include_fields = vec!["ritnummer".into()];
        assert!(matches!(settings.validate(), Err(EngineError::Validation { .. })));

        let mut settings = ReportSettings::named("Trips");
        assert!(settings.validate().is_err());

        let mut settings = ReportSettings::named("x".repeat(NAME_MAX_CHARS + 1));
        settings.include_fields = vec!["ritnummer".into()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn row_limit_below_one_falls_back_to_default() {
        let mut settings = ReportSettings::named("  Trips ");
        settings.include_fields = vec!["ritnummer".into(), "reistijd_calc".into()];
        settings.row_limit = 0;
        settings.validate().unwrap();
        assert_eq!(settings.name, "Trips");
        assert_eq!(settings.row_limit, DEFAULT_ROW_LIMIT as i64);
    }

    #[test]
    fn duplicate_and_unknown_include_fields_are_rejected() {
        let mut settings = ReportSettings::named("Trips");
        settings.include_fields = vec!["status".into(), "status".into()];
        assert!(settings.validate().is_err());
        settings.include_fields = vec!["not_a_field".into()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn pivot_without_include_fields_is_valid() {
        let mut settings = pivot_settings();
        settings.validate().unwrap();
    }

    #[test]
    fn pivot_rejects_derived_fields_and_non_numeric_aggregates() {
        let mut settings = pivot_settings();
        settings.pivot_row_fields = vec!["locatie_calc".into()];
        assert!(settings.validate().is_err());

        let mut settings = pivot_settings();
        settings.pivot_values = vec![PivotValueSpec::new("status", Aggregate::Avg)];
        assert!(settings.validate().is_err());

        let mut settings = pivot_settings();
        settings.pivot_values = vec![PivotValueSpec::new("status", Aggregate::Count)];
        settings.validate().unwrap();

        let mut settings = pivot_settings();
        settings.pivot_values = vec![PivotValueSpec::new("afstand", Aggregate::Max); 4];
        assert!(settings.validate().is_err());

        let mut settings = pivot_settings();
        settings.pivot_col_field = None;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn duplicated_name_is_truncated_to_limit() {
        let settings = ReportSettings::named("r".repeat(NAME_MAX_CHARS - 2));
        let copy = settings.duplicated();
        assert_eq!(copy.name.chars().count(), NAME_MAX_CHARS);
        assert!(copy.name.ends_with(" ("));

        let copy = ReportSettings::named("Weekly").duplicated();
        assert_eq!(copy.name, "Weekly (copy)");
    }

    #[test]
    fn value_label_defaults_to_aggregate_call() {
        assert_eq!(PivotValueSpec::new("afstand", Aggregate::Sum).display_label(), "sum(afstand)");
        assert_eq!(
            PivotValueSpec::new("afstand", Aggregate::Sum)
                .labelled("Distance")
                .display_label(),
            "Distance"
        );
    }

    #[test]
    fn effective_limit_prefers_positive_override() {
        let definition = ReportDefinition {
            id: 1,
            created_at: NaiveDateTime::default(),
            settings: ReportSettings {
                row_limit: 50,
                ..ReportSettings::named("Trips")
            },
        };
        assert_eq!(definition.effective_limit(None), 50);
        assert_eq!(definition.effective_limit(Some(0)), 50);
        assert_eq!(definition.effective_limit(Some(-3)), 50);
        assert_eq!(definition.effective_limit(Some(7)), 7);
    }

    #[test]
    fn persisted_shape_uses_external_keys() {
        let settings: ReportSettings = serde_json::from_str(
            r#"{
                "name": "Legacy",
                "include_fields": ["ritnummer"],
                "filter_fields": ["status", {"field": "status", "op": "=", "value": "done"}],
                "sort_fields": [{"field": "ritdatum", "dir": "desc"}],
                "pivot_values": [{"field": "afstand", "agg": "avg", "label": ""}]
            }"#,
        )
        .unwrap();
        assert_eq!(settings.dataset, DEFAULT_DATASET);
        assert_eq!(settings.filter_fields.len(), 2);
        assert_eq!(settings.pivot_values[0].agg, Aggregate::Avg);
        assert_eq!(settings.pivot_values[0].display_label(), "avg(afstand)");
    }
}
