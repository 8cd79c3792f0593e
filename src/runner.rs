//! Rendering a saved report: compile filters and ordering into a local
//! select, optionally pivot the rows, hand the result to a renderer.

use std::{collections::BTreeMap, fmt, io::Write, str::FromStr};

use anyhow::anyhow;
use clap::ValueEnum;
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    catalog::{self, FieldKind, FieldRef},
    data::Value,
    derived::RowLayout,
    error::EngineResult,
    export::{CsvExport, XlsxExport, format_cell, format_row, pivot_cells, render_pdf},
    filter::{self, Predicate, RuntimeFilters},
    order::{self, OrderKey},
    pivot::{PivotPlan, PivotTable, build_pivot},
    query::{SelectQuery, projection},
    report::ReportDefinition,
    store::LocalStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Interactive table view.
    #[default]
    Html,
    Csv,
    Xlsx,
    Pdf,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Csv => "csv",
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "html" => Ok(OutputFormat::Html),
            "csv" => Ok(OutputFormat::Csv),
            "xlsx" => Ok(OutputFormat::Xlsx),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(anyhow!("Unknown report format '{other}'")),
        }
    }
}

/// Interactive view handed to the host layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TableView {
    pub title: String,
    pub headers: Vec<String>,
    /// Display strings; `None` is an empty cell.
    pub rows: Vec<Vec<Option<String>>>,
    /// Fields accepting request-time filters and their kinds.
    pub filter_meta: BTreeMap<String, FieldKind>,
    pub row_limit: usize,
    /// Source table when the view is a pivot, keeping missing groups apart
    /// from null aggregates.
    pub pivot: Option<PivotTable>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Table(TableView),
    Csv { filename: String, bytes: Vec<u8> },
    Xlsx { filename: String, bytes: Vec<u8> },
    Pdf { filename: String, bytes: Vec<u8> },
    /// The definition cannot be rendered; the host shows the listing with
    /// this message.
    Redirect { message: String },
}

/// Compiled form of one render request.
#[derive(Debug, Clone)]
pub struct ReportPlan<'a> {
    definition: &'a ReportDefinition,
    predicates: Vec<Predicate>,
    order: Vec<OrderKey>,
    limit: usize,
    pivot: Option<PivotPlan>,
}

impl<'a> ReportPlan<'a> {
    pub fn compile(
        definition: &'a ReportDefinition,
        limit_override: Option<i64>,
        runtime: &RuntimeFilters,
    ) -> Self {
        let settings = &definition.settings;
        let predicates = filter::compile(&settings.dataset, &settings.filter_fields, runtime);
        let order = order::compile(&settings.dataset, &settings.group_fields, &settings.sort_fields);
        let limit = definition.effective_limit(limit_override);
        debug!(
            "Report {} compiled to {} predicate(s), {} order key(s), limit {limit}",
            definition.id,
            predicates.len(),
            order.len()
        );
        Self {
            definition,
            predicates,
            order,
            limit,
            pivot: PivotPlan::from_settings(settings),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn resolve(&self, fields: &[&str]) -> Vec<FieldRef> {
        fields
            .iter()
            .filter_map(|field| catalog::resolve(&self.definition.settings.dataset, field))
            .collect()
    }

    fn select(&self, fields: &[&str]) -> (SelectQuery, RowLayout) {
        let refs = self.resolve(fields);
        let columns = projection(refs.iter().copied());
        let derived = refs.iter().filter_map(|field| match field {
            FieldRef::Derived(derived) => Some(*derived),
            FieldRef::Stored(_) => None,
        });
        let layout = RowLayout::new(&columns, derived);
        let query = SelectQuery::new(columns)
            .filter(self.predicates.clone())
            .order_by(self.order.clone())
            .limit(self.limit);
        (query, layout)
    }

    /// Pivot over at most `limit` source rows, or `None` when the report is
    /// not a pivot or the pivot is unavailable.
    pub fn pivot_table(&self, store: &LocalStore) -> EngineResult<Option<PivotTable>> {
        let Some(plan) = &self.pivot else {
            return Ok(None);
        };
        let fields = plan.source_fields();
        let (query, layout) = self.select(&fields);
        let mut raw_rows = Vec::new();
        store.for_each_row(&query, |row| {
            raw_rows.push(row);
            Ok(())
        })?;
        let table = build_pivot(plan, raw_rows.into_iter().map(|row| layout.materialize(row)));
        if table.is_available() {
            Ok(Some(table))
        } else {
            info!(
                "Pivot unavailable for report {}, rendering rows",
                self.definition.id
            );
            Ok(None)
        }
    }

    pub fn flat_headers(&self) -> Vec<String> {
        self.definition.settings.include_fields.clone()
    }

    /// Streams the included fields of each matching row to `visit`.
    pub fn for_each_flat_row<F>(&self, store: &LocalStore, mut visit: F) -> EngineResult<()>
    where
        F: FnMut(Vec<Option<Value>>) -> anyhow::Result<()>,
    {
        let fields = self
            .definition
            .settings
            .include_fields
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>();
        let (query, layout) = self.select(&fields);
        store.for_each_row(&query, |raw| {
            let row = layout.materialize(raw);
            visit(fields.iter().map(|field| row.get(field).cloned()).collect())
        })
    }

    fn for_each_output_row<F>(
        &self,
        store: &LocalStore,
        pivot: Option<&PivotTable>,
        mut visit: F,
    ) -> EngineResult<()>
    where
        F: FnMut(Vec<Option<Value>>) -> anyhow::Result<()>,
    {
        match pivot {
            Some(table) => {
                for row in pivot_cells(table) {
                    visit(row)?;
                }
                Ok(())
            }
            None => self.for_each_flat_row(store, visit),
        }
    }

    pub fn table_view(&self, store: &LocalStore) -> EngineResult<TableView> {
        let pivot = self.pivot_table(store)?;
        let headers = pivot
            .as_ref()
            .map_or_else(|| self.flat_headers(), |table| table.headers.clone());
        let mut rows: Vec<Vec<Option<String>>> = Vec::new();
        self.for_each_output_row(store, pivot.as_ref(), |cells| {
            rows.push(
                cells
                    .iter()
                    .map(|cell| cell.as_ref().map(|value| format_cell(Some(value))))
                    .collect(),
            );
            Ok(())
        })?;
        let settings = &self.definition.settings;
        let filter_meta = filter::eligible_fields(&settings.filter_fields)
            .into_iter()
            .map(|field| (field.to_string(), catalog::kind(&settings.dataset, field)))
            .collect();
        Ok(TableView {
            title: settings.name.clone(),
            headers,
            rows,
            filter_meta,
            row_limit: self.limit,
            pivot,
        })
    }

    /// Writes CSV to `sink` row by row; flat rows are never collected.
    pub fn write_csv<W: Write>(&self, store: &LocalStore, sink: W) -> EngineResult<W> {
        let pivot = self.pivot_table(store)?;
        let headers = pivot
            .as_ref()
            .map_or_else(|| self.flat_headers(), |table| table.headers.clone());
        let mut export = CsvExport::new(sink, &headers)?;
        self.for_each_output_row(store, pivot.as_ref(), |cells| export.write_row(&cells))?;
        debug!("Wrote {} CSV row(s)", export.rows_written());
        Ok(export.finish()?)
    }

    pub fn write_xlsx(&self, store: &LocalStore) -> EngineResult<Vec<u8>> {
        let pivot = self.pivot_table(store)?;
        let headers = pivot
            .as_ref()
            .map_or_else(|| self.flat_headers(), |table| table.headers.clone());
        let mut export = XlsxExport::new(&headers)?;
        self.for_each_output_row(store, pivot.as_ref(), |cells| export.write_row(&cells))?;
        Ok(export.finish()?)
    }

    pub fn write_pdf(&self, store: &LocalStore) -> EngineResult<Vec<u8>> {
        let pivot = self.pivot_table(store)?;
        let headers = pivot
            .as_ref()
            .map_or_else(|| self.flat_headers(), |table| table.headers.clone());
        let mut rows = Vec::new();
        self.for_each_output_row(store, pivot.as_ref(), |cells| {
            rows.push(format_row(&cells));
            Ok(())
        })?;
        Ok(render_pdf(&self.definition.settings.name, &headers, &rows)?)
    }
}

/// Loads report `id` when it can be rendered. `Err(message)` carries the
/// redirect notice for a missing definition or an unknown dataset.
pub fn load_renderable(store: &LocalStore, id: i64) -> EngineResult<Result<ReportDefinition, String>> {
    let definition = match store.get_report(id) {
        Ok(definition) => definition,
        Err(err) if err.is_not_found() => {
            warn!("Report {id} requested but not found");
            return Ok(Err(format!("Report {id} not found")));
        }
        Err(err) => return Err(err),
    };
    if !catalog::is_known_dataset(&definition.settings.dataset) {
        warn!(
            "Report {id} uses unknown dataset '{}'",
            definition.settings.dataset
        );
        return Ok(Err(format!("Unknown dataset '{}'", definition.settings.dataset)));
    }
    Ok(Ok(definition))
}

/// Renders report `id` in `format`. A missing definition or an unknown
/// dataset yields [`RenderOutcome::Redirect`] instead of an error.
///
/// CSV comes back as bytes here; use [`run_report_csv`] to stream into a
/// writer instead.
pub fn run_report(
    store: &LocalStore,
    id: i64,
    format: OutputFormat,
    limit_override: Option<i64>,
    runtime: &RuntimeFilters,
) -> EngineResult<RenderOutcome> {
    let definition = match load_renderable(store, id)? {
        Ok(definition) => definition,
        Err(message) => return Ok(RenderOutcome::Redirect { message }),
    };

    let plan = ReportPlan::compile(&definition, limit_override, runtime);
    let filename = format!("{}.{}", definition.settings.name, format.extension());
    info!("Rendering report {id} as {format} (limit {})", plan.limit());
    Ok(match format {
        OutputFormat::Html => RenderOutcome::Table(plan.table_view(store)?),
        OutputFormat::Csv => RenderOutcome::Csv {
            filename,
            bytes: plan.write_csv(store, Vec::new())?,
        },
        OutputFormat::Xlsx => RenderOutcome::Xlsx {
            filename,
            bytes: plan.write_xlsx(store)?,
        },
        OutputFormat::Pdf => RenderOutcome::Pdf {
            filename,
            bytes: plan.write_pdf(store)?,
        },
    })
}

#[derive(Debug)]
pub enum CsvOutcome<W> {
    /// Rows were streamed into the returned sink.
    Written { filename: String, sink: W },
    Redirect { message: String },
}

/// Streams report `id` as CSV into `sink`, one row at a time.
pub fn run_report_csv<W: Write>(
    store: &LocalStore,
    id: i64,
    limit_override: Option<i64>,
    runtime: &RuntimeFilters,
    sink: W,
) -> EngineResult<CsvOutcome<W>> {
    let definition = match load_renderable(store, id)? {
        Ok(definition) => definition,
        Err(message) => return Ok(CsvOutcome::Redirect { message }),
    };
    let plan = ReportPlan::compile(&definition, limit_override, runtime);
    info!("Streaming report {id} as csv (limit {})", plan.limit());
    Ok(CsvOutcome::Written {
        filename: format!("{}.{}", definition.settings.name, OutputFormat::Csv.extension()),
        sink: plan.write_csv(store, sink)?,
    })
}
