//! Renderers for report output.
//!
//! Every renderer formats cells the same way: values carrying a calendar
//! date show only the date, nulls are empty, everything else uses its
//! natural display form.

pub mod csv;
pub mod pdf;
pub mod xlsx;

use crate::{
    data::{DATE_FORMAT, Value},
    pivot::{PivotCell, PivotTable},
};

pub use self::{csv::CsvExport, pdf::render_pdf, xlsx::XlsxExport};

pub fn format_cell(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(value) => match value.date_component() {
            Some(date) => date.format(DATE_FORMAT).to_string(),
            None => value.as_display(),
        },
    }
}

pub fn format_row(cells: &[Option<Value>]) -> Vec<String> {
    cells.iter().map(|cell| format_cell(cell.as_ref())).collect()
}

/// Pivot rows as renderer cells; missing groups become empty cells.
pub fn pivot_cells(table: &PivotTable) -> Vec<Vec<Option<Value>>> {
    table
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    PivotCell::NoGroup => None,
                    PivotCell::Value(value) => value.clone(),
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn dates_drop_time_of_day_and_nulls_are_blank() {
        let stamp = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(13, 45, 0)
            .unwrap();
        assert_eq!(format_cell(Some(&Value::DateTime(stamp))), "2024-03-09");
        assert_eq!(format_cell(None), "");
        assert_eq!(format_cell(Some(&Value::Float(12.0))), "12");
        assert_eq!(format_cell(Some(&Value::String("null".into()))), "null");
    }

    #[test]
    fn pivot_missing_groups_render_empty() {
        let table = PivotTable {
            headers: vec!["region".into(), "Q1 count(x)".into()],
            rows: vec![vec![
                PivotCell::Value(Some(Value::String("North".into()))),
                PivotCell::NoGroup,
            ]],
        };
        assert_eq!(
            pivot_cells(&table),
            vec![vec![Some(Value::String("North".into())), None]]
        );
    }
}
