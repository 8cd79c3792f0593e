use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::data::Value;

use super::format_cell;

const SHEET_NAME: &str = "Report";

/// Spreadsheet export. Numbers are written as numbers, everything else as
/// formatted text; rows are written as they arrive.
pub struct XlsxExport {
    workbook: Workbook,
    next_row: u32,
}

impl XlsxExport {
    pub fn new(headers: &[String]) -> Result<Self> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME).context("Naming worksheet")?;
        for (col, header) in headers.iter().enumerate() {
            sheet
                .write_string_with_format(0, column(col)?, header, &bold)
                .with_context(|| format!("Writing header '{header}'"))?;
        }
        Ok(Self {
            workbook,
            next_row: 1,
        })
    }

    fn sheet(&mut self) -> Result<&mut Worksheet> {
        self.workbook
            .worksheet_from_index(0)
            .context("Worksheet missing from workbook")
    }

    pub fn write_row(&mut self, cells: &[Option<Value>]) -> Result<()> {
        let row = self.next_row;
        let sheet = self.sheet()?;
        for (col, cell) in cells.iter().enumerate() {
            let col = column(col)?;
            let written = match cell {
                None => continue,
                Some(Value::Integer(n)) => sheet.write_number(row, col, *n as f64),
                Some(Value::Float(f)) if f.is_finite() => sheet.write_number(row, col, *f),
                Some(value @ Value::Decimal(_)) => match value.as_f64() {
                    Some(number) => sheet.write_number(row, col, number),
                    None => sheet.write_string(row, col, format_cell(Some(value))),
                },
                Some(value) => sheet.write_string(row, col, format_cell(Some(value))),
            };
            written.with_context(|| format!("Writing cell {row}:{col}"))?;
        }
        self.next_row += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.workbook
            .save_to_buffer()
            .context("Serializing workbook")
    }
}

fn column(idx: usize) -> Result<u16> {
    u16::try_from(idx).with_context(|| format!("Column {idx} exceeds spreadsheet width"))
}
