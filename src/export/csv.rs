use std::io::Write;

use anyhow::{Context, Result};
use ::csv::{QuoteStyle, Writer, WriterBuilder};

use crate::data::Value;

use super::format_row;

/// Streaming CSV writer: the header goes out on creation, each row as it
/// is handed over.
pub struct CsvExport<W: Write> {
    writer: Writer<W>,
    rows: usize,
}

impl<W: Write> CsvExport<W> {
    pub fn new(sink: W, headers: &[String]) -> Result<Self> {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Necessary)
            .from_writer(sink);
        writer
            .write_record(headers)
            .context("Writing CSV header")?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn write_row(&mut self, cells: &[Option<Value>]) -> Result<()> {
        self.writer
            .write_record(format_row(cells))
            .with_context(|| format!("Writing CSV row {}", self.rows + 1))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn finish(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|err| anyhow::anyhow!("Flushing CSV output: {}", err.error()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn writes_header_then_formatted_rows() {
        let headers = vec!["ritdatum".to_string(), "status".to_string(), "afstand".to_string()];
        let mut export = CsvExport::new(Vec::new(), &headers).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap().and_hms_opt(6, 30, 0).unwrap();
        export
            .write_row(&[Some(Value::DateTime(date)), Some(Value::String("done, late".into())), None])
            .unwrap();
        assert_eq!(export.rows_written(), 1);
        let bytes = export.finish().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "ritdatum,status,afstand\n2024-02-01,\"done, late\",\n"
        );
    }
}
