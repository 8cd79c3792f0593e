use std::{borrow::Cow, fmt::Write as _};

use crate::runner::TableView;

/// Plain-text rendering of a report view: aligned columns, a dashed rule
/// under the header and a row count footer.
pub fn render_view(view: &TableView) -> String {
    let rows = view
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.clone().unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let mut output = String::new();
    if !view.title.is_empty() {
        let _ = writeln!(output, "{}", view.title);
        let _ = writeln!(output);
    }
    output.push_str(&render_table(&view.headers, &rows));
    let kind = if view.pivot.is_some() { "pivot row(s)" } else { "row(s)" };
    let _ = writeln!(output, "({} {kind}, limit {})", rows.len(), view.row_limit);
    output
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| h.chars().count().max(3)).collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(flatten(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", line(headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", line(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", line(row, &widths));
    }
    output
}

pub fn print_view(view: &TableView) {
    print!("{}", render_view(view));
}

fn line(cells: &[String], widths: &[usize]) -> String {
    let mut out = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", flatten(cell), width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    out.truncate(out.trim_end().len());
    out
}

/// Control characters would break the alignment; they print as spaces.
fn flatten(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn aligns_columns_and_blanks_empty_cells() {
        let view = TableView {
            title: "Trips".into(),
            headers: vec!["ritnummer".into(), "status".into()],
            rows: vec![
                vec![Some("7".into()), None],
                vec![Some("12".into()), Some("done\nlate".into())],
            ],
            filter_meta: BTreeMap::new(),
            row_limit: 1000,
            pivot: None,
        };
        let rendered = render_view(&view);
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "Trips");
        assert_eq!(lines[2], "ritnummer  status");
        assert_eq!(lines[3], "---------  ---------");
        assert_eq!(lines[4], "7");
        assert_eq!(lines[5], "12         done late");
        assert_eq!(lines[6], "(2 row(s), limit 1000)");
    }
}
