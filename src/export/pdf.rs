use anyhow::{Result, anyhow};
use printpdf::{
    BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
};

const PAGE_WIDTH_MM: f32 = 297.0;
const PAGE_HEIGHT_MM: f32 = 210.0;
const MARGIN_MM: f32 = 10.0;
const CELL_PADDING_MM: f32 = 1.5;
const BODY_FONT_PT: f32 = 8.0;
const HEADER_FONT_PT: f32 = 7.0;
const REDUCED_BODY_FONT_PT: f32 = 6.0;
const REDUCED_HEADER_FONT_PT: f32 = 5.5;
const TITLE_FONT_PT: f32 = 12.0;
/// Average Helvetica glyph width as a share of the font size.
const GLYPH_WIDTH_EM: f32 = 0.5;
const PT_TO_MM: f32 = 0.352_78;
const LINE_SPACING: f32 = 1.25;
const LAYER: &str = "table";

/// Column widths and font sizes for one rendered table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub widths: Vec<f32>,
    pub body_font: f32,
    pub header_font: f32,
    /// Set when the intrinsic widths did not fit the printable width.
    pub uniform: bool,
}

pub fn printable_width() -> f32 {
    PAGE_WIDTH_MM - 2.0 * MARGIN_MM
}

fn glyph_width(font_pt: f32) -> f32 {
    font_pt * GLYPH_WIDTH_EM * PT_TO_MM
}

fn line_height(font_pt: f32) -> f32 {
    font_pt * LINE_SPACING * PT_TO_MM
}

fn text_width(text: &str, font_pt: f32) -> f32 {
    text.chars().count() as f32 * glyph_width(font_pt) + 2.0 * CELL_PADDING_MM
}

/// Widths from content; when they overflow the page every column gets the
/// same share of the printable width and the fonts shrink.
pub fn layout(headers: &[String], rows: &[Vec<String>]) -> TableLayout {
    let widths = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            rows.iter()
                .filter_map(|row| row.get(idx))
                .map(|cell| text_width(cell, BODY_FONT_PT))
                .fold(text_width(header, HEADER_FONT_PT), f32::max)
        })
        .collect::<Vec<_>>();
    let total: f32 = widths.iter().sum();
    if total <= printable_width() || headers.is_empty() {
        return TableLayout {
            widths,
            body_font: BODY_FONT_PT,
            header_font: HEADER_FONT_PT,
            uniform: false,
        };
    }
    let share = printable_width() / headers.len() as f32;
    TableLayout {
        widths: vec![share; headers.len()],
        body_font: REDUCED_BODY_FONT_PT,
        header_font: REDUCED_HEADER_FONT_PT,
        uniform: true,
    }
}

/// Splits `text` into lines that fit `width` at `font_pt`.
fn wrap(text: &str, width: f32, font_pt: f32) -> Vec<String> {
    let fit = (width - 2.0 * CELL_PADDING_MM) / glyph_width(font_pt);
    let per_line = ((fit + 1e-3).floor() as usize).max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate_len = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if candidate_len <= per_line {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        let chars = word.chars().collect::<Vec<_>>();
        let mut pieces = chars.chunks(per_line).map(|piece| piece.iter().collect::<String>());
        let mut last = pieces.next().unwrap_or_default();
        for piece in pieces {
            lines.push(std::mem::replace(&mut last, piece));
        }
        current = last;
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

struct PageWriter<'a> {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    layout: &'a TableLayout,
    headers: &'a [String],
}

impl PageWriter<'_> {
    fn measure(&self, cells: &[String], font_pt: f32) -> (Vec<Vec<String>>, f32) {
        let wrapped = self
            .layout
            .widths
            .iter()
            .enumerate()
            .map(|(idx, width)| wrap(cells.get(idx).map_or("", String::as_str), *width, font_pt))
            .collect::<Vec<_>>();
        let lines = wrapped.iter().map(Vec::len).max().unwrap_or(1);
        (wrapped, lines as f32 * line_height(font_pt) + CELL_PADDING_MM)
    }

    fn draw(&mut self, wrapped: &[Vec<String>], height: f32, font_pt: f32, header: bool) {
        let font = if header { &self.bold } else { &self.font };
        let mut x = MARGIN_MM;
        for (cell_lines, width) in wrapped.iter().zip(&self.layout.widths) {
            for (line_idx, line) in cell_lines.iter().enumerate() {
                let baseline = self.y - (line_idx as f32 + 1.0) * line_height(font_pt);
                self.layer
                    .use_text(line.as_str(), font_pt, Mm(x + CELL_PADDING_MM), Mm(baseline), font);
            }
            x += width;
        }
        self.y -= height;
    }

    fn new_page(&mut self) {
        let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), LAYER);
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_HEIGHT_MM - MARGIN_MM;
    }

    fn header(&mut self) {
        let font_pt = self.layout.header_font;
        let (wrapped, height) = self.measure(self.headers, font_pt);
        if self.y - height < MARGIN_MM {
            self.new_page();
        }
        self.draw(&wrapped, height, font_pt, true);
    }

    fn body_row(&mut self, cells: &[String]) {
        let font_pt = self.layout.body_font;
        let (wrapped, height) = self.measure(cells, font_pt);
        if self.y - height < MARGIN_MM {
            self.new_page();
            self.header();
        }
        self.draw(&wrapped, height, font_pt, false);
    }
}

/// Lays out the whole table in memory and returns the PDF bytes. The
/// header row repeats on every page.
pub fn render_pdf(title: &str, headers: &[String], rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let layout = layout(headers, rows);
    let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), LAYER);
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|err| anyhow!("Loading PDF font: {err}"))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|err| anyhow!("Loading PDF font: {err}"))?;
    let layer = doc.get_page(page).get_layer(layer);

    let title_top = PAGE_HEIGHT_MM - MARGIN_MM - line_height(TITLE_FONT_PT);
    layer.use_text(title, TITLE_FONT_PT, Mm(MARGIN_MM), Mm(title_top), &bold);

    let mut writer = PageWriter {
        doc,
        layer,
        font,
        bold,
        y: title_top - line_height(TITLE_FONT_PT),
        layout: &layout,
        headers,
    };
    writer.header();
    for row in rows {
        writer.body_row(row);
    }
    writer
        .doc
        .save_to_bytes()
        .map_err(|err| anyhow!("Serializing PDF: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn narrow_tables_keep_intrinsic_widths() {
        let headers = strings(&["ritnummer", "status"]);
        let rows = vec![strings(&["1", "done"])];
        let layout = layout(&headers, &rows);
        assert!(!layout.uniform);
        assert_eq!(layout.body_font, BODY_FONT_PT);
        assert!(layout.widths[0] < printable_width());
    }

    #[test]
    fn overflowing_tables_switch_to_uniform_reduced_layout() {
        let headers = (0..30).map(|idx| format!("column_number_{idx}")).collect::<Vec<_>>();
        let rows = vec![headers.iter().map(|_| "x".repeat(40)).collect::<Vec<_>>()];
        let layout = layout(&headers, &rows);
        assert!(layout.uniform);
        assert_eq!(layout.widths.len(), 30);
        assert!(layout.body_font < BODY_FONT_PT);
        let total: f32 = layout.widths.iter().sum();
        assert!((total - printable_width()).abs() < 0.01);
    }

    #[test]
    fn wrap_splits_words_and_long_tokens() {
        let width = 2.0 * CELL_PADDING_MM + 5.0 * glyph_width(BODY_FONT_PT);
        assert_eq!(wrap("ab cd ef", width, BODY_FONT_PT), vec!["ab cd", "ef"]);
        assert_eq!(wrap("abcdefghijk", width, BODY_FONT_PT), vec!["abcde", "fghij", "k"]);
        assert_eq!(wrap("", width, BODY_FONT_PT), vec![""]);
    }

    #[test]
    fn renders_multi_page_document() {
        let headers = strings(&["ritnummer", "status"]);
        let rows = (0..200)
            .map(|idx| vec![idx.to_string(), "done".to_string()])
            .collect::<Vec<_>>();
        let bytes = render_pdf("Trips", &headers, &rows).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
