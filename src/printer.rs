use crate::error::Result;
use crate::table::Table;
use crate::types::Value;

const ELLIPSIS: &str = "...";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PrinterState {
    Idle,
    Drawing,
}

/// Incremental plain-text table renderer.
///
/// A two-state machine: table-mutating calls only have an effect
/// between [`AsciiPrinter::start_table`] and [`AsciiPrinter::end_table`];
/// outside that bracket they are no-ops. Values fill rows left to
/// right, and the row terminator is emitted automatically once the
/// declared column count is reached. Values longer than the column
/// width are truncated with a `...` marker.
#[derive(Debug)]
pub struct AsciiPrinter {
    out: String,
    state: PrinterState,
    column_width: usize,
    column_count: usize,
    column_index: usize,
}

impl Default for AsciiPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl AsciiPrinter {
    pub fn new() -> Self {
        Self {
            out: String::new(),
            state: PrinterState::Idle,
            column_width: 0,
            column_count: 0,
            column_index: 0,
        }
    }

    /// Enter the drawing state. A second call while drawing is a no-op.
    pub fn start_table(&mut self, column_width: usize, column_count: usize) {
        if self.state == PrinterState::Drawing || column_count == 0 {
            return;
        }
        self.state = PrinterState::Drawing;
        self.column_width = column_width;
        self.column_count = column_count;
        self.column_index = 0;
    }

    /// Leave the drawing state, closing any partially filled row.
    pub fn end_table(&mut self) {
        if self.state == PrinterState::Idle {
            return;
        }
        if self.column_index != 0 {
            self.out.push('\n');
            self.column_index = 0;
        }
        self.state = PrinterState::Idle;
    }

    /// Centered title line spanning the table width.
    pub fn append_title(&mut self, title: &str) {
        if self.state == PrinterState::Idle {
            return;
        }
        let total = self.total_width();
        let title = truncate(title, total);
        self.out.push_str(&format!("{title:^total$}\n"));
    }

    /// Horizontal `+---+` separator line.
    pub fn append_line_separator(&mut self) {
        if self.state == PrinterState::Idle {
            return;
        }
        self.out.push('+');
        for _ in 0..self.column_count {
            for _ in 0..self.column_width + 2 {
                self.out.push('-');
            }
            self.out.push('+');
        }
        self.out.push('\n');
    }

    /// Centered header cell.
    pub fn append_header_value(&mut self, value: &str) {
        self.append_cell(value, true);
    }

    /// Left-aligned value cell.
    pub fn append_value(&mut self, value: &str) {
        self.append_cell(value, false);
    }

    pub fn output(&self) -> &str {
        &self.out
    }

    pub fn into_output(self) -> String {
        self.out
    }

    fn append_cell(&mut self, value: &str, centered: bool) {
        if self.state == PrinterState::Idle {
            return;
        }
        if self.column_index == 0 {
            self.out.push('|');
        }
        let cell = truncate(value, self.column_width);
        let width = self.column_width;
        if centered {
            self.out.push_str(&format!(" {cell:^width$} |"));
        } else {
            self.out.push_str(&format!(" {cell:<width$} |"));
        }

        self.column_index += 1;
        if self.column_index == self.column_count {
            self.out.push('\n');
            self.column_index = 0;
        }
    }

    fn total_width(&self) -> usize {
        self.column_count * (self.column_width + 3) + 1
    }
}

/// Incremental HTML table renderer with the same state machine as
/// [`AsciiPrinter`]. The line separator has no HTML counterpart and is
/// ignored; cell content is escaped.
#[derive(Debug)]
pub struct HtmlPrinter {
    out: String,
    state: PrinterState,
    column_width: usize,
    column_count: usize,
    column_index: usize,
}

impl Default for HtmlPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlPrinter {
    pub fn new() -> Self {
        Self {
            out: String::new(),
            state: PrinterState::Idle,
            column_width: 0,
            column_count: 0,
            column_index: 0,
        }
    }

    pub fn start_table(&mut self, column_width: usize, column_count: usize) {
        if self.state == PrinterState::Drawing || column_count == 0 {
            return;
        }
        self.state = PrinterState::Drawing;
        self.column_width = column_width;
        self.column_count = column_count;
        self.column_index = 0;
        self.out.push_str("<table>\n");
    }

    pub fn end_table(&mut self) {
        if self.state == PrinterState::Idle {
            return;
        }
        if self.column_index != 0 {
            self.out.push_str("</tr>\n");
            self.column_index = 0;
        }
        self.out.push_str("</table>\n");
        self.state = PrinterState::Idle;
    }

    pub fn append_title(&mut self, title: &str) {
        if self.state == PrinterState::Idle {
            return;
        }
        self.out.push_str("<caption>");
        self.out.push_str(&escape(title));
        self.out.push_str("</caption>\n");
    }

    /// No-op: HTML tables draw their own separators.
    pub fn append_line_separator(&mut self) {}

    pub fn append_header_value(&mut self, value: &str) {
        self.append_cell(value, "th");
    }

    pub fn append_value(&mut self, value: &str) {
        self.append_cell(value, "td");
    }

    pub fn output(&self) -> &str {
        &self.out
    }

    pub fn into_output(self) -> String {
        self.out
    }

    fn append_cell(&mut self, value: &str, tag: &str) {
        if self.state == PrinterState::Idle {
            return;
        }
        if self.column_index == 0 {
            self.out.push_str("<tr>");
        }
        let cell = truncate(value, self.column_width);
        self.out.push_str(&format!("<{tag}>{}</{tag}>", escape(&cell)));

        self.column_index += 1;
        if self.column_index == self.column_count {
            self.out.push_str("</tr>\n");
            self.column_index = 0;
        }
    }
}

/// Character-safe truncation with an ellipsis marker.
fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    if width <= ELLIPSIS.len() {
        return value.chars().take(width).collect();
    }
    let mut truncated: String = value.chars().take(width - ELLIPSIS.len()).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(value) => value.to_string(),
        Value::Real(value) => value.to_string(),
        Value::Text(value) => value.clone(),
        Value::Blob(bytes) => format!("<blob {} bytes>", bytes.len()),
    }
}

const RENDER_COLUMN_WIDTH: usize = 16;

pub(crate) fn render_ascii(table: &Table<'_>, max_rows: usize) -> Result<String> {
    let mut printer = AsciiPrinter::new();
    let column_count = table.columns().len();

    printer.start_table(RENDER_COLUMN_WIDTH, column_count);
    if let Some(name) = table.name() {
        printer.append_title(name);
    }
    printer.append_line_separator();
    for name in table.column_names() {
        printer.append_header_value(name);
    }
    printer.append_line_separator();

    for row in table.rows()?.take(max_rows) {
        let row = row?;
        for idx in 0..column_count {
            let value = row.value_at(idx).unwrap_or(&Value::Null);
            printer.append_value(&display_value(value));
        }
    }
    printer.append_line_separator();
    printer.end_table();
    Ok(printer.into_output())
}

pub(crate) fn render_html(table: &Table<'_>, max_rows: usize) -> Result<String> {
    let mut printer = HtmlPrinter::new();
    let column_count = table.columns().len();

    printer.start_table(RENDER_COLUMN_WIDTH, column_count);
    if let Some(name) = table.name() {
        printer.append_title(name);
    }
    for name in table.column_names() {
        printer.append_header_value(name);
    }

    for row in table.rows()?.take(max_rows) {
        let row = row?;
        for idx in 0..column_count {
            let value = row.value_at(idx).unwrap_or(&Value::Null);
            printer.append_value(&display_value(value));
        }
    }
    printer.end_table();
    Ok(printer.into_output())
}

#[cfg(test)]
mod tests {
    use super::{AsciiPrinter, HtmlPrinter, truncate};

    #[test]
    fn calls_outside_the_bracket_are_no_ops() {
        let mut printer = AsciiPrinter::new();
        printer.append_value("ignored");
        printer.append_header_value("ignored");
        printer.append_line_separator();
        printer.append_title("ignored");
        printer.end_table();
        assert_eq!(printer.output(), "");

        let mut html = HtmlPrinter::new();
        html.append_value("ignored");
        html.append_title("ignored");
        html.end_table();
        assert_eq!(html.output(), "");
    }

    #[test]
    fn one_row_terminator_per_full_row() {
        let mut printer = AsciiPrinter::new();
        printer.start_table(5, 3);
        for value in ["a", "b", "c"] {
            printer.append_value(value);
        }
        printer.end_table();

        let out = printer.into_output();
        assert_eq!(out.matches('\n').count(), 1);
        assert_eq!(out, "| a     | b     | c     |\n");
    }

    #[test]
    fn column_counter_wraps_across_rows() {
        let mut printer = AsciiPrinter::new();
        printer.start_table(3, 2);
        for value in ["1", "2", "3", "4", "5", "6"] {
            printer.append_value(value);
        }
        printer.end_table();

        assert_eq!(printer.output().lines().count(), 3);
    }

    #[test]
    fn long_values_are_truncated_with_marker() {
        let mut printer = AsciiPrinter::new();
        printer.start_table(8, 1);
        printer.append_value("abcdefghijkl");
        printer.end_table();

        assert_eq!(printer.output(), "| abcde... |\n");
    }

    #[test]
    fn truncation_is_character_safe() {
        assert_eq!(truncate("héllöwörld", 5), "hé...");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 2), "ab");
    }

    #[test]
    fn partial_row_is_closed_by_end_table() {
        let mut printer = AsciiPrinter::new();
        printer.start_table(3, 3);
        printer.append_value("a");
        printer.end_table();
        assert!(printer.output().ends_with('\n'));

        // Idle again: further values are dropped.
        printer.append_value("b");
        assert!(!printer.output().contains('b'));
    }

    #[test]
    fn start_table_while_drawing_is_ignored() {
        let mut printer = AsciiPrinter::new();
        printer.start_table(4, 2);
        printer.start_table(9, 9);
        printer.append_value("a");
        printer.append_value("b");
        printer.end_table();

        // Two columns per row, as declared by the first call.
        assert_eq!(printer.output().lines().count(), 1);
    }

    #[test]
    fn separators_and_title_shape() {
        let mut printer = AsciiPrinter::new();
        printer.start_table(4, 2);
        printer.append_title("t");
        printer.append_line_separator();
        printer.append_header_value("h1");
        printer.append_header_value("h2");
        printer.append_line_separator();
        printer.end_table();

        let out = printer.into_output();
        let mut lines = out.lines();
        let title = lines.next().expect("title");
        assert_eq!(title.trim(), "t");
        assert_eq!(lines.next(), Some("+------+------+"));
        assert_eq!(lines.next(), Some("|  h1  |  h2  |"));
        assert_eq!(lines.next(), Some("+------+------+"));
    }

    #[test]
    fn html_rows_and_escaping() {
        let mut printer = HtmlPrinter::new();
        printer.start_table(32, 2);
        printer.append_title("results & more");
        printer.append_header_value("name");
        printer.append_header_value("note");
        printer.append_value("a<b");
        printer.append_value("plain");
        printer.end_table();

        let out = printer.into_output();
        assert_eq!(
            out,
            "<table>\n<caption>results &amp; more</caption>\n\
             <tr><th>name</th><th>note</th></tr>\n\
             <tr><td>a&lt;b</td><td>plain</td></tr>\n\
             </table>\n"
        );
    }

    #[test]
    fn renders_a_table_in_both_formats() {
        let ds = crate::DataSource::create_in_memory().expect("data source");
        ds.execute_batch(
            "CREATE TABLE pts (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO pts (name) VALUES ('alpha'), (NULL);",
        )
        .expect("seed");
        let table = ds.table("pts").expect("table");

        let ascii = table.to_ascii(10).expect("ascii");
        assert!(ascii.contains("name"));
        assert!(ascii.contains("alpha"));
        assert!(ascii.contains("NULL"));
        assert!(ascii.contains("+--"));

        let html = table.to_html(10).expect("html");
        assert!(html.contains("<caption>pts</caption>"));
        assert!(html.contains("<th>name</th>"));
        assert!(html.contains("<td>alpha</td>"));
    }

    #[test]
    fn render_honors_the_row_limit() {
        let ds = crate::DataSource::create_in_memory().expect("data source");
        ds.execute_batch(
            "CREATE TABLE seq (id INTEGER PRIMARY KEY);
             INSERT INTO seq (id) VALUES (1), (2), (3), (4);",
        )
        .expect("seed");
        let table = ds.table("seq").expect("table");

        let ascii = table.to_ascii(2).expect("ascii");
        assert!(ascii.contains("| 2"));
        assert!(!ascii.contains("| 3"));
    }

    #[test]
    fn html_partial_row_is_closed() {
        let mut printer = HtmlPrinter::new();
        printer.start_table(8, 2);
        printer.append_value("only");
        printer.end_table();

        assert_eq!(
            printer.output(),
            "<table>\n<tr><td>only</td></tr>\n</table>\n"
        );
    }
}
