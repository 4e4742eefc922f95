/// One positionally-typed cell value. Dates arrive as text in the exports
/// this pipeline consumes; numeric cells keep their raw numeric form.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
}

impl CellValue {
    /// Trimmed textual view, None for blank cells. Numbers render without a
    /// trailing `.0` so downstream decimal parsing sees `"12"`, not `"12.0"`.
    pub fn text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            CellValue::Number(n) => Some(format!("{n}")),
        }
    }

    pub fn number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text().is_none()
    }
}

/// One worksheet row; cells are addressed by zero-based column position
/// (column A is 0). Missing cells read as [`CellValue::Empty`].
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub index: u32,
    cells: Vec<CellValue>,
}

impl SheetRow {
    pub fn new(index: u32, cells: Vec<CellValue>) -> Self {
        Self { index, cells }
    }

    pub fn cell(&self, col: usize) -> &CellValue {
        self.cells.get(col).unwrap_or(&CellValue::Empty)
    }

    pub fn text(&self, col: usize) -> Option<String> {
        self.cell(col).text()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(CellValue::is_blank)
    }
}

/// Zero-based column index from a cell reference like `"C5"`.
pub(crate) fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: Vec<u8> = cell_ref
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for b in letters {
        index = index * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize;
    }
    Some(index - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_index_handles_single_and_double_letters() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("C5"), Some(2));
        assert_eq!(column_index("R12"), Some(17));
        assert_eq!(column_index("AA3"), Some(26));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn number_cells_render_without_float_suffix() {
        assert_eq!(CellValue::Number(12.0).text().as_deref(), Some("12"));
        assert_eq!(CellValue::Number(0.5).text().as_deref(), Some("0.5"));
    }

    #[test]
    fn blank_detection_ignores_whitespace() {
        let row = SheetRow::new(
            1,
            vec![CellValue::Text("   ".into()), CellValue::Empty],
        );
        assert!(row.is_empty());
        assert_eq!(row.text(0), None);
        assert_eq!(row.cell(9), &CellValue::Empty);
    }
}
