//! Spreadsheet extractor: opens a zipped workbook container and yields
//! worksheet rows lazily, restartable only from the start. At most one
//! archive entry's decompressed bytes are held at a time; the shared-strings
//! buffer is dropped as soon as its lookup table is built, before any row
//! reaches the normalizer.

mod cells;
mod errors;

pub use cells::{CellValue, SheetRow};
pub use errors::{FormatError, Result};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

const PRIMARY_SHEET: &str = "xl/worksheets/sheet1.xml";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";

type Archive = ZipArchive<BufReader<File>>;

/// Handle to one uploaded workbook. `open` fails fast on an unreadable
/// archive or a missing worksheet entry; both are fatal to the whole run.
#[derive(Debug, Clone)]
pub struct Workbook {
    path: PathBuf,
    sheet_entry: String,
}

impl Workbook {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let archive = Self::open_archive(&path)?;
        let sheet_entry = locate_worksheet(&archive)?;
        log::debug!("workbook {} -> worksheet entry {}", path.display(), sheet_entry);
        Ok(Self { path, sheet_entry })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazy row sequence. Each call re-opens the container, so the sequence
    /// restarts from the first row; there is no mid-stream seek.
    pub fn rows(&self) -> Result<RowIter> {
        let mut archive = Self::open_archive(&self.path)?;
        let shared = read_shared_strings(&mut archive)?;
        let sheet = read_entry(&mut archive, &self.sheet_entry)?;
        Ok(RowIter::new(sheet, shared))
    }

    /// Total row count for progress denominators; a second from-the-start
    /// pass over the same entry.
    pub fn count_rows(&self) -> Result<u64> {
        let mut total = 0u64;
        for row in self.rows()? {
            row?;
            total += 1;
        }
        Ok(total)
    }

    fn open_archive(path: &Path) -> Result<Archive> {
        let file = File::open(path)?;
        Ok(ZipArchive::new(BufReader::new(file))?)
    }
}

fn locate_worksheet(archive: &Archive) -> Result<String> {
    if archive.file_names().any(|name| name == PRIMARY_SHEET) {
        return Ok(PRIMARY_SHEET.to_string());
    }
    let mut candidates: Vec<&str> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
        .collect();
    candidates.sort_unstable();
    candidates
        .first()
        .map(|name| name.to_string())
        .ok_or(FormatError::MissingWorksheet)
}

fn read_entry(archive: &mut Archive, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Scans only the out-of-line text items (`<si><t>`), returning the per-row
/// lookup table. The decompressed part is released when this returns.
fn read_shared_strings(archive: &mut Archive) -> Result<Vec<String>> {
    let bytes = match archive.by_name(SHARED_STRINGS) {
        Ok(mut entry) => {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            bytes
        }
        Err(ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut reader = Reader::from_reader(Cursor::new(bytes));
    let mut buf = Vec::new();
    let mut table = Vec::new();
    let mut current = String::new();
    let mut in_item = false;
    let mut in_text = false;
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = true;
                    current.clear();
                }
                b"t" if in_item => in_text = true,
                _ => {}
            },
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_item = false;
                    table.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            _ => {}
        }
    }
    Ok(table)
}

struct PendingCell {
    col: usize,
    ty: String,
    raw: String,
    inline: String,
}

/// Streaming iterator over worksheet rows. Holds only the worksheet entry's
/// bytes and the shared-strings table.
pub struct RowIter {
    reader: Reader<Cursor<Vec<u8>>>,
    buf: Vec<u8>,
    shared: Vec<String>,
    next_fallback_row: u32,
    done: bool,
}

impl RowIter {
    fn new(sheet: Vec<u8>, shared: Vec<String>) -> Self {
        Self {
            reader: Reader::from_reader(Cursor::new(sheet)),
            buf: Vec::new(),
            shared,
            next_fallback_row: 1,
            done: false,
        }
    }

    fn resolve(&self, cell: PendingCell) -> (usize, CellValue) {
        let value = match cell.ty.as_str() {
            "s" => cell
                .raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| self.shared.get(i))
                .map(|s| CellValue::Text(s.clone()))
                .unwrap_or(CellValue::Empty),
            "inlineStr" => CellValue::Text(cell.inline),
            "str" | "b" | "e" => CellValue::Text(cell.raw),
            _ => {
                let raw = cell.raw.trim();
                if raw.is_empty() {
                    CellValue::Empty
                } else {
                    match raw.parse::<f64>() {
                        Ok(n) => CellValue::Number(n),
                        Err(_) => CellValue::Text(cell.raw),
                    }
                }
            }
        };
        (cell.col, value)
    }

    fn next_row(&mut self) -> Result<Option<SheetRow>> {
        let mut row_index: Option<u32> = None;
        let mut cells: Vec<CellValue> = Vec::new();
        let mut pending: Option<PendingCell> = None;
        let mut in_value = false;
        let mut in_inline_text = false;

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Eof => return Ok(None),
                Event::Start(e) => match e.local_name().as_ref() {
                    b"row" => {
                        row_index = Some(row_number(&e, self.next_fallback_row));
                    }
                    b"c" => {
                        pending = Some(PendingCell {
                            col: attr_value(&e, b"r")
                                .and_then(|r| cells::column_index(&r))
                                .unwrap_or(cells.len()),
                            ty: attr_value(&e, b"t").unwrap_or_default(),
                            raw: String::new(),
                            inline: String::new(),
                        });
                    }
                    b"v" if pending.is_some() => in_value = true,
                    b"t" if pending.is_some() => in_inline_text = true,
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"row" => {
                        let index = row_number(&e, self.next_fallback_row);
                        self.next_fallback_row = index + 1;
                        return Ok(Some(SheetRow::new(index, Vec::new())));
                    }
                    b"c" => {
                        // self-closing cell, explicitly blank
                        if let Some(col) = attr_value(&e, b"r").and_then(|r| cells::column_index(&r))
                        {
                            place(&mut cells, col, CellValue::Empty);
                        }
                    }
                    _ => {}
                },
                Event::Text(t) => {
                    if let Some(cell) = pending.as_mut() {
                        if in_value {
                            cell.raw.push_str(&t.unescape()?);
                        } else if in_inline_text {
                            cell.inline.push_str(&t.unescape()?);
                        }
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"v" => in_value = false,
                    b"t" => in_inline_text = false,
                    b"c" => {
                        if let Some(cell) = pending.take() {
                            let (col, value) = self.resolve(cell);
                            place(&mut cells, col, value);
                        }
                    }
                    b"row" => {
                        let index = row_index.unwrap_or(self.next_fallback_row);
                        self.next_fallback_row = index + 1;
                        return Ok(Some(SheetRow::new(index, cells)));
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }
}

impl Iterator for RowIter {
    type Item = Result<SheetRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn row_number(e: &BytesStart<'_>, fallback: u32) -> u32 {
    attr_value(e, b"r")
        .and_then(|r| r.trim().parse::<u32>().ok())
        .unwrap_or(fallback)
}

fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn place(cells: &mut Vec<CellValue>, col: usize, value: CellValue) {
    if cells.len() <= col {
        cells.resize(col + 1, CellValue::Empty);
    }
    cells[col] = value;
}
