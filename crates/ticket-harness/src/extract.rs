//! Text and table extraction for Office Open XML uploads.
//!
//! `.docx` files become paragraph text; `.xlsx` files become rows of cell
//! strings from the first worksheet. Both are ZIP archives of XML parts,
//! read with `zip` and streamed with `quick-xml`. Entry sizes, cell counts
//! and column references are bounded so a hostile archive cannot exhaust
//! memory.

use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum cells read from a worksheet.
const XLSX_MAX_CELLS: usize = 500_000;
/// Columns per worksheet row; the last Excel column is `XFD`.
const XLSX_MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("not a valid OOXML archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("{0} exceeds the archive entry size limit")]
    TooLarge(String),
    #[error("{0} not found in archive")]
    MissingPart(String),
    #[error("malformed XML in {part}: {message}")]
    Xml { part: String, message: String },
    #[error("I/O error reading archive: {0}")]
    Io(#[from] std::io::Error),
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ExtractError::MissingPart(name.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::TooLarge(name.to_string()));
    }
    Ok(out)
}

fn xml_error(part: &str, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Xml {
        part: part.to_string(),
        message: e.to_string(),
    }
}

/// Paragraph text of a `.docx`, one paragraph per line, blank paragraphs
/// dropped.
pub fn docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    const PART: &str = "word/document.xml";
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let xml = read_entry(&mut archive, PART)?;

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| xml_error(PART, e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(PART, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs.join("\n"))
}

/// Rows of the first worksheet of an `.xlsx`, as cell strings.
///
/// Cells are placed by their `r` reference, so gaps in a row come back as
/// empty strings. Shared strings, inline strings, booleans and raw numeric
/// values are all returned as text.
pub fn xlsx_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => shared_strings(&xml)?,
        Err(ExtractError::MissingPart(_)) => Vec::new(),
        Err(e) => return Err(e),
    };

    let sheet = first_worksheet(&archive)
        .ok_or_else(|| ExtractError::MissingPart("xl/worksheets/sheet*.xml".to_string()))?;
    let xml = read_entry(&mut archive, &sheet)?;
    sheet_rows(&xml, &shared, &sheet)
}

fn first_worksheet(archive: &Archive<'_>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(str::to_string)
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    const PART: &str = "xl/sharedStrings.xml";
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(&te.unescape().map_err(|e| xml_error(PART, e))?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Default)]
struct Cell {
    column: usize,
    kind: Option<Vec<u8>>,
    value: String,
}

fn start_cell(e: &BytesStart<'_>, next_column: usize, part: &str) -> Result<Cell, ExtractError> {
    let mut cell = Cell {
        column: next_column,
        ..Cell::default()
    };
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"r" => {
                if let Some(col) = column_index(&attr.value).map_err(|m| xml_error(part, m))? {
                    cell.column = col;
                }
            }
            b"t" => cell.kind = Some(attr.value.to_vec()),
            _ => {}
        }
    }
    if cell.column >= XLSX_MAX_COLUMNS {
        return Err(xml_error(part, "row has more than 16384 cells"));
    }
    Ok(cell)
}

/// Zero-based column of a cell reference such as `B7` or `AA12`, or `None`
/// when the reference has no column letters.
fn column_index(reference: &[u8]) -> Result<Option<usize>, String> {
    let mut col = 0usize;
    let mut seen = false;
    for &b in reference.iter().take_while(|b| b.is_ascii_alphabetic()) {
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(usize::from(b.to_ascii_uppercase() - b'A' + 1)))
            .filter(|&c| c <= XLSX_MAX_COLUMNS)
            .ok_or_else(|| {
                format!(
                    "cell reference {} is past column XFD",
                    String::from_utf8_lossy(reference)
                )
            })?;
        seen = true;
    }
    Ok(seen.then(|| col - 1))
}

fn resolve_cell(cell: &Cell, shared: &[String]) -> String {
    match cell.kind.as_deref() {
        Some(b"s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some(b"b") => match cell.value.trim() {
            "1" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        _ => cell.value.clone(),
    }
}

fn sheet_rows(xml: &[u8], shared: &[String], part: &str) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<Cell> = None;
    let mut in_value = false;
    let mut cells_read = 0usize;

    loop {
        if cells_read >= XLSX_MAX_CELLS {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => cell = Some(start_cell(&e, row.len(), part)?),
                b"v" | b"t" if cell.is_some() => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"c" => {
                    let empty = start_cell(&e, row.len(), part)?;
                    place(&mut row, empty.column, String::new());
                    cells_read += 1;
                }
                b"row" => rows.push(Vec::new()),
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let text = te.unescape().map_err(|e| xml_error(part, e))?;
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        place(&mut row, c.column, resolve_cell(&c, shared));
                        cells_read += 1;
                    }
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(rows)
}

fn place(row: &mut Vec<String>, column: usize, value: String) {
    if row.len() <= column {
        row.resize(column + 1, String::new());
    }
    row[column] = value;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Build a ZIP archive in memory from `(name, content)` pairs.
    pub(crate) fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut out);
            for (name, content) in entries {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let doc = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>VPN drops </w:t></w:r><w:r><w:t>every hour</w:t></w:r></w:p>
<w:p></w:p>
<w:p><w:r><w:t>Fix: renew the cert &amp; restart</w:t></w:r></w:p>
</w:body></w:document>"#;
        let bytes = zip_of(&[("word/document.xml", doc)]);
        assert_eq!(
            docx_text(&bytes).unwrap(),
            "VPN drops every hour\nFix: renew the cert & restart"
        );
    }

    #[test]
    fn docx_without_document_part_is_rejected() {
        let bytes = zip_of(&[("word/other.xml", "<x/>")]);
        assert!(matches!(docx_text(&bytes), Err(ExtractError::MissingPart(_))));
    }

    #[test]
    fn non_zip_input_is_rejected() {
        assert!(matches!(docx_text(b"plain text"), Err(ExtractError::Archive(_))));
        assert!(matches!(xlsx_rows(b"plain text"), Err(ExtractError::Archive(_))));
    }

    #[test]
    fn xlsx_rows_resolve_shared_and_inline_strings() {
        let shared = r#"<sst><si><t>Issue key</t></si><si><t>Summary</t></si><si><r><t>Login </t></r><r><t>fails</t></r></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>INC-1</t></is></c><c r="C2"><v>42</v></c></row>
<row r="3"><c r="A3" t="str"><v>INC-2</v></c><c r="B3" t="s"><v>2</v></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_of(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);

        let rows = xlsx_rows(&bytes).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["Issue key", "Summary"]);
        assert_eq!(rows[1], vec!["INC-1", "", "42"]);
        assert_eq!(rows[2], vec!["INC-2", "Login fails"]);
    }

    #[test]
    fn column_letters_map_to_indices() {
        assert_eq!(column_index(b"A1"), Ok(Some(0)));
        assert_eq!(column_index(b"Z9"), Ok(Some(25)));
        assert_eq!(column_index(b"AA10"), Ok(Some(26)));
        assert_eq!(column_index(b"XFD3"), Ok(Some(16_383)));
        assert_eq!(column_index(b"12"), Ok(None));
    }

    #[test]
    fn references_past_last_column_are_rejected() {
        assert!(column_index(b"XFE1").is_err());
        assert!(column_index(b"ZZZZZZ1").is_err());
        assert!(column_index(b"ZZZZZZZZZZZZZZZ1").is_err());

        for reference in ["ZZZZZZ1", "ZZZZZZZZZZZZZZZ1"] {
            let sheet = format!(
                "<worksheet><sheetData><row r=\"1\"><c r=\"{}\" t=\"inlineStr\">\
                 <is><t>x</t></is></c></row></sheetData></worksheet>",
                reference
            );
            let bytes = zip_of(&[("xl/worksheets/sheet1.xml", sheet.as_str())]);
            assert!(matches!(xlsx_rows(&bytes), Err(ExtractError::Xml { .. })));
        }
    }
}
