//! Plain-text extraction for uploaded documents.
//!
//! Parsing is a pure, blocking transform from bytes to text. Callers on the
//! async runtime should run it on the blocking pool.

use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;
use std::sync::LazyLock;

use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use zip::ZipArchive;

use crate::error::ParseError;
use crate::utils::file_extension;

static RE_MULTI_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_SLIDE_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
    Pptx,
    Csv,
}

impl DocumentFormat {
    /// Detect the format from a file name's extension.
    pub fn from_file_name(file_name: &str) -> Result<Self, ParseError> {
        let ext = file_extension(file_name).ok_or_else(|| {
            ParseError::UnsupportedFormat(format!("'{file_name}' has no extension"))
        })?;
        ext.parse()
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Txt => "txt",
            DocumentFormat::Pptx => "pptx",
            DocumentFormat::Csv => "csv",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "docx" => Ok(DocumentFormat::Docx),
            "txt" => Ok(DocumentFormat::Txt),
            "pptx" => Ok(DocumentFormat::Pptx),
            "csv" => Ok(DocumentFormat::Csv),
            other => Err(ParseError::UnsupportedFormat(format!(".{other}"))),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Extract plain text from `bytes` declared as `format`.
pub fn parse(format: DocumentFormat, bytes: &[u8]) -> Result<String, ParseError> {
    let text = match format {
        DocumentFormat::Txt => decode_text(bytes),
        DocumentFormat::Csv => csv_text(&decode_text(bytes))?,
        DocumentFormat::Pdf => pdf_text(bytes)?,
        DocumentFormat::Docx => docx_text(bytes)?,
        DocumentFormat::Pptx => pptx_text(bytes)?,
    };
    Ok(normalize(&text))
}

fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    RE_MULTI_BLANK_LINES
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}

/// UTF-8 with a Latin-1 fallback; never fails.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

fn csv_text(text: &str) -> Result<String, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::ParseFailure(format!("invalid CSV header: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ParseError::ParseFailure(format!("invalid CSV: {e}")))?;
        let cells: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(i, value)| match headers.get(i) {
                Some(header) if !header.is_empty() => format!("{header}: {}", value.trim()),
                _ => value.trim().to_string(),
            })
            .collect();
        rows.push(cells.join(" | "));
    }

    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(format!(
        "CSV file with {} rows and {} columns",
        rows.len(),
        headers.len()
    ));
    out.push(format!("Columns: {}", headers.join(", ")));
    out.extend(rows);
    Ok(out.join("\n"))
}

fn pdf_text(bytes: &[u8]) -> Result<String, ParseError> {
    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ParseError::ParseFailure(format!("PDF parse error: {e}")))?;
    Ok(mark_pdf_pages(&raw))
}

/// Prefix each page (form-feed separated) with a page marker.
fn mark_pdf_pages(raw: &str) -> String {
    raw.split('\u{c}')
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| format!("--- Page {} ---\n{}", i + 1, page.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn open_archive(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, ParseError> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ParseError::ParseFailure(format!("not a valid Office archive: {e}")))
}

fn read_part(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String, ParseError> {
    let mut part = archive
        .by_name(name)
        .map_err(|e| ParseError::ParseFailure(format!("missing {name}: {e}")))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| ParseError::ParseFailure(format!("unreadable {name}: {e}")))?;
    Ok(xml)
}

fn docx_text(bytes: &[u8]) -> Result<String, ParseError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_part(&mut archive, "word/document.xml")?;
    Ok(xml_blocks(&xml)?.join("\n"))
}

fn pptx_text(bytes: &[u8]) -> Result<String, ParseError> {
    let mut archive = open_archive(bytes)?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = RE_SLIDE_PART.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    if slides.is_empty() {
        return Err(ParseError::ParseFailure(
            "presentation contains no slides".to_string(),
        ));
    }
    slides.sort_by_key(|(number, _)| *number);

    let mut out = Vec::new();
    for (number, part) in slides {
        let xml = read_part(&mut archive, &part)?;
        let blocks = xml_blocks(&xml)?;
        if blocks.is_empty() {
            continue;
        }
        out.push(format!("--- Slide {number} ---\n{}", blocks.join("\n")));
    }
    Ok(out.join("\n\n"))
}

/// Paragraph and table-row text of a WordprocessingML or DrawingML part.
///
/// Both vocabularies share local names (`p`, `t`, `tbl`, `tr`, `tc`), so one
/// walker serves DOCX bodies and PPTX slides. Table rows come out as
/// `cell | cell`.
fn xml_blocks(xml: &str) -> Result<Vec<String>, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut blocks = Vec::new();
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut in_text = false;
    let mut table_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => paragraph.clear(),
                b"tbl" => table_depth += 1,
                b"tr" => row.clear(),
                b"tc" => cell.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = reader
                    .decoder()
                    .decode(&t)
                    .map_err(|e| ParseError::ParseFailure(format!("bad text encoding: {e}")))?;
                paragraph.push_str(&text);
            }
            Ok(Event::GeneralRef(r)) if in_text => {
                if let Some(c) = resolve_entity(&r) {
                    paragraph.push(c);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        if table_depth > 0 {
                            if !cell.is_empty() {
                                cell.push(' ');
                            }
                            cell.push_str(text);
                        } else {
                            blocks.push(text.to_string());
                        }
                    }
                    paragraph.clear();
                }
                b"tc" => row.push(std::mem::take(&mut cell)),
                b"tr" => {
                    if row.iter().any(|c| !c.is_empty()) {
                        blocks.push(row.join(" | "));
                    }
                    row.clear();
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::ParseFailure(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    Ok(blocks)
}

/// Resolve `&name;` and `&#N;` references inside text runs.
fn resolve_entity(name: &[u8]) -> Option<char> {
    match name {
        b"amp" => Some('&'),
        b"lt" => Some('<'),
        b"gt" => Some('>'),
        b"quot" => Some('"'),
        b"apos" => Some('\''),
        [b'#', b'x' | b'X', hex @ ..] => {
            u32::from_str_radix(std::str::from_utf8(hex).ok()?, 16)
                .ok()
                .and_then(char::from_u32)
        }
        [b'#', dec @ ..] => std::str::from_utf8(dec)
            .ok()?
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn office_archive(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const DOCX_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Intro paragraph</w:t></w:r></w:p>
    <w:p><w:r><w:t xml:space="preserve">Terms &amp; </w:t></w:r><w:r><w:t>conditions</w:t></w:r></w:p>
    <w:p></w:p>
    <w:tbl>
      <w:tr>
        <w:tc><w:p><w:r><w:t>R1C1</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>R1C2</w:t></w:r></w:p></w:tc>
      </w:tr>
      <w:tr>
        <w:tc><w:p><w:r><w:t>R2C1</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>R2C2</w:t></w:r></w:p></w:tc>
      </w:tr>
    </w:tbl>
  </w:body>
</w:document>"#;

    fn slide(text: &str) -> String {
        format!(
            r#"<p:sld xmlns:p="urn:p" xmlns:a="urn:a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{text}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
        )
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            DocumentFormat::from_file_name("Report.PDF").unwrap(),
            DocumentFormat::Pdf
        );
        assert!(matches!(
            DocumentFormat::from_file_name("setup.exe"),
            Err(ParseError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            DocumentFormat::from_file_name("README"),
            Err(ParseError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_txt_utf8_and_latin1_fallback() {
        assert_eq!(parse(DocumentFormat::Txt, "héllo\n".as_bytes()).unwrap(), "héllo");
        assert_eq!(parse(DocumentFormat::Txt, b"caf\xe9").unwrap(), "café");
        assert_eq!(parse(DocumentFormat::Txt, b"\xEF\xBB\xBFbom").unwrap(), "bom");
    }

    #[test]
    fn test_blank_lines_are_collapsed() {
        let text = parse(DocumentFormat::Txt, b"a\r\n\r\n\r\n\r\nb").unwrap();
        assert_eq!(text, "a\n\nb");
    }

    #[test]
    fn test_csv_rows_are_labelled() {
        let text = parse(
            DocumentFormat::Csv,
            b"name,role\nAda,engineer\nGrace,admiral,extra\n",
        )
        .unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "CSV file with 2 rows and 2 columns");
        assert_eq!(lines[1], "Columns: name, role");
        assert_eq!(lines[2], "name: Ada | role: engineer");
        assert_eq!(lines[3], "name: Grace | role: admiral | extra");
    }

    #[test]
    fn test_docx_paragraphs_and_tables() {
        let bytes = office_archive(&[("word/document.xml", DOCX_BODY)]);
        let text = parse(DocumentFormat::Docx, &bytes).unwrap();
        assert_eq!(
            text,
            "Intro paragraph\nTerms & conditions\nR1C1 | R1C2\nR2C1 | R2C2"
        );
    }

    #[test]
    fn test_docx_without_body_is_parse_failure() {
        let bytes = office_archive(&[("word/styles.xml", "<w:styles/>")]);
        assert!(matches!(
            parse(DocumentFormat::Docx, &bytes),
            Err(ParseError::ParseFailure(_))
        ));
    }

    #[test]
    fn test_corrupt_archive_is_parse_failure() {
        assert!(matches!(
            parse(DocumentFormat::Docx, b"definitely not a zip"),
            Err(ParseError::ParseFailure(_))
        ));
        assert!(matches!(
            parse(DocumentFormat::Pptx, b"PK\x03\x04broken"),
            Err(ParseError::ParseFailure(_))
        ));
    }

    #[test]
    fn test_pptx_slides_in_numeric_order_skipping_empty() {
        let empty = r#"<p:sld xmlns:p="urn:p"><p:cSld/></p:sld>"#;
        let (one, two, ten) = (slide("One &lt;intro&gt;"), slide("Two"), slide("Ten"));
        let bytes = office_archive(&[
            ("ppt/slides/slide10.xml", ten.as_str()),
            ("ppt/slides/slide2.xml", two.as_str()),
            ("ppt/slides/slide1.xml", one.as_str()),
            ("ppt/slides/slide3.xml", empty),
            ("ppt/slides/_rels/slide1.xml.rels", "<Relationships/>"),
        ]);

        let text = parse(DocumentFormat::Pptx, &bytes).unwrap();
        assert_eq!(
            text,
            "--- Slide 1 ---\nOne <intro>\n\n--- Slide 2 ---\nTwo\n\n--- Slide 10 ---\nTen"
        );
    }

    #[test]
    fn test_pdf_page_markers() {
        let marked = mark_pdf_pages("first page\n\u{c}\n\u{c}third page");
        assert_eq!(
            marked,
            "--- Page 1 ---\nfirst page\n\n--- Page 3 ---\nthird page"
        );
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity(b"amp"), Some('&'));
        assert_eq!(resolve_entity(b"#65"), Some('A'));
        assert_eq!(resolve_entity(b"#x263A"), Some('☺'));
        assert_eq!(resolve_entity(b"nbsp"), None);
    }
}
