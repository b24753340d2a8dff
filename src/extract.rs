//! Per-unit text extraction for office documents and PDFs.
//!
//! A document is split into ordered units, each numbered from 1:
//!
//! | Format | Unit | Secondary text |
//! |--------|------|----------------|
//! | `.pptx` | slide | speaker notes |
//! | `.pdf` | page | none |
//! | `.xlsx` | worksheet | none |
//! | `.docx` | whole document | none |
//!
//! Extraction never panics on malformed input; it returns an [`ExtractError`]
//! and the item is marked failed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::models::ExtractedUnit;
use crate::traits::Extractor;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pptx,
    Docx,
    Xlsx,
    Pdf,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pptx" => Ok(DocumentKind::Pptx),
            "docx" => Ok(DocumentKind::Docx),
            "xlsx" => Ok(DocumentKind::Xlsx),
            "pdf" => Ok(DocumentKind::Pdf),
            "" => Err(ExtractError::Unsupported(format!(
                "{} has no extension",
                path.display()
            ))),
            other => Err(ExtractError::Unsupported(format!(".{}", other))),
        }
    }
}

/// Built-in [`Extractor`] dispatching on the file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

#[async_trait]
impl Extractor for DocumentExtractor {
    async fn extract(&self, path: &Path) -> anyhow::Result<Vec<ExtractedUnit>> {
        let kind = DocumentKind::from_path(path)?;
        let bytes = tokio::fs::read(path).await?;
        let units = tokio::task::spawn_blocking(move || extract_units(&bytes, kind)).await??;
        Ok(units)
    }
}

/// Split `bytes` into ordered units.
pub fn extract_units(bytes: &[u8], kind: DocumentKind) -> Result<Vec<ExtractedUnit>, ExtractError> {
    match kind {
        DocumentKind::Pptx => extract_pptx(bytes),
        DocumentKind::Docx => extract_docx(bytes),
        DocumentKind::Xlsx => extract_xlsx(bytes),
        DocumentKind::Pdf => extract_pdf(bytes),
    }
}

fn unit(index: usize, primary: String, secondary: String) -> ExtractedUnit {
    ExtractedUnit {
        unit_index: index as u32 + 1,
        primary_text: primary,
        secondary_text: secondary,
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<ExtractedUnit>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| unit(i, text.trim().to_string(), String::new()))
        .collect())
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Numbered part names under `prefix`, sorted numerically (`slide2` before `slide10`).
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| {
            n.strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(".xml"))
                .map_or(false, |num| num.parse::<u32>().is_ok())
        })
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Collect the text of `<*:t>` runs, one line per `<*:p>` paragraph.
///
/// Runs inside `<a:fld>` (slide numbers, dates) are skipped.
fn paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut field_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_t = true,
                b"fld" => field_depth += 1,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"fld" => field_depth = field_depth.saturating_sub(1),
                b"p" => {
                    let line = current.trim();
                    if !line.is_empty() {
                        paragraphs.push(line.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if matches!(e.local_name().as_ref(), b"br" | b"tab") && !current.is_empty() {
                    current.push(' ');
                }
            }
            Ok(Event::Text(te)) if in_t && field_depth == 0 => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n"))
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<ExtractedUnit>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    Ok(vec![unit(0, paragraph_text(&xml)?, String::new())])
}

fn extract_pptx(bytes: &[u8]) -> Result<Vec<ExtractedUnit>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slide_names = numbered_parts(&archive, "ppt/slides/slide");
    if slide_names.is_empty() && archive.by_name("ppt/presentation.xml").is_err() {
        return Err(ExtractError::Ooxml("not a presentation".to_string()));
    }

    let mut units = Vec::with_capacity(slide_names.len());
    for (i, name) in slide_names.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name, MAX_XML_ENTRY_BYTES)?;
        let text = paragraph_text(&xml)?;
        let notes = match notes_part_for_slide(&mut archive, name)? {
            Some(notes_name) => {
                let notes_xml = read_zip_entry_bounded(&mut archive, &notes_name, MAX_XML_ENTRY_BYTES)?;
                paragraph_text(&notes_xml)?
            }
            None => String::new(),
        };
        units.push(unit(i, text, notes));
    }
    Ok(units)
}

/// Resolve the notes slide linked from `ppt/slides/_rels/slideN.xml.rels`.
fn notes_part_for_slide(
    archive: &mut Archive<'_>,
    slide_name: &str,
) -> Result<Option<String>, ExtractError> {
    use quick_xml::events::Event;

    let file_name = slide_name.trim_start_matches("ppt/slides/");
    let rels_name = format!("ppt/slides/_rels/{}.rels", file_name);
    if archive.by_name(&rels_name).is_err() {
        return Ok(None);
    }
    let xml = read_zip_entry_bounded(archive, &rels_name, MAX_XML_ENTRY_BYTES)?;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut attrs: HashMap<Vec<u8>, String> = HashMap::new();
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().unwrap_or_default().into_owned();
                    attrs.insert(attr.key.as_ref().to_vec(), value);
                }
                let is_notes = attrs
                    .get(b"Type".as_slice())
                    .map_or(false, |t| t.ends_with("/notesSlide"));
                if let (true, Some(target)) = (is_notes, attrs.get(b"Target".as_slice())) {
                    return Ok(Some(resolve_relative_part("ppt/slides", target)));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(None)
}

/// Resolve a relationship target such as `../notesSlides/notesSlide1.xml` against `base`.
fn resolve_relative_part(base: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for part in target.split('/') {
        match part {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn extract_xlsx(bytes: &[u8]) -> Result<Vec<ExtractedUnit>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheet_names = numbered_parts(&archive, "xl/worksheets/sheet");

    let mut units = Vec::new();
    for (i, name) in sheet_names.iter().take(XLSX_MAX_SHEETS).enumerate() {
        let sheet_xml = read_zip_entry_bounded(&mut archive, name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?;
        units.push(unit(i, text, String::new()));
    }
    Ok(units)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut cell_type: Option<Vec<u8>> = None;
    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"t")
                        .map(|a| a.value.into_owned());
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    match cell_type.as_deref() {
                        Some(b"s") => {
                            if let Some(text) = s.parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                                cells.push(text.clone());
                            }
                        }
                        _ => cells.push(s.to_string()),
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => cell_type = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}
