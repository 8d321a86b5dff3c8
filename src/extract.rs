//! Text extraction for uploaded source files.
//!
//! Extraction is keyed by file extension: plain text and Markdown are read
//! as UTF-8, PDF goes through `pdf-extract`, DOCX is unzipped and its
//! `word/document.xml` walked for `w:t` runs. Anything else is
//! [`Error::UnsupportedFormat`]; a supported file that cannot be parsed is
//! [`Error::Extraction`], which the ingestion engine records as
//! `index_status = "error"`.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb bound).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extracts plain text from uploaded bytes, dispatching on the file name's
/// extension.
pub fn extract_text(bytes: &[u8], file_name: &str) -> Result<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        _ => Err(Error::UnsupportedFormat(format!(
            "no extractor for '{}' (supported: txt, md, pdf, docx)",
            file_name
        ))),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::Extraction(format!("PDF extraction failed: {}", e)))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("DOCX archive unreadable: {}", e)))?;
    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| Error::Extraction(format!("DOCX entry unreadable: {}", e)))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| Error::Extraction(format!("DOCX entry read failed: {}", e)))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(Error::Extraction(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(Error::Extraction(
            "word/document.xml not found".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

/// Walk the document XML collecting `w:t` text runs. Paragraph ends become
/// newlines so the chunker sees paragraph boundaries.
fn extract_w_t_elements(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(format!("DOCX XML invalid: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
