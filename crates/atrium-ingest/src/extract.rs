use std::io::Read;
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::types::FileType;

/// How much of the file head the magic sniff examines.
pub const SNIFF_LEN: usize = 8192;

/// Best-effort MIME detection from the file head.
fn detect_mime(header: &[u8]) -> &'static str {
    if header.starts_with(b"%PDF") {
        return "application/pdf";
    }
    // DOCX is a ZIP container (OOXML).
    if header.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    if is_plausible_utf8(header) {
        return "text/plain";
    }
    "application/octet-stream"
}

/// UTF-8 check tolerant of a multi-byte sequence cut at the sniff boundary.
fn is_plausible_utf8(header: &[u8]) -> bool {
    match std::str::from_utf8(header) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && header.len() - e.valid_up_to() < 4,
    }
}

/// Verify that the file head matches the declared type.
///
/// Fails with the detected MIME in the message so upload errors are
/// actionable ("extension says pdf, content says zip").
pub fn check_magic(header: &[u8], file_type: FileType) -> Result<()> {
    let detected = detect_mime(header);
    let ok = match file_type {
        FileType::Pdf => detected == "application/pdf",
        FileType::Docx => detected == "application/zip",
        FileType::Txt | FileType::Md => detected == "text/plain",
    };
    if !ok {
        return Err(IngestError::InvalidFile(format!(
            "File content does not match extension '.{}'. Detected: {detected}",
            file_type.extension()
        )));
    }
    Ok(())
}

/// Extract normalized text from a file on disk, dispatching on its type.
pub fn extract_text(path: &Path, file_type: FileType) -> Result<String> {
    match file_type {
        FileType::Pdf => extract_pdf(path),
        FileType::Docx => extract_docx(path),
        FileType::Txt | FileType::Md => {
            std::fs::read_to_string(path).map_err(IngestError::from)
        }
    }
}

fn extract_pdf(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path).map_err(|e| IngestError::Extraction(e.to_string()))
}

/// Pull text out of the OOXML body (`word/document.xml`).
///
/// Paragraphs are separated by blank lines; table rows become one line with
/// cell texts joined by " | ".
fn extract_docx(path: &Path) -> Result<String> {
    use quick_xml::events::Event;

    let file = std::fs::File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| IngestError::Extraction(e.to_string()))?;
    let mut document = archive
        .by_name("word/document.xml")
        .map_err(|e| IngestError::Extraction(format!("missing document.xml: {e}")))?;
    let mut xml = String::new();
    document.read_to_string(&mut xml)?;

    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut parts: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    // Table state: cell paragraphs accumulate per row, joined on row end.
    let mut cell_depth = 0usize;
    let mut row_cells: Vec<String> = Vec::new();
    let mut cell_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:tc" => {
                    cell_depth += 1;
                    cell_text.clear();
                }
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        if cell_depth > 0 {
                            if !cell_text.is_empty() {
                                cell_text.push(' ');
                            }
                            cell_text.push_str(text);
                        } else {
                            parts.push(text.to_string());
                        }
                    }
                    paragraph.clear();
                }
                b"w:tc" => {
                    cell_depth = cell_depth.saturating_sub(1);
                    let text = cell_text.trim();
                    if !text.is_empty() {
                        row_cells.push(text.to_string());
                    }
                    cell_text.clear();
                }
                b"w:tr" => {
                    if !row_cells.is_empty() {
                        parts.push(row_cells.join(" | "));
                        row_cells.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| IngestError::Extraction(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(IngestError::Extraction(e.to_string())),
        }
    }

    Ok(parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn magic_accepts_matching_types() {
        assert!(check_magic(b"%PDF-1.7 rest of file", FileType::Pdf).is_ok());
        assert!(check_magic(b"PK\x03\x04docxcontent", FileType::Docx).is_ok());
        assert!(check_magic("plain text \u{00e9}".as_bytes(), FileType::Txt).is_ok());
        assert!(check_magic(b"# heading\n\nbody", FileType::Md).is_ok());
    }

    #[test]
    fn magic_rejects_mismatches() {
        // docx bytes under a pdf extension
        let err = check_magic(b"PK\x03\x04zipdata", FileType::Pdf).unwrap_err();
        assert!(err.to_string().contains("does not match extension '.pdf'"));
        assert!(err.to_string().contains("application/zip"));

        assert!(check_magic(b"%PDF-1.4", FileType::Txt).is_err());
        assert!(check_magic(&[0xFF, 0xFE, 0x00, 0x01], FileType::Md).is_err());
    }

    #[test]
    fn utf8_sniff_tolerates_split_multibyte_tail() {
        // A 2-byte char cut in half at the buffer boundary.
        let mut bytes = b"hello ".to_vec();
        bytes.push(0xC3); // first byte of "é"
        assert!(is_plausible_utf8(&bytes));
    }

    #[test]
    fn plain_text_extraction_reads_utf8() {
        let mut tmp = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        write!(tmp, "line one\nline two").unwrap();
        let text = extract_text(tmp.path(), FileType::Txt).unwrap();
        assert_eq!(text, "line one\nline two");
    }

    #[test]
    fn docx_extraction_joins_paragraphs_and_table_cells() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
    <w:tbl>
      <w:tr>
        <w:tc><w:p><w:r><w:t>cell a</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>cell b</w:t></w:r></w:p></w:tc>
      </w:tr>
    </w:tbl>
    <w:p><w:r><w:t>Last paragraph.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            writer
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        let tmp = tempfile::NamedTempFile::with_suffix(".docx").unwrap();
        std::fs::write(tmp.path(), &buf).unwrap();

        let text = extract_text(tmp.path(), FileType::Docx).unwrap();
        assert!(text.contains("First paragraph."));
        assert!(text.contains("cell a | cell b"));
        assert!(text.contains("Last paragraph."));
    }
}
