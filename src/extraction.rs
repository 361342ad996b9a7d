/*!
 * Raw text extraction from input documents.
 *
 * Plain text and Markdown are decoded as UTF-8 with a Latin-1 fallback. PDF
 * text is extracted page by page and pages that fail are skipped. DOCX files
 * are opened as zip archives and the paragraphs of `word/document.xml` become
 * lines.
 */

use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::app_config::ExtractionConfig;
use crate::errors::ExtractionError;

/// Extensions accepted when walking an input directory
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "pdf", "docx"];

static PARAGRAPH_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"</w:p>|<w:br\s*/>|<w:cr\s*/>").unwrap());
static TAB: Lazy<Regex> = Lazy::new(|| Regex::new(r"<w:tab\s*/>").unwrap());
static XML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-z]+);").unwrap());

/// Reads documents into raw text
#[derive(Debug, Clone)]
pub struct Extractor {
    streaming_threshold: u64,
}

impl Extractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            streaming_threshold: config.max_file_size_mb.saturating_mul(1024 * 1024),
        }
    }

    /// Extract the raw text of one document
    pub fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ExtractionError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            });
        }

        let metadata = fs::metadata(path).map_err(|source| io_error(path, source))?;
        let streaming = metadata.len() > self.streaming_threshold;
        if streaming {
            info!(
                "{:?} is {} bytes, above the {} byte in-memory limit; streaming it",
                path,
                metadata.len(),
                self.streaming_threshold
            );
        }

        match extension.as_str() {
            "pdf" => self.extract_pdf(path),
            "docx" => self.extract_docx(path),
            _ if streaming => self.extract_plain_streaming(path),
            _ => self.extract_plain(path),
        }
    }

    fn extract_plain(&self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = fs::read(path).map_err(|source| io_error(path, source))?;

        Ok(String::from_utf8(bytes).unwrap_or_else(|e| {
            warn!("{:?} is not valid UTF-8, decoding as Latin-1", path);
            decode_latin1(e.as_bytes())
        }))
    }

    /// Line-by-line read for files above the in-memory limit.
    ///
    /// Each line falls back to Latin-1 on its own.
    fn extract_plain_streaming(&self, path: &Path) -> Result<String, ExtractionError> {
        let file = fs::File::open(path).map_err(|source| io_error(path, source))?;
        let mut reader = BufReader::new(file);
        let mut text = String::new();
        let mut line = Vec::new();
        let mut fallback_lines = 0usize;

        loop {
            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .map_err(|source| io_error(path, source))?;
            if read == 0 {
                break;
            }
            match std::str::from_utf8(&line) {
                Ok(decoded) => text.push_str(decoded),
                Err(_) => {
                    fallback_lines += 1;
                    text.push_str(&decode_latin1(&line));
                }
            }
        }

        if fallback_lines > 0 {
            warn!("{:?}: {} lines were not valid UTF-8 and were decoded as Latin-1", path, fallback_lines);
        }
        Ok(text)
    }

    /// Text of every readable page, one page per block
    fn extract_pdf(&self, path: &Path) -> Result<String, ExtractionError> {
        let document = lopdf::Document::load(path).map_err(|e| corrupt(path, format!("unreadable PDF: {}", e)))?;

        let pages = document.get_pages();
        let mut parts = Vec::with_capacity(pages.len());
        for page_number in pages.keys() {
            match document.extract_text(&[*page_number]) {
                Ok(text) if !text.trim().is_empty() => parts.push(text.trim_end().to_string()),
                Ok(_) => {}
                Err(e) => debug!("Skipping page {} of {:?}: {}", page_number, path, e),
            }
        }

        debug!("Extracted {} of {} pages from {:?}", parts.len(), pages.len(), path);
        Ok(parts.join("\n"))
    }

    fn extract_docx(&self, path: &Path) -> Result<String, ExtractionError> {
        let file = fs::File::open(path).map_err(|source| io_error(path, source))?;

        let mut archive = zip::ZipArchive::new(file).map_err(|e| corrupt(path, format!("not a zip archive: {}", e)))?;
        let mut document = archive
            .by_name("word/document.xml")
            .map_err(|e| corrupt(path, format!("missing word/document.xml: {}", e)))?;

        let mut xml = String::new();
        document
            .read_to_string(&mut xml)
            .map_err(|e| corrupt(path, format!("unreadable document.xml: {}", e)))?;

        Ok(docx_xml_to_text(&xml))
    }
}

/// Latin-1 assigns a code point to every byte, so this never fails
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn io_error(path: &Path, source: std::io::Error) -> ExtractionError {
    ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path, reason: String) -> ExtractionError {
    ExtractionError::CorruptDocument {
        path: path.to_path_buf(),
        reason,
    }
}

/// Flatten WordprocessingML into text, one line per paragraph
pub fn docx_xml_to_text(xml: &str) -> String {
    let with_breaks = PARAGRAPH_END.replace_all(xml, "\n");
    let with_tabs = TAB.replace_all(&with_breaks, "\t");
    let stripped = XML_TAG.replace_all(&with_tabs, "");
    let text = unescape_entities(&stripped);

    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        entity.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok())
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}
