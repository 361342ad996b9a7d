/*!
 * Tests for document extraction and cleaning
 */

use std::io::Write;

use anyhow::Result;
use nicoforge::app_config::{CleaningConfig, ExtractionConfig};
use nicoforge::cleaning::TextCleaner;
use nicoforge::errors::ExtractionError;
use nicoforge::extraction::Extractor;
use nicoforge::file_utils::FileManager;

use crate::common::{TestWorkspace, write_pdf};

fn extractor() -> Extractor {
    Extractor::new(&ExtractionConfig::default())
}

/// Test that every supported format yields its text
#[test]
fn test_extract_withSupportedFormats_shouldReturnText() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let txt = workspace.write_input("notes.txt", "plain text body")?;
    let md = workspace.write_input("README.md", "# Title\n\nmarkdown body")?;

    let docx = workspace.inputs_dir().join("report.docx");
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&docx)?);
    zip.start_file("word/document.xml", zip::write::FileOptions::default())?;
    zip.write_all(
        br#"<w:document><w:body><w:p><w:r><w:t>First paragraph</w:t></w:r></w:p><w:p><w:r><w:t>Tom &amp; Jerry</w:t></w:r></w:p></w:body></w:document>"#,
    )?;
    zip.finish()?;

    assert_eq!(extractor().extract(&txt)?, "plain text body");
    assert_eq!(extractor().extract(&md)?, "# Title\n\nmarkdown body");
    assert_eq!(extractor().extract(&docx)?, "First paragraph\nTom & Jerry");
    Ok(())
}

/// Test that a PDF yields the text of each page in page order
#[test]
fn test_extract_withPdf_shouldJoinPages() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let pdf = workspace.inputs_dir().join("paper.pdf");
    write_pdf(&pdf, &["Opening page text", "Closing page text"])?;

    let text = extractor().extract(&pdf)?;

    let opening = text.find("Opening page text");
    let closing = text.find("Closing page text");
    assert!(opening.is_some() && closing.is_some(), "unexpected text: {:?}", text);
    assert!(opening < closing);
    Ok(())
}

/// Test that a file in a legacy single-byte encoding is still read
#[test]
fn test_extract_withLatin1File_shouldDecodeInsteadOfFailing() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let legacy = workspace.inputs_dir().join("legacy.txt");
    std::fs::write(&legacy, b"Se\xf1or Mu\xf1oz")?;

    assert_eq!(extractor().extract(&legacy)?, "Señor Muñoz");
    Ok(())
}

/// Test that a file above the in-memory limit is streamed, not dropped
#[test]
fn test_extract_withFileAboveLimit_shouldStillReturnText() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let big = workspace.write_input("big.txt", &"many words here\n".repeat(1000))?;
    let streaming = Extractor::new(&ExtractionConfig { max_file_size_mb: 0 });

    let text = streaming.extract(&big)?;

    assert_eq!(text, extractor().extract(&big)?);
    assert_eq!(text.lines().count(), 1000);
    Ok(())
}

/// Test that unreadable documents are classified rather than panicking
#[test]
fn test_extract_withBadDocuments_shouldClassifyErrors() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let pdf = workspace.write_input("paper.pdf", "%PDF-1.4")?;
    let spreadsheet = workspace.write_input("sheet.xlsx", "cells")?;
    let fake_docx = workspace.write_input("fake.docx", "not a zip")?;

    assert!(matches!(
        extractor().extract(&pdf),
        Err(ExtractionError::CorruptDocument { .. })
    ));
    assert!(matches!(
        extractor().extract(&spreadsheet),
        Err(ExtractionError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        extractor().extract(&fake_docx),
        Err(ExtractionError::CorruptDocument { .. })
    ));
    Ok(())
}

/// Test that directory inputs only pick up supported files, in a stable order
#[test]
fn test_collectInputs_withDirectory_shouldFilterAndSort() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.write_input("b.txt", "b")?;
    workspace.write_input("a.md", "a")?;
    workspace.write_input("ignored.xlsx", "cells")?;
    std::fs::create_dir_all(workspace.inputs_dir().join("nested"))?;
    std::fs::write(workspace.inputs_dir().join("nested").join("c.txt"), "c")?;

    let files = FileManager::collect_inputs(&[workspace.inputs_dir()])?;
    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();

    assert_eq!(names, vec!["a.md", "b.txt", "c.txt"]);
    Ok(())
}

/// Test that a missing input path is reported
#[test]
fn test_collectInputs_withMissingPath_shouldFail() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let result = FileManager::collect_inputs(&[workspace.root().join("nowhere.txt")]);
    assert!(result.is_err());
    Ok(())
}

/// Test that cleaning a document twice changes nothing the second time
#[test]
fn test_clean_appliedTwice_shouldBeIdempotent() {
    let cleaner = TextCleaner::new(&CleaningConfig::default());
    let raw = "Intro   line with https://example.com link\n\n\
               Contact someone@example.com [4]\n\
               \u{0007}Nested [1[2]] marker and fig. 3 here\n   \n";

    let once = cleaner.clean(raw);
    let twice = cleaner.clean(&once);

    assert_eq!(once, twice);
    assert!(!once.contains("https://"));
    assert!(!once.contains('@'));
    assert!(!once.lines().any(|l| l.trim().is_empty()));
}
