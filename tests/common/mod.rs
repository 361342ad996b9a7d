/*!
 * Common test utilities for the nicoforge test suite
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tempfile::TempDir;

use nicoforge::app_config::{Config, TranslationProvider};
use nicoforge::pipeline::{Pipeline, RecordingEventSink};
use nicoforge::providers::MockTranslator;

/// One row of `dataset.csv`
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct DatasetRow {
    pub ordinal: u64,
    pub content_hash: String,
    pub source_text: String,
    pub translated_text: String,
    pub source_ref: String,
    pub is_duplicate: bool,
}

/// Temporary directory holding inputs, outputs and the ledger of one test
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        init_test_logging();
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("inputs"))?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.dir.path().join("inputs")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Creates an input document with the given content
    pub fn write_input(&self, filename: &str, content: &str) -> Result<PathBuf> {
        let path = self.inputs_dir().join(filename);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Offline configuration with immediate retries and outputs inside the workspace.
    ///
    /// Two-word segments, two-unit batches, one batch in flight. The mock
    /// uppercases Latin text, so QA checks the Latin script.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.translation.provider = TranslationProvider::Mock;
        config.pipeline.chunk_size = 2;
        config.pipeline.batch_size = 2;
        config.pipeline.concurrency = 1;
        config.retry.backoff_base_ms = 0;
        config.retry.backoff_max_ms = 0;
        config.retry.jitter_ms = 0;
        config.qa.target_script = "latin".to_string();
        config.outputs.base_dir = self.output_dir();
        config
    }

    /// Pipeline over a clone of `translator`, so the caller keeps the request log
    pub fn pipeline(&self, config: Config, translator: &MockTranslator) -> (Pipeline, Arc<RecordingEventSink>) {
        let events = Arc::new(RecordingEventSink::new());
        let pipeline = Pipeline::new(config, Arc::new(translator.clone()), events.clone());
        (pipeline, events)
    }

    pub fn dataset_rows(&self) -> Result<Vec<DatasetRow>> {
        let mut reader = csv::Reader::from_path(self.output_dir().join("dataset.csv"))?;
        let rows = reader.deserialize().collect::<Result<Vec<DatasetRow>, _>>()?;
        Ok(rows)
    }

    pub fn read_json(&self, filename: &str) -> Result<serde_json::Value> {
        let content = fs::read_to_string(self.output_dir().join(filename))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Write a PDF with one Courier text line per page
pub fn write_pdf(path: &Path, pages: &[&str]) -> Result<()> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path)?;
    Ok(())
}

/// Route library logs through the test harness; `RUST_LOG=debug` shows them
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Text of `segments` two-word segments, all distinct
pub fn distinct_text(segments: usize) -> String {
    (0..segments)
        .map(|i| format!("{} {}", word(i), word(i + 100)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A digit-free word unique to `n`
///
/// Digits would be stripped or counted against the script ratio, so numbers
/// are spelled in letters.
pub fn word(n: usize) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    let mut n = n;
    let mut out = String::from("w");
    loop {
        out.push(LETTERS[n % 26] as char);
        n /= 26;
        if n == 0 {
            break;
        }
    }
    out
}
