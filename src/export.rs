/*!
 * Dataset and side-file export.
 *
 * Every file is rendered in memory and moved into place atomically, so a
 * crash mid-export never leaves a truncated dataset behind.
 */

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

use crate::app_config::OutputConfig;
use crate::file_utils::FileManager;
use crate::ledger::{UnitRecord, UnitStatus};
use crate::qa::QaSampleRecord;
use crate::segments::ExpandedSegment;

/// A unit that did not make it into the dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedUnit {
    pub content_hash: String,
    pub first_ordinal: u64,
    pub source_text: String,
    pub status: UnitStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl From<&UnitRecord> for FailedUnit {
    fn from(record: &UnitRecord) -> Self {
        Self {
            content_hash: record.content_hash.clone(),
            first_ordinal: record.first_ordinal,
            source_text: record.source_text.clone(),
            status: record.status,
            attempts: record.attempts,
            last_error: record.last_error.clone(),
        }
    }
}

/// Where an export landed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSummary {
    pub rows: usize,
    pub dataset_csv: PathBuf,
    pub dataset_json: PathBuf,
    pub qa_failed_json: PathBuf,
    pub failed_units_json: PathBuf,
}

/// Writes dataset files under the configured output directory
#[derive(Debug, Clone)]
pub struct DatasetExporter {
    outputs: OutputConfig,
}

impl DatasetExporter {
    pub fn new(outputs: &OutputConfig) -> Self {
        Self {
            outputs: outputs.clone(),
        }
    }

    /// Write the dataset and its side files
    pub fn export(
        &self,
        rows: &[ExpandedSegment],
        qa_failures: &[QaSampleRecord],
        failed_units: &[FailedUnit],
    ) -> Result<ExportSummary> {
        let summary = ExportSummary {
            rows: rows.len(),
            dataset_csv: self.outputs.path(&self.outputs.dataset_csv),
            dataset_json: self.outputs.path(&self.outputs.dataset_json),
            qa_failed_json: self.outputs.path(&self.outputs.qa_failed_json),
            failed_units_json: self.outputs.path(&self.outputs.failed_units_json),
        };

        write_csv(rows, &summary.dataset_csv)?;
        write_json(rows, &summary.dataset_json)?;
        write_json(qa_failures, &summary.qa_failed_json)?;
        write_json(failed_units, &summary.failed_units_json)?;

        info!(
            "Exported {} rows to {:?} and {:?}",
            rows.len(),
            summary.dataset_csv,
            summary.dataset_json
        );
        Ok(summary)
    }

    /// Write the run's metadata record
    pub fn write_metadata<T: Serialize>(&self, metadata: &T) -> Result<PathBuf> {
        let path = self.outputs.path(&self.outputs.metadata_json);
        write_json(metadata, &path)?;
        Ok(path)
    }
}

/// Rows as CSV with a header line
pub fn write_csv<T: Serialize>(rows: &[T], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to serialize CSV row for {:?}", path))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV for {:?}: {}", path, e))?;

    FileManager::write_atomically(path, &bytes)
}

/// Any serializable value as pretty JSON
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).with_context(|| format!("Failed to serialize {:?}", path))?;
    FileManager::write_atomically(path, &json)
}
