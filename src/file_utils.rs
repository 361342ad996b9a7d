use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::extraction::SUPPORTED_EXTENSIONS;
use crate::ledger::InputFingerprint;

// @module: File and directory utilities

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @checks: Directory existence
    pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_dir()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    /// Expand the given sources into a sorted, de-duplicated list of files.
    ///
    /// Directories are walked recursively and contribute only files with a
    /// supported extension. Files named directly are always kept so that an
    /// unsupported one is reported by extraction instead of silently dropped.
    pub fn collect_inputs(sources: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();

        for source in sources {
            if Self::file_exists(source) {
                result.push(source.clone());
            } else if Self::dir_exists(source) {
                for entry in WalkDir::new(source).follow_links(true) {
                    let entry = entry.context("Failed to read directory entry")?;
                    let path = entry.path();
                    if path.is_file() && Self::has_supported_extension(path) {
                        result.push(path.to_path_buf());
                    }
                }
            } else {
                return Err(anyhow!("Input does not exist: {:?}", source));
            }
        }

        result.sort();
        result.dedup();
        Ok(result)
    }

    fn has_supported_extension(path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                SUPPORTED_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }

    /// SHA-256 of a file's bytes, hex encoded
    pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<String> {
        let path = path.as_ref();
        let mut file = fs::File::open(path)
            .with_context(|| format!("Failed to open file for hashing: {:?}", path))?;

        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Fingerprints of every input, on the blocking pool
    pub async fn fingerprint_inputs(paths: &[PathBuf]) -> Result<Vec<InputFingerprint>> {
        let paths = paths.to_vec();

        tokio::task::spawn_blocking(move || {
            paths
                .iter()
                .map(|path| {
                    Ok(InputFingerprint {
                        source_ref: Self::source_ref(path),
                        content_hash: Self::hash_file(path)?,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
        .context("File hashing task panicked")?
    }

    /// Stable textual reference for a path, used in segments and exports
    pub fn source_ref(path: &Path) -> String {
        path.to_string_lossy().replace('\\', "/")
    }

    /// Write `content` next to `path` and rename it into place.
    ///
    /// Readers never observe a half-written file.
    pub fn write_atomically<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::ensure_dir(&parent)?;

        let mut temp = NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temporary file in {:?}", parent))?;
        temp.write_all(content)
            .with_context(|| format!("Failed to write temporary file for {:?}", path))?;
        temp.as_file().sync_all()?;
        temp.persist(path)
            .with_context(|| format!("Failed to move output into place: {:?}", path))?;

        Ok(())
    }
}
