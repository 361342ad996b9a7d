/*!
 * Text normalization ahead of chunking.
 *
 * Cleaning works line by line, drops lines left blank and is idempotent:
 * cleaning already-clean text returns it unchanged.
 */

use once_cell::sync::Lazy;
use regex::Regex;

use crate::app_config::CleaningConfig;

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s<>"]+"#).unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());
static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\d+\]|\(\d+\)|(?:fig\.|figure|table|ref\.)\s*\d+").unwrap());
static CONTROL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\x9F]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone)]
pub struct TextCleaner {
    config: CleaningConfig,
}

impl TextCleaner {
    pub fn new(config: &CleaningConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Clean a whole document
    pub fn clean(&self, raw: &str) -> String {
        raw.lines()
            .map(|line| self.clean_line(line))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Clean one line until nothing more changes.
    ///
    /// A removal can expose a new match (`[1[2]]` becomes `[1]`), so the
    /// rules run to a fixed point.
    pub fn clean_line(&self, line: &str) -> String {
        let mut current = line.to_string();
        loop {
            let next = self.clean_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn clean_once(&self, line: &str) -> String {
        let mut line = line.to_string();

        if self.config.remove_urls {
            line = URL.replace_all(&line, "").into_owned();
        }
        if self.config.remove_emails {
            line = EMAIL.replace_all(&line, "").into_owned();
        }
        if self.config.remove_references {
            line = REFERENCE.replace_all(&line, "").into_owned();
        }
        line = CONTROL.replace_all(&line, "").into_owned();

        if self.config.normalize_whitespace {
            line = WHITESPACE.replace_all(&line, " ").into_owned();
        }
        line.trim().to_string()
    }
}
