/*!
 * Heuristic checks applied to a sampled translation.
 *
 * Each check is independent; a sample fails when any of them triggers and
 * every triggered reason is kept.
 */

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Markers that indicate the provider leaked an error into the output
const ERROR_MARKERS: &[&str] = &["[error]", "###"];

/// Script the translated text is expected to be written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetScript {
    Devanagari,
    Bengali,
    Tamil,
    Latin,
    Cyrillic,
    Arabic,
    Han,
}

impl TargetScript {
    /// Whether `c` belongs to this script
    pub fn contains(self, c: char) -> bool {
        match self {
            TargetScript::Devanagari => ('\u{0900}'..='\u{097F}').contains(&c),
            TargetScript::Bengali => ('\u{0980}'..='\u{09FF}').contains(&c),
            TargetScript::Tamil => ('\u{0B80}'..='\u{0BFF}').contains(&c),
            TargetScript::Latin => {
                c.is_ascii_alphabetic()
                    || (('\u{00C0}'..='\u{024F}').contains(&c) && c != '\u{00D7}' && c != '\u{00F7}')
            }
            TargetScript::Cyrillic => ('\u{0400}'..='\u{04FF}').contains(&c),
            TargetScript::Arabic => ('\u{0600}'..='\u{06FF}').contains(&c),
            TargetScript::Han => ('\u{4E00}'..='\u{9FFF}').contains(&c) || ('\u{3400}'..='\u{4DBF}').contains(&c),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetScript::Devanagari => "devanagari",
            TargetScript::Bengali => "bengali",
            TargetScript::Tamil => "tamil",
            TargetScript::Latin => "latin",
            TargetScript::Cyrillic => "cyrillic",
            TargetScript::Arabic => "arabic",
            TargetScript::Han => "han",
        }
    }
}

impl fmt::Display for TargetScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetScript {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "devanagari" | "deva" => Ok(TargetScript::Devanagari),
            "bengali" | "beng" => Ok(TargetScript::Bengali),
            "tamil" | "taml" => Ok(TargetScript::Tamil),
            "latin" | "latn" => Ok(TargetScript::Latin),
            "cyrillic" | "cyrl" => Ok(TargetScript::Cyrillic),
            "arabic" | "arab" => Ok(TargetScript::Arabic),
            "han" | "hani" => Ok(TargetScript::Han),
            _ => Err(anyhow!("Unknown target script: {}", s)),
        }
    }
}

/// Why a sample failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaReason {
    EmptyOutput,
    InsufficientTargetScript,
    SuspiciousLengthRatio,
    ErrorMarker,
}

impl QaReason {
    pub fn code(self) -> &'static str {
        match self {
            QaReason::EmptyOutput => "empty_output",
            QaReason::InsufficientTargetScript => "insufficient_target_script",
            QaReason::SuspiciousLengthRatio => "suspicious_length_ratio",
            QaReason::ErrorMarker => "error_marker",
        }
    }
}

impl fmt::Display for QaReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Share of word characters in `text` that belong to `script`.
///
/// Combining marks of the script count as word characters so the ratio
/// stays within [0, 1]. Text without word characters scores 0.
pub fn script_ratio(text: &str, script: TargetScript) -> f64 {
    let mut in_script = 0usize;
    let mut total = 0usize;

    for c in text.chars() {
        let matches = script.contains(c);
        if matches || c.is_alphanumeric() {
            total += 1;
            if matches {
                in_script += 1;
            }
        }
    }

    if total == 0 {
        0.0
    } else {
        in_script as f64 / total as f64
    }
}

/// Translated length over source length, in characters
pub fn length_ratio(source: &str, translated: &str) -> f64 {
    let source_len = source.chars().count().max(1);
    translated.chars().count() as f64 / source_len as f64
}

fn has_error_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Measured values and triggered reasons for one translation
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub script_ratio: f64,
    pub length_ratio: f64,
    pub reasons: Vec<QaReason>,
}

/// Thresholds for the translation checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QaChecks {
    pub target_script: TargetScript,
    pub min_script_ratio: f64,
    pub min_length_ratio: f64,
    pub max_length_ratio: f64,
}

impl QaChecks {
    pub fn run(&self, source: &str, translated: &str) -> CheckOutcome {
        let script_ratio = script_ratio(translated, self.target_script);
        let length_ratio = length_ratio(source, translated);
        let mut reasons = Vec::new();

        if translated.trim().is_empty() {
            reasons.push(QaReason::EmptyOutput);
        }
        if script_ratio < self.min_script_ratio {
            reasons.push(QaReason::InsufficientTargetScript);
        }
        if length_ratio < self.min_length_ratio || length_ratio > self.max_length_ratio {
            reasons.push(QaReason::SuspiciousLengthRatio);
        }
        if has_error_marker(translated) {
            reasons.push(QaReason::ErrorMarker);
        }

        CheckOutcome {
            script_ratio,
            length_ratio,
            reasons,
        }
    }
}
