/*!
 * Quality sampling for translated units.
 *
 * - `checks`: script ratio, length ratio, empty output and error-marker checks
 * - `sampler`: reproducible sample selection seeded from the run key
 *
 * QA results are data. They never fail a run.
 */

pub mod checks;
pub mod sampler;

pub use checks::{length_ratio, script_ratio, CheckOutcome, QaChecks, QaReason, TargetScript};
pub use sampler::{QaReport, QaSampleRecord, QaSampler, QaVerdict};
