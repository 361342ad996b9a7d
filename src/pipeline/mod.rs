/*!
 * Pipeline orchestration.
 *
 * - `orchestrator`: the stage state machine (`Pipeline`)
 * - `events`: structured progress events and their sinks
 * - `result`: run and estimate summaries
 */

pub mod events;
pub mod orchestrator;
pub mod result;

pub use events::{BatchOutcome, EventSink, LogEventSink, PipelineEvent, RecordingEventSink};
pub use orchestrator::Pipeline;
pub use result::{DocumentFailure, EstimateReport, RunMetadata, RunResult};
