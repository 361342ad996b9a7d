/*!
 * Translation of canonical units.
 *
 * - `executor`: bounded-concurrency batch execution backed by the run ledger
 * - `retry`: exponential backoff with jitter for transient provider failures
 */

// Re-export main types for easier usage
pub use self::executor::{BatchExecutor, CostAbort, ExecutionReport, ExecutorSettings};
pub use self::retry::RetryPolicy;

// Submodules
pub mod executor;
pub mod retry;
