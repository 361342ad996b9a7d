/*!
 * Mock translator for offline runs and tests.
 *
 * This module provides a translator that simulates different behaviors:
 * - `MockTranslator::uppercase()` - Always succeeds, uppercasing the input
 * - `MockTranslator::intermittent(n)` - Every nth call fails transiently
 * - `MockTranslator::new(MockBehavior::AlwaysTimeout)` - Never succeeds
 *
 * Clones share the request log and the in-flight counters, so a test can
 * hand one clone to the pipeline and inspect what was sent through the other.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ProviderError;

use super::{ProviderInfo, Translator};

/// Behavior mode for the mock translator
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Succeeds with the uppercased input
    Uppercase,
    /// Succeeds with the input behind a fixed prefix
    Prefix(String),
    /// Succeeds with empty strings
    Empty,
    /// Succeeds but drops the last element of the batch
    WrongLength,
    /// Every call times out
    AlwaysTimeout,
    /// Every call is rejected for bad credentials
    AlwaysAuthError,
    /// Every `fail_every`-th call fails with a server error
    Intermittent { fail_every: usize },
    /// The first `successes` calls succeed, every later one times out
    FailAfter { successes: usize },
    /// Uppercase after a delay
    Slow { delay_ms: u64 },
    /// Uppercase after a delay taken from `delays_ms` in call order, cycling
    Staggered { delays_ms: Vec<u64> },
}

/// Mock translator for testing translation behavior
#[derive(Debug, Clone)]
pub struct MockTranslator {
    behavior: MockBehavior,
    /// Calls to `translate_batch`, shared between clones
    request_count: Arc<AtomicUsize>,
    /// Every text ever submitted, in submission order
    submitted: Arc<Mutex<Vec<String>>>,
    cost_per_word: f64,
    /// Texts that always fail permanently, whatever the behavior
    poisoned: Arc<Vec<String>>,
    /// Texts that always time out, whatever the behavior
    flaky: Arc<Vec<String>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight count however the call ends
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTranslator {
    /// Create a new mock translator with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            request_count: Arc::new(AtomicUsize::new(0)),
            submitted: Arc::new(Mutex::new(Vec::new())),
            cost_per_word: 0.0,
            poisoned: Arc::new(Vec::new()),
            flaky: Arc::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn uppercase() -> Self {
        Self::new(MockBehavior::Uppercase)
    }

    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent { fail_every })
    }

    /// Charge `rate` per word in `estimate_cost`
    pub fn with_cost_per_word(mut self, rate: f64) -> Self {
        self.cost_per_word = rate;
        self
    }

    /// Reject any batch containing one of `texts` as an invalid request
    pub fn with_poisoned_texts<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.poisoned = Arc::new(texts.into_iter().map(Into::into).collect());
        self
    }

    /// Time out on any batch containing one of `texts`
    pub fn with_flaky_texts<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flaky = Arc::new(texts.into_iter().map(Into::into).collect());
        self
    }

    /// Number of `translate_batch` calls so far
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Every text submitted so far, including ones in failed calls
    pub fn submitted_texts(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }

    /// Number of texts submitted so far
    pub fn unit_requests(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Most `translate_batch` calls that were running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().extend(texts.iter().cloned());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlightGuard(&self.in_flight);

        if texts.iter().any(|t| self.poisoned.contains(t)) {
            return Err(ProviderError::InvalidRequest {
                status_code: 400,
                message: "content rejected".to_string(),
            });
        }

        if texts.iter().any(|t| self.flaky.contains(t)) {
            return Err(ProviderError::Timeout("mock timeout".to_string()));
        }

        let uppercase = || texts.iter().map(|t| t.to_uppercase()).collect::<Vec<_>>();

        match &self.behavior {
            MockBehavior::Uppercase => Ok(uppercase()),

            MockBehavior::Prefix(prefix) => Ok(texts.iter().map(|t| format!("{}{}", prefix, t)).collect()),

            MockBehavior::Empty => Ok(vec![String::new(); texts.len()]),

            MockBehavior::WrongLength => {
                let mut out = uppercase();
                out.pop();
                Ok(out)
            }

            MockBehavior::AlwaysTimeout => Err(ProviderError::Timeout("mock timeout".to_string())),

            MockBehavior::AlwaysAuthError => {
                Err(ProviderError::AuthenticationError("mock credentials rejected".to_string()))
            }

            MockBehavior::Intermittent { fail_every } => {
                if *fail_every > 0 && count % fail_every == fail_every - 1 {
                    Err(ProviderError::ServerError {
                        status_code: 503,
                        message: "intermittent mock failure".to_string(),
                    })
                } else {
                    Ok(uppercase())
                }
            }

            MockBehavior::FailAfter { successes } => {
                if count < *successes {
                    Ok(uppercase())
                } else {
                    Err(ProviderError::Timeout("mock outage".to_string()))
                }
            }

            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                Ok(uppercase())
            }

            MockBehavior::Staggered { delays_ms } => {
                if !delays_ms.is_empty() {
                    let delay = delays_ms[count % delays_ms.len()];
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Ok(uppercase())
            }
        }
    }

    fn estimate_cost(&self, word_count: usize) -> f64 {
        word_count as f64 * self.cost_per_word
    }

    fn describe(&self) -> ProviderInfo {
        ProviderInfo {
            provider_name: "mock".to_string(),
            model_identifier: format!("{:?}", self.behavior),
        }
    }
}
