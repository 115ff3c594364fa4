//! Routine steps.
//!
//! Each step is an async function taking a [`StepContext`] plus its own
//! options, and returning a [`StepReport`](crate::domain::StepReport).
//! Steps can be run on their own from the CLI or in sequence by the
//! orchestrator.

pub mod agenda_summaries;
pub mod maintenance;
pub mod parse;
pub mod profiles;
pub mod speech_summaries;
pub mod sync;
pub mod translate;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::adapters::{AiAdapter, DryRunAdapter, ProviderKind};
use crate::store::Database;

/// What every step needs: the store, the AI adapter and the shared options
#[derive(Clone)]
pub struct StepContext {
    pub db: Database,
    pub adapter: Arc<dyn AiAdapter>,
    pub provider: ProviderKind,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl StepContext {
    pub fn new(
        db: Database,
        adapter: Arc<dyn AiAdapter>,
        provider: ProviderKind,
        batch_size: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            db,
            adapter,
            provider,
            batch_size: batch_size.max(1),
            dry_run,
        }
    }

    /// Dry-run context with canned AI replies
    pub fn dry_run(db: Database, provider: ProviderKind, batch_size: usize) -> Self {
        Self::new(db, Arc::new(DryRunAdapter::new(provider)), provider, batch_size, true)
    }
}

/// Success and failure counts of a batched pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Run `task` over `items` in chunks of `batch_size`, each chunk concurrently
///
/// Failures are logged and counted; they never abort the remaining items.
pub async fn process_in_batches<T, F, Fut>(
    items: Vec<T>,
    batch_size: usize,
    label: &str,
    task: F,
) -> BatchOutcome
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut outcome = BatchOutcome::default();
    let batch_size = batch_size.max(1);
    let total = items.len();
    let mut items = items.into_iter().peekable();
    let mut batch_number = 0;

    while items.peek().is_some() {
        batch_number += 1;
        let chunk: Vec<T> = items.by_ref().take(batch_size).collect();
        debug!(label, batch_number, size = chunk.len(), total, "Processing batch");

        let results = join_all(chunk.into_iter().map(&task)).await;
        for result in results {
            match result {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    warn!(label, error = %format!("{:#}", e), "Item failed");
                    outcome.failed += 1;
                }
            }
        }
    }

    outcome
}

/// First `max_chars` characters of `text`, for log previews
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted adapter shared by step tests.

    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use crate::adapters::{AiAdapter, GenerationOptions};

    type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

    /// Adapter answering with a closure and recording every prompt
    pub struct ScriptedAdapter {
        responder: Responder,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        pub fn new(responder: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
            Self {
                responder: Box::new(responder),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AiAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str, _options: GenerationOptions) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            (self.responder)(prompt)
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_process_in_batches_counts_failures() {
        let seen = AtomicUsize::new(0);
        let outcome = process_in_batches((1..=7).collect(), 3, "numbers", |n: i32| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if n % 2 == 0 {
                    anyhow::bail!("even: {}", n)
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(outcome, BatchOutcome { succeeded: 4, failed: 3 });
        assert_eq!(outcome.total(), 7);
    }

    #[tokio::test]
    async fn test_process_in_batches_empty() {
        let outcome = process_in_batches(Vec::<i32>::new(), 10, "none", |_| async { Ok(()) }).await;
        assert_eq!(outcome, BatchOutcome::default());
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("Tere", 10), "Tere");
        assert_eq!(preview("Tere päevast", 4), "Tere...");
    }
}
