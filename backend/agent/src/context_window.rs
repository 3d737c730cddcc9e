//! Bounded reasoning context.
//!
//! The goal always leads and the last `keep_recent_steps` steps are always
//! verbatim. When the whole history is over budget, everything older is
//! replaced by a summary from the memory collaborator. The summary is cached
//! by the step range it covers; when the window slides, only the newly
//! uncovered steps are summarized and appended, falling back to a full
//! re-summary once the combined text outgrows its budget.

use std::sync::Arc;

use tracing::debug;

use stepforge_core::{OrchestratorError, ReasoningContext, Session, Step, Summarizer};

use crate::compaction::truncate_to;

/// Smallest budget ever handed to the summarizer.
const MIN_SUMMARY_BUDGET: usize = 256;

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub keep_recent_steps: usize,
    pub budget_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            keep_recent_steps: 8,
            budget_bytes: 32 * 1024,
        }
    }
}

struct CachedSummary {
    /// Covers step indices `[start, end)`.
    start: u64,
    end: u64,
    text: String,
}

pub struct ContextAssembler {
    summarizer: Arc<dyn Summarizer>,
    config: ContextConfig,
    cache: Option<CachedSummary>,
}

impl ContextAssembler {
    pub fn new(summarizer: Arc<dyn Summarizer>, config: ContextConfig) -> Self {
        Self {
            summarizer,
            config,
            cache: None,
        }
    }

    /// Build the context for reasoning iteration `iteration` over `steps`
    /// (the session's full history, oldest first).
    pub async fn build(
        &mut self,
        session: &Session,
        steps: &[Step],
        iteration: u32,
    ) -> Result<ReasoningContext, OrchestratorError> {
        let mut ctx = ReasoningContext {
            session_id: session.id,
            agent_id: session.agent_id.clone(),
            goal: session.goal.clone(),
            request_context: session.context.clone(),
            summary: None,
            summarized_range: None,
            steps: Vec::new(),
            iteration,
        };

        let total = session.goal.len() + steps.iter().map(Step::size).sum::<usize>();
        let split = steps.len().saturating_sub(self.config.keep_recent_steps.max(1));
        if total <= self.config.budget_bytes || split == 0 {
            ctx.steps = steps.to_vec();
            return Ok(ctx);
        }

        let (older, recent) = steps.split_at(split);
        let recent_size: usize = recent.iter().map(Step::size).sum();
        let summary_budget = self
            .config
            .budget_bytes
            .saturating_sub(session.goal.len() + recent_size)
            .max(MIN_SUMMARY_BUDGET);

        let start = older[0].index;
        let end = recent[0].index;
        let text = self.summary_for(older, start, end, summary_budget).await?;

        debug!(
            session_id = %session.id,
            summarized = older.len(),
            kept = recent.len(),
            summary_bytes = text.len(),
            "Context over budget; summarized older steps"
        );

        ctx.summary = Some(text);
        ctx.summarized_range = Some((start, end));
        ctx.steps = recent.to_vec();
        Ok(ctx)
    }

    async fn summary_for(
        &mut self,
        older: &[Step],
        start: u64,
        end: u64,
        budget: usize,
    ) -> Result<String, OrchestratorError> {
        if let Some(cache) = &self.cache {
            if cache.start == start && cache.end == end && cache.text.len() <= budget {
                return Ok(cache.text.clone());
            }
            if cache.start == start && cache.end < end {
                let fresh: Vec<Step> = older
                    .iter()
                    .filter(|s| s.index >= cache.end)
                    .cloned()
                    .collect();
                let addition = self.summarizer.summarize(&fresh, budget).await?;
                let combined = format!("{}\n{}", cache.text, addition);
                if combined.len() <= budget {
                    self.cache = Some(CachedSummary {
                        start,
                        end,
                        text: combined.clone(),
                    });
                    return Ok(combined);
                }
            }
        }

        let mut text = self.summarizer.summarize(older, budget).await?;
        truncate_to(&mut text, budget);
        self.cache = Some(CachedSummary {
            start,
            end,
            text: text.clone(),
        });
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stepforge_core::{StepKind, TrustContext};

    #[derive(Default)]
    struct CountingSummarizer {
        calls: AtomicUsize,
        summarized: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, steps: &[Step], _budget: usize) -> Result<String, OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.summarized.fetch_add(steps.len(), Ordering::SeqCst);
            Ok(format!("{} steps", steps.len()))
        }
    }

    fn session() -> Session {
        Session::new("agent", "find the answer", None, TrustContext::new("basic"))
    }

    fn history(session: &Session, n: u64, payload_bytes: usize) -> Vec<Step> {
        (0..n)
            .map(|i| Step::new(session.id, i, StepKind::Message, json!({ "text": "x".repeat(payload_bytes) })))
            .collect()
    }

    #[tokio::test]
    async fn test_under_budget_keeps_everything() {
        let s = session();
        let steps = history(&s, 20, 10);
        let mut a = ContextAssembler::new(Arc::new(CountingSummarizer::default()), ContextConfig::default());
        let ctx = a.build(&s, &steps, 1).await.unwrap();
        assert_eq!(ctx.steps.len(), 20);
        assert!(ctx.summary.is_none());
        assert_eq!(ctx.goal, "find the answer");
    }

    #[tokio::test]
    async fn test_over_budget_keeps_recent_and_summarizes_middle() {
        let s = session();
        let steps = history(&s, 20, 500);
        let config = ContextConfig {
            keep_recent_steps: 4,
            budget_bytes: 4_000,
        };
        let mut a = ContextAssembler::new(Arc::new(CountingSummarizer::default()), config);
        let ctx = a.build(&s, &steps, 3).await.unwrap();

        assert_eq!(ctx.steps.len(), 4);
        assert_eq!(ctx.steps[0].index, 16);
        assert_eq!(ctx.summarized_range, Some((0, 16)));
        assert_eq!(ctx.summary.as_deref(), Some("16 steps"));
        assert_eq!(ctx.iteration, 3);
    }

    #[tokio::test]
    async fn test_summary_cached_and_extended_incrementally() {
        let s = session();
        let summarizer = Arc::new(CountingSummarizer::default());
        let config = ContextConfig {
            keep_recent_steps: 4,
            budget_bytes: 4_000,
        };
        let mut a = ContextAssembler::new(summarizer.clone(), config);

        let steps = history(&s, 20, 500);
        a.build(&s, &steps, 1).await.unwrap();
        a.build(&s, &steps, 2).await.unwrap();
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);

        let steps = history(&s, 22, 500);
        let ctx = a.build(&s, &steps, 3).await.unwrap();
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
        // 16 steps the first time, then only the 2 newly uncovered ones.
        assert_eq!(summarizer.summarized.load(Ordering::SeqCst), 18);
        assert_eq!(ctx.summary.as_deref(), Some("16 steps\n2 steps"));
        assert_eq!(ctx.summarized_range, Some((0, 18)));
    }

    #[tokio::test]
    async fn test_fewer_steps_than_window_never_summarized() {
        let s = session();
        let steps = history(&s, 3, 5_000);
        let mut a = ContextAssembler::new(Arc::new(CountingSummarizer::default()), ContextConfig {
            keep_recent_steps: 8,
            budget_bytes: 1_000,
        });
        let ctx = a.build(&s, &steps, 1).await.unwrap();
        assert_eq!(ctx.steps.len(), 3);
        assert!(ctx.summary.is_none());
    }
}
