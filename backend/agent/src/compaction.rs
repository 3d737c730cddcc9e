//! Step history compaction: the default memory collaborator.
//!
//! Produces a deterministic extractive summary (first sentence of each
//! step) instead of calling a model, bounded by the caller's byte budget.
use async_trait::async_trait;
use serde_json::Value;

use stepforge_core::{OrchestratorError, Step, StepKind, Summarizer};

/// Longest single summary line, in characters.
const MAX_LINE_CHARS: usize = 160;

/// Room kept for the trailing `[+N more]` marker.
const TAIL_RESERVE: usize = 16;

pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, steps: &[Step], budget: usize) -> Result<String, OrchestratorError> {
        Ok(summarize_steps(steps, budget))
    }
}

/// Summarize `steps` into at most `budget` bytes.
pub fn summarize_steps(steps: &[Step], budget: usize) -> String {
    if steps.is_empty() {
        return String::new();
    }

    let mut summary = format!("[Summarized {} steps]", steps.len());
    for (i, step) in steps.iter().enumerate() {
        let line = format!("\n#{} {}: {}", step.index, step.kind, first_sentence(&step_text(step)));
        let reserve = if i + 1 == steps.len() { 0 } else { TAIL_RESERVE };
        if summary.len() + line.len() + reserve > budget {
            let rest = format!("\n[+{} more]", steps.len() - i);
            if summary.len() + rest.len() <= budget {
                summary.push_str(&rest);
            }
            break;
        }
        summary.push_str(&line);
    }
    truncate_to(&mut summary, budget);
    summary
}

/// The human-meaningful part of a step payload.
fn step_text(step: &Step) -> String {
    let p = &step.payload;
    let field = |key: &str| p.get(key).and_then(Value::as_str).map(str::to_string);
    match step.kind {
        StepKind::Reasoning => field("thought").unwrap_or_else(|| {
            let n = p.get("call_ids").and_then(Value::as_array).map_or(0, Vec::len);
            format!("requested {n} tool calls")
        }),
        StepKind::ToolCall => format!(
            "{} {}",
            field("tool_name").unwrap_or_default(),
            p.get("arguments").map(Value::to_string).unwrap_or_default()
        ),
        StepKind::ToolResult => {
            let tool = field("tool_name").unwrap_or_default();
            let status = field("status").unwrap_or_default();
            let detail = match p.get("result") {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => p
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            };
            format!("{tool} {status}: {detail}")
        }
        StepKind::Message => field("text").unwrap_or_default(),
        StepKind::Error => field("message").unwrap_or_default(),
        StepKind::Done => field("output").unwrap_or_default(),
    }
}

fn first_sentence(text: &str) -> String {
    let first = text
        .split(['.', '!', '?', '\n'])
        .next()
        .unwrap_or(text)
        .trim();
    first.chars().take(MAX_LINE_CHARS).collect()
}

/// Cut `s` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_to(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
