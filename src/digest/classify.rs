use crate::digest::extract::extract;
use crate::digest::model::{Message, RelevantMessage, RunMode};
use crate::digest::provider::LlmProvider;
use crate::digest::util::format_utc_minute;
use crate::digest::warn::{self, WarnContext};
use crate::error::CallError;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

pub const BATCH_SIZE: usize = 15;
const CLASSIFY_MAX_TOKENS: u32 = 4096;

fn batch_listing(batch: &[Message]) -> String {
    batch
        .iter()
        .enumerate()
        .map(|(idx, msg)| {
            format!(
                "[{idx}] ({}) {}",
                format_utc_minute(msg.ts.as_secs_f64()),
                msg.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(batch: &[Message], topic: &str, mode: RunMode) -> String {
    let (question, look_for, exclude) = match mode {
        RunMode::Kb => (
            format!("Which of these Slack messages share knowledge worth keeping about \"{topic}\"?"),
            "- a problem described together with its fix\n\
             - how-to steps, settings, or configuration values\n\
             - explanations of how a feature behaves, including edge cases\n\
             - questions that received a substantive answer\n\
             - follow-ups that correct or confirm knowledge already shared",
            format!(
                "- messages that only mention \"{topic}\" in passing\n\
                 - social chatter or scheduling"
            ),
        ),
        RunMode::Incidents => (
            format!("Which of these Slack messages report or discuss an incident involving \"{topic}\"?"),
            "- first reports of something going wrong\n\
             - updates on impact, cause, or response\n\
             - follow-ups that confirm resolution or add detail",
            format!(
                "- messages that only mention \"{topic}\" in passing\n\
                 - general discussion with no concrete event"
            ),
        ),
    };

    format!(
        "You classify chat messages and reply with JSON only.\n\n\
         {question}\n\n\
         Include:\n{look_for}\n\n\
         Exclude:\n{exclude}\n\n\
         Messages:\n{}\n\n\
         Reply with a JSON array such as [{{\"index\": 0, \"reason\": \"short reason\"}}].\n\
         Reply with [] when nothing qualifies. Do not add any text outside the JSON.",
        batch_listing(batch)
    )
}

/// Turn a classifier reply into `(index, reason)` pairs that are in range,
/// keeping model order and the first reason for a repeated index.
fn parse_selection(value: Value, batch_len: usize) -> Vec<(usize, String)> {
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for item in items {
        let (raw_idx, reason) = match &item {
            Value::Number(n) => (n.as_i64(), String::new()),
            Value::Object(obj) => (
                obj.get("index").and_then(Value::as_i64),
                obj.get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => (None, String::new()),
        };
        let Some(idx) = raw_idx.and_then(|i| usize::try_from(i).ok()) else {
            continue;
        };
        if idx >= batch_len || !seen.insert(idx) {
            continue;
        }
        out.push((idx, reason));
    }
    out
}

fn classify_batch(
    provider: &dyn LlmProvider,
    batch: &[Message],
    topic: &str,
    mode: RunMode,
) -> Result<Vec<RelevantMessage>, CallError> {
    let reply = provider.complete(&build_prompt(batch, topic, mode), CLASSIFY_MAX_TOKENS)?;
    let value = extract(&reply)?;
    Ok(parse_selection(value, batch.len())
        .into_iter()
        .map(|(idx, relevance_reason)| RelevantMessage {
            message: batch[idx].clone(),
            relevance_reason,
        })
        .collect())
}

/// Ask the model which messages matter for `topic`, in batches of
/// [`BATCH_SIZE`]. A failed batch contributes nothing.
pub fn classify(
    provider: &dyn LlmProvider,
    messages: &[Message],
    topic: &str,
    mode: RunMode,
    channel: &str,
) -> Vec<RelevantMessage> {
    let mut relevant = Vec::new();
    for (batch_no, batch) in messages.chunks(BATCH_SIZE).enumerate() {
        match classify_batch(provider, batch, topic, mode) {
            Ok(hits) => {
                debug!(channel, batch = batch_no, hits = hits.len(), "classified batch");
                relevant.extend(hits);
            }
            Err(err) => warn::emit(
                err.code(),
                WarnContext {
                    stage: "classify",
                    channel,
                    unit: &format!("batch-{batch_no}"),
                    reason: "batch_skipped",
                },
                &err.to_string(),
            ),
        }
    }
    relevant
}
