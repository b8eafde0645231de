use crate::digest::util::format_utc_date;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const MICROS_PER_SEC: i64 = 1_000_000;

/// Message timestamp in microseconds since the epoch.
///
/// Slack encodes timestamps as `"<secs>.<micros>"` strings and treats them as
/// per-channel message ids, so they are kept exact here rather than as `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ts(i64);

impl Ts {
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    #[cfg(test)]
    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(MICROS_PER_SEC))
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_SEC as f64
    }

    pub fn date(self) -> String {
        format_utc_date(self.as_secs_f64())
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(MICROS_PER_SEC);
        let micros = self.0.rem_euclid(MICROS_PER_SEC);
        write!(f, "{secs}.{micros:06}")
    }
}

impl FromStr for Ts {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty timestamp".to_string());
        }
        let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let secs = whole
            .parse::<i64>()
            .map_err(|_| format!("invalid timestamp `{raw}`"))?;
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid timestamp `{raw}`"));
        }
        let mut digits: String = frac.chars().take(6).collect();
        while digits.len() < 6 {
            digits.push('0');
        }
        let micros = digits.parse::<i64>().unwrap_or(0);
        Ok(Self(secs.saturating_mul(MICROS_PER_SEC).saturating_add(micros)))
    }
}

impl TryFrom<String> for Ts {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ts> for String {
    fn from(value: Ts) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub ts: Ts,
    pub text: String,
    pub author: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub reply_count: Option<u32>,
}

impl Message {
    pub fn new(ts: Ts, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            ts,
            text: text.into(),
            author: author.into(),
            thread_id: None,
            reply_count: None,
        }
    }

    /// Thread ids whose replies belong with this message: the thread it sits
    /// in, plus its own ts when it is a root that drew replies.
    pub fn referenced_threads(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(thread) = self.thread_id.as_deref()
            && !thread.is_empty()
        {
            out.push(thread.to_string());
        }
        if self.reply_count.unwrap_or(0) > 0 {
            let own = self.ts.to_string();
            if !out.contains(&own) {
                out.push(own);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevantMessage {
    pub message: Message,
    pub relevance_reason: String,
}

/// A non-empty run of relevant messages, sorted ascending by ts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub messages: Vec<RelevantMessage>,
}

impl Cluster {
    pub fn first_ts(&self) -> Option<Ts> {
        self.messages.first().map(|m| m.message.ts)
    }

    pub fn last_ts(&self) -> Option<Ts> {
        self.messages.last().map(|m| m.message.ts)
    }

    pub fn ts_set(&self) -> BTreeSet<Ts> {
        self.messages.iter().map(|m| m.message.ts).collect()
    }

    pub fn thread_ids(&self) -> BTreeSet<String> {
        self.messages
            .iter()
            .flat_map(|m| m.message.referenced_threads())
            .collect()
    }

    pub fn plain_messages(&self) -> Vec<Message> {
        self.messages.iter().map(|m| m.message.clone()).collect()
    }
}

/// A cluster plus the conversation gathered around it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextUnit {
    pub cluster: Cluster,
    pub context_messages: Vec<Message>,
    pub context_ts_set: BTreeSet<Ts>,
    pub participants: BTreeSet<String>,
    pub date: String,
    pub channel_label: String,
    pub permalink: Option<String>,
}

impl ContextUnit {
    pub fn new(cluster: Cluster, context_messages: Vec<Message>, channel_label: &str) -> Self {
        let context_ts_set = context_messages.iter().map(|m| m.ts).collect();
        let participants = context_messages
            .iter()
            .map(|m| m.author.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        let date = cluster
            .first_ts()
            .map(Ts::date)
            .unwrap_or_else(|| Ts::from_micros(0).date());
        Self {
            cluster,
            context_messages,
            context_ts_set,
            participants,
            date,
            channel_label: channel_label.to_string(),
            permalink: None,
        }
    }
}

/// What a run produces: an incident report or a knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Incidents,
    Kb,
}

impl RunMode {
    pub fn label(self) -> &'static str {
        match self {
            RunMode::Incidents => "incidents",
            RunMode::Kb => "kb",
        }
    }
}

pub const KNOWLEDGE_CATEGORIES: [Category; 6] = [
    Category::Troubleshooting,
    Category::HowTo,
    Category::Faq,
    Category::FeatureExplanation,
    Category::Configuration,
    Category::BestPractice,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Category {
    #[serde(rename = "Troubleshooting")]
    Troubleshooting,
    #[serde(rename = "How-To")]
    HowTo,
    #[serde(rename = "FAQ")]
    Faq,
    #[serde(rename = "Feature Explanation")]
    FeatureExplanation,
    #[serde(rename = "Configuration")]
    Configuration,
    #[serde(rename = "Best Practice")]
    BestPractice,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::Troubleshooting => "Troubleshooting",
            Category::HowTo => "How-To",
            Category::Faq => "FAQ",
            Category::FeatureExplanation => "Feature Explanation",
            Category::Configuration => "Configuration",
            Category::BestPractice => "Best Practice",
        }
    }

    /// Lenient parse of a model-provided category; anything unrecognised is FAQ.
    pub fn parse_lenient(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "troubleshooting" => Category::Troubleshooting,
            "howto" => Category::HowTo,
            "featureexplanation" => Category::FeatureExplanation,
            "configuration" => Category::Configuration,
            "bestpractice" | "bestpractices" => Category::BestPractice,
            _ => Category::Faq,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Provenance {
    pub source_channel: String,
    pub source_date: String,
    pub source_contributors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRecord {
    pub title: String,
    pub category: Category,
    pub content: String,
    pub tags: Vec<String>,
    pub source_summary: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Minor,
    Moderate,
    Serious,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Informational => "informational",
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Serious => "serious",
        }
    }

    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "minor" => Severity::Minor,
            "moderate" => Severity::Moderate,
            "serious" | "severe" => Severity::Serious,
            _ => Severity::Informational,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentSummary {
    pub title: String,
    pub summary: String,
    pub key_quotes: Vec<String>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicGroup {
    pub group_title: String,
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub title: String,
    pub category: Category,
    pub content: String,
    pub source_channels: Vec<String>,
    pub source_dates: Vec<String>,
    pub contributors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentEntry {
    pub summary: IncidentSummary,
    pub channel: String,
    pub date: String,
    pub participants: Vec<String>,
    pub permalink: Option<String>,
    pub context_messages: Vec<Message>,
}
