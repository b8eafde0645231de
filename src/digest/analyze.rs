use crate::digest::extract::{extract, extract_object};
use crate::digest::model::{
    Article, Category, ContextUnit, ExtractionRecord, IncidentSummary, KNOWLEDGE_CATEGORIES,
    Message, Provenance, Severity, TopicGroup,
};
use crate::digest::provider::LlmProvider;
use crate::digest::util::format_utc_minute;
use crate::digest::warn::{self, WarnContext};
use crate::error::{CallError, ParseError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

const EXTRACT_MAX_TOKENS: u32 = 4096;
const SUMMARY_MAX_TOKENS: u32 = 2048;
const GROUP_MAX_TOKENS: u32 = 2048;
const SYNTHESIS_MAX_TOKENS: u32 = 8192;

pub const FALLBACK_ARTICLE_TITLE: &str = "Untitled Article";
pub const FALLBACK_ARTICLE_CONTENT: &str = "Could not extract knowledge from this conversation.";
pub const FALLBACK_SOURCE_SUMMARY: &str = "Unable to extract.";
pub const FALLBACK_INCIDENT_TITLE: &str = "Untitled Incident";
pub const FALLBACK_INCIDENT_SUMMARY: &str = "Could not summarize this incident.";

fn categories_list() -> String {
    KNOWLEDGE_CATEGORIES
        .iter()
        .map(|c| c.label())
        .collect::<Vec<_>>()
        .join(", ")
}

fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            format!(
                "[{}] @{}: {}",
                format_utc_minute(m.ts.as_secs_f64()),
                m.author,
                m.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn string_list(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_blank(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.trim().to_string()
    }
}

fn extraction_prompt(unit: &ContextUnit, topic: &str) -> String {
    let categories = categories_list();
    format!(
        "You turn chat conversations into knowledge base material and reply with JSON only.\n\n\
         Conversation from #{channel} about \"{topic}\":\n{conversation}\n\n\
         Reply with one JSON object:\n\
         {{\n  \"title\": \"heading a reader would search for\",\n  \
         \"category\": \"one of: {categories}\",\n  \
         \"content\": \"the knowledge itself as prose paragraphs, keeping every step, value, setting and error message\",\n  \
         \"tags\": [\"lowercase\", \"keywords\"],\n  \
         \"source_summary\": \"one sentence on what the conversation covered\"\n}}\n\n\
         When the conversation contains a problem and its fix, explain both.\n\
         Do not add any text outside the JSON.",
        channel = unit.channel_label,
        conversation = transcript(&unit.context_messages),
    )
}

fn summary_prompt(unit: &ContextUnit, topic: &str) -> String {
    format!(
        "You write incident summaries from chat conversations and reply with JSON only.\n\n\
         Conversation from #{channel} on {date} related to \"{topic}\":\n{conversation}\n\n\
         Reply with one JSON object:\n\
         {{\n  \"title\": \"short description of what happened\",\n  \
         \"summary\": \"what happened, who was affected, and how it was handled\",\n  \
         \"key_quotes\": [\"verbatim lines from the conversation that matter most\"],\n  \
         \"severity\": \"one of: informational, minor, moderate, serious\"\n}}\n\n\
         Quote messages exactly. Do not add any text outside the JSON.",
        channel = unit.channel_label,
        date = unit.date,
        conversation = transcript(&unit.context_messages),
    )
}

fn grouping_prompt(records: &[ExtractionRecord]) -> String {
    let items = records
        .iter()
        .enumerate()
        .map(|(idx, r)| {
            format!(
                "[{idx}] Title: {} | Tags: {} | Summary: {}",
                r.title,
                r.tags.join(", "),
                r.source_summary
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You group knowledge base entries by subject and reply with JSON only.\n\n\
         Entries:\n{items}\n\n\
         Put entries about the same feature, procedure or concept in one group. \
         A group of one is fine. Every index belongs to exactly one group.\n\n\
         Reply with a JSON array such as \
         [{{\"group_title\": \"article title for the group\", \"indices\": [0, 2]}}].\n\
         Do not add any text outside the JSON."
    )
}

fn synthesis_prompt(group_title: &str, members: &[&ExtractionRecord], topic: &str) -> String {
    let sources = members
        .iter()
        .enumerate()
        .map(|(idx, r)| {
            format!(
                "--- Source {n}: {title} ({category}) ---\n{content}",
                n = idx + 1,
                title = r.title,
                category = r.category,
                content = r.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "You merge knowledge base drafts into one article and reply with JSON only.\n\n\
         Write a single article titled around \"{group_title}\" (topic: {topic}) from these sources:\n\n\
         {sources}\n\n\
         Reply with one JSON object:\n\
         {{\n  \"title\": \"final article title\",\n  \
         \"category\": \"best fit from: {categories}\",\n  \
         \"content\": \"markdown with ## subheadings; merge repeated points and keep every technical detail\"\n}}\n\n\
         Do not add any text outside the JSON.",
        categories = categories_list(),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawExtraction {
    title: String,
    category: String,
    content: String,
    tags: Vec<Value>,
    source_summary: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSummary {
    title: String,
    summary: String,
    key_quotes: Vec<Value>,
    severity: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawArticle {
    title: String,
    category: String,
    content: String,
}

fn provenance_of(unit: &ContextUnit) -> Provenance {
    Provenance {
        source_channel: unit.channel_label.clone(),
        source_date: unit.date.clone(),
        source_contributors: unit.participants.iter().cloned().collect(),
    }
}

pub fn try_extract_knowledge(
    provider: &dyn LlmProvider,
    unit: &ContextUnit,
    topic: &str,
) -> Result<ExtractionRecord, CallError> {
    let reply = provider.complete(&extraction_prompt(unit, topic), EXTRACT_MAX_TOKENS)?;
    let raw: RawExtraction = extract_object(&reply)?;
    Ok(ExtractionRecord {
        title: non_blank(raw.title, FALLBACK_ARTICLE_TITLE),
        category: Category::parse_lenient(&raw.category),
        content: non_blank(raw.content, FALLBACK_ARTICLE_CONTENT),
        tags: string_list(&raw.tags)
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect(),
        source_summary: raw.source_summary.trim().to_string(),
        provenance: provenance_of(unit),
    })
}

pub fn fallback_extraction(unit: &ContextUnit) -> ExtractionRecord {
    ExtractionRecord {
        title: FALLBACK_ARTICLE_TITLE.to_string(),
        category: Category::Faq,
        content: FALLBACK_ARTICLE_CONTENT.to_string(),
        tags: Vec::new(),
        source_summary: FALLBACK_SOURCE_SUMMARY.to_string(),
        provenance: provenance_of(unit),
    }
}

/// Extract one knowledge record from a unit, substituting the fixed
/// fallback record when the call or its parse fails.
pub fn extract_knowledge(
    provider: &dyn LlmProvider,
    unit: &ContextUnit,
    topic: &str,
) -> ExtractionRecord {
    try_extract_knowledge(provider, unit, topic).unwrap_or_else(|err| {
        warn::emit(
            err.code(),
            WarnContext {
                stage: "extract",
                channel: &unit.channel_label,
                unit: &unit.date,
                reason: "fallback_record",
            },
            &err.to_string(),
        );
        fallback_extraction(unit)
    })
}

pub fn try_summarize_incident(
    provider: &dyn LlmProvider,
    unit: &ContextUnit,
    topic: &str,
) -> Result<IncidentSummary, CallError> {
    let reply = provider.complete(&summary_prompt(unit, topic), SUMMARY_MAX_TOKENS)?;
    let raw: RawSummary = extract_object(&reply)?;
    Ok(IncidentSummary {
        title: non_blank(raw.title, FALLBACK_INCIDENT_TITLE),
        summary: non_blank(raw.summary, FALLBACK_INCIDENT_SUMMARY),
        key_quotes: string_list(&raw.key_quotes),
        severity: Severity::parse_lenient(&raw.severity),
    })
}

pub fn fallback_summary() -> IncidentSummary {
    IncidentSummary {
        title: FALLBACK_INCIDENT_TITLE.to_string(),
        summary: FALLBACK_INCIDENT_SUMMARY.to_string(),
        key_quotes: Vec::new(),
        severity: Severity::Informational,
    }
}

pub fn summarize_incident(
    provider: &dyn LlmProvider,
    unit: &ContextUnit,
    topic: &str,
) -> IncidentSummary {
    try_summarize_incident(provider, unit, topic).unwrap_or_else(|err| {
        warn::emit(
            err.code(),
            WarnContext {
                stage: "summarize",
                channel: &unit.channel_label,
                unit: &unit.date,
                reason: "fallback_record",
            },
            &err.to_string(),
        );
        fallback_summary()
    })
}

/// Make the model's grouping a partition of `0..n`: out-of-range and
/// already-claimed indices are dropped, empty groups removed, and every
/// unclaimed index appended as its own group titled by its record.
fn repair_groups(groups: Vec<TopicGroup>, records: &[ExtractionRecord]) -> Vec<TopicGroup> {
    let mut claimed = BTreeSet::new();
    let mut out: Vec<TopicGroup> = groups
        .into_iter()
        .filter_map(|g| {
            let indices: Vec<usize> = g
                .indices
                .into_iter()
                .filter(|idx| *idx < records.len() && claimed.insert(*idx))
                .collect();
            if indices.is_empty() {
                return None;
            }
            Some(TopicGroup {
                group_title: g.group_title,
                indices,
            })
        })
        .collect();

    for (idx, record) in records.iter().enumerate() {
        if !claimed.contains(&idx) {
            out.push(TopicGroup {
                group_title: record.title.clone(),
                indices: vec![idx],
            });
        }
    }
    out
}

fn parse_groups(value: Value) -> Result<Vec<TopicGroup>, ParseError> {
    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(ParseError {
                snippet: format!("expected group list, got {other}"),
            });
        }
    };
    Ok(items
        .into_iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let group_title = obj
                .get("group_title")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or("Untitled")
                .to_string();
            let indices = obj
                .get("indices")
                .and_then(Value::as_array)
                .map(|raw| {
                    raw.iter()
                        .filter_map(Value::as_u64)
                        .filter_map(|i| usize::try_from(i).ok())
                        .collect()
                })
                .unwrap_or_default();
            Some(TopicGroup {
                group_title,
                indices,
            })
        })
        .collect())
}

pub fn try_group_topics(
    provider: &dyn LlmProvider,
    records: &[ExtractionRecord],
) -> Result<Vec<TopicGroup>, CallError> {
    let reply = provider.complete(&grouping_prompt(records), GROUP_MAX_TOKENS)?;
    let groups = parse_groups(extract(&reply)?)?;
    Ok(repair_groups(groups, records))
}

fn singleton_groups(records: &[ExtractionRecord]) -> Vec<TopicGroup> {
    records
        .iter()
        .enumerate()
        .map(|(idx, r)| TopicGroup {
            group_title: r.title.clone(),
            indices: vec![idx],
        })
        .collect()
}

/// Partition records into topic groups. Never calls the model for fewer
/// than two records; any failure degrades to one group per record.
pub fn group_topics(provider: &dyn LlmProvider, records: &[ExtractionRecord]) -> Vec<TopicGroup> {
    if records.len() <= 1 {
        return singleton_groups(records);
    }
    try_group_topics(provider, records).unwrap_or_else(|err| {
        warn::emit(
            err.code(),
            WarnContext {
                stage: "group",
                channel: "all",
                unit: &format!("{}-records", records.len()),
                reason: "singleton_groups",
            },
            &err.to_string(),
        );
        singleton_groups(records)
    })
}

fn members_of<'a>(group: &TopicGroup, records: &'a [ExtractionRecord]) -> Vec<&'a ExtractionRecord> {
    group
        .indices
        .iter()
        .filter_map(|idx| records.get(*idx))
        .collect()
}

fn sorted_unique<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    values
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn article_from(
    title: String,
    category: Category,
    content: String,
    members: &[&ExtractionRecord],
) -> Article {
    Article {
        title,
        category,
        content,
        source_channels: sorted_unique(members.iter().map(|r| &r.provenance.source_channel)),
        source_dates: sorted_unique(members.iter().map(|r| &r.provenance.source_date)),
        contributors: sorted_unique(
            members
                .iter()
                .flat_map(|r| r.provenance.source_contributors.iter()),
        ),
    }
}

pub fn try_synthesize_article(
    provider: &dyn LlmProvider,
    group: &TopicGroup,
    members: &[&ExtractionRecord],
    topic: &str,
) -> Result<Article, CallError> {
    let reply = provider.complete(
        &synthesis_prompt(&group.group_title, members, topic),
        SYNTHESIS_MAX_TOKENS,
    )?;
    let raw: RawArticle = extract_object(&reply)?;
    if raw.content.trim().is_empty() {
        return Err(ParseError {
            snippet: "article content missing".to_string(),
        }
        .into());
    }
    Ok(article_from(
        non_blank(raw.title, &group.group_title),
        Category::parse_lenient(&raw.category),
        raw.content.trim().to_string(),
        members,
    ))
}

/// Merge a group's records into one article. A single-member group is
/// passed through without a model call; on failure the member contents are
/// concatenated under the group title.
pub fn synthesize_article(
    provider: &dyn LlmProvider,
    group: &TopicGroup,
    records: &[ExtractionRecord],
    topic: &str,
) -> Option<Article> {
    let members = members_of(group, records);
    let first = members.first()?;

    if members.len() == 1 {
        return Some(article_from(
            first.title.clone(),
            first.category,
            first.content.clone(),
            &members,
        ));
    }

    let article = try_synthesize_article(provider, group, &members, topic).unwrap_or_else(|err| {
        warn::emit(
            err.code(),
            WarnContext {
                stage: "synthesize",
                channel: "all",
                unit: &group.group_title,
                reason: "concatenated_sources",
            },
            &err.to_string(),
        );
        article_from(
            group.group_title.clone(),
            first.category,
            members
                .iter()
                .map(|r| r.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            &members,
        )
    });
    Some(article)
}

#[cfg(test)]
mod tests {
    use super::{
        FALLBACK_ARTICLE_CONTENT, FALLBACK_ARTICLE_TITLE, FALLBACK_INCIDENT_SUMMARY,
        FALLBACK_INCIDENT_TITLE, FALLBACK_SOURCE_SUMMARY, extract_knowledge, fallback_extraction,
        fallback_summary, group_topics, repair_groups, summarize_incident, synthesize_article,
    };
    use crate::digest::model::{
        Category, Cluster, ContextUnit, ExtractionRecord, Message, Provenance, RelevantMessage,
        Severity, TopicGroup, Ts,
    };
    use crate::digest::provider::LlmProvider;
    use crate::error::ProviderError;
    use std::cell::{Cell, RefCell};

    struct FailingProvider {
        calls: Cell<usize>,
    }

    impl LlmProvider for FailingProvider {
        fn name(&self) -> String {
            "failing".to_string()
        }

        fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String, ProviderError> {
            self.calls.set(self.calls.get() + 1);
            Err(ProviderError::backend("failing", "connection reset"))
        }
    }

    struct CannedProvider {
        reply: String,
        max_tokens_seen: RefCell<Vec<u32>>,
    }

    impl CannedProvider {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                max_tokens_seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl LlmProvider for CannedProvider {
        fn name(&self) -> String {
            "canned".to_string()
        }

        fn complete(&self, _prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
            self.max_tokens_seen.borrow_mut().push(max_tokens);
            Ok(self.reply.clone())
        }
    }

    fn failing() -> FailingProvider {
        FailingProvider {
            calls: Cell::new(0),
        }
    }

    fn unit() -> ContextUnit {
        let m = Message::new(Ts::from_secs(1_700_000_000), "ana", "the import job hangs");
        let cluster = Cluster {
            messages: vec![RelevantMessage {
                message: m.clone(),
                relevance_reason: "report".to_string(),
            }],
        };
        let reply = Message::new(Ts::from_secs(1_700_000_060), "bo", "restart the worker");
        ContextUnit::new(cluster, vec![m, reply], "support")
    }

    fn record(title: &str, channel: &str, date: &str, who: &[&str]) -> ExtractionRecord {
        ExtractionRecord {
            title: title.to_string(),
            category: Category::Troubleshooting,
            content: format!("{title} body"),
            tags: vec!["t".to_string()],
            source_summary: format!("{title} summary"),
            provenance: Provenance {
                source_channel: channel.to_string(),
                source_date: date.to_string(),
                source_contributors: who.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    #[test]
    fn failing_gateway_yields_exact_extraction_fallback() {
        let got = extract_knowledge(&failing(), &unit(), "imports");
        assert_eq!(got.title, FALLBACK_ARTICLE_TITLE);
        assert_eq!(got.title, "Untitled Article");
        assert_eq!(got.content, FALLBACK_ARTICLE_CONTENT);
        assert_eq!(got.category, Category::Faq);
        assert!(got.tags.is_empty());
        assert_eq!(got.source_summary, FALLBACK_SOURCE_SUMMARY);
        assert_eq!(got.provenance.source_channel, "support");
        assert_eq!(got.provenance.source_contributors, vec!["ana", "bo"]);
    }

    #[test]
    fn failing_gateway_yields_exact_summary_fallback() {
        let got = summarize_incident(&failing(), &unit(), "imports");
        assert_eq!(got.title, FALLBACK_INCIDENT_TITLE);
        assert_eq!(got.summary, FALLBACK_INCIDENT_SUMMARY);
        assert!(got.key_quotes.is_empty());
        assert_eq!(got.severity, Severity::Informational);
    }

    #[test]
    fn unparseable_reply_also_falls_back() {
        let provider = CannedProvider::new("I'm sorry, I can't help with that.");
        let got = extract_knowledge(&provider, &unit(), "imports");
        assert_eq!(got.title, "Untitled Article");
        assert_eq!(provider.max_tokens_seen.borrow().as_slice(), &[4096]);
    }

    #[test]
    fn array_replies_fall_back_instead_of_filling_records() {
        for reply in ["[]", r#"["Some title","How-To"]"#] {
            let provider = CannedProvider::new(reply);
            let got = extract_knowledge(&provider, &unit(), "imports");
            assert_eq!(got, fallback_extraction(&unit()), "extraction for {reply}");
            assert_eq!(got.source_summary, "Unable to extract.");

            let summary = summarize_incident(&provider, &unit(), "imports");
            assert_eq!(summary, fallback_summary(), "summary for {reply}");
        }
    }

    #[test]
    fn extraction_reply_in_prose_is_parsed() {
        let provider = CannedProvider::new(
            "Here you go:\n{\"title\": \"Unstick imports\", \"category\": \"how-to\", \"content\": \"Restart the worker.\", \"tags\": [\"Imports\", 3], \"source_summary\": \"Hung import.\"}",
        );
        let got = extract_knowledge(&provider, &unit(), "imports");
        assert_eq!(got.title, "Unstick imports");
        assert_eq!(got.category, Category::HowTo);
        assert_eq!(got.tags, vec!["imports", "3"]);
        assert_eq!(got.source_summary, "Hung import.");
    }

    #[test]
    fn summary_reply_maps_unknown_severity() {
        let provider = CannedProvider::new(
            "```json\n{\"title\": \"Import outage\", \"summary\": \"Jobs hung.\", \"key_quotes\": [\"the import job hangs\"], \"severity\": \"apocalyptic\"}\n```",
        );
        let got = summarize_incident(&provider, &unit(), "imports");
        assert_eq!(got.title, "Import outage");
        assert_eq!(got.key_quotes, vec!["the import job hangs"]);
        assert_eq!(got.severity, Severity::Informational);
        assert_eq!(provider.max_tokens_seen.borrow().as_slice(), &[2048]);
    }

    #[test]
    fn grouping_repairs_missing_index() {
        let records = vec![
            record("A", "c", "2024-01-01", &[]),
            record("B", "c", "2024-01-02", &[]),
            record("C", "c", "2024-01-03", &[]),
        ];
        let provider = CannedProvider::new("[{\"group_title\": \"X\", \"indices\": [0, 2]}]");
        let got = group_topics(&provider, &records);
        assert_eq!(
            got,
            vec![
                TopicGroup {
                    group_title: "X".to_string(),
                    indices: vec![0, 2]
                },
                TopicGroup {
                    group_title: "B".to_string(),
                    indices: vec![1]
                },
            ]
        );
    }

    #[test]
    fn repair_drops_duplicates_and_out_of_range() {
        let records = vec![record("A", "c", "d", &[]), record("B", "c", "d", &[])];
        let groups = vec![
            TopicGroup {
                group_title: "first".to_string(),
                indices: vec![0, 0, 9],
            },
            TopicGroup {
                group_title: "empty after repair".to_string(),
                indices: vec![0, 7],
            },
        ];
        let got = repair_groups(groups, &records);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].indices, vec![0]);
        assert_eq!(got[1].group_title, "B");
        assert_eq!(got[1].indices, vec![1]);
    }

    #[test]
    fn grouping_small_inputs_skip_the_model() {
        let provider = failing();
        assert!(group_topics(&provider, &[]).is_empty());
        let one = vec![record("Only", "c", "d", &[])];
        let got = group_topics(&provider, &one);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].group_title, "Only");
        assert_eq!(provider.calls.get(), 0);
    }

    #[test]
    fn failing_grouping_gives_singletons() {
        let records = vec![record("A", "c", "d", &[]), record("B", "c", "d", &[])];
        let got = group_topics(&failing(), &records);
        let titles: Vec<&str> = got.iter().map(|g| g.group_title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[test]
    fn singleton_group_passes_through_without_a_call() {
        let provider = failing();
        let records = vec![record("Solo", "support", "2024-02-01", &["ana"])];
        let group = TopicGroup {
            group_title: "ignored".to_string(),
            indices: vec![0],
        };
        let got = synthesize_article(&provider, &group, &records, "t").expect("article");
        assert_eq!(got.title, "Solo");
        assert_eq!(got.content, "Solo body");
        assert_eq!(got.source_channels, vec!["support"]);
        assert_eq!(provider.calls.get(), 0);
    }

    #[test]
    fn failing_synthesis_concatenates_sources() {
        let mut second = record("B", "ops", "2024-01-01", &["bo", "ana"]);
        second.category = Category::Configuration;
        let records = vec![record("A", "support", "2024-01-02", &["ana"]), second];
        let group = TopicGroup {
            group_title: "Imports".to_string(),
            indices: vec![0, 1],
        };
        let got = synthesize_article(&failing(), &group, &records, "t").expect("article");
        assert_eq!(got.title, "Imports");
        assert_eq!(got.category, Category::Troubleshooting);
        assert_eq!(got.content, "A body\n\nB body");
        assert_eq!(got.source_channels, vec!["ops", "support"]);
        assert_eq!(got.source_dates, vec!["2024-01-01", "2024-01-02"]);
        assert_eq!(got.contributors, vec!["ana", "bo"]);
    }

    #[test]
    fn synthesis_uses_model_article_and_budget() {
        let records = vec![record("A", "c", "d", &[]), record("B", "c", "d", &[])];
        let group = TopicGroup {
            group_title: "AB".to_string(),
            indices: vec![0, 1],
        };
        let provider = CannedProvider::new(
            "{\"title\": \"All about AB\", \"category\": \"Best Practice\", \"content\": \"## A\\nx\\n## B\\ny\"}",
        );
        let got = synthesize_article(&provider, &group, &records, "t").expect("article");
        assert_eq!(got.title, "All about AB");
        assert_eq!(got.category, Category::BestPractice);
        assert_eq!(provider.max_tokens_seen.borrow().as_slice(), &[8192]);
    }
}
