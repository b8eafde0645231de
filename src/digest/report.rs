use crate::digest::model::{Article, Category, IncidentEntry, KNOWLEDGE_CATEGORIES};
use crate::digest::util::format_utc_minute;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Lowercase, drop punctuation, hyphenate runs of whitespace or underscores.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_sep = false;
    for ch in text.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() || ch == '_' || ch == '-' {
            pending_sep = true;
        } else if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(ch);
        }
    }
    if out.is_empty() {
        "untitled".to_string()
    } else {
        out
    }
}

/// One unique file stem per article, numbering repeats `-2`, `-3`, ...
fn unique_slugs(articles: &[Article]) -> Vec<String> {
    let mut used = BTreeSet::new();
    articles
        .iter()
        .map(|a| {
            let base = slugify(&a.title);
            let mut slug = base.clone();
            let mut counter = 2;
            while used.contains(&slug) {
                slug = format!("{base}-{counter}");
                counter += 1;
            }
            used.insert(slug.clone());
            slug
        })
        .collect()
}

fn hashed(items: &[String], prefix: char) -> String {
    items
        .iter()
        .map(|i| format!("{prefix}{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_kb_index(
    topic: &str,
    channels: &[String],
    articles: &[Article],
    slugs: &[String],
    generated_at: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {topic} Knowledge Base\n\n"));
    out.push_str(&format!("**Generated:** {generated_at}\n"));
    out.push_str(&format!("**Source Channels:** {}\n", hashed(channels, '#')));
    out.push_str(&format!("**Articles:** {}\n\n---\n\n", articles.len()));

    if articles.is_empty() {
        out.push_str(&format!(
            "*No knowledge articles related to \"{topic}\" were found in the searched channels.*\n"
        ));
        return out;
    }

    let mut by_category: BTreeMap<Category, Vec<(&Article, &String)>> = BTreeMap::new();
    for (article, slug) in articles.iter().zip(slugs) {
        by_category
            .entry(article.category)
            .or_default()
            .push((article, slug));
    }

    for category in KNOWLEDGE_CATEGORIES {
        let Some(entries) = by_category.get(&category) else {
            continue;
        };
        out.push_str(&format!("## {category}\n\n"));
        for (article, slug) in entries {
            out.push_str(&format!("- [{}]({slug}.md)\n", article.title));
        }
        out.push('\n');
    }
    out
}

fn render_article(article: &Article) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", article.title));
    out.push_str(&format!("**Category:** {}\n\n---\n\n", article.category));
    out.push_str(article.content.trim_end());
    out.push_str("\n\n---\n\n**Sources:**\n");
    if !article.source_dates.is_empty() {
        out.push_str(&format!("- **Dates:** {}\n", article.source_dates.join(", ")));
    }
    if !article.source_channels.is_empty() {
        out.push_str(&format!(
            "- **Channels:** {}\n",
            hashed(&article.source_channels, '#')
        ));
    }
    if !article.contributors.is_empty() {
        out.push_str(&format!(
            "- **Contributors:** {}\n",
            hashed(&article.contributors, '@')
        ));
    }
    out
}

/// Write `index.md` plus one markdown file per article into `dir`.
pub fn write_kb(
    dir: &Path,
    topic: &str,
    channels: &[String],
    articles: &[Article],
    generated_at: &str,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let slugs = unique_slugs(articles);

    let index_path = dir.join("index.md");
    fs::write(
        &index_path,
        render_kb_index(topic, channels, articles, &slugs, generated_at),
    )
    .with_context(|| format!("failed to write {}", index_path.display()))?;

    let mut written = vec![index_path];
    for (article, slug) in articles.iter().zip(&slugs) {
        let path = dir.join(format!("{slug}.md"));
        fs::write(&path, render_article(article))
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

pub fn render_incident_report(
    topic: &str,
    channels: &[String],
    incidents: &[IncidentEntry],
    generated_at: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {topic} Incident Report\n\n"));
    out.push_str(&format!("**Generated:** {generated_at}\n"));
    out.push_str(&format!("**Source Channels:** {}\n", hashed(channels, '#')));
    out.push_str(&format!("**Incidents:** {}\n\n---\n\n", incidents.len()));

    if incidents.is_empty() {
        out.push_str(&format!(
            "*No incidents related to \"{topic}\" were found in the searched channels.*\n"
        ));
        return out;
    }

    let mut ordered: Vec<&IncidentEntry> = incidents.iter().collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date));

    for (n, entry) in ordered.iter().enumerate() {
        let s = &entry.summary;
        out.push_str(&format!("## {}. {}\n\n", n + 1, s.title));
        out.push_str(&format!(
            "**Date:** {} | **Channel:** #{} | **Severity:** {}\n",
            entry.date,
            entry.channel,
            s.severity.label()
        ));
        if !entry.participants.is_empty() {
            out.push_str(&format!(
                "**Participants:** {}\n",
                hashed(&entry.participants, '@')
            ));
        }
        if let Some(link) = &entry.permalink {
            out.push_str(&format!("**Link:** {link}\n"));
        }
        out.push('\n');
        out.push_str(s.summary.trim_end());
        out.push_str("\n\n");

        if !s.key_quotes.is_empty() {
            out.push_str("**Key quotes:**\n\n");
            for quote in &s.key_quotes {
                out.push_str(&format!("> {}\n\n", quote.replace('\n', " ")));
            }
        }

        if !entry.context_messages.is_empty() {
            out.push_str(&format!(
                "<details>\n<summary>Conversation ({} messages)</summary>\n\n",
                entry.context_messages.len()
            ));
            for msg in &entry.context_messages {
                out.push_str(&format!(
                    "- [{}] @{}: {}\n",
                    format_utc_minute(msg.ts.as_secs_f64()),
                    msg.author,
                    msg.text.replace('\n', " ")
                ));
            }
            out.push_str("\n</details>\n\n");
        }
        out.push_str("---\n\n");
    }
    out
}

pub fn write_incident_report(
    path: &Path,
    topic: &str,
    channels: &[String],
    incidents: &[IncidentEntry],
    generated_at: &str,
) -> Result<PathBuf> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(
        path,
        render_incident_report(topic, channels, incidents, generated_at),
    )
    .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path.to_path_buf())
}
