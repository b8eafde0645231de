use crate::digest::config::SlackConfig;
use crate::digest::context::ThreadFetcher;
use crate::digest::model::{Message, Ts};
use crate::digest::util::now_epoch_secs;
use crate::error::SourceError;
use reqwest::blocking::Client;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PAGE_LIMIT: usize = 200;
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Blocking Slack Web API client. Consecutive calls are spaced by the
/// configured delay to stay under tier-3 rate limits.
pub struct SlackClient {
    token: String,
    api_base: String,
    delay: Duration,
    client: Client,
    last_call: Cell<Option<Instant>>,
    users: RefCell<HashMap<String, String>>,
}

fn next_cursor(resp: &Value) -> Option<String> {
    resp.get("response_metadata")
        .and_then(|m| m.get("next_cursor"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn messages_of(resp: &Value) -> Vec<Value> {
    resp.get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn display_name(user: &Value) -> Option<String> {
    let profile = user.get("profile")?;
    ["display_name", "real_name"]
        .iter()
        .filter_map(|key| profile.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

impl SlackClient {
    pub fn new(cfg: &SlackConfig) -> Result<Self, SourceError> {
        let token = cfg
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SourceError::new(
                    "auth",
                    "Slack token is required (set SLACK_TOKEN or slack.token)",
                )
            })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|err| SourceError::new("http", err.to_string()))?;
        Ok(Self {
            token: token.to_string(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            delay: Duration::from_millis(cfg.rate_limit_ms),
            client,
            last_call: Cell::new(None),
            users: RefCell::new(HashMap::new()),
        })
    }

    fn pace(&self) {
        if let Some(last) = self.last_call.get() {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }
        }
        self.last_call.set(Some(Instant::now()));
    }

    fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        self.pace();
        debug!(method, "slack api call");
        let response = self
            .client
            .get(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .map_err(|err| SourceError::new(method, err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::new(method, format!("status {status}")));
        }
        let body: Value = response
            .json()
            .map_err(|err| SourceError::new(method, format!("invalid JSON body: {err}")))?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            return Err(SourceError::new(method, reason));
        }
        Ok(body)
    }

    /// Follow cursor pagination, collecting every page's `messages`.
    fn paged_messages(
        &self,
        method: &str,
        params: Vec<(&str, String)>,
    ) -> Result<Vec<Value>, SourceError> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut page_params = params.clone();
            page_params.push(("limit", PAGE_LIMIT.to_string()));
            if let Some(c) = &cursor {
                page_params.push(("cursor", c.clone()));
            }
            let resp = self.call(method, &page_params)?;
            out.extend(messages_of(&resp));

            if resp.get("has_more").and_then(Value::as_bool) != Some(true) {
                break;
            }
            cursor = next_cursor(&resp);
            if cursor.is_none() {
                break;
            }
        }
        Ok(out)
    }

    /// Channel name to id for every listed channel whose name or id was
    /// requested. A leading `#` on a requested name is ignored.
    pub fn resolve_channel_ids(
        &self,
        names: &[String],
    ) -> Result<BTreeMap<String, String>, SourceError> {
        let wanted: BTreeSet<String> = names
            .iter()
            .map(|n| n.trim().trim_start_matches('#').to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let mut found = BTreeMap::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }
            let resp = self.call("conversations.list", &params)?;
            for channel in resp
                .get("channels")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let (Some(name), Some(id)) = (
                    channel.get("name").and_then(Value::as_str),
                    channel.get("id").and_then(Value::as_str),
                ) else {
                    continue;
                };
                if wanted.contains(name) || wanted.contains(id) {
                    found.insert(name.to_string(), id.to_string());
                }
            }
            if found.len() >= wanted.len() {
                break;
            }
            cursor = next_cursor(&resp);
            if cursor.is_none() {
                break;
            }
        }
        Ok(found)
    }

    pub fn resolve_user(&self, user_id: &str) -> String {
        if let Some(name) = self.users.borrow().get(user_id) {
            return name.clone();
        }
        let name = match self.call("users.info", &[("user", user_id.to_string())]) {
            Ok(resp) => resp
                .get("user")
                .and_then(display_name)
                .unwrap_or_else(|| user_id.to_string()),
            Err(err) => {
                debug!(user_id, error = %err, "user lookup failed");
                user_id.to_string()
            }
        };
        self.users
            .borrow_mut()
            .insert(user_id.to_string(), name.clone());
        name
    }

    /// Convert one API message, resolving its author. Messages without a
    /// parsable ts or with blank text are skipped.
    fn to_message(&self, raw: &Value) -> Option<Message> {
        let ts: Ts = raw.get("ts").and_then(Value::as_str)?.parse().ok()?;
        let text = raw.get("text").and_then(Value::as_str).unwrap_or_default();
        if text.trim().is_empty() {
            return None;
        }
        let author = match raw.get("user").and_then(Value::as_str) {
            Some(user_id) => self.resolve_user(user_id),
            None => raw
                .get("username")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        };
        let mut msg = Message::new(ts, author, text);
        msg.thread_id = raw
            .get("thread_ts")
            .and_then(Value::as_str)
            .map(str::to_string);
        msg.reply_count = raw
            .get("reply_count")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());
        Some(msg)
    }

    /// Normalize raw API messages: unusable entries are dropped and the
    /// result is ts-unique and sorted.
    pub fn to_messages(&self, raw: &[Value]) -> Vec<Message> {
        let mut unique: BTreeMap<Ts, Message> = BTreeMap::new();
        for msg in raw.iter().filter_map(|r| self.to_message(r)) {
            unique.entry(msg.ts).or_insert(msg);
        }
        unique.into_values().collect()
    }

    /// Raw API messages in the channel from the last `days` days, as
    /// returned. Pass them through [`SlackClient::to_messages`] to normalize.
    pub fn fetch_history(&self, channel_id: &str, days: u64) -> Result<Vec<Value>, SourceError> {
        let now = now_epoch_secs().map_err(|err| SourceError::new("clock", err.to_string()))?;
        let oldest = now.saturating_sub(days.saturating_mul(86_400));
        self.paged_messages(
            "conversations.history",
            vec![
                ("channel", channel_id.to_string()),
                ("oldest", format!("{oldest}.000000")),
            ],
        )
    }
}

impl ThreadFetcher for SlackClient {
    fn surrounding(
        &self,
        channel_id: &str,
        ts: Ts,
        before: usize,
        after: usize,
    ) -> Result<Vec<Message>, SourceError> {
        let mut raw = Vec::new();
        if before > 0 {
            let resp = self.call(
                "conversations.history",
                &[
                    ("channel", channel_id.to_string()),
                    ("latest", ts.to_string()),
                    ("inclusive", "true".to_string()),
                    ("limit", (before + 1).to_string()),
                ],
            )?;
            raw.extend(messages_of(&resp));
        }
        if after > 0 {
            let resp = self.call(
                "conversations.history",
                &[
                    ("channel", channel_id.to_string()),
                    ("oldest", ts.to_string()),
                    ("inclusive", "false".to_string()),
                    ("limit", (after + 1).to_string()),
                ],
            )?;
            raw.extend(messages_of(&resp));
        }
        Ok(self.to_messages(&raw))
    }

    fn thread_replies(&self, channel_id: &str, thread_id: &str) -> Result<Vec<Message>, SourceError> {
        let raw = self.paged_messages(
            "conversations.replies",
            vec![
                ("channel", channel_id.to_string()),
                ("ts", thread_id.to_string()),
            ],
        )?;
        Ok(self.to_messages(&raw))
    }

    fn permalink(&self, channel_id: &str, ts: Ts) -> Option<String> {
        let params = [
            ("channel", channel_id.to_string()),
            ("message_ts", ts.to_string()),
        ];
        match self.call("chat.getPermalink", &params) {
            Ok(resp) => resp
                .get("permalink")
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(err) => {
                warn!(channel = channel_id, error = %err, "permalink lookup failed");
                None
            }
        }
    }
}
