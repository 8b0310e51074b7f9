//! Gmail REST v1 mailbox adapter.
//!
//! Change log = `users.history.list` filtered to `messageAdded`; the
//! mailbox `historyId` is the cursor. Messages are fetched in raw form and
//! parsed with `mail-parser`; replies are rendered by [`ComposedReply::render`]
//! and sent through `users.messages.send` in the original thread.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use mail_parser::MessageParser;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::MailboxError;
use crate::mailbox::{
    ChangeEvent, ChangeFeed, ChangeSet, ComposedReply, Cursor, Message, MessageStore, SendAck,
};

const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

// ── Configuration ───────────────────────────────────────────────────

/// Gmail adapter configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub access_token: SecretString,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl GmailConfig {
    /// Returns `None` if `GMAIL_ACCESS_TOKEN` is not set.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("GMAIL_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())?;

        let api_base = std::env::var("GMAIL_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        let request_timeout = std::env::var("GMAIL_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Some(Self {
            access_token: SecretString::from(token),
            api_base,
            request_timeout,
        })
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    email_address: String,
    history_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    next_page_token: Option<String>,
    history_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(default)]
    messages_added: Vec<MessageAdded>,
}

#[derive(Debug, Deserialize)]
struct MessageAdded {
    message: MessageRef,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessageResponse {
    id: String,
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    raw: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    raw: String,
    thread_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

// ── Adapter ─────────────────────────────────────────────────────────

/// [`MessageStore`] over the Gmail REST API.
pub struct GmailMailbox {
    config: GmailConfig,
    client: reqwest::Client,
    account: OnceCell<String>,
}

impl GmailMailbox {
    pub fn new(config: GmailConfig) -> Result<Self, MailboxError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MailboxError::RequestFailed {
                operation: "client".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            config,
            client,
            account: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base, path)
    }

    /// Send a request with bearer auth. 404 is returned to the caller; other
    /// non-success statuses become errors.
    async fn execute(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, MailboxError> {
        let response = request
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| MailboxError::RequestFailed {
                operation: operation.into(),
                reason: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(MailboxError::AuthFailed(format!("{operation}: {body}")))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(MailboxError::RequestFailed {
                    operation: operation.into(),
                    reason: format!("HTTP {status}: {body}"),
                })
            }
        }
    }

    async fn profile(&self) -> Result<ProfileResponse, MailboxError> {
        let response = self
            .execute("profile", self.client.get(self.url("profile")))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(MailboxError::InvalidResponse("profile not found".into()));
        }
        decode("profile", response).await
    }
}

async fn decode<T: DeserializeOwned>(
    operation: &str,
    response: reqwest::Response,
) -> Result<T, MailboxError> {
    response
        .json::<T>()
        .await
        .map_err(|e| MailboxError::InvalidResponse(format!("{operation}: {e}")))
}

fn parse_history_id(raw: &str) -> Result<Cursor, MailboxError> {
    raw.parse()
        .map_err(|_| MailboxError::InvalidResponse(format!("bad historyId {raw:?}")))
}

#[async_trait]
impl MessageStore for GmailMailbox {
    async fn account_address(&self) -> Result<String, MailboxError> {
        self.account
            .get_or_try_init(|| async { Ok(self.profile().await?.email_address.to_lowercase()) })
            .await
            .cloned()
    }

    async fn current_cursor(&self) -> Result<Cursor, MailboxError> {
        let profile = self.profile().await?;
        if self.account.get().is_none() {
            let _ = self.account.set(profile.email_address.to_lowercase());
        }
        parse_history_id(&profile.history_id)
    }

    async fn changes_since(&self, cursor: Cursor) -> Result<ChangeFeed, MailboxError> {
        let mut events = Vec::new();
        let mut head = cursor;
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("startHistoryId", cursor.to_string()),
                ("historyTypes", "messageAdded".to_string()),
            ];
            if let Some(ref token) = page_token {
                query.push(("pageToken", token.clone()));
            }

            let request = self.client.get(self.url("history")).query(&query);
            let response = self.execute("history.list", request).await?;
            if response.status() == StatusCode::NOT_FOUND {
                debug!(cursor = %cursor, "History cursor no longer valid");
                return Ok(ChangeFeed::Invalidated);
            }

            let page: HistoryResponse = decode("history.list", response).await?;
            if let Some(ref id) = page.history_id {
                head = head.max(parse_history_id(id)?);
            }
            events.extend(events_from_history(&page.history));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(ChangeFeed::Changes(ChangeSet {
            events,
            cursor: head,
        }))
    }

    async fn get(&self, id: &str) -> Result<Message, MailboxError> {
        let request = self
            .client
            .get(self.url(&format!("messages/{id}")))
            .query(&[("format", "raw")]);
        let response = self.execute("messages.get", request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(MailboxError::NotFound { id: id.to_string() });
        }

        let raw: RawMessageResponse = decode("messages.get", response).await?;
        let bytes = decode_base64url(&raw.raw)?;
        parse_raw_message(raw.id, raw.thread_id, raw.label_ids, &bytes)
    }

    async fn send(&self, reply: &ComposedReply, thread_id: &str) -> Result<SendAck, MailboxError> {
        let from = self.account_address().await?;
        let rendered = reply.render(&from)?;
        let body = SendRequest {
            raw: URL_SAFE_NO_PAD.encode(rendered),
            thread_id,
        };

        let request = self.client.post(self.url("messages/send")).json(&body);
        let response = self.execute("messages.send", request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(MailboxError::NotFound {
                id: thread_id.to_string(),
            });
        }

        let sent: SendResponse = decode("messages.send", response).await?;
        Ok(SendAck { message_id: sent.id })
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────

/// Message additions in history order.
fn events_from_history(records: &[HistoryRecord]) -> Vec<ChangeEvent> {
    records
        .iter()
        .flat_map(|r| r.messages_added.iter())
        .map(|added| ChangeEvent::message_added(added.message.id.clone()))
        .collect()
}

/// Gmail emits base64url, sometimes padded.
fn decode_base64url(raw: &str) -> Result<Vec<u8>, MailboxError> {
    URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|e| MailboxError::InvalidResponse(format!("raw message is not base64url: {e}")))
}

/// Extract headers and a plain-text body from an RFC 5322 message.
fn parse_raw_message(
    id: String,
    thread_id: String,
    labels: Vec<String>,
    bytes: &[u8],
) -> Result<Message, MailboxError> {
    let parsed = MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| MailboxError::InvalidResponse(format!("unparseable message {id}")))?;

    let subject = parsed.subject().unwrap_or("No Subject").to_string();

    let from_address = parsed
        .from()
        .and_then(|addr| addr.first())
        .map(|a| match (a.name(), a.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        })
        .unwrap_or_default();

    let headers = parsed
        .headers()
        .iter()
        .filter_map(|h| {
            let name = h.name();
            let value = h.value().as_text()?;
            let value = if name.eq_ignore_ascii_case("Message-ID") {
                format!("<{}>", value.trim_matches(|c| c == '<' || c == '>'))
            } else {
                value.to_string()
            };
            Some((name.to_string(), value))
        })
        .collect();

    let body_text = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    Ok(Message {
        id,
        thread_id,
        subject,
        from_address,
        body_text,
        labels,
        headers,
    })
}

/// Drop tags and collapse whitespace.
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
