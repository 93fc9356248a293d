//! Push notifications. The core only relies on [`NotificationDispatcher`];
//! [`ExpoDispatcher`] is the production implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_db::Database;

use crate::blocking;
use crate::error::{KindredError, Result};

pub const DEFAULT_EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    NearbyUser,
    Match,
    LikeRequest,
    Call,
}

/// A typed push payload. `data` always carries `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub badge: Option<u32>,
}

fn name_or(name: Option<&str>, fallback: &'static str) -> String {
    name.filter(|n| !n.trim().is_empty()).unwrap_or(fallback).to_string()
}

impl Notification {
    pub fn message(
        sender_name: Option<&str>,
        preview: &str,
        conversation_id: &str,
        sender_id: Uuid,
    ) -> Self {
        let body = if preview.is_empty() {
            "You have a new message".to_string()
        } else {
            preview.to_string()
        };
        Self {
            kind: NotificationKind::Message,
            title: name_or(sender_name, "New Message"),
            body,
            data: json!({
                "type": NotificationKind::Message,
                "conversationId": conversation_id,
                "senderId": sender_id,
                "senderName": sender_name,
            }),
            badge: Some(1),
        }
    }

    pub fn nearby_user(name: Option<&str>, user_id: Uuid, distance_m: u32) -> Self {
        let distance = if distance_m < 1000 {
            format!("{}m away", distance_m)
        } else {
            format!("{:.1}km away", f64::from(distance_m) / 1000.0)
        };
        Self {
            kind: NotificationKind::NearbyUser,
            title: "New User Nearby".to_string(),
            body: format!("{} is {}", name_or(name, "Someone"), distance),
            data: json!({
                "type": NotificationKind::NearbyUser,
                "userId": user_id,
                "userName": name,
                "distance": distance_m,
            }),
            badge: None,
        }
    }

    pub fn matched(
        name: Option<&str>,
        match_id: Uuid,
        user_id: Uuid,
        message: Option<&str>,
    ) -> Self {
        let who = name_or(name, "Someone");
        let body = match message {
            Some(text) => format!("{}: {}", who, text),
            None => format!("You and {} liked each other", who),
        };
        Self {
            kind: NotificationKind::Match,
            title: "New Match! 💫".to_string(),
            body,
            data: json!({
                "type": NotificationKind::Match,
                "matchId": match_id,
                "userId": user_id,
                "userName": name,
                "message": message,
            }),
            badge: Some(1),
        }
    }

    pub fn like_request(
        name: Option<&str>,
        match_id: Uuid,
        from_user_id: Uuid,
        is_super: bool,
    ) -> Self {
        let verb = if is_super { "super liked" } else { "liked" };
        Self {
            kind: NotificationKind::LikeRequest,
            title: "Someone likes you".to_string(),
            body: format!("{} {} you", name_or(name, "Someone"), verb),
            data: json!({
                "type": NotificationKind::LikeRequest,
                "matchId": match_id,
                "userId": from_user_id,
                "userName": name,
                "isSuperLike": is_super,
            }),
            badge: Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NoTokens,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::NoTokens => "no_tokens",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { endpoints: usize },
    Skipped { reason: SkipReason },
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, user_id: Uuid, notification: Notification) -> Result<DispatchOutcome>;
}

/// Send and swallow: a failed push never undoes the write that caused it.
pub async fn dispatch_best_effort(
    notifier: &dyn NotificationDispatcher,
    user_id: Uuid,
    notification: Notification,
) {
    let kind = notification.kind;
    match notifier.send(user_id, notification).await {
        Ok(DispatchOutcome::Sent { endpoints }) => {
            debug!(%user_id, ?kind, endpoints, "Push sent");
        }
        Ok(DispatchOutcome::Skipped { reason }) => {
            debug!(%user_id, ?kind, reason = reason.as_str(), "Push skipped");
        }
        Err(e) => warn!(%user_id, ?kind, "Push dispatch failed: {}", e),
    }
}

/// `ExponentPushToken[...]` or `ExpoPushToken[...]`.
pub fn is_expo_push_token(token: &str) -> bool {
    ["ExponentPushToken[", "ExpoPushToken["].iter().any(|prefix| {
        token
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(']'))
            .is_some_and(|inner| !inner.is_empty())
    })
}

/// Validate and store a device token for `user_id`.
pub async fn register_token(db: &Arc<Database>, user_id: Uuid, token: &str) -> Result<()> {
    let token = token.trim().to_string();
    if !is_expo_push_token(&token) {
        return Err(KindredError::validation("not an Expo push token"));
    }
    let stored = blocking(db, move |db| {
        if db.get_profile(user_id)?.is_none() {
            return Ok(false);
        }
        db.add_push_token(user_id, &token, Utc::now())?;
        Ok(true)
    })
    .await?;
    if !stored {
        return Err(KindredError::NotFound("user"));
    }
    info!(%user_id, "Push token registered");
    Ok(())
}

// -- Expo --

#[derive(Debug, Serialize)]
struct ExpoMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
    sound: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    data: Vec<ExpoTicket>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<ExpoTicketDetails>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicketDetails {
    #[serde(default)]
    error: Option<String>,
}

/// Sends to every registered token of a user through the Expo push API.
pub struct ExpoDispatcher {
    client: Client,
    db: Arc<Database>,
    push_url: String,
    access_token: Option<String>,
}

impl ExpoDispatcher {
    pub fn new(
        db: Arc<Database>,
        push_url: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            db,
            push_url: push_url.into(),
            access_token,
        }
    }
}

#[async_trait]
impl NotificationDispatcher for ExpoDispatcher {
    async fn send(&self, user_id: Uuid, notification: Notification) -> Result<DispatchOutcome> {
        // Users who turned push off have no tokens listed
        let tokens: Vec<String> = blocking(&self.db, move |db| db.push_tokens_for(user_id))
            .await?
            .into_iter()
            .filter(|t| is_expo_push_token(t))
            .collect();
        if tokens.is_empty() {
            return Ok(DispatchOutcome::Skipped {
                reason: SkipReason::NoTokens,
            });
        }

        let messages: Vec<ExpoMessage<'_>> = tokens
            .iter()
            .map(|token| ExpoMessage {
                to: token,
                title: &notification.title,
                body: &notification.body,
                data: &notification.data,
                sound: "default",
                badge: notification.badge,
            })
            .collect();

        let mut request = self.client.post(&self.push_url).json(&messages);
        // Optional; raises Expo's rate limits
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KindredError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let reason = format!("Expo push API error {}: {}", status, body);
            return Err(KindredError::Upstream(reason));
        }
        let parsed: ExpoResponse = response
            .json()
            .await
            .map_err(|e| KindredError::Upstream(format!("bad Expo response: {}", e)))?;

        let mut delivered = 0;
        for (token, ticket) in tokens.iter().zip(&parsed.data) {
            if ticket.status == "ok" {
                delivered += 1;
                continue;
            }
            let code = ticket.details.as_ref().and_then(|d| d.error.as_deref());
            if code == Some("DeviceNotRegistered") {
                info!(%user_id, "Pruning unregistered push token");
                let token = token.clone();
                if let Err(e) = blocking(&self.db, move |db| db.remove_push_token(&token)).await {
                    warn!(%user_id, "Failed to prune push token: {}", e);
                }
            } else {
                warn!(%user_id, ?code, "Expo ticket error: {:?}", ticket.message);
            }
        }

        if delivered == 0 {
            return Err(KindredError::Upstream("every Expo ticket failed".to_string()));
        }
        Ok(DispatchOutcome::Sent { endpoints: delivered })
    }
}

// -- Other dispatchers --

/// Used when push is turned off in configuration.
pub struct DisabledDispatcher;

#[async_trait]
impl NotificationDispatcher for DisabledDispatcher {
    async fn send(&self, _user_id: Uuid, _notification: Notification) -> Result<DispatchOutcome> {
        Ok(DispatchOutcome::Skipped {
            reason: SkipReason::Disabled,
        })
    }
}

/// Test double that keeps every notification it is asked to send.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(Uuid, Notification)>>,
    fail: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records, then reports an upstream failure.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<(Uuid, Notification)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, user_id: Uuid) -> Vec<Notification> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(to, _)| *to == user_id)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, user_id: Uuid, notification: Notification) -> Result<DispatchOutcome> {
        self.sent.lock().await.push((user_id, notification));
        if self.fail {
            return Err(KindredError::Upstream("push service unavailable".to_string()));
        }
        Ok(DispatchOutcome::Sent { endpoints: 1 })
    }
}
