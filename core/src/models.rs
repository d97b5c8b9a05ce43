/// Shared wire types for the Friday backend
use crate::error::{FridayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub type UserId = u64;
pub type AgentId = u64;
pub type PlanId = u64;
pub type ConversationId = u64;
pub type MessageId = u64;

/// File extensions the compose box accepts.
pub const ACCEPTED_ATTACHMENT_EXTENSIONS: &[&str] =
    &["pdf", "doc", "docx", "txt", "png", "jpg", "jpeg"];

/// Extensions rendered inline as images in the transcript.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// One persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    /// The backend spells this field `is_systen`.
    #[serde(rename = "is_systen", alias = "is_system", default)]
    pub is_system: bool,
    #[serde(default)]
    pub file_path: Option<String>,
    pub conversation_id: ConversationId,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub sent_at: Option<DateTime<Utc>>,
}

/// A conversation thread with its messages in persistence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: UserId,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// A subscribable assistant persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    /// Voice-engine identifier handed to the voice widget
    #[serde(default)]
    pub eleven_labs_id: Option<String>,
    /// Routing token the backend uses to reach the assistant
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub feature_list: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub image_path: Option<String>,
}

impl Agent {
    pub fn active(&self) -> bool {
        self.is_active.unwrap_or(true)
    }
}

/// A bundle entitling a user to a set of agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `None` for free plans
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub feature_list: Option<Vec<serde_json::Value>>,
    pub max_agents: u32,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: u64,
    pub user_id: UserId,
    pub plan_id: PlanId,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub expire_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<SubscriptionStatus>,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

/// Body of `POST /subscriptions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionCreate {
    pub plan_id: PlanId,
    pub agent_ids: Vec<AgentId>,
}

/// User profile as returned by the auth backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub profile_picture_path: Option<String>,
    #[serde(default, rename = "type")]
    pub role: Option<String>,
}

/// Response of `POST /login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: UserProfile,
}

/// How an attachment is presented in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    File,
}

impl AttachmentKind {
    pub fn from_name(name: &str) -> Self {
        match extension_of(name) {
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => AttachmentKind::Image,
            _ => AttachmentKind::File,
        }
    }
}

/// One file queued in the compose box.
#[derive(Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Attachment {
    /// Validate the file type and wrap the bytes. Size is left to the backend.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let file_name = file_name.into();
        let accepted = extension_of(&file_name)
            .map(|ext| ACCEPTED_ATTACHMENT_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false);
        if !accepted {
            return Err(FridayError::Validation(format!(
                "unsupported attachment type: {} (accepted: {})",
                file_name,
                ACCEPTED_ATTACHMENT_EXTENSIONS.join(", ")
            )));
        }
        Ok(Self { file_name, bytes })
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FridayError::Validation(format!("invalid file path: {:?}", path)))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Self::new(file_name, bytes)
    }

    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::from_name(&self.file_name)
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Backend timestamps come with or without an offset; naive ones are UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse(&s).map(Some).map_err(serde::de::Error::custom),
        }
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp {:?}: {}", s, e))
    }
}
