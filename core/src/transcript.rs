/// Rendered view of a conversation: transcript entries, day separators, sidebar previews
///
/// Delivery is at-least-once (the room channel may echo a message the last
/// fetch already returned), so rendering is keyed by server message id and a
/// repeated id is shown once.
use crate::models::{AttachmentKind, Conversation, ConversationId, Message, MessageId};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    System,
}

impl Sender {
    fn of(message: &Message) -> Self {
        if message.is_system {
            Sender::System
        } else {
            Sender::User
        }
    }
}

/// Viewable/downloadable link to a message attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLink {
    pub url: String,
    pub kind: AttachmentKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub message_id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub attachment: Option<AttachmentLink>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptItem {
    DaySeparator(NaiveDate),
    Message(TranscriptEntry),
}

/// Render `conversation` in stored order, inserting a separator whenever the
/// calendar day (in `offset`) changes. `file_base` prefixes attachment paths.
pub fn render_transcript(
    conversation: &Conversation,
    file_base: &str,
    offset: &FixedOffset,
) -> Vec<TranscriptItem> {
    let mut items = Vec::with_capacity(conversation.messages.len());
    let mut seen: HashSet<MessageId> = HashSet::new();
    let mut current_day: Option<NaiveDate> = None;

    for message in &conversation.messages {
        if !seen.insert(message.id) {
            continue;
        }

        if let Some(sent_at) = message.sent_at {
            let day = sent_at.with_timezone(offset).date_naive();
            if current_day != Some(day) {
                items.push(TranscriptItem::DaySeparator(day));
                current_day = Some(day);
            }
        }

        items.push(TranscriptItem::Message(TranscriptEntry {
            message_id: message.id,
            sender: Sender::of(message),
            content: message.content.clone(),
            attachment: message
                .file_path
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(|path| attachment_link(file_base, path)),
            sent_at: message.sent_at,
        }));
    }

    items
}

pub fn attachment_link(file_base: &str, file_path: &str) -> AttachmentLink {
    AttachmentLink {
        url: format!(
            "{}/{}",
            file_base.trim_end_matches('/'),
            file_path.trim_start_matches('/')
        ),
        kind: AttachmentKind::from_name(file_path),
    }
}

/// One row of the conversation sidebar.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPreview {
    pub conversation_id: ConversationId,
    pub last_sender: Option<Sender>,
    pub last_content: Option<String>,
    /// Last message time, or the conversation's creation time when empty
    pub timestamp: Option<DateTime<Utc>>,
}

pub fn previews(conversations: &[Conversation]) -> Vec<ConversationPreview> {
    conversations
        .iter()
        .map(|conv| {
            let last = conv.last_message();
            ConversationPreview {
                conversation_id: conv.id,
                last_sender: last.map(Sender::of),
                last_content: last.map(|m| m.content.clone()),
                timestamp: last.and_then(|m| m.sent_at).or(conv.created_at),
            }
        })
        .collect()
}
