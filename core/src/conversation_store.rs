/// In-memory conversations, their messages and the selection pointer
///
/// The backend owns persistence; this is the client's mirror of the last
/// fetch plus whatever the room channel delivered since. The selected
/// conversation is stored as an id and always read out of the list, so the
/// list entry and the selected view cannot diverge.
use crate::models::{Conversation, ConversationId, Message};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Not in the local list: the list is stale and needs a refetch
    UnknownConversation,
}

/// Generation tag of a conversation-list fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    selected: Option<ConversationId>,
    issued: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn selected(&self) -> Option<&Conversation> {
        self.selected.and_then(|id| self.get(id))
    }

    pub fn selected_id(&self) -> Option<ConversationId> {
        self.selected
    }

    /// Replace the whole collection. Last fetch wins; no merging.
    pub fn set_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        if let Some(id) = self.selected {
            if self.get(id).is_none() {
                debug!("Selected conversation {} no longer listed, deselecting", id);
                self.selected = None;
            }
        }
    }

    /// Point the selection at a listed conversation, or at `None` for a new
    /// unsaved thread. Unknown ids are refused.
    pub fn select_conversation(&mut self, id: Option<ConversationId>) -> bool {
        match id {
            Some(id) if self.get(id).is_none() => false,
            _ => {
                self.selected = id;
                true
            }
        }
    }

    /// Append in arrival order. No deduplication at this layer.
    pub fn append_message(&mut self, conversation_id: ConversationId, message: Message) -> AppendOutcome {
        match self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            Some(conversation) => {
                conversation.messages.push(message);
                AppendOutcome::Appended
            }
            None => AppendOutcome::UnknownConversation,
        }
    }

    /// Tag a conversation-list fetch about to be issued.
    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.issued += 1;
        FetchTicket(self.issued)
    }

    /// Apply a fetch result unless a newer fetch was issued after it.
    pub fn apply_fetch(&mut self, ticket: FetchTicket, conversations: Vec<Conversation>) -> bool {
        if ticket.0 != self.issued {
            debug!(
                "Discarding superseded conversation fetch (ticket {}, latest {})",
                ticket.0, self.issued
            );
            return false;
        }
        self.set_conversations(conversations);
        true
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.selected = None;
    }
}
