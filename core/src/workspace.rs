/// Chat workspace controller
///
/// Owns one session's chat state: the agent list and active agent, the
/// conversation store, the compose box and the two realtime rooms. The caller
/// drives it cooperatively, interleaving user commands with `next_event()`.
///
/// Ordering rules:
/// - a send with no conversation selected selects the first conversation of
///   the refetched list once the backend has accepted it
/// - an inbox `new_conversation` refetches and selects the first conversation
/// - a room message for a conversation not held locally triggers a refetch
use crate::api::{BackendApi, SendMessage};
use crate::catalog::CatalogCache;
use crate::config::Config;
use crate::conversation_store::{AppendOutcome, ConversationStore};
use crate::error::{FridayError, Result};
use crate::models::{Agent, AgentId, Attachment, Conversation, ConversationId, UserId};
use crate::realtime::{ChannelEvent, ChannelManager, InboxEvent, RoomName, RoomTransport};
use crate::session::Session;
use crate::transcript::{self, ConversationPreview, TranscriptItem};
use chrono::FixedOffset;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared in-progress flag. Set while a guard is alive.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `None` if the flag is already held.
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard(self.0.clone()))
    }
}

pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Unsent text plus at most one attachment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compose {
    pub text: String,
    pub attachment: Option<Attachment>,
}

/// Transient user-facing failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub status: u16,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} ({})", self.message, self.status)
        }
    }
}

impl From<&FridayError> for Notice {
    fn from(e: &FridayError) -> Self {
        let (status, message) = e.status_and_message();
        Notice { status, message }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Compose text was empty or whitespace
    Empty,
    AlreadySending,
    Failed { status: u16, message: String },
}

/// Attributes for the embedded voice-agent widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceWidgetConfig {
    #[serde(rename = "agent-id")]
    pub agent_id: String,
    #[serde(rename = "dynamic-variables")]
    pub dynamic_variables: VoiceVariables,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceVariables {
    pub user_id: UserId,
    pub user_email: String,
}

pub struct Workspace {
    session: Session,
    backend: Arc<dyn BackendApi>,
    catalog: CatalogCache,
    store: ConversationStore,
    channels: ChannelManager,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    file_base: String,
    compose: Compose,
    agents: Vec<Agent>,
    active_agent: Option<AgentId>,
    sending: BusyFlag,
    loading: BusyFlag,
    notices: Vec<Notice>,
}

impl Workspace {
    /// Open the workspace for `session`: load the user's agents, fetch
    /// conversations and join the inbox room.
    ///
    /// Without a session nothing is fetched or opened.
    pub async fn enter(
        session: Option<Session>,
        backend: Arc<dyn BackendApi>,
        transport: Arc<dyn RoomTransport>,
        config: &Config,
    ) -> Result<Self> {
        let session = session.ok_or(FridayError::NotAuthenticated)?;
        let (channels, events) = ChannelManager::new(transport);

        let mut workspace = Self {
            catalog: CatalogCache::new(backend.clone()),
            session,
            backend,
            store: ConversationStore::new(),
            channels,
            events,
            file_base: config.file_base().to_string(),
            compose: Compose::default(),
            agents: Vec::new(),
            active_agent: None,
            sending: BusyFlag::new(),
            loading: BusyFlag::new(),
            notices: Vec::new(),
        };

        {
            let _loading = workspace.loading.try_acquire();
            workspace.agents = workspace
                .catalog
                .list_active_agents_for_user(&workspace.session)
                .await;
        }
        info!(
            "Workspace for user {} with {} agents",
            workspace.session.user_id(),
            workspace.agents.len()
        );

        if let Err(e) = workspace.refresh_conversations().await {
            warn!("Initial conversation fetch failed: {}", e);
            workspace.notices.push(Notice::from(&e));
        }

        let user_id = workspace.session.user_id();
        if let Err(e) = workspace.channels.open_inbox(user_id).await {
            error!("Could not join inbox for user {}: {}", user_id, e);
        }

        Ok(workspace)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn catalog(&self) -> &CatalogCache {
        &self.catalog
    }

    pub fn conversations(&self) -> &[Conversation] {
        self.store.conversations()
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.store.selected()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn active_agent(&self) -> Option<&Agent> {
        self.active_agent
            .and_then(|id| self.agents.iter().find(|a| a.id == id))
    }

    pub fn compose(&self) -> &Compose {
        &self.compose
    }

    pub fn is_sending(&self) -> bool {
        self.sending.is_set()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_set()
    }

    pub fn sending_flag(&self) -> BusyFlag {
        self.sending.clone()
    }

    /// Conversation room currently joined, if any.
    pub fn joined_conversation(&self) -> Option<ConversationId> {
        match self.channels.current_room() {
            Some(RoomName::Conversation(id)) => Some(*id),
            _ => None,
        }
    }

    /// Refetch the conversation list. Returns `false` when a newer fetch
    /// superseded this one.
    pub async fn refresh_conversations(&mut self) -> Result<bool> {
        let ticket = self.store.begin_fetch();
        let list = {
            let _loading = self.loading.try_acquire();
            self.backend.list_conversations(&self.session).await?
        };
        info!("Fetched {} conversations", list.len());
        let applied = self.store.apply_fetch(ticket, list);
        if applied {
            self.follow_selection().await;
        }
        Ok(applied)
    }

    /// Select a listed conversation (or `None` for a new one) and join its
    /// room. Unknown ids are refused.
    pub async fn select_conversation(&mut self, id: Option<ConversationId>) -> bool {
        if !self.store.select_conversation(id) {
            debug!("Refusing to select unknown conversation {:?}", id);
            return false;
        }
        self.follow_selection().await;
        true
    }

    /// Start an unsaved conversation: empty compose, nothing selected, no
    /// conversation room.
    pub async fn new_conversation(&mut self) {
        self.compose = Compose::default();
        self.store.select_conversation(None);
        self.follow_selection().await;
    }

    pub async fn select_agent(&mut self, agent_id: AgentId) -> Result<()> {
        let agent = self
            .agents
            .iter()
            .find(|a| a.id == agent_id)
            .ok_or_else(|| {
                FridayError::Validation(format!("agent {} is not in your subscription", agent_id))
            })?;
        info!("Active agent: {} ({})", agent.name, agent.id);
        self.active_agent = Some(agent_id);
        self.new_conversation().await;
        Ok(())
    }

    pub fn set_compose_text(&mut self, text: impl Into<String>) {
        self.compose.text = text.into();
    }

    /// Queue a file with the next message, replacing any previous one.
    pub fn attach(&mut self, attachment: Attachment) {
        debug!("Attached {:?}", attachment);
        self.compose.attachment = Some(attachment);
    }

    pub fn clear_attachment(&mut self) {
        self.compose.attachment = None;
    }

    /// Send the compose box to the active agent.
    ///
    /// Backend failures come back as `SendOutcome::Failed` with a queued
    /// notice and the compose box untouched. A missing agent, or one with no
    /// routing link, is an error.
    pub async fn send_message(&mut self) -> Result<SendOutcome> {
        if self.compose.text.trim().is_empty() {
            return Ok(SendOutcome::Empty);
        }
        let agent = self
            .active_agent()
            .ok_or_else(|| FridayError::Validation("choose an agent before sending".to_string()))?;
        if agent.link.trim().is_empty() {
            return Err(FridayError::Validation(format!(
                "agent {} has no link configured",
                agent.name
            )));
        }
        let link = agent.link.clone();
        let Some(_sending) = self.sending.try_acquire() else {
            return Ok(SendOutcome::AlreadySending);
        };

        let was_selected = self.store.selected_id();
        let request = SendMessage {
            content: self.compose.text.clone(),
            conversation_id: was_selected,
            link,
            attachment: self.compose.attachment.clone(),
        };

        if let Err(e) = self.backend.send_message(&self.session, &request).await {
            warn!("Send failed: {}", e);
            let notice = Notice::from(&e);
            self.notices.push(notice.clone());
            return Ok(SendOutcome::Failed {
                status: notice.status,
                message: notice.message,
            });
        }

        // Accepted by the backend; a failed refetch below does not undo that
        self.compose = Compose::default();
        match self.refresh_conversations().await {
            Ok(_) => {
                if was_selected.is_none() {
                    self.select_first().await;
                }
            }
            Err(e) => {
                warn!("Conversation refetch after send failed: {}", e);
                self.notices.push(Notice::from(&e));
            }
        }
        Ok(SendOutcome::Sent)
    }

    /// Wait for the next realtime event.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    pub async fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Inbox(InboxEvent::NewConversation) => {
                info!("Inbox: new conversation");
                match self.refresh_conversations().await {
                    Ok(_) => {
                        self.select_first().await;
                        self.compose = Compose::default();
                    }
                    Err(e) => warn!("Conversation refetch after inbox event failed: {}", e),
                }
            }
            ChannelEvent::Inbox(InboxEvent::Other(value)) => {
                debug!("Ignoring inbox event: {}", value);
            }
            ChannelEvent::RoomMessage { room, message } => {
                let conversation_id = message.conversation_id;
                if conversation_id != room {
                    debug!(
                        "Message {} for conversation {} arrived on room {}",
                        message.id, conversation_id, room
                    );
                }
                let outcome = self.store.append_message(conversation_id, message);
                if outcome == AppendOutcome::UnknownConversation {
                    info!("Message for unlisted conversation {}, refetching", conversation_id);
                    if let Err(e) = self.refresh_conversations().await {
                        warn!("Conversation refetch failed: {}", e);
                    }
                }
            }
            ChannelEvent::Closed { room, generation } => {
                if self.channels.handle_closed(&room, generation) {
                    warn!("Room {} disconnected", room);
                }
            }
        }
    }

    /// Rendered transcript of the selected conversation; empty when none is.
    pub fn transcript(&self, offset: &FixedOffset) -> Vec<TranscriptItem> {
        self.store
            .selected()
            .map(|c| transcript::render_transcript(c, &self.file_base, offset))
            .unwrap_or_default()
    }

    pub fn previews(&self) -> Vec<ConversationPreview> {
        transcript::previews(self.store.conversations())
    }

    /// `None` until an agent with a voice id is active.
    pub fn voice_widget(&self) -> Option<VoiceWidgetConfig> {
        let agent_id = self.active_agent()?.eleven_labs_id.clone()?;
        Some(VoiceWidgetConfig {
            agent_id,
            dynamic_variables: VoiceVariables {
                user_id: self.session.user_id(),
                user_email: self.session.email().to_string(),
            },
        })
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Leave both rooms and drop local chat state.
    pub async fn leave(&mut self) {
        self.channels.close_all().await;
        self.store.clear();
        self.compose = Compose::default();
        self.active_agent = None;
        info!("Left workspace for user {}", self.session.user_id());
    }

    async fn select_first(&mut self) {
        if let Some(first) = self.store.conversations().first().map(|c| c.id) {
            self.store.select_conversation(Some(first));
            self.follow_selection().await;
        }
    }

    async fn follow_selection(&mut self) {
        let selected = self.store.selected_id();
        if let Err(e) = self.channels.switch_room(selected).await {
            error!("Could not join room for conversation {:?}: {}", selected, e);
        }
    }
}
