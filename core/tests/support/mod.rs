//! Test doubles shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use friday_core::api::{BackendApi, ProfileUpdate, SendMessage, Signup};
use friday_core::models::{
    Agent, Conversation, LoginResponse, Message, Plan, Subscription, SubscriptionCreate,
    UserProfile,
};
use friday_core::realtime::{ChannelEvent, EventSink, RoomName, RoomSubscription, RoomTransport};
use friday_core::{Config, FridayError, Result, Session};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::oneshot;

pub const USER_ID: u64 = 42;

pub fn session() -> Session {
    Session::new(USER_ID, "token-42", "Ada", "Lovelace", "ada@example.com")
}

pub fn config() -> Config {
    Config::default()
}

pub fn agent(id: u64, link: &str) -> Agent {
    Agent {
        id,
        name: format!("Agent {}", id),
        eleven_labs_id: None,
        link: link.to_string(),
        price: None,
        description: None,
        feature_list: None,
        is_active: Some(true),
        image_path: None,
    }
}

pub fn message(id: u64, conversation_id: u64, content: &str) -> Message {
    Message {
        id,
        content: content.to_string(),
        is_system: false,
        file_path: None,
        conversation_id,
        sent_at: None,
    }
}

pub fn conversation(id: u64, messages: Vec<Message>) -> Conversation {
    Conversation {
        id,
        user_id: USER_ID,
        created_at: None,
        messages,
    }
}

pub fn subscription(id: u64, plan_id: u64, agents: Vec<Agent>) -> Subscription {
    Subscription {
        id,
        user_id: USER_ID,
        plan_id,
        started_at: None,
        expire_at: None,
        status: None,
        agents,
    }
}

pub fn plan(id: u64, max_agents: u32) -> Plan {
    Plan {
        id,
        name: format!("Plan {}", id),
        description: String::new(),
        price: None,
        feature_list: None,
        max_agents,
        is_active: Some(true),
        image_path: None,
    }
}

/// What the fake backend returns and what it was asked.
#[derive(Default)]
pub struct BackendState {
    pub conversations: Vec<Conversation>,
    /// Replaces `conversations` once a send succeeds
    pub after_send: Option<Vec<Conversation>>,
    pub subscriptions: Vec<Subscription>,
    pub plans: Vec<Plan>,
    pub catalog: Vec<Agent>,
    pub fail_send: Option<(u16, String)>,
    pub fail_conversations: bool,
    pub fail_subscriptions: bool,
    pub calls: Vec<String>,
    pub sent: Vec<SendMessage>,
    pub created: Vec<SubscriptionCreate>,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, call: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.as_str() == call).count())
    }

    pub fn sent(&self) -> Vec<SendMessage> {
        self.with(|s| s.sent.clone())
    }

    fn record(&self, call: impl Into<String>) {
        self.with(|s| s.calls.push(call.into()));
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn login(&self, email: &str, _password: &str) -> Result<LoginResponse> {
        self.record("POST /login");
        Ok(LoginResponse {
            access_token: "token-42".to_string(),
            token_type: Some("bearer".to_string()),
            user: UserProfile {
                id: USER_ID,
                email: email.to_string(),
                first_name: Some("Ada".to_string()),
                last_name: Some("Lovelace".to_string()),
                phone_number: None,
                profile_picture_path: None,
                role: None,
            },
        })
    }

    async fn signup(&self, signup: &Signup) -> Result<UserProfile> {
        self.record("POST /signup");
        Ok(UserProfile {
            id: USER_ID + 1,
            email: signup.email.clone(),
            first_name: Some(signup.first_name.clone()),
            last_name: Some(signup.last_name.clone()),
            phone_number: Some(signup.phone_number.clone()),
            profile_picture_path: None,
            role: Some("user".to_string()),
        })
    }

    async fn update_profile(
        &self,
        session: &Session,
        update: &ProfileUpdate,
    ) -> Result<UserProfile> {
        self.record("PATCH /update-profile");
        Ok(UserProfile {
            id: session.user_id(),
            email: session.email().to_string(),
            first_name: update.first_name.clone().or_else(|| Some("Ada".to_string())),
            last_name: update.last_name.clone().or_else(|| Some("Lovelace".to_string())),
            phone_number: update.phone_number.clone(),
            profile_picture_path: None,
            role: Some("user".to_string()),
        })
    }

    async fn change_password(&self, _session: &Session, _old: &str, _new: &str) -> Result<String> {
        self.record("POST /change-password");
        Ok("Password updated".to_string())
    }

    async fn list_active_agents(&self) -> Result<Vec<Agent>> {
        self.record("GET /agents/active");
        Ok(self.with(|s| s.catalog.clone()))
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>> {
        self.record("GET /plans/active");
        Ok(self.with(|s| s.plans.clone()))
    }

    async fn list_active_subscriptions(&self, session: &Session) -> Result<Vec<Subscription>> {
        self.record(format!("GET /users/{}/subscriptions/active", session.user_id()));
        self.with(|s| {
            if s.fail_subscriptions {
                Err(FridayError::Api {
                    status: 503,
                    message: "Service Unavailable".to_string(),
                })
            } else {
                Ok(s.subscriptions.clone())
            }
        })
    }

    async fn create_subscription(
        &self,
        _session: &Session,
        body: &SubscriptionCreate,
    ) -> Result<Subscription> {
        self.record("POST /subscriptions");
        self.with(|s| {
            s.created.push(body.clone());
            let agents = s
                .catalog
                .iter()
                .filter(|a| body.agent_ids.contains(&a.id))
                .cloned()
                .collect();
            let sub = subscription(100 + s.created.len() as u64, body.plan_id, agents);
            s.subscriptions.insert(0, sub.clone());
            Ok(sub)
        })
    }

    async fn list_conversations(&self, session: &Session) -> Result<Vec<Conversation>> {
        self.record(format!("GET /users/{}/conversations", session.user_id()));
        self.with(|s| {
            if s.fail_conversations {
                Err(FridayError::Http("connection refused".to_string()))
            } else {
                Ok(s.conversations.clone())
            }
        })
    }

    async fn send_message(&self, _session: &Session, msg: &SendMessage) -> Result<Option<Message>> {
        self.record("POST /messages");
        self.with(|s| {
            s.sent.push(msg.clone());
            if let Some((status, message)) = s.fail_send.clone() {
                return Err(FridayError::Api { status, message });
            }
            if let Some(next) = s.after_send.take() {
                s.conversations = next;
            }
            Ok(None)
        })
    }
}

#[derive(Default)]
struct TransportState {
    opened: Vec<RoomName>,
    sinks: HashMap<RoomName, EventSink>,
    generations: HashMap<RoomName, u64>,
    shutdowns: Vec<(RoomName, oneshot::Receiver<()>)>,
    refuse: HashSet<RoomName>,
}

/// Room transport that never touches the network. Tests push events into
/// whichever room is open.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<RoomName> {
        self.state.lock().unwrap().opened.clone()
    }

    /// Make future opens of `room` fail.
    pub fn refuse(&self, room: RoomName) {
        self.state.lock().unwrap().refuse.insert(room);
    }

    /// Whether the most recent subscription to `room` is still open.
    pub fn is_open(&self, room: &RoomName) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.shutdowns.iter_mut().rev().find(|(r, _)| r == room) {
            Some((_, rx)) => matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
            None => false,
        }
    }

    /// Generation of the most recent open of `room`.
    pub fn generation(&self, room: &RoomName) -> u64 {
        *self
            .state
            .lock()
            .unwrap()
            .generations
            .get(room)
            .expect("room was never opened")
    }

    /// Report the most recent connection to `room` as dropped by the server.
    pub fn drop_room(&self, room: &RoomName) {
        let generation = self.generation(room);
        self.push(
            room,
            ChannelEvent::Closed {
                room: room.clone(),
                generation,
            },
        );
    }

    pub fn push(&self, room: &RoomName, event: ChannelEvent) {
        let state = self.state.lock().unwrap();
        let sink = state.sinks.get(room).expect("room was never opened");
        sink.send(event).expect("workspace dropped its receiver");
    }
}

#[async_trait]
impl RoomTransport for FakeTransport {
    async fn open(
        &self,
        room: RoomName,
        generation: u64,
        sink: EventSink,
    ) -> Result<RoomSubscription> {
        let mut state = self.state.lock().unwrap();
        if state.refuse.contains(&room) {
            return Err(FridayError::WebSocket(format!("refused: {}", room)));
        }
        let (tx, rx) = oneshot::channel();
        state.opened.push(room.clone());
        state.sinks.insert(room.clone(), sink);
        state.generations.insert(room.clone(), generation);
        state.shutdowns.push((room.clone(), rx));
        Ok(RoomSubscription::new(room, generation, tx, None))
    }
}
