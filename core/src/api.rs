/// REST client for the Friday backend
///
/// Endpoints consumed:
///   POST  /signup                              multipart: email, password, first_name,
///                                              last_name, phone_number, profile_picture?
///   POST  /login                               form: username, password
///   PATCH /update-profile                      bearer, multipart: first_name?, last_name?,
///                                              phone_number?, profile_picture?
///   POST /change-password                     body: {"old_password","new_password"}
///   GET  /agents/active
///   GET  /plans/active
///   GET  /users/:id/subscriptions/active      bearer
///   POST /subscriptions                       bearer, body: {"plan_id","agent_ids"}
///   GET  /users/:id/conversations             bearer
///   POST /messages                            bearer, multipart: content, conversation_id?, link, file?
///
/// Every failure leaves this module as `FridayError::Api { status, message }`
/// (backend answered) or a transport error (it did not).
use crate::error::{FridayError, Result};
use crate::models::{
    Agent, Attachment, Conversation, ConversationId, LoginResponse, Message, Plan, Subscription,
    SubscriptionCreate, UserProfile,
};
use crate::session::Session;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

/// Outgoing chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessage {
    pub content: String,
    /// `None` asks the backend to start a new conversation
    pub conversation_id: Option<ConversationId>,
    /// Routing token of the active agent
    pub link: String,
    pub attachment: Option<Attachment>,
}

/// New account details.
#[derive(Debug, Clone, PartialEq)]
pub struct Signup {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub profile_picture: Option<Attachment>,
}

/// Profile fields to change. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub profile_picture: Option<Attachment>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone_number.is_none()
            && self.profile_picture.is_none()
    }
}

/// Backend operations the workspace depends on.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Create an account. Does not log in.
    async fn signup(&self, signup: &Signup) -> Result<UserProfile>;

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse>;

    async fn update_profile(&self, session: &Session, update: &ProfileUpdate)
        -> Result<UserProfile>;

    async fn change_password(
        &self,
        session: &Session,
        old_password: &str,
        new_password: &str,
    ) -> Result<String>;

    async fn list_active_agents(&self) -> Result<Vec<Agent>>;

    async fn list_active_plans(&self) -> Result<Vec<Plan>>;

    async fn list_active_subscriptions(&self, session: &Session) -> Result<Vec<Subscription>>;

    async fn create_subscription(
        &self,
        session: &Session,
        body: &SubscriptionCreate,
    ) -> Result<Subscription>;

    async fn list_conversations(&self, session: &Session) -> Result<Vec<Conversation>>;

    /// Returns the persisted message when the backend echoes one back.
    async fn send_message(&self, session: &Session, msg: &SendMessage) -> Result<Option<Message>>;
}

/// `BackendApi` over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, session: Option<&Session>) -> Result<T> {
        let url = self.endpoint(path);
        debug!("GET {}", url);
        let mut req = self.client.get(&url);
        if let Some(session) = session {
            req = req.bearer_auth(session.token());
        }
        let resp = check_status(req.send().await?).await?;
        decode(resp).await
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn signup(&self, signup: &Signup) -> Result<UserProfile> {
        let url = self.endpoint("signup");
        debug!("POST {} ({})", url, signup.email);

        let mut form = Form::new()
            .text("email", signup.email.clone())
            .text("password", signup.password.clone())
            .text("first_name", signup.first_name.clone())
            .text("last_name", signup.last_name.clone())
            .text("phone_number", signup.phone_number.clone());
        if let Some(picture) = &signup.profile_picture {
            form = form.part("profile_picture", file_part(picture));
        }

        let resp = self.client.post(&url).multipart(form).send().await?;
        decode(check_status(resp).await?).await
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let url = self.endpoint("login");
        debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;
        decode(check_status(resp).await?).await
    }

    async fn update_profile(
        &self,
        session: &Session,
        update: &ProfileUpdate,
    ) -> Result<UserProfile> {
        let url = self.endpoint("update-profile");
        debug!("PATCH {}", url);

        let mut form = Form::new();
        for (name, value) in [
            ("first_name", &update.first_name),
            ("last_name", &update.last_name),
            ("phone_number", &update.phone_number),
        ] {
            if let Some(value) = value {
                form = form.text(name, value.clone());
            }
        }
        if let Some(picture) = &update.profile_picture {
            form = form.part("profile_picture", file_part(picture));
        }

        let resp = self
            .client
            .patch(&url)
            .bearer_auth(session.token())
            .multipart(form)
            .send()
            .await?;
        decode(check_status(resp).await?).await
    }

    async fn change_password(
        &self,
        session: &Session,
        old_password: &str,
        new_password: &str,
    ) -> Result<String> {
        let url = self.endpoint("change-password");
        debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(session.token())
            .json(&serde_json::json!({
                "old_password": old_password,
                "new_password": new_password,
            }))
            .send()
            .await?;
        let body: serde_json::Value = decode(check_status(resp).await?).await?;
        Ok(body["msg"].as_str().unwrap_or("Password updated").to_string())
    }

    async fn list_active_agents(&self) -> Result<Vec<Agent>> {
        self.get_json("agents/active", None).await
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>> {
        self.get_json("plans/active", None).await
    }

    async fn list_active_subscriptions(&self, session: &Session) -> Result<Vec<Subscription>> {
        let path = format!("users/{}/subscriptions/active", session.user_id());
        self.get_json(&path, Some(session)).await
    }

    async fn create_subscription(
        &self,
        session: &Session,
        body: &SubscriptionCreate,
    ) -> Result<Subscription> {
        let url = self.endpoint("subscriptions");
        debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(session.token())
            .json(body)
            .send()
            .await?;
        decode(check_status(resp).await?).await
    }

    async fn list_conversations(&self, session: &Session) -> Result<Vec<Conversation>> {
        let path = format!("users/{}/conversations", session.user_id());
        self.get_json(&path, Some(session)).await
    }

    async fn send_message(&self, session: &Session, msg: &SendMessage) -> Result<Option<Message>> {
        let url = self.endpoint("messages");
        debug!(
            "POST {} (conversation: {:?}, attachment: {})",
            url,
            msg.conversation_id,
            msg.attachment.is_some()
        );

        let mut form = Form::new()
            .text("content", msg.content.clone())
            .text("link", msg.link.clone());
        if let Some(id) = msg.conversation_id {
            form = form.text("conversation_id", id.to_string());
        }
        if let Some(attachment) = &msg.attachment {
            form = form.part("file", file_part(attachment));
        }

        let resp = self
            .client
            .post(&url)
            .bearer_auth(session.token())
            .multipart(form)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice::<Message>(&bytes).ok())
    }
}

fn file_part(attachment: &Attachment) -> Part {
    Part::bytes(attachment.bytes.clone()).file_name(attachment.file_name.clone())
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.bytes().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    Err(FridayError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Backend error bodies carry `detail` (FastAPI) or `msg`.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    for key in ["detail", "msg"] {
        match value.get(key) {
            Some(serde_json::Value::String(s)) => return Some(s.clone()),
            Some(other) if !other.is_null() => return Some(other.to_string()),
            _ => {}
        }
    }
    None
}
