/// Session context: the authenticated user and bearer token
///
/// The persisted auth record keeps the browser client's shape so the same
/// record can be shared:
///
///   {"user": {"id": 42, "firstName": "...", "lastName": "...",
///             "email": "...", "initials": "..", "token": "..."},
///    "isAuthenticated": true}
///
/// Everything that needs the user id or token goes through `Session`;
/// nothing else parses the record.
use crate::api::{BackendApi, ProfileUpdate, Signup};
use crate::error::{FridayError, Result};
use crate::local_store::LocalStore;
use crate::models::{Attachment, AttachmentKind, LoginResponse, UserId, UserProfile};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthRecord {
    #[serde(default)]
    user: Option<StoredUser>,
    #[serde(default)]
    is_authenticated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUser {
    /// Number or numeric string depending on which client wrote it
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    initials: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

/// Authenticated identity. Read-only for the chat core.
#[derive(Clone, PartialEq)]
pub struct Session {
    user_id: UserId,
    token: String,
    first_name: String,
    last_name: String,
    email: String,
    initials: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Session {
    pub fn new(
        user_id: UserId,
        token: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let first_name = first_name.into();
        let last_name = last_name.into();
        let initials = initials_of(&first_name, &last_name);
        Self {
            user_id,
            token: token.into(),
            first_name,
            last_name,
            email: email.into(),
            initials,
        }
    }

    /// Parse a persisted auth record.
    ///
    /// `Ok(None)` when the record describes no usable session (logged out,
    /// missing user, missing id or token). Malformed JSON is an error.
    pub fn from_auth_record(raw: &str) -> Result<Option<Session>> {
        let record: AuthRecord = serde_json::from_str(raw)?;
        if !record.is_authenticated {
            return Ok(None);
        }
        let Some(user) = record.user else {
            return Ok(None);
        };

        let user_id = match &user.id {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        let Some(user_id) = user_id else {
            return Ok(None);
        };
        let token = match user.token {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Ok(None),
        };

        let first_name = user.first_name.unwrap_or_default();
        let last_name = user.last_name.unwrap_or_default();
        let initials = match user.initials {
            Some(i) if !i.trim().is_empty() => i,
            _ => initials_of(&first_name, &last_name),
        };

        Ok(Some(Session {
            user_id,
            token,
            first_name,
            last_name,
            email: user.email.unwrap_or_default(),
            initials,
        }))
    }

    pub fn from_login(resp: &LoginResponse) -> Session {
        Session::new(
            resp.user.id,
            resp.access_token.clone(),
            resp.user.first_name.clone().unwrap_or_default(),
            resp.user.last_name.clone().unwrap_or_default(),
            resp.user.email.clone(),
        )
    }

    /// Same token, names and email taken from an updated profile.
    pub fn with_profile(&self, profile: &UserProfile) -> Session {
        Session::new(
            self.user_id,
            self.token.clone(),
            profile
                .first_name
                .clone()
                .unwrap_or_else(|| self.first_name.clone()),
            profile
                .last_name
                .clone()
                .unwrap_or_else(|| self.last_name.clone()),
            profile.email.clone(),
        )
    }

    pub fn to_auth_record(&self) -> Result<String> {
        let record = AuthRecord {
            user: Some(StoredUser {
                id: serde_json::Value::from(self.user_id),
                first_name: Some(self.first_name.clone()),
                last_name: Some(self.last_name.clone()),
                email: Some(self.email.clone()),
                initials: Some(self.initials.clone()),
                token: Some(self.token.clone()),
            }),
            is_authenticated: true,
        };
        Ok(serde_json::to_string(&record)?)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }

    pub fn initials(&self) -> &str {
        &self.initials
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

fn initials_of(first_name: &str, last_name: &str) -> String {
    [first_name, last_name]
        .iter()
        .filter_map(|part| part.trim().chars().next())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

fn check_picture(picture: Option<&Attachment>) -> Result<()> {
    match picture {
        Some(p) if p.kind() != AttachmentKind::Image => Err(FridayError::Validation(format!(
            "profile picture must be an image: {}",
            p.file_name
        ))),
        _ => Ok(()),
    }
}

/// Single access path from the local store to the current session.
#[derive(Clone)]
pub struct SessionContext {
    store: LocalStore,
}

impl SessionContext {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Current session, or `None` when nobody is logged in.
    /// A corrupt record is treated as logged out.
    pub fn load(&self) -> Result<Option<Session>> {
        let Some(raw) = self.store.auth_record()? else {
            return Ok(None);
        };
        match Session::from_auth_record(&raw) {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!("Ignoring unreadable auth record: {}", e);
                Ok(None)
            }
        }
    }

    pub fn require(&self) -> Result<Session> {
        self.load()?.ok_or(FridayError::NotAuthenticated)
    }

    pub async fn login(&self, api: &dyn BackendApi, email: &str, password: &str) -> Result<Session> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(FridayError::Validation(
                "email and password are required".to_string(),
            ));
        }
        let resp = api.login(email, password).await?;
        let session = Session::from_login(&resp);
        self.store.put_auth_record(&session.to_auth_record()?)?;
        info!("Logged in as user {}", session.user_id());
        Ok(session)
    }

    /// Register a new account. The caller logs in separately afterwards.
    pub async fn signup(&self, api: &dyn BackendApi, signup: &Signup) -> Result<UserProfile> {
        let required = [
            ("email", &signup.email),
            ("password", &signup.password),
            ("first name", &signup.first_name),
            ("last name", &signup.last_name),
            ("phone number", &signup.phone_number),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(FridayError::Validation(format!("{} is required", field)));
        }
        check_picture(signup.profile_picture.as_ref())?;

        let profile = api.signup(signup).await?;
        info!("Registered user {} ({})", profile.id, profile.email);
        Ok(profile)
    }

    /// Update the logged-in user's profile and re-persist the auth record
    /// with the new names.
    pub async fn update_profile(
        &self,
        api: &dyn BackendApi,
        update: &ProfileUpdate,
    ) -> Result<Session> {
        let session = self.require()?;
        if update.is_empty() {
            return Err(FridayError::Validation("nothing to update".to_string()));
        }
        check_picture(update.profile_picture.as_ref())?;

        let profile = api.update_profile(&session, update).await?;
        let updated = session.with_profile(&profile);
        self.store.put_auth_record(&updated.to_auth_record()?)?;
        info!("Updated profile of user {}", updated.user_id());
        Ok(updated)
    }

    pub fn logout(&self) -> Result<bool> {
        let removed = self.store.clear_auth_record()?;
        if removed {
            info!("Logged out");
        }
        Ok(removed)
    }
}
