/// Persistent client state in sled DB: the auth record and the language preference
use crate::error::{FridayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const AUTH_KEY: &str = "auth";
const LANGUAGE_KEY: &str = "language";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::En => write!(f, "en"),
            Language::Fr => write!(f, "fr"),
        }
    }
}

impl FromStr for Language {
    type Err = FridayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "en" => Ok(Language::En),
            "fr" => Ok(Language::Fr),
            other => Err(FridayError::Validation(format!(
                "unsupported language: {} (expected en or fr)",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct LocalStore {
    db: sled::Db,
}

impl LocalStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("client.db"))
            .map_err(|e| FridayError::Storage(format!("client DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Raw persisted auth record, if any.
    pub fn auth_record(&self) -> Result<Option<String>> {
        match self
            .db
            .get(AUTH_KEY.as_bytes())
            .map_err(|e| FridayError::Storage(format!("auth_record: {}", e)))?
        {
            Some(val) => Ok(Some(String::from_utf8_lossy(&val).into_owned())),
            None => Ok(None),
        }
    }

    pub fn put_auth_record(&self, record: &str) -> Result<()> {
        self.db
            .insert(AUTH_KEY.as_bytes(), record.as_bytes())
            .map_err(|e| FridayError::Storage(format!("put_auth_record: {}", e)))?;
        self.db.flush()?;
        debug!("Persisted auth record");
        Ok(())
    }

    pub fn clear_auth_record(&self) -> Result<bool> {
        let removed = self
            .db
            .remove(AUTH_KEY.as_bytes())
            .map_err(|e| FridayError::Storage(format!("clear_auth_record: {}", e)))?;
        self.db.flush()?;
        Ok(removed.is_some())
    }

    /// Stored language, falling back to English on missing or unknown values.
    pub fn language(&self) -> Result<Language> {
        let stored = self
            .db
            .get(LANGUAGE_KEY.as_bytes())
            .map_err(|e| FridayError::Storage(format!("language: {}", e)))?;
        Ok(stored
            .and_then(|val| String::from_utf8(val.to_vec()).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default())
    }

    pub fn set_language(&self, language: Language) -> Result<()> {
        self.db
            .insert(LANGUAGE_KEY.as_bytes(), language.to_string().as_bytes())
            .map_err(|e| FridayError::Storage(format!("set_language: {}", e)))?;
        self.db.flush()?;
        Ok(())
    }
}
