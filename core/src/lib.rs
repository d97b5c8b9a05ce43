/// Friday - client core for the Friday chat workspace
///
/// Session handling, the REST catalog and conversation client, the realtime
/// inbox and conversation rooms, and the workspace controller tying them
/// together.

pub mod error;
pub mod config;
pub mod models;
pub mod local_store;
pub mod session;
pub mod api;
pub mod catalog;
pub mod conversation_store;
pub mod transcript;
pub mod realtime;
pub mod workspace;
pub mod cli_app;

pub use error::{FridayError, Result};
pub use config::Config;
pub use session::{Session, SessionContext};
pub use workspace::Workspace;
