//! Nimbus - chat client core for a hosted weather agent
//!
//! This library provides the state and transport core of a chat client:
//! a reactive multi-session store with local persistence and an
//! ingestion pipeline for the agent's chunked streaming response
//! protocol. Rendering, input handling, and notifications are the
//! embedding UI's concern; they drive this crate exclusively through
//! the types re-exported below.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `store`: session store, data model, and persistence backends
//! - `agent`: HTTP client, wire types, and streaming ingestion parser
//! - `title`: session title derivation from the first user message
//! - `codec`: obfuscation codec for the legacy persisted scheme
//! - `sanitize`: user input validation and sanitization
//! - `limiter`: rolling-window rate limiting for submissions
//! - `config`: configuration management and validation
//! - `error`: error types, classification, and result aliases
//!
//! # Example
//!
//! ```no_run
//! use nimbus::{AgentClient, Config, SessionStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/nimbus.yaml")?;
//!     config.validate()?;
//!
//!     let store = SessionStore::open_default()?;
//!     let client = AgentClient::new(config.agent, store.clone())?;
//!
//!     let outcome = client
//!         .send_message("What's the weather in Oslo?", CancellationToken::new())
//!         .await?;
//!     println!("{}", outcome.content);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod codec;
pub mod config;
pub mod error;
pub mod limiter;
pub mod sanitize;
pub mod store;
pub mod title;

// Re-export commonly used types
pub use agent::{AgentClient, FrameParser, RoleMessage, StreamEnd, StreamOutcome};
pub use config::Config;
pub use error::{ErrorKind, NimbusError, Result, UserFacingError};
pub use limiter::RateLimiter;
pub use store::{ChatMessage, SessionEntry, SessionMetadata, SessionStore};
pub use title::derive_title;
