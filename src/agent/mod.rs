//! Client for the hosted conversational agent
//!
//! Drives one user turn end to end: record the user message, open the
//! chunked HTTP stream, record the empty assistant placeholder, and
//! feed the reconstructed response into the store as it arrives.

pub mod request;
pub mod stream;

pub use request::{AgentRequest, RoleMessage};
pub use stream::{FrameParser, StreamEnd, StreamOutcome, Utf8StreamDecoder};

use crate::config::AgentConfig;
use crate::error::{classify_status, NimbusError, Result};
use crate::store::{ChatMessage, SessionStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Client for the agent streaming endpoint
///
/// Holds the HTTP client, the configured endpoint parameters, and a
/// handle to the session store it writes into. At most one response
/// stream may be in flight per client: a second concurrent turn fails
/// fast with [`NimbusError::Busy`], and [`is_streaming`] lets the
/// embedding UI disable submission while a turn runs.
///
/// [`is_streaming`]: AgentClient::is_streaming
pub struct AgentClient {
    http: reqwest::Client,
    config: AgentConfig,
    store: SessionStore,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag on every exit path of a turn
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AgentClient {
    /// Create a client over the given store
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nimbus::agent::AgentClient;
    /// use nimbus::config::Config;
    /// use nimbus::store::SessionStore;
    ///
    /// # fn main() -> nimbus::error::Result<()> {
    /// let config = Config::load("config/nimbus.yaml")?;
    /// let store = SessionStore::open_default()?;
    /// let client = AgentClient::new(config.agent, store)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: AgentConfig, store: SessionStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(NimbusError::Http)?;
        Ok(Self {
            http,
            config,
            store,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether a response stream is currently in flight
    pub fn is_streaming(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The store this client writes into
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Run one full user turn
    ///
    /// Appends the user message to the current session (creating one if
    /// needed), opens the stream, appends the empty assistant
    /// placeholder once the endpoint accepts the request, and overwrites
    /// the placeholder with the full accumulated text as chunks arrive.
    ///
    /// # Errors
    ///
    /// Returns a classified error on failure: [`NimbusError::Busy`] when
    /// a stream is already in flight, `Network` for transport failures,
    /// `Server`/`Client` for non-2xx statuses. On mid-stream failure the
    /// partial assistant message stays in the store.
    pub async fn send_message(
        &self,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome> {
        // Acquire the turn before touching the store: a rejected turn
        // must not append a message the in-flight stream would then
        // overwrite.
        let _guard = self.acquire_turn()?;
        self.store
            .add_message_to_current_session(ChatMessage::user(user_message));
        self.run_turn(user_message, cancel).await
    }

    /// Re-run the last user turn without recording a new user message
    ///
    /// This is the retry affordance behind the error banner.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the current session holds no user
    /// message, otherwise the same classified errors as
    /// [`send_message`].
    ///
    /// [`send_message`]: AgentClient::send_message
    pub async fn retry_last(&self, cancel: CancellationToken) -> Result<StreamOutcome> {
        let _guard = self.acquire_turn()?;
        let last_user = self
            .store
            .current_messages()
            .into_iter()
            .rev()
            .find(|message| message.is_user)
            .ok_or_else(|| {
                NimbusError::InvalidInput(vec!["no user message to retry".to_string()])
            })?;
        self.run_turn(&last_user.message, cancel).await
    }

    /// Claim the single in-flight turn slot
    fn acquire_turn(&self) -> Result<InFlightGuard> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(NimbusError::Busy.into());
        }
        Ok(InFlightGuard(Arc::clone(&self.in_flight)))
    }

    /// Open the stream and ingest the response for one turn
    async fn run_turn(
        &self,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome> {
        let thread_id = self.store.current_session_id().unwrap_or_default();
        let body = AgentRequest::new(
            &self.config,
            vec![RoleMessage::user(user_message)],
            thread_id,
        );

        let mut request = self
            .http
            .post(&self.config.endpoint)
            .header("Accept", "*/*")
            .json(&body);
        for (name, value) in &self.config.extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        tracing::debug!(endpoint = %self.config.endpoint, "opening agent stream");
        let response = request
            .send()
            .await
            .map_err(|e| NimbusError::Network(describe_transport_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "agent endpoint rejected request");
            return Err(classify_status(status.as_u16()).into());
        }

        // The placeholder exists only once the endpoint has accepted the
        // turn; stream updates overwrite it in place.
        self.store
            .add_message_to_current_session(ChatMessage::assistant_placeholder());

        stream::ingest_response(response, &self.store, &cancel).await
    }
}

/// Short human-readable description of a transport failure
fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        format!("request failed: {}", error)
    }
}
