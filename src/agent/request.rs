//! Wire types for the hosted agent endpoint
//!
//! The endpoint takes a JSON POST body with camelCase fields and
//! answers with the numeric-prefixed line protocol handled by
//! [`crate::agent::stream`].

use crate::config::AgentConfig;
use serde::{Deserialize, Serialize};

/// A role/content message in the request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleMessage {
    /// Message author: "user" or "assistant"
    pub role: String,
    /// Message text
    pub content: String,
}

impl RoleMessage {
    /// Creates a user message
    ///
    /// # Examples
    ///
    /// ```
    /// use nimbus::agent::RoleMessage;
    ///
    /// let msg = RoleMessage::user("Hello!");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Creates an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request body for one streamed agent turn
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Conversation turns to run the agent over
    pub messages: Vec<RoleMessage>,
    /// Run identifier
    pub run_id: String,
    /// Server-side retry budget
    pub max_retries: u32,
    /// Maximum agent steps
    pub max_steps: u32,
    /// Sampling temperature
    pub temperature: f64,
    /// Nucleus sampling parameter
    pub top_p: f64,
    /// Opaque runtime context object
    pub runtime_context: serde_json::Value,
    /// Conversation thread identifier (the session id)
    pub thread_id: String,
    /// Resource identifier
    pub resource_id: String,
}

impl AgentRequest {
    /// Build a request from the configured agent parameters
    pub fn new(
        config: &AgentConfig,
        messages: Vec<RoleMessage>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            messages,
            run_id: config.run_id.clone(),
            max_retries: config.max_retries,
            max_steps: config.max_steps,
            temperature: config.temperature,
            top_p: config.top_p,
            runtime_context: serde_json::json!({}),
            thread_id: thread_id.into(),
            resource_id: config.resource_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_message_constructors() {
        let user = RoleMessage::user("question");
        assert_eq!(user.role, "user");
        assert_eq!(user.content, "question");

        let assistant = RoleMessage::assistant("answer");
        assert_eq!(assistant.role, "assistant");
    }

    #[test]
    fn test_request_uses_config_parameters() {
        let config = AgentConfig::default();
        let request = AgentRequest::new(&config, vec![RoleMessage::user("hi")], "session-1");

        assert_eq!(request.run_id, "weatherAgent");
        assert_eq!(request.resource_id, "weatherAgent");
        assert_eq!(request.max_retries, 2);
        assert_eq!(request.max_steps, 5);
        assert_eq!(request.thread_id, "session-1");
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let config = AgentConfig::default();
        let request = AgentRequest::new(&config, vec![RoleMessage::user("hi")], "t1");
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains("\"runId\":\"weatherAgent\""));
        assert!(json.contains("\"maxRetries\":2"));
        assert!(json.contains("\"maxSteps\":5"));
        assert!(json.contains("\"topP\":1.0"));
        assert!(json.contains("\"runtimeContext\":{}"));
        assert!(json.contains("\"threadId\":\"t1\""));
        assert!(json.contains("\"resourceId\":\"weatherAgent\""));
        assert!(json.contains("\"role\":\"user\""));
    }
}
