//! HTTP client for the session/history service.
//!
//! Every call returns a structured [`ServiceError`] on failure; retrying is
//! left to the caller.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::types::{Message, SessionId};

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedSession {
    pub session_id: SessionId,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_activity: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub workspace_path: Option<String>,
}

/// Most recent messages of a session, oldest first.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostedMessage {
    pub message_sent: Message,
    #[serde(default)]
    pub responses: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentsOverview {
    #[serde(default)]
    pub agents: Value,
    #[serde(default)]
    pub available_agents: Vec<String>,
}

/// Configured LLM backends.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviders {
    #[serde(default)]
    pub providers: Value,
    #[serde(default)]
    pub available: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceStats {
    #[serde(default)]
    pub session_count: u64,
    #[serde(default)]
    pub active_sessions: u64,
    #[serde(default)]
    pub available_agents: u64,
    #[serde(default)]
    pub available_llm_providers: u64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Serialize)]
struct PostMessageBody<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Map<String, Value>>,
}

/// Failure body: `{error, status}` from the service itself, `{detail}` from
/// the framework's HTTP exceptions.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    status: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct SessionService {
    http: reqwest::Client,
    api_base: String,
}

impl SessionService {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_base(config.api_base.clone())
    }

    /// Client rooted at `api_base` (scheme, host and API prefix).
    pub fn with_base(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    pub async fn health(&self) -> Result<HealthStatus, ServiceError> {
        let resp = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        read_json(resp).await
    }

    pub async fn create_session(&self, user_id: Option<&str>) -> Result<CreatedSession, ServiceError> {
        let mut req = self.http.post(self.url("/sessions"));
        if let Some(user_id) = user_id {
            req = req.query(&[("user_id", user_id)]);
        }
        let resp = req.send().await.map_err(ServiceError::from_reqwest)?;
        let created: CreatedSession = read_json(resp).await?;
        debug!(session_id = %created.session_id, "session created");
        Ok(created)
    }

    pub async fn get_session(&self, session_id: &SessionId) -> Result<SessionInfo, ServiceError> {
        let resp = self
            .http
            .get(self.url(&format!("/sessions/{session_id}")))
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        read_json(resp).await
    }

    pub async fn get_history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<HistoryPage, ServiceError> {
        let resp = self
            .http
            .get(self.url(&format!("/sessions/{session_id}/messages")))
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        read_json(resp).await
    }

    /// Post a message over HTTP; the reply carries the agents' responses.
    pub async fn post_message(
        &self,
        session_id: &SessionId,
        content: &str,
        metadata: Option<&Map<String, Value>>,
    ) -> Result<PostedMessage, ServiceError> {
        let resp = self
            .http
            .post(self.url(&format!("/sessions/{session_id}/messages")))
            .json(&PostMessageBody { content, metadata })
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        read_json(resp).await
    }

    pub async fn delete_session(&self, session_id: &SessionId) -> Result<(), ServiceError> {
        let resp = self
            .http
            .delete(self.url(&format!("/sessions/{session_id}")))
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        let _: Value = read_json(resp).await?;
        debug!(%session_id, "session deleted");
        Ok(())
    }

    pub async fn list_agents(&self) -> Result<AgentsOverview, ServiceError> {
        let resp = self
            .http
            .get(self.url("/agents"))
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        read_json(resp).await
    }

    pub async fn llm_providers(&self) -> Result<LlmProviders, ServiceError> {
        let resp = self
            .http
            .get(self.url("/llm/providers"))
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        read_json(resp).await
    }

    pub async fn stats(&self) -> Result<ServiceStats, ServiceError> {
        let resp = self
            .http
            .get(self.url("/stats"))
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;
        read_json(resp).await
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ServiceError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.bytes().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    resp.json::<T>().await.map_err(ServiceError::from_reqwest)
}

fn status_error(status: StatusCode, body: &[u8]) -> ServiceError {
    let parsed = serde_json::from_slice::<ErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| {
            b.error.clone().or_else(|| {
                b.detail.as_ref().map(|d| match d {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            })
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    ServiceError::Status {
        status: parsed
            .and_then(|b| b.status)
            .unwrap_or_else(|| status.as_u16()),
        error: message,
    }
}
