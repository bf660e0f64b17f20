//! Gemini `generateContent` wire format and the HTTP transport that speaks it.

use crate::error::{BridgeError, Result};
use crate::history::{ConversationTurn, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part { text: text.into() }],
        }
    }
}

impl From<&ConversationTurn> for Content {
    fn from(turn: &ConversationTurn) -> Self {
        let role = match turn.role {
            Role::User => "user",
            Role::Model => "model",
        };
        Content::text(Some(role), turn.text.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub system_instruction: Content,
    pub contents: Vec<Content>,
}

impl GenerateRequest {
    /// History first, then the current user turn.
    pub fn new(system_instruction: &str, history: &[ConversationTurn], message: &str) -> Self {
        let mut contents: Vec<Content> = history.iter().map(Content::from).collect();
        contents.push(Content::text(Some("user"), message));
        Self {
            system_instruction: Content::text(None, system_instruction),
            contents,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

impl GenerateResponse {
    /// `candidates[0].content.parts[0].text`, if present and not blank.
    pub fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()
            .map(|part| part.text.as_str())
            .filter(|text| !text.trim().is_empty())
    }
}

/// The network seam. Tests substitute their own implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the reply text, or an error for any unusable answer.
    async fn generate(&self, endpoint: &str, key: &str, request: &GenerateRequest)
    -> Result<String>;

    /// Cheap authenticated call used only to check a key.
    async fn probe(&self, endpoint: &str, key: &str) -> Result<()>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// `.../models/gemini-2.0-flash:generateContent` -> `.../models/gemini-2.0-flash`.
pub fn model_resource(endpoint: &str) -> &str {
    endpoint
        .rsplit_once(':')
        .filter(|(_, verb)| !verb.contains('/'))
        .map(|(resource, _)| resource)
        .unwrap_or(endpoint)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn generate(
        &self,
        endpoint: &str,
        key: &str,
        request: &GenerateRequest,
    ) -> Result<String> {
        let response = self
            .client
            .post(endpoint)
            .query(&[("key", key)])
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| BridgeError::Malformed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        parsed
            .first_text()
            .map(str::to_string)
            .ok_or_else(|| BridgeError::EmptyReply {
                endpoint: endpoint.to_string(),
            })
    }

    async fn probe(&self, endpoint: &str, key: &str) -> Result<()> {
        let resource = model_resource(endpoint);
        let status = self
            .client
            .get(resource)
            .query(&[("key", key)])
            .send()
            .await?
            .status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BridgeError::Status {
                endpoint: resource.to_string(),
                status: status.as_u16(),
            })
        }
    }
}
