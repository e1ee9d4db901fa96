//! HTTP transports against the agent server's REST API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use super::{PushChannel, SessionMessage, SessionTransport};
use crate::error::{Error, Result};

/// Server id used for central channels when none is configured.
pub const DEFAULT_SERVER_ID: &str = "00000000-0000-0000-0000-000000000000";

pub struct HttpSessionTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest<'a> {
    agent_id: &'a str,
    user_id: &'a str,
    metadata: SessionMetadata,
}

#[derive(Serialize)]
struct SessionMetadata {
    platform: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: Option<String>,
}

#[derive(Serialize)]
struct PostMessageRequest<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<SessionMessage>,
}

impl HttpSessionTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.is_empty());
        self
    }

    fn sessions_url(&self) -> String {
        format!("{}/api/messaging/sessions", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl SessionTransport for HttpSessionTransport {
    async fn create_session(&self, agent_id: &str, caller_id: &str) -> Result<String> {
        let request = CreateSessionRequest {
            agent_id,
            user_id: caller_id,
            metadata: SessionMetadata { platform: "web" },
        };

        let response = self
            .authorize(self.client.post(self.sessions_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Initialization(format!("session request failed: {}", e)))?;
        let response = check_status(response)
            .await
            .map_err(|e| Error::Initialization(e.to_string()))?;

        let body: CreateSessionResponse = response.json().await?;
        body.session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::Initialization(format!("Failed to create session for agent {}", agent_id))
            })
    }

    async fn post_message(&self, session_id: &str, text: &str) -> Result<()> {
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/{}/messages", self.sessions_url(), session_id)),
            )
            .json(&PostMessageRequest { content: text })
            .send()
            .await
            .map_err(|e| Error::SendFailure(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/{}/messages", self.sessions_url(), session_id)),
            )
            .send()
            .await?;
        let body: MessagesResponse = check_status(response).await?.json().await?;
        Ok(body.messages)
    }
}

/// Push channel that posts into an agent's central messaging channel.
pub struct HttpPushChannel {
    client: Client,
    base_url: String,
    channel_id: String,
    server_id: String,
    author_id: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChannelMessageRequest<'a> {
    #[serde(rename = "channelId")]
    channel_id: &'a str,
    server_id: &'a str,
    author_id: &'a str,
    content: &'a str,
}

impl HttpPushChannel {
    pub fn new(
        base_url: impl Into<String>,
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            channel_id: channel_id.into(),
            server_id: DEFAULT_SERVER_ID.to_string(),
            author_id: author_id.into(),
            api_key: None,
        }
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.is_empty());
        self
    }
}

#[async_trait]
impl PushChannel for HttpPushChannel {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!(
            "{}/api/messaging/central-channels/{}/messages",
            self.base_url, self.channel_id
        );
        let mut request = self.client.post(url).json(&ChannelMessageRequest {
            channel_id: &self.channel_id,
            server_id: &self.server_id,
            author_id: &self.author_id,
            content: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::SendFailure(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }
}

/// Turn a non-success status into `SendFailure` carrying the body.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::SendFailure(format!("{} {}", status.as_u16(), body)))
}
