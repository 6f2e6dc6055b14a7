//! Housing Hub HTTP client.

use async_trait::async_trait;
use hub_protocol::{
    Conversation, ErrorBody, LoginRequest, LoginResponse, Message, StartConversationRequest,
    StartConversationResponse,
};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, instrument};

use super::ChatApi;
use super::error::{ApiError, ApiResult};
use crate::session::{SessionContext, SessionCredential};

/// Client for the Housing Hub REST API.
#[derive(Debug, Clone)]
pub struct HubApiClient {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash (e.g. "http://localhost:3001").
    base_url: String,
    /// Source of the bearer credential.
    session: SessionContext,
}

impl HubApiClient {
    /// Create a new client.
    pub fn new(
        base_url: impl Into<String>,
        session: SessionContext,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Exchange email and password for a credential.
    ///
    /// The session context is not modified; the caller decides whether to
    /// persist and install the result.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<SessionCredential> {
        let url = self.url("/api/login");
        let request = self.client.post(&url).json(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        });

        let response: LoginResponse = self.execute(request, &url).await?;
        let (token, identity) = response.into_parts();
        debug!(user_id = %identity.id, role = %identity.role, "login succeeded");
        Ok(SessionCredential::new(token, identity))
    }

    /// List conversations for the signed-in identity.
    #[instrument(skip(self))]
    pub async fn conversations(&self) -> ApiResult<Vec<Conversation>> {
        let url = self.url("/api/conversations");
        let request = self.client.get(&url).bearer_auth(self.bearer()?);
        let conversations: Vec<Conversation> = self.execute(request, &url).await?;
        debug!(count = conversations.len(), "fetched conversations");
        Ok(conversations)
    }

    /// Fetch the message history of one conversation.
    #[instrument(skip(self))]
    pub async fn messages(&self, conversation_id: &str) -> ApiResult<Vec<Message>> {
        let url = self.segment_url(&["api", "conversations", conversation_id, "messages"])?;
        let request = self.client.get(&url).bearer_auth(self.bearer()?);
        let messages: Vec<Message> = self.execute(request, &url).await?;
        debug!(count = messages.len(), "fetched history");
        Ok(messages)
    }

    /// Ask the backend to open a conversation with a listing's landlord.
    #[instrument(skip(self))]
    pub async fn create_conversation(
        &self,
        listing_ref: &str,
        landlord_id: &str,
    ) -> ApiResult<String> {
        let url = self.url("/api/conversations");
        let request = self
            .client
            .post(&url)
            .bearer_auth(self.bearer()?)
            .json(&StartConversationRequest {
                property_id: listing_ref.to_string(),
                landlord_id: landlord_id.to_string(),
            });

        let response: StartConversationResponse = self.execute(request, &url).await?;
        Ok(response.conversation_id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Append path segments to the base URL, percent-encoding each one so
    /// an id can never add segments, a query or a fragment.
    fn segment_url(&self, segments: &[&str]) -> ApiResult<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }

    fn bearer(&self) -> ApiResult<String> {
        self.session.token().ok_or(ApiError::NotAuthenticated)
    }

    /// Send the request and decode a JSON body or the error.
    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> ApiResult<T> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                ApiError::ConnectionFailed {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            } else {
                ApiError::RequestFailed(e)
            }
        })?;

        self.handle_response(response, url).await
    }

    /// Handle response and parse JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        url: &str,
    ) -> ApiResult<T> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ApiError::ParseError(format!("Failed to parse response: {}", e)));
        }

        // Error bodies are `{ message }` but may be empty or HTML from a proxy.
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthorized(message)),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(url.to_string())),
            _ => Err(ApiError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

#[async_trait]
impl ChatApi for HubApiClient {
    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>> {
        self.conversations().await
    }

    async fn list_messages(&self, conversation_id: &str) -> ApiResult<Vec<Message>> {
        self.messages(conversation_id).await
    }

    async fn start_conversation(
        &self,
        listing_ref: &str,
        landlord_id: &str,
    ) -> ApiResult<String> {
        self.create_conversation(listing_ref, landlord_id).await
    }
}
