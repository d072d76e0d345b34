//! REST collaborator: the backend endpoints under `/api/v1`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Contact, Message, Task, TaskId, User, UserId, Workspace, WorkspaceId},
    error::ApiError,
    protocol::{
        LoginRequest, LoginResponse, NewWorkspace, OutgoingMessage, RegisterRequest, TaskDraft,
        TaskUpdate,
    },
};
use tracing::{debug, warn};

use crate::{
    config::ClientSettings,
    error::{ClientError, ClientResult},
};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse>;
    async fn register(&self, request: &RegisterRequest) -> ClientResult<()>;
    async fn fetch_contacts(&self, token: &str) -> ClientResult<Vec<Contact>>;
    async fn fetch_conversation(&self, token: &str, peer_id: &UserId)
        -> ClientResult<Vec<Message>>;
    async fn post_message(&self, token: &str, message: &OutgoingMessage) -> ClientResult<Message>;
    async fn search_users(&self, token: &str, query: &str) -> ClientResult<Vec<User>>;
    async fn fetch_user(&self, token: &str, user_id: &UserId) -> ClientResult<User>;
    async fn list_users(&self, token: &str) -> ClientResult<Vec<User>>;
    async fn fetch_workspaces(&self, token: &str) -> ClientResult<Vec<Workspace>>;
    async fn create_workspace(&self, token: &str, workspace: &NewWorkspace)
        -> ClientResult<Workspace>;
    async fn fetch_tasks(&self, token: &str, workspace_id: &WorkspaceId)
        -> ClientResult<Vec<Task>>;
    async fn create_task(&self, token: &str, draft: &TaskDraft) -> ClientResult<Task>;
    async fn update_task(
        &self,
        token: &str,
        task_id: &TaskId,
        update: &TaskUpdate,
    ) -> ClientResult<Task>;
}

pub struct HttpBackend {
    http: Client,
    api_root: String,
}

impl HttpBackend {
    pub fn new(api_root: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_root)
    }

    pub fn with_client(http: Client, api_root: impl Into<String>) -> Self {
        Self {
            http,
            api_root: api_root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|source| ClientError::Request {
                endpoint: settings.api_root(),
                source,
            })?;
        Ok(Self::with_client(http, settings.api_root()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_root)
    }

    async fn dispatch(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> ClientResult<reqwest::Response> {
        debug!(endpoint, "backend request");
        let response = request.send().await.map_err(|source| ClientError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|err| format!("{:?}: {}", err.code_for_status(status.as_u16()), err.message))
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("error").to_string());
        warn!(endpoint, status = status.as_u16(), %message, "backend request failed");
        Err(ClientError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> ClientResult<T> {
        self.dispatch(endpoint, request)
            .await?
            .json()
            .await
            .map_err(|source| ClientError::Request {
                endpoint: endpoint.to_string(),
                source,
            })
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse> {
        let endpoint = "/auth/login";
        self.fetch_json(endpoint, self.http.post(self.url(endpoint)).json(request))
            .await
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<()> {
        let endpoint = "/auth/register";
        self.dispatch(endpoint, self.http.post(self.url(endpoint)).json(request))
            .await?;
        Ok(())
    }

    async fn fetch_contacts(&self, token: &str) -> ClientResult<Vec<Contact>> {
        let endpoint = "/contacts";
        self.fetch_json(endpoint, self.http.get(self.url(endpoint)).bearer_auth(token))
            .await
    }

    async fn fetch_conversation(
        &self,
        token: &str,
        peer_id: &UserId,
    ) -> ClientResult<Vec<Message>> {
        let endpoint = format!("/messages/conversation/{peer_id}");
        self.fetch_json(
            &endpoint,
            self.http.get(self.url(&endpoint)).bearer_auth(token),
        )
        .await
    }

    async fn post_message(&self, token: &str, message: &OutgoingMessage) -> ClientResult<Message> {
        let endpoint = "/messages";
        self.fetch_json(
            endpoint,
            self.http
                .post(self.url(endpoint))
                .bearer_auth(token)
                .json(message),
        )
        .await
    }

    async fn search_users(&self, token: &str, query: &str) -> ClientResult<Vec<User>> {
        let endpoint = "/users/search";
        self.fetch_json(
            endpoint,
            self.http
                .get(self.url(endpoint))
                .bearer_auth(token)
                .query(&[("query", query)]),
        )
        .await
    }

    async fn fetch_user(&self, token: &str, user_id: &UserId) -> ClientResult<User> {
        let endpoint = format!("/users/{user_id}");
        self.fetch_json(
            &endpoint,
            self.http.get(self.url(&endpoint)).bearer_auth(token),
        )
        .await
    }

    async fn list_users(&self, token: &str) -> ClientResult<Vec<User>> {
        let endpoint = "/users";
        self.fetch_json(endpoint, self.http.get(self.url(endpoint)).bearer_auth(token))
            .await
    }

    async fn fetch_workspaces(&self, token: &str) -> ClientResult<Vec<Workspace>> {
        let endpoint = "/workspaces";
        self.fetch_json(endpoint, self.http.get(self.url(endpoint)).bearer_auth(token))
            .await
    }

    async fn create_workspace(
        &self,
        token: &str,
        workspace: &NewWorkspace,
    ) -> ClientResult<Workspace> {
        let endpoint = "/workspaces";
        self.fetch_json(
            endpoint,
            self.http
                .post(self.url(endpoint))
                .bearer_auth(token)
                .json(workspace),
        )
        .await
    }

    async fn fetch_tasks(
        &self,
        token: &str,
        workspace_id: &WorkspaceId,
    ) -> ClientResult<Vec<Task>> {
        let endpoint = "/tasks";
        self.fetch_json(
            endpoint,
            self.http
                .get(self.url(endpoint))
                .bearer_auth(token)
                .query(&[("workspace", workspace_id.as_str())]),
        )
        .await
    }

    async fn create_task(&self, token: &str, draft: &TaskDraft) -> ClientResult<Task> {
        let endpoint = "/tasks";
        self.fetch_json(
            endpoint,
            self.http
                .post(self.url(endpoint))
                .bearer_auth(token)
                .json(draft),
        )
        .await
    }

    async fn update_task(
        &self,
        token: &str,
        task_id: &TaskId,
        update: &TaskUpdate,
    ) -> ClientResult<Task> {
        let endpoint = format!("/tasks/{task_id}");
        self.fetch_json(
            &endpoint,
            self.http
                .put(self.url(&endpoint))
                .bearer_auth(token)
                .json(update),
        )
        .await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
