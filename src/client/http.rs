//! HTTP glue between the client cache and the platform API: durable writes
//! and canonical fetches go through here, with the correlation token on the
//! wire both ways.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::cache::{MutationDraft, Reconcile, RemoteError, RemoteWriter, SnapshotFetcher};
use crate::routes::message::{CreateMessageRequest, GetMessagesRequest, MessageRecord};
use crate::routes::poll::{GetPollRequest, Poll, PollOption, VoteRequest};
use crate::utils::{ApiResponse, error_codes};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post_json<Req, Resp>(&self, path: &str, req: &Req) -> Result<Resp, RemoteError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(req)
            .send()
            .await
            .map_err(|e| RemoteError(e.to_string()))?;

        let status = response.status();
        let envelope: ApiResponse<Resp> = response
            .json()
            .await
            .map_err(|e| RemoteError(format!("{}: {}", status, e)))?;

        if !status.is_success() || envelope.code != error_codes::SUCCESS {
            return Err(RemoteError(format!("{}: {}", status, envelope.msg)));
        }
        envelope
            .resp_data
            .ok_or_else(|| RemoteError("response carried no data".into()))
    }
}

/// One thread's view of the API: writes messages into the thread and fetches
/// its canonical page.
#[derive(Clone)]
pub struct ThreadApi {
    client: ApiClient,
    thread_id: String,
}

impl ThreadApi {
    pub fn new(client: ApiClient, thread_id: impl Into<String>) -> Self {
        Self {
            client,
            thread_id: thread_id.into(),
        }
    }
}

/// A message the user just submitted, before the server has seen it.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: String,
    pub author: String,
    pub content: String,
}

impl MutationDraft<MessageRecord> for NewMessage {
    fn provisional(&self, token: Uuid) -> MessageRecord {
        MessageRecord {
            id: format!("optimistic-{}", token),
            thread_id: self.thread_id.clone(),
            author: self.author.clone(),
            content: self.content.clone(),
            created_at: chrono::Utc::now(),
            correlation_id: Some(token),
            is_optimistic: true,
        }
    }
}

impl Reconcile for MessageRecord {
    fn correlation_token(&self) -> Option<Uuid> {
        self.correlation_id
    }
    fn is_provisional(&self) -> bool {
        self.is_optimistic
    }
}

impl RemoteWriter<NewMessage, MessageRecord> for ThreadApi {
    async fn write(&self, draft: &NewMessage, token: Uuid) -> Result<MessageRecord, RemoteError> {
        self.client
            .post_json(
                "/messages/create",
                &CreateMessageRequest {
                    thread_id: draft.thread_id.clone(),
                    author: draft.author.clone(),
                    content: draft.content.clone(),
                    correlation_id: Some(token),
                },
            )
            .await
    }
}

impl SnapshotFetcher<MessageRecord> for ThreadApi {
    async fn fetch(&self) -> Result<Vec<MessageRecord>, RemoteError> {
        self.client
            .post_json(
                "/messages/get",
                &GetMessagesRequest {
                    thread_id: self.thread_id.clone(),
                    limit: None,
                },
            )
            .await
    }
}

/// One poll's view of the API. Poll results are read-mostly on the client:
/// votes go through `vote`, the option list updates via push-driven refetch.
#[derive(Clone)]
pub struct PollApi {
    client: ApiClient,
    poll_id: String,
}

impl PollApi {
    pub fn new(client: ApiClient, poll_id: impl Into<String>) -> Self {
        Self {
            client,
            poll_id: poll_id.into(),
        }
    }

    pub async fn vote(&self, option_id: &str) -> Result<(), RemoteError> {
        let _: serde_json::Value = self
            .client
            .post_json(
                "/polls/vote",
                &VoteRequest {
                    poll_id: self.poll_id.clone(),
                    option_id: option_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn fetch_poll(&self) -> Result<Poll, RemoteError> {
        self.client
            .post_json(
                "/polls/get",
                &GetPollRequest {
                    poll_id: self.poll_id.clone(),
                },
            )
            .await
    }
}

impl Reconcile for PollOption {
    fn correlation_token(&self) -> Option<Uuid> {
        None
    }
    fn is_provisional(&self) -> bool {
        false
    }
}

impl SnapshotFetcher<PollOption> for PollApi {
    async fn fetch(&self) -> Result<Vec<PollOption>, RemoteError> {
        Ok(self.fetch_poll().await?.options)
    }
}
