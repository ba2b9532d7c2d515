//! REST client for the hosted account store (PostgREST over HTTP).
//!
//! Every call sends the service key twice, as `apikey` and as a bearer
//! token. Any status other than the one an operation expects is turned into
//! [`StoreError::Status`] carrying the response body.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::usage::UsageEvent;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to {operation}, status code: {status}, response: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("user not found")]
    NotFound,
    #[error("no user ID returned")]
    EmptyResponse,
}

// Account row, server-assigned columns are skipped on insert
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "UserId", default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "ExternalUserId", default)]
    pub external_user_id: String,
    #[serde(rename = "created_at", default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_user(&self, external_user_id: &str) -> Result<User, StoreError>;
    /// Insert a user and return its new id.
    async fn add_user(&self, user: &User) -> Result<String, StoreError>;
    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError>;
    async fn add_usage_event(&self, event: &UsageEvent) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
    pub account_table: String,
    pub usage_table: String,
}

pub struct SupabaseClient {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseClient {
    pub fn new(client: reqwest::Client, config: SupabaseConfig) -> Self {
        Self { client, config }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.key)
            .bearer_auth(&self.config.key)
    }
}

async fn expect_status(
    response: Response,
    expected: StatusCode,
    operation: &'static str,
) -> Result<Response, StoreError> {
    if response.status() == expected {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        operation,
        status,
        body,
    })
}

#[async_trait]
impl AccountStore for SupabaseClient {
    async fn get_user(&self, external_user_id: &str) -> Result<User, StoreError> {
        let response = self
            .authorized(self.client.get(self.table_url(&self.config.account_table)))
            .query(&[("ExternalUserId", format!("eq.{external_user_id}"))])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        let response = expect_status(response, StatusCode::OK, "get user").await?;

        let users: Vec<User> = response.json().await?;
        users.into_iter().next().ok_or(StoreError::NotFound)
    }

    async fn add_user(&self, user: &User) -> Result<String, StoreError> {
        let response = self
            .authorized(self.client.post(self.table_url(&self.config.account_table)))
            .header("Prefer", "return=representation")
            .json(user)
            .send()
            .await?;
        let response = expect_status(response, StatusCode::CREATED, "add user").await?;

        let created: Vec<User> = response.json().await?;
        created
            .into_iter()
            .next()
            .map(|u| u.user_id)
            .filter(|id| !id.is_empty())
            .ok_or(StoreError::EmptyResponse)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.delete(self.table_url(&self.config.account_table)))
            .query(&[("UserId", format!("eq.{user_id}"))])
            .send()
            .await?;
        expect_status(response, StatusCode::NO_CONTENT, "delete user").await?;
        Ok(())
    }

    async fn add_usage_event(&self, event: &UsageEvent) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.post(self.table_url(&self.config.usage_table)))
            .json(event)
            .send()
            .await?;
        expect_status(response, StatusCode::CREATED, "add usage event").await?;
        Ok(())
    }
}
