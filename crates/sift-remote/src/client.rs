//! HTTP client for the provider's unified email API.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use crate::error::RemoteError;
use crate::types::{
    DeltaRequest, OutgoingMessage, SentMessage, Subscription, SubscriptionList,
    SyncStartResponse, SyncUpdatedResponse,
};
use crate::RemoteMailClient;

pub const DEFAULT_BASE_URL: &str = "https://api.aurinko.io/v1";
pub const DEFAULT_BODY_TYPE: &str = "html";

/// Bearer-authenticated client for one account. Holds no state besides the token.
#[derive(Clone)]
pub struct AurinkoClient {
    http: Client,
    base_url: String,
    token: String,
    body_type: String,
}

impl fmt::Debug for AurinkoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AurinkoClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("body_type", &self.body_type)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewSubscription<'a> {
    resource: &'a str,
    notification_url: &'a str,
}

impl AurinkoClient {
    /// Build a client with its own connection pool.
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(5))
            .build()?;
        Self::with_http(http, base_url, token)
    }

    /// Build a client that shares an existing `reqwest::Client`.
    pub fn with_http(http: Client, base_url: &str, token: impl Into<String>) -> Result<Self, RemoteError> {
        let parsed = Url::parse(base_url)?;
        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            token: token.into(),
            body_type: DEFAULT_BODY_TYPE.to_string(),
        })
    }

    pub fn with_body_type(mut self, body_type: impl Into<String>) -> Self {
        self.body_type = body_type.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn start_sync_request(&self, days_within: u32) -> RequestBuilder {
        self.http
            .post(self.url("email/sync"))
            .bearer_auth(&self.token)
            .query(&[
                ("daysWithin", days_within.to_string()),
                ("bodyType", self.body_type.clone()),
            ])
            .json(&serde_json::json!({}))
    }

    fn updated_request(&self, request: &DeltaRequest) -> RequestBuilder {
        let (key, value) = request.query_pair();
        self.http
            .get(self.url("email/sync/updated"))
            .bearer_auth(&self.token)
            .query(&[(key, value)])
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status, body))
    }

    /// Send a message through the provider.
    #[instrument(skip_all)]
    pub async fn send_email(&self, message: &OutgoingMessage) -> Result<SentMessage, RemoteError> {
        let response = self
            .http
            .post(self.url("email/messages"))
            .bearer_auth(&self.token)
            .query(&[("returnIds", "true")])
            .json(message)
            .send()
            .await?;
        let sent = Self::check(response).await?.json::<SentMessage>().await?;
        debug!("message sent: {:?}", sent.id);
        Ok(sent)
    }

    pub async fn list_subscriptions(&self) -> Result<SubscriptionList, RemoteError> {
        let response = self
            .http
            .get(self.url("subscriptions"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn create_subscription(
        &self,
        resource: &str,
        notification_url: &str,
    ) -> Result<Subscription, RemoteError> {
        let response = self
            .http
            .post(self.url("subscriptions"))
            .bearer_auth(&self.token)
            .json(&NewSubscription {
                resource,
                notification_url,
            })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn delete_subscription(&self, subscription_id: &str) -> Result<(), RemoteError> {
        let response = self
            .http
            .delete(self.url(&format!("subscriptions/{}", subscription_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteMailClient for AurinkoClient {
    #[instrument(skip(self))]
    async fn start_sync(&self, days_within: u32) -> Result<SyncStartResponse, RemoteError> {
        let response = self.start_sync_request(days_within).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip_all)]
    async fn get_updated_emails(
        &self,
        request: &DeltaRequest,
    ) -> Result<SyncUpdatedResponse, RemoteError> {
        let response = self.updated_request(request).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AurinkoClient {
        AurinkoClient::with_http(Client::new(), "https://api.example.com/v1/", "secret-token").unwrap()
    }

    #[test]
    fn test_base_url_is_normalized() {
        assert_eq!(client().base_url(), "https://api.example.com/v1");
        assert!(AurinkoClient::with_http(Client::new(), "not a url", "t").is_err());
    }

    #[test]
    fn test_start_sync_request() {
        let request = client().start_sync_request(3).build().unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1/email/sync");
        assert_eq!(request.url().query(), Some("daysWithin=3&bodyType=html"));
        let auth = request.headers().get(reqwest::header::AUTHORIZATION).unwrap();
        assert_eq!(auth.to_str().unwrap(), "Bearer secret-token");
    }

    #[test]
    fn test_updated_request_carries_exactly_one_token() {
        let c = client();
        let delta = c
            .updated_request(&DeltaRequest::Delta("T1".to_string()))
            .build()
            .unwrap();
        assert_eq!(delta.url().path(), "/v1/email/sync/updated");
        assert_eq!(delta.url().query(), Some("deltaToken=T1"));

        let page = c
            .updated_request(&DeltaRequest::Page("p 2".to_string()))
            .build()
            .unwrap();
        assert_eq!(page.url().query(), Some("pageToken=p+2"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", client());
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("redacted"));
    }
}
