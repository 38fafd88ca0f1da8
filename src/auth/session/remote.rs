//! 远程会话服务客户端

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{Session, SessionError, SessionResult, SessionStore};

/// JSON client of an external session service. Each store method maps to
/// `POST {base_url}/<Method>`.
pub struct RemoteSessionStore {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct StartRequest<'a> {
    subject_id: &'a str,
    bag: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Serialize)]
struct AccessTokenRequest<'a> {
    access_token: &'a str,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    subject_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Deserialize)]
struct SessionResponse {
    session: Session,
}

#[derive(Deserialize)]
struct DeleteResponse {
    count: u64,
}

#[derive(Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Deserialize)]
struct Empty {}

impl RemoteSessionStore {
    pub fn new(base_url: &str, timeout: Duration) -> SessionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call<B, R>(&self, method: &str, body: &B) -> SessionResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        debug!(method, "Calling session service");

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => SessionError::NotFound,
                StatusCode::BAD_REQUEST => SessionError::InvalidArgument(body),
                _ => SessionError::Internal(format!("{method} returned {status}: {body}")),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| SessionError::Internal(format!("malformed {method} response: {e}")))
    }
}

#[async_trait]
impl SessionStore for RemoteSessionStore {
    async fn start(
        &self,
        subject_id: &str,
        bag: HashMap<String, String>,
        refresh_token: Option<&str>,
    ) -> SessionResult<Session> {
        let request = StartRequest {
            subject_id,
            bag: &bag,
            refresh_token,
        };
        let response: SessionResponse = self.call("Start", &request).await?;
        Ok(response.session)
    }

    async fn get(&self, access_token: &str) -> SessionResult<Session> {
        let response: SessionResponse = self
            .call("Get", &AccessTokenRequest { access_token })
            .await?;
        Ok(response.session)
    }

    async fn delete(
        &self,
        subject_id: Option<&str>,
        refresh_token: Option<&str>,
    ) -> SessionResult<u64> {
        if subject_id.is_none() && refresh_token.is_none() {
            return Err(SessionError::InvalidArgument(
                "subject id or refresh token is required".to_string(),
            ));
        }

        let request = DeleteRequest {
            subject_id,
            refresh_token,
        };
        let response: DeleteResponse = self.call("Delete", &request).await?;
        if response.count == 0 {
            return Err(SessionError::NotFound);
        }
        Ok(response.count)
    }

    async fn exists(&self, access_token: &str) -> SessionResult<bool> {
        let response: ExistsResponse = self
            .call("Exists", &AccessTokenRequest { access_token })
            .await?;
        Ok(response.exists)
    }

    async fn abandon(&self, access_token: &str) -> SessionResult<()> {
        let _: Empty = self
            .call("Abandon", &AccessTokenRequest { access_token })
            .await?;
        Ok(())
    }
}
