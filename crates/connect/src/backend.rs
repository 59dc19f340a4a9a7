//! HTTP client for the backend functions the broker talks to.
//!
//! The backend owns tokens and talks to the providers; the broker only asks
//! it for authorization URLs, status, token submission and revocation.

use {
    bridgeway_config::BackendConfig,
    reqwest::{Method, RequestBuilder, Response},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::debug,
};

use crate::{
    Error, Result,
    registry::{AuthorityScope, ProviderId},
};

/// Shared revocation endpoint for every provider.
pub const REVOKE_ENDPOINT: &str = "/integrations-revoke";

/// Body of a "start" request.
#[derive(Debug, Serialize)]
pub struct StartRequest<'a> {
    pub provider: ProviderId,
    pub scope: AuthorityScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<&'a str>,
    /// Where the provider should send the browser after consent.
    pub redirect_to: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    authorize_url: String,
}

/// How a status request proves which connection it asks about.
#[derive(Debug, Clone, Copy)]
pub enum StatusAuth<'a> {
    /// User scope: the session bearer identifies the connection.
    Bearer(&'a Secret<String>),
    /// Organization scope: the organization id goes in the body and the
    /// backend checks membership itself.
    Organization(&'a str),
}

#[derive(Debug, Serialize)]
pub struct RevokeRequest<'a> {
    pub provider: ProviderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<&'a str>,
    pub user_scoped: bool,
}

#[derive(Serialize)]
pub struct TokenRequest<'a> {
    pub token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<&'a str>,
}

pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<Secret<String>>,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, self.endpoint(path))
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("apikey", key.expose_secret());
        }
        req
    }

    /// Ask the backend for a one-time authorization URL. The URL is opaque.
    pub async fn start_authorization(
        &self,
        path: &str,
        bearer: &Secret<String>,
        body: &StartRequest<'_>,
    ) -> Result<String> {
        debug!(provider = %body.provider, scope = %body.scope, path, "requesting authorization url");
        let resp = self
            .request(Method::POST, path)
            .bearer_auth(bearer.expose_secret())
            .json(body)
            .send()
            .await?;
        let value = read_json(resp, path).await?;
        let start: StartResponse = serde_json::from_value(value).map_err(|e| Error::Backend {
            endpoint: path.to_string(),
            message: format!("malformed response: {e}"),
        })?;
        Ok(start.authorize_url)
    }

    /// Raw status reply. Shape varies per provider.
    pub async fn fetch_status(&self, path: &str, auth: StatusAuth<'_>) -> Result<Value> {
        let req = match auth {
            StatusAuth::Bearer(token) => self
                .request(Method::GET, path)
                .bearer_auth(token.expose_secret()),
            StatusAuth::Organization(organization_id) => self
                .request(Method::POST, path)
                .json(&serde_json::json!({ "organization_id": organization_id })),
        };
        let resp = req.send().await?;
        read_json(resp, path).await
    }

    pub async fn revoke(&self, bearer: &Secret<String>, body: &RevokeRequest<'_>) -> Result<()> {
        let resp = self
            .request(Method::POST, REVOKE_ENDPOINT)
            .bearer_auth(bearer.expose_secret())
            .json(body)
            .send()
            .await?;
        read_json(resp, REVOKE_ENDPOINT).await.map(|_| ())
    }

    pub async fn submit_token(
        &self,
        path: &str,
        bearer: &Secret<String>,
        body: &TokenRequest<'_>,
    ) -> Result<()> {
        let resp = self
            .request(Method::POST, path)
            .bearer_auth(bearer.expose_secret())
            .json(body)
            .send()
            .await?;
        read_json(resp, path).await.map(|_| ())
    }
}

/// Read a JSON reply, turning non-2xx statuses and unparsable bodies into
/// [`Error::Backend`]. An empty 2xx body reads as `null`.
async fn read_json(resp: Response, path: &str) -> Result<Value> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(Error::Backend {
            endpoint: path.to_string(),
            message: failure_message(status, &text),
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| Error::Backend {
        endpoint: path.to_string(),
        message: format!("malformed response: {e}"),
    })
}

/// Pull a human-readable message out of an error reply.
fn failure_message(status: reqwest::StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["error", "message"]
            .iter()
            .find_map(|k| v.get(*k).and_then(Value::as_str).map(ToString::to_string))
    });
    match from_json {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => format!("HTTP {status}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher};

    fn client(url: String) -> BackendClient {
        BackendClient::new(&BackendConfig {
            base_url: format!("{url}/"),
            api_key: Some(Secret::new("anon-key".into())),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn start_sends_bearer_apikey_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat-oauth-start")
            .match_header("authorization", "Bearer session-1")
            .match_header("apikey", "anon-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "provider": "chat",
                "scope": "user",
                "redirect_to": "http://localhost:3000/integrations/callback"
            })))
            .with_status(200)
            .with_body(r#"{"authorize_url":"https://chat.example.com/oauth?x=1"}"#)
            .create_async()
            .await;

        let url = client(server.url())
            .start_authorization(
                "/chat-oauth-start",
                &Secret::new("session-1".into()),
                &StartRequest {
                    provider: ProviderId::Chat,
                    scope: AuthorityScope::User,
                    organization_id: None,
                    project_id: None,
                    redirect_to: "http://localhost:3000/integrations/callback",
                },
            )
            .await
            .unwrap();

        assert_eq!(url, "https://chat.example.com/oauth?x=1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn start_failure_carries_backend_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/crm-oauth-start")
            .with_status(500)
            .with_body(r#"{"error":"client secret not configured"}"#)
            .create_async()
            .await;

        let err = client(server.url())
            .start_authorization(
                "/crm-oauth-start",
                &Secret::new("s".into()),
                &StartRequest {
                    provider: ProviderId::Crm,
                    scope: AuthorityScope::Organization,
                    organization_id: Some("org_1"),
                    project_id: None,
                    redirect_to: "http://localhost:3000/cb",
                },
            )
            .await
            .unwrap_err();

        assert!(
            matches!(err, Error::Backend { ref message, .. } if message == "client secret not configured")
        );
    }

    #[tokio::test]
    async fn organization_status_posts_org_without_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/crm-connection-status")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(serde_json::json!({ "organization_id": "org_1" })))
            .with_status(200)
            .with_body(r#"{"connected":true}"#)
            .create_async()
            .await;

        let body = client(server.url())
            .fetch_status("/crm-connection-status", StatusAuth::Organization("org_1"))
            .await
            .unwrap();

        assert_eq!(body, serde_json::json!({ "connected": true }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_success_body_is_null() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", REVOKE_ENDPOINT)
            .with_status(204)
            .create_async()
            .await;

        client(server.url())
            .revoke(&Secret::new("s".into()), &RevokeRequest {
                provider: ProviderId::Chat,
                organization_id: None,
                user_scoped: true,
            })
            .await
            .unwrap();
    }

    #[test]
    fn failure_message_falls_back_to_status() {
        assert_eq!(
            failure_message(reqwest::StatusCode::BAD_GATEWAY, ""),
            "HTTP 502 Bad Gateway"
        );
        assert_eq!(
            failure_message(reqwest::StatusCode::BAD_REQUEST, "  nope "),
            "nope"
        );
        assert_eq!(
            failure_message(reqwest::StatusCode::BAD_REQUEST, r#"{"message":"bad org"}"#),
            "bad org"
        );
    }
}
