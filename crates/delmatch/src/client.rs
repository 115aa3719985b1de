use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use guru_core::config::{DelMatchConfig, UrlScheme};

use crate::error::DelMatchError;

const TOKEN_PATH: &str = "/api/oauth/token.json";
const ORDERS_PATH: &str = "/api/orders.json";

/// A bearer token and the instant it stops being accepted.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    grant_type: &'static str,
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    expires: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct DelMatchClient {
    http: reqwest::Client,
    scheme: UrlScheme,
    endpoint: Option<String>,
}

impl DelMatchClient {
    pub fn new(config: &DelMatchConfig) -> Result<Self, DelMatchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|error| DelMatchError::Transport(error.to_string()))?;
        Ok(Self { http, scheme: config.scheme, endpoint: None })
    }

    /// Sends every request to `endpoint` (e.g. `http://127.0.0.1:4010`)
    /// instead of the integration's own domain.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    fn url(&self, domain: &str, path: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{endpoint}{path}"),
            None => format!("{}://{domain}{path}", self.scheme.as_str()),
        }
    }

    /// Password grant against `POST /api/oauth/token.json`.
    pub async fn authenticate(
        &self,
        domain: &str,
        email: &str,
        password: &SecretString,
    ) -> Result<AccessToken, DelMatchError> {
        let url = self.url(domain, TOKEN_PATH);
        debug!(event_name = "delmatch.auth.requested", domain, "requesting Del Match token");

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&PasswordGrant {
                grant_type: "password",
                username: email,
                password: password.expose_secret(),
            })
            .send()
            .await
            .map_err(|error| {
                error!(event_name = "delmatch.auth.failed", domain, error = %error, "token request failed");
                DelMatchError::from(error)
            })?;
        let response = ensure_success(response).await?;

        let body: TokenResponse = response.json().await?;
        let token = body.token.filter(|token| !token.trim().is_empty()).ok_or(DelMatchError::EmptyToken)?;
        let expires_at = body
            .expires
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
            .ok_or_else(|| DelMatchError::Decode("token response has no usable `expires`".to_string()))?;

        Ok(AccessToken { token: SecretString::from(token), expires_at })
    }

    /// Recent orders from `GET /api/orders.json`.
    pub async fn fetch_orders(
        &self,
        domain: &str,
        token: &SecretString,
    ) -> Result<Vec<Value>, DelMatchError> {
        let url = self.url(domain, ORDERS_PATH);
        self.fetch_orders_from(&url, token).await
    }

    /// Orders from an arbitrary feed URL, such as the historical export.
    pub async fn fetch_orders_from(
        &self,
        url: &str,
        token: &SecretString,
    ) -> Result<Vec<Value>, DelMatchError> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        let response = ensure_success(response).await?;

        match response.json::<Value>().await? {
            Value::Array(orders) => {
                debug!(event_name = "delmatch.orders.fetched", count = orders.len(), "fetched orders");
                Ok(orders)
            }
            other => Err(DelMatchError::Decode(format!(
                "expected an array of orders, got {}",
                json_kind(&other)
            ))),
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, DelMatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.json::<Value>().await.ok();
    let message = body
        .as_ref()
        .and_then(|body| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(DelMatchError::Unauthorized(message));
    }
    Err(DelMatchError::Status { status: status.as_u16(), message })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
