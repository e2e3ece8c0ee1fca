//! HTTP authorization backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use herald_core::message::{JoinRequest, SERVER_ERROR_STATUS};
use herald_core::{AuthFailure, AuthorizationResult, Authorizer, ConnectionId};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Authorizes joins by asking the application server.
///
/// Every join is POSTed to the auth endpoint as
/// `{"channel_name", "socket_id"}` together with the headers the client
/// supplied in `auth.headers`. A 200 response body is the authorization
/// result; any other status refuses the join with that status.
pub struct HttpAuthorizer {
    client: Client,
    url: String,
}

impl HttpAuthorizer {
    /// Create an authorizer for the given endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build auth HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

/// Header pairs from `auth.headers`; non-string values are skipped.
fn forwarded_headers(request: &JoinRequest) -> impl Iterator<Item = (&str, &str)> {
    request
        .auth
        .as_ref()
        .and_then(|auth| auth.get("headers"))
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter_map(|(name, value)| Some((name.as_str(), value.as_str()?)))
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn authenticate(
        &self,
        connection: &ConnectionId,
        request: &JoinRequest,
    ) -> Result<AuthorizationResult, AuthFailure> {
        let channel = request.channel_name().unwrap_or_default();

        let mut builder = self
            .client
            .post(&self.url)
            .header("X-Requested-With", "XMLHttpRequest")
            .json(&json!({
                "channel_name": channel,
                "socket_id": connection,
            }));
        for (name, value) in forwarded_headers(request) {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(connection = %connection, channel = %channel, error = %e, "Auth request failed");
            AuthFailure::new(
                e.status().map_or(SERVER_ERROR_STATUS, |s| s.as_u16()),
                format!("Error sending authentication request: {e}"),
            )
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AuthFailure::new(
                status.as_u16(),
                format!("{connection} could not be authenticated to {channel}"),
            ));
        }

        let body = response.text().await.map_err(|e| {
            AuthFailure::new(SERVER_ERROR_STATUS, format!("Error reading auth response: {e}"))
        })?;

        // Bodies without channel data are rejected later as a server error
        match serde_json::from_str(&body) {
            Ok(result) => Ok(result),
            Err(e) => {
                debug!(connection = %connection, channel = %channel, error = %e, "Auth response is not an authorization result");
                Ok(AuthorizationResult::default())
            }
        }
    }
}
