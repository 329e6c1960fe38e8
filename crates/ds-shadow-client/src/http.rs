//! JSON-over-HTTP plumbing shared by the token issuer and the RPC client.

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;

use ds_protocol::{ShadowError, ShadowResult};

use crate::config::ClientConfig;

/// A configured HTTP client bound to one API base URL.
#[derive(Debug, Clone)]
pub(crate) struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    request_timeout: std::time::Duration,
}

impl HttpApi {
    pub(crate) fn new(config: &ClientConfig) -> ShadowResult<Self> {
        // No client-wide timeout: it would cut streams off. Bounded calls
        // set one per request instead.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ShadowError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            request_timeout: config.request_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// One bounded request/response round trip.
    pub(crate) async fn post_json<B, R>(&self, path: &str, bearer: &str, body: &B) -> ShadowResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .header(reqwest::header::AUTHORIZATION, bearer)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ShadowError::Transport(format!("malformed response from {path}: {e}")))
    }

    /// Open a long-lived response whose body is consumed as a stream.
    pub(crate) async fn open_stream<B>(
        &self,
        path: &str,
        bearer: &str,
        body: &B,
    ) -> ShadowResult<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(self.url(path))
            .header(reqwest::header::AUTHORIZATION, bearer)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await
    }
}

fn transport_error(err: reqwest::Error) -> ShadowError {
    if err.is_timeout() {
        ShadowError::Transport(format!("request timed out: {err}"))
    } else {
        ShadowError::Transport(err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> ShadowResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body.trim()))
}

/// Map an upstream HTTP status onto the shadow error taxonomy.
pub(crate) fn status_error(status: StatusCode, body: &str) -> ShadowError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ShadowError::Validation(detail),
        StatusCode::UNAUTHORIZED => ShadowError::AuthFailure(detail),
        StatusCode::FORBIDDEN => ShadowError::ScopeDenied(detail),
        StatusCode::NOT_FOUND => ShadowError::NotFound(detail),
        _ => ShadowError::Transport(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, ""),
            ShadowError::Validation(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "bad doc"),
            ShadowError::Validation(ref m) if m.contains("bad doc")
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            ShadowError::AuthFailure(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, ""),
            ShadowError::ScopeDenied(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, ""),
            ShadowError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            ShadowError::Transport(_)
        ));
    }
}
