//! Shared client utilities and error types for the CLI.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use anyhow::anyhow;
use pipeline_api_models::ProblemDetails;
use reqwest::{Client, StatusCode, Url};

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    /// The request was well-formed but the server rejected it.
    Validation(String),
    /// An unexpected failure: network, deserialization, or server-side bug.
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

/// Application context passed to every command handler.
#[derive(Clone)]
pub(crate) struct AppContext {
    pub(crate) client: Client,
    pub(crate) base_url: Url,
}

impl AppContext {
    /// Construct a configured HTTP client bound to `base_url`.
    pub(crate) fn new(base_url: Url, timeout: Duration) -> CliResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, base_url })
    }

    pub(crate) fn url(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }
}

/// Parse the API base URL provided to the CLI.
pub(crate) fn parse_url(input: &str) -> Result<Url, String> {
    input
        .parse::<Url>()
        .map_err(|err| format!("invalid URL '{input}': {err}"))
}

/// Classify an HTTP response into a CLI error, decoding the
/// `{error, details?}` problem document the control plane emits.
pub(crate) async fn classify_problem(response: reqwest::Response) -> CliError {
    let status = response.status();
    let bytes = response.bytes().await.unwrap_or_default();
    let body_text = String::from_utf8_lossy(&bytes).to_string();
    let problem = serde_json::from_slice::<ProblemDetails>(&bytes)
        .inspect_err(|err| tracing::debug!(error = %err, "response body was not a problem document"))
        .ok();

    let message = problem.as_ref().map_or_else(
        || body_text.trim().to_string(),
        |problem| {
            problem
                .details
                .clone()
                .unwrap_or_else(|| problem.error.clone())
        },
    );

    if matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY
    ) {
        CliError::validation(message)
    } else {
        let detail = if body_text.is_empty() {
            format!("request failed with status {status}")
        } else {
            format!("{message} (status {status})")
        };
        CliError::failure(anyhow!(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;

    #[test]
    fn parse_url_rejects_malformed_input() {
        assert!(parse_url("not a url").is_err());
        assert!(parse_url("http://localhost:8080").is_ok());
    }

    #[tokio::test]
    async fn classify_problem_maps_bad_request_to_validation() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/boom");
            then.status(400)
                .json_body(serde_json::json!({"error": "bad input", "details": "field x"}));
        });
        let response = reqwest::get(server.url("/boom")).await.unwrap();
        let error = classify_problem(response).await;
        mock.assert();
        assert_eq!(error.exit_code(), 2);
        assert_eq!(error.display_message(), "field x");
    }

    #[tokio::test]
    async fn classify_problem_maps_server_error_to_failure() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/boom");
            then.status(500)
                .json_body(serde_json::json!({"error": "internal server error"}));
        });
        let response = reqwest::get(server.url("/boom")).await.unwrap();
        let error = classify_problem(response).await;
        mock.assert();
        assert_eq!(error.exit_code(), 3);
    }
}
