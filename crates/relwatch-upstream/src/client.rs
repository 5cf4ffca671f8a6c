//! HTTP access to the upstream repository.

use std::time::Duration;

use reqwest::Client;

use relwatch_util::errors::RelwatchError;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the shared reqwest client for upstream requests.
pub fn build_client() -> miette::Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("relwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| {
            RelwatchError::Network {
                message: format!("failed to create HTTP client: {e}"),
            }
            .into()
        })
}

/// Fetch a text document.
///
/// Returns `Ok(None)` for 404. Connect failures, timeouts, and 5xx
/// responses are retried with a delay before giving up; any other
/// non-success status is an upstream error.
pub async fn get_text(client: &Client, url: &str) -> miette::Result<Option<String>> {
    let mut last_err = String::new();

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(RETRY_DELAY * attempt).await;
        }

        match client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if status.is_server_error() {
                    last_err = format!("HTTP {status} from {url}");
                    continue;
                }
                if !status.is_success() {
                    return Err(RelwatchError::Upstream {
                        message: format!("HTTP {status} fetching {url}"),
                    }
                    .into());
                }

                let body = resp.text().await.map_err(|e| RelwatchError::Network {
                    message: format!("failed to read response from {url}: {e}"),
                })?;
                return Ok(Some(body));
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                last_err = format!("{e}");
                continue;
            }
            Err(e) => {
                return Err(RelwatchError::Network {
                    message: format!("request to {url} failed: {e}"),
                }
                .into());
            }
        }
    }

    Err(RelwatchError::Network {
        message: format!("failed after {MAX_RETRIES} retries for {url}: {last_err}"),
    }
    .into())
}
