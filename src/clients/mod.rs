//! HTTP adapters for the collaborators of the relay: the source chain's
//! GraphQL node, the webhook indexer's catch-up query and the executor that
//! signs mints and refunds.

use std::time::Duration;

use reqwest::Client;

pub mod catch_up;
pub mod executor;
pub mod graphql;

#[cfg(test)]
mod tests;

pub use catch_up::HttpCatchUp;
pub use executor::ExecutorClient;
pub use graphql::GraphQlEventSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent("bridge-relay/1.0")
        .build()?)
}

/// Join `path` onto `endpoint` without doubling or dropping slashes
fn join(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn error_for_status(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(anyhow::anyhow!(
        "request failed with status {}: {}",
        status,
        body
    ))
}
