use tracing::info;

use crate::error::{Error, Result};

/// Fetch the notification page. Any non-2xx status ends the run.
pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String> {
    info!("Fetching licensing page: {}", url);
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::FetchStatus(status));
    }

    let html = response.text().await?;
    info!("Fetched {} bytes", html.len());
    Ok(html)
}
