use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::table::{Record, RecordUpdate, Table};

pub const DEFAULT_API_URL: &str = "https://api.airtable.com";
/// Largest page the list endpoint returns.
pub const PAGE_SIZE: usize = 100;
/// Most records a single PATCH may carry.
pub const UPDATE_BATCH_SIZE: usize = 10;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Deserialize)]
struct ListPage {
    records: Vec<Record>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    records: &'a [RecordUpdate],
}

/// Client for one table of an Airtable base.
pub struct AirtableClient {
    client: Client,
    url: Url,
    api_key: String,
    max_retries: u32,
}

impl AirtableClient {
    pub fn new(api_url: &str, base: &str, table: &str, api_key: &str) -> Result<Self> {
        let mut url = Url::parse(api_url).with_context(|| format!("invalid API url {api_url}"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("invalid API url {api_url}"))?
            .pop_if_empty()
            .extend(["v0", base, table]);
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            url,
            api_key: api_key.to_string(),
            max_retries: 3,
        })
    }

    /// How many times a request is retried after a rate limit, server error or
    /// connection failure.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = request.bearer_auth(&self.api_key);
        let mut attempt = 0;
        loop {
            let this_try = request
                .try_clone()
                .context("request cannot be retried")?;
            match this_try.send().await {
                Ok(response) if is_transient(response.status()) && attempt < self.max_retries => {
                    warn!(status = %response.status(), attempt, "Airtable request failed, retrying");
                }
                Ok(response) => return check_status(response).await,
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.max_retries => {
                    warn!(attempt, "Airtable request failed, retrying: {e}");
                }
                Err(e) => return Err(e).context("sending request to Airtable"),
            }
            tokio::time::sleep(retry_delay(attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Table for AirtableClient {
    async fn records(&self, max_records: Option<usize>) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
            if let Some(max) = max_records {
                query.push(("maxRecords", max.to_string()));
            }
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }
            let request = self.client.get(self.url.clone()).query(&query);
            let page: ListPage = self
                .send(request)
                .await?
                .json()
                .await
                .context("parsing Airtable records page")?;
            debug!(rows = page.records.len(), "fetched page");
            records.extend(page.records);

            let full = max_records.is_some_and(|max| records.len() >= max);
            match page.offset {
                Some(next) if !full => offset = Some(next),
                _ => break,
            }
        }
        if let Some(max) = max_records {
            records.truncate(max);
        }
        Ok(records)
    }

    async fn update(&self, updates: &[RecordUpdate]) -> Result<()> {
        for batch in updates.chunks(UPDATE_BATCH_SIZE) {
            let request = self
                .client
                .patch(self.url.clone())
                .json(&UpdateBody { records: batch });
            self.send(request).await?;
        }
        Ok(())
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY * 2u32.pow(attempt.min(5))
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("Airtable returned {status}: {}", error_message(&body));
}

// Airtable errors look like {"error": {"type": "...", "message": "..."}} or {"error": "NOT_FOUND"}
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    match value.get("error") {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        Some(error) => {
            let kind = error.get("type").and_then(|v| v.as_str()).unwrap_or("UNKNOWN");
            match error.get("message").and_then(|v| v.as_str()) {
                Some(message) => format!("{kind}: {message}"),
                None => kind.to_string(),
            }
        }
        None => body.trim().to_string(),
    }
}
