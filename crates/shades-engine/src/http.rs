use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn build_client(timeout: Option<Duration>) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
        .user_agent(concat!("shades/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

pub(crate) fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn response_bytes_or_error(service: &str, response: HttpResponse) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let code = status.as_u16();
        let body = response.text().unwrap_or_default();
        bail!(
            "{service} download failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let bytes = response
        .bytes()
        .with_context(|| format!("failed reading {service} bytes"))?
        .to_vec();
    if bytes.is_empty() {
        bail!("{service} download returned an empty body");
    }
    Ok(bytes)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Flattens an error chain into a single line for logs and journal rows.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().is_some_and(|existing| existing == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}
