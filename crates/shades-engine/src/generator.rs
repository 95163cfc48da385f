use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::Credentials;
use crate::http::{build_client, response_bytes_or_error, response_json_or_error};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_TIMEOUT: Duration = Duration::from_secs(180);

/// What a generation call handed back: the image itself or a URL to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedImage {
    Bytes(Vec<u8>),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub person_url: String,
    pub accessory_url: String,
    pub background_url: String,
    pub prompt: String,
}

pub trait ImageGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage>;

    /// Fetches an image URL, failing on any non-2xx status.
    fn download(&self, url: &str) -> Result<Vec<u8>>;

    /// Resolves a generation result to bytes, downloading when needed.
    fn materialize(&self, image: GeneratedImage) -> Result<Vec<u8>> {
        match image {
            GeneratedImage::Bytes(bytes) => Ok(bytes),
            GeneratedImage::Url(url) => self.download(&url),
        }
    }
}

/// Hosted model runner reached over the predictions API.
pub struct ReplicateGenerator {
    api_base: String,
    api_token: String,
    model_ref: String,
    http: HttpClient,
    download_http: HttpClient,
}

impl ReplicateGenerator {
    pub fn new(credentials: &Credentials, model_ref: &str) -> Result<Self> {
        Ok(Self {
            api_base: credentials.replicate_api_base.clone(),
            api_token: credentials.replicate_api_token.clone(),
            model_ref: model_ref.trim().to_string(),
            http: build_client(Some(POLL_TIMEOUT))?,
            download_http: build_client(Some(DOWNLOAD_TIMEOUT))?,
        })
    }

    /// `owner/name` runs the latest version; `owner/name:version` pins one.
    fn prediction_target(&self, input: Value) -> (String, Value) {
        match self.model_ref.split_once(':') {
            Some((_, version)) => (
                format!("{}/predictions", self.api_base),
                json!({ "version": version, "input": input }),
            ),
            None => (
                format!("{}/models/{}/predictions", self.api_base, self.model_ref),
                json!({ "input": input }),
            ),
        }
    }

    fn poll_prediction(&self, poll_url: &str) -> Result<Value> {
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .with_context(|| format!("Replicate poll request failed ({poll_url})"))?;
            let payload = response_json_or_error("Replicate poll", response)?;
            match prediction_status(&payload).as_str() {
                "succeeded" => return Ok(payload),
                "failed" | "canceled" => bail!("Replicate prediction failed: {}", payload),
                _ => {}
            }
            if started.elapsed() >= POLL_TIMEOUT {
                bail!(
                    "Replicate polling timed out after {:.1}s",
                    POLL_TIMEOUT.as_secs_f64()
                );
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ImageGenerator for ReplicateGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
        let input = json!({
            "prompt": request.prompt,
            "image_input": [
                request.person_url,
                request.accessory_url,
                request.background_url,
            ],
            "output_format": "png",
        });
        let (endpoint, payload) = self.prediction_target(input);
        info!(model = %self.model_ref, "requesting generation");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&payload)
            .send()
            .with_context(|| format!("Replicate request failed ({endpoint})"))?;
        let mut prediction = response_json_or_error("Replicate", response)?;
        let status = prediction_status(&prediction);
        if status != "succeeded" {
            if !matches!(status.as_str(), "starting" | "processing") {
                bail!("Replicate prediction failed: {}", prediction);
            }
            let poll_url = prediction
                .pointer("/urls/get")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow!("Replicate prediction missing poll URL"))?
                .to_string();
            debug!(%poll_url, "polling prediction");
            prediction = self.poll_prediction(&poll_url)?;
        }

        let output = prediction
            .get("output")
            .ok_or_else(|| anyhow!("Replicate response returned no output"))?;
        generated_image_from_output(output)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .download_http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading generated image ({url})"))?;
        response_bytes_or_error("generated image", response)
    }
}

fn prediction_status(prediction: &Value) -> String {
    prediction
        .get("status")
        .and_then(Value::as_str)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Accepts a bare URL, a list (first entry wins), an object carrying `url`
/// or `output`, or an inline `data:` URI.
pub fn generated_image_from_output(output: &Value) -> Result<GeneratedImage> {
    let mut urls = Vec::new();
    extract_output_urls(output, &mut urls);
    let Some(first) = urls.into_iter().next() else {
        bail!("unexpected generator output shape: {}", output);
    };
    match first.strip_prefix("data:") {
        Some(data_uri) => decode_data_uri(data_uri).map(GeneratedImage::Bytes),
        None => Ok(GeneratedImage::Url(first)),
    }
}

fn extract_output_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(url) => {
            let trimmed = url.trim();
            if (trimmed.starts_with("http") || trimmed.starts_with("data:"))
                && !out.iter().any(|existing| existing == trimmed)
            {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                extract_output_urls(row, out);
            }
        }
        Value::Object(obj) => {
            for key in ["url", "urls", "output"] {
                if let Some(nested) = obj.get(key) {
                    extract_output_urls(nested, out);
                }
            }
        }
        _ => {}
    }
}

fn decode_data_uri(rest: &str) -> Result<Vec<u8>> {
    let Some((meta, data)) = rest.split_once(',') else {
        bail!("malformed data URI in generator output");
    };
    if !meta.ends_with(";base64") {
        bail!("generator data URI is not base64 encoded");
    }
    let bytes = BASE64
        .decode(data.trim())
        .context("generator data URI is not valid base64")?;
    if bytes.is_empty() {
        bail!("generator data URI is empty");
    }
    Ok(bytes)
}
