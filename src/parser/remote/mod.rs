//! Client for MinerU-style batch extraction jobs
//!
//! A job runs in four steps: request an upload URL, upload the file, poll the
//! batch until our file is `done` or `failed`, then download the result
//! archive and read the extracted markdown out of it.

#[cfg(test)]
mod tests;

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::config::ParserConfig;
use crate::{RagError, Result};

/// Result archives are far larger than JSON responses
const ARCHIVE_SIZE_LIMIT: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RemotePdfParser {
    base_url: Url,
    api_key: String,
    model_version: String,
    poll_interval: Duration,
    max_polls: u32,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UploadUrls {
    batch_id: String,
    file_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResults {
    #[serde(default)]
    extract_result: Vec<ExtractResult>,
}

#[derive(Debug, Deserialize)]
struct ExtractResult {
    file_name: String,
    state: String,
    #[serde(default)]
    full_zip_url: Option<String>,
    #[serde(default)]
    err_msg: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_data(self, action: &str) -> anyhow::Result<T> {
        if self.code != 0 {
            bail!(
                "{} failed (code {}): {}",
                action,
                self.code,
                self.msg.unwrap_or_default()
            );
        }
        self.data.ok_or_else(|| anyhow!("{} returned no data", action))
    }
}

impl RemotePdfParser {
    /// The API key comes from the environment variable named in `api_key_env`
    #[inline]
    pub fn from_config(config: &ParserConfig) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            RagError::Config(format!(
                "Remote PDF parsing requires an API key in ${}",
                config.api_key_env
            ))
        })?;

        Ok(Self::new(&config.base_url, api_key)?
            .with_model_version(&config.model_version)
            .with_polling(
                Duration::from_millis(config.poll_interval_ms),
                config.max_polls,
            )
            .with_timeout(Duration::from_secs(config.timeout_seconds)))
    }

    #[inline]
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| RagError::Config(format!("Invalid parser URL {}: {}", base_url, e)))?;

        let defaults = ParserConfig::default();
        Ok(Self {
            base_url,
            api_key,
            model_version: defaults.model_version,
            poll_interval: Duration::from_millis(defaults.poll_interval_ms),
            max_polls: defaults.max_polls,
            agent: build_agent(Duration::from_secs(defaults.timeout_seconds)),
        })
    }

    #[inline]
    pub fn with_model_version(mut self, model_version: &str) -> Self {
        self.model_version = model_version.to_string();
        self
    }

    #[inline]
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Run a full extraction job for `path` and return the extracted text
    #[inline]
    pub fn parse(&self, path: &Path) -> Result<String> {
        self.run_job(path)
            .with_context(|| format!("Remote parsing of {} failed", path.display()))
            .map_err(|e| RagError::Parse(format!("{:#}", e)))
    }

    fn run_job(&self, path: &Path) -> anyhow::Result<String> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("File name is not valid UTF-8"))?
            .to_string();
        let bytes = fs::read(path).context("Failed to read file")?;

        info!("[1/3] Uploading {}", file_name);
        let batch_id = self.upload(&file_name, &bytes)?;

        info!("[2/3] Waiting for extraction (batch {})", batch_id);
        let zip_url = self.wait_for_result(&batch_id, &file_name)?;

        info!("[3/3] Downloading extracted text");
        let text = self.download_text(&zip_url)?;

        info!(
            "Remote parsing of {} finished: {} chars",
            file_name,
            text.chars().count()
        );
        Ok(text)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    fn upload(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<String> {
        let data_id: String = Uuid::new_v4().to_string().chars().take(8).collect();
        let request = json!({
            "files": [{"name": file_name, "data_id": data_id}],
            "model_version": self.model_version,
        });

        let response_text = self
            .agent
            .post(self.endpoint("file-urls/batch").as_str())
            .header("Content-Type", "application/json")
            .header("Authorization", &self.authorization())
            .send(&request.to_string())
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .context("Upload URL request failed")?;

        let response: ApiResponse<UploadUrls> =
            serde_json::from_str(&response_text).context("Failed to parse upload URL response")?;
        let urls = response.into_data("Upload URL request")?;
        let upload_url = urls
            .file_urls
            .first()
            .ok_or_else(|| anyhow!("Upload URL response contained no URLs"))?;

        debug!("Uploading {} bytes to {}", bytes.len(), upload_url);
        self.agent
            .put(upload_url.as_str())
            .send(bytes)
            .map_err(|e| match e {
                ureq::Error::StatusCode(status) => anyhow!("Upload failed: HTTP {}", status),
                other => anyhow!("Upload failed: {}", other),
            })?;

        Ok(urls.batch_id)
    }

    fn wait_for_result(&self, batch_id: &str, file_name: &str) -> anyhow::Result<String> {
        let url = self.endpoint(&format!("extract-results/batch/{batch_id}"));

        for attempt in 1..=self.max_polls {
            let response_text = self
                .agent
                .get(url.as_str())
                .header("Authorization", &self.authorization())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
                .context("Result query failed")?;

            let response: ApiResponse<BatchResults> = serde_json::from_str(&response_text)
                .context("Failed to parse result query response")?;
            let results = response.into_data("Result query")?;

            if let Some(entry) = results
                .extract_result
                .into_iter()
                .find(|entry| entry.file_name == file_name)
            {
                match entry.state.as_str() {
                    "done" => {
                        return entry
                            .full_zip_url
                            .ok_or_else(|| anyhow!("Finished job has no result archive URL"));
                    }
                    "failed" => {
                        bail!(
                            "Extraction failed: {}",
                            entry.err_msg.unwrap_or_else(|| "unknown error".to_string())
                        );
                    }
                    state => debug!(
                        "Job state for {}: {} (poll {}/{})",
                        file_name, state, attempt, self.max_polls
                    ),
                }
            }

            if attempt < self.max_polls {
                std::thread::sleep(self.poll_interval);
            }
        }

        bail!("Extraction did not finish after {} polls", self.max_polls)
    }

    fn download_text(&self, zip_url: &str) -> anyhow::Result<String> {
        let bytes = self
            .agent
            .get(zip_url)
            .call()
            .and_then(|mut resp| {
                resp.body_mut()
                    .with_config()
                    .limit(ARCHIVE_SIZE_LIMIT)
                    .read_to_vec()
            })
            .context("Failed to download result archive")?;

        text_from_archive(&bytes)
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// First `.md` entry of the archive in archive order, else the first `.txt`
fn text_from_archive(bytes: &[u8]) -> anyhow::Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Result archive is not a valid zip")?;

    let mut markdown = None;
    let mut plain_text = None;
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        let has_extension = |wanted: &str| {
            Path::new(entry.name())
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
        };
        if markdown.is_none() && has_extension("md") {
            markdown = Some(index);
        } else if plain_text.is_none() && has_extension("txt") {
            plain_text = Some(index);
        }
    }

    let index = markdown
        .or(plain_text)
        .ok_or_else(|| anyhow!("Result archive contains no markdown or text file"))?;

    let mut entry = archive.by_index(index)?;
    debug!("Reading {} from result archive", entry.name());
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .context("Extracted text is not valid UTF-8")?;
    Ok(text)
}
