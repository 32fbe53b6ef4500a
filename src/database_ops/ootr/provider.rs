use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::error::{SeedError, SeedResult};

pub const DEFAULT_BASE_URL: &str = "https://ootrandomizer.com";

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Patch file as served by `patch/get`.
#[derive(Debug, Clone)]
pub struct PatchFile {
    /// Filename from `Content-Disposition`, extension included (`.zpf` / `.zpfz`).
    pub file_name: String,
    pub file_stem: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub enum PatchLookup {
    Found(PatchFile),
    NotFound,
}

/// Authenticated `api/v2/seed/details` payload, reduced to what the backfill uses.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedDetails {
    pub creation_timestamp: DateTime<Utc>,
    pub spoiler_log: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSeedDetails {
    creation_timestamp: String,
    #[serde(default)]
    spoiler_log: Option<String>,
}

/// The remote seed-generation service.
///
/// Implementations map the statuses the backfill tolerates onto
/// [`PatchLookup::NotFound`] and `Ok(None)` from [`SeedService::spoiler`];
/// every other non-success status is an error.
#[async_trait]
pub trait SeedService: Send + Sync {
    async fn patch(&self, seed_id: u64) -> SeedResult<PatchLookup>;
    async fn details(&self, seed_id: u64) -> SeedResult<SeedDetails>;
    async fn unlock(&self, seed_id: u64) -> SeedResult<()>;
    /// Public HTML page for the seed.
    async fn seed_page(&self, seed_id: u64) -> SeedResult<String>;
    /// Standalone spoiler log; `None` while the service has not generated one.
    async fn spoiler(&self, seed_id: u64) -> SeedResult<Option<Bytes>>;
}

/// ootrandomizer.com client.
///
/// Endpoints:
/// - GET  /patch/get?id=              patch download (404 when unknown)
/// - GET  /api/v2/seed/details?id=&key=
/// - POST /api/v2/seed/unlock?id=&key=
/// - GET  /seed/get?id=               public seed page
/// - GET  /spoilers/get?id=           spoiler download (400 until generated)
#[derive(Debug, Clone)]
pub struct OotrProvider {
    base_url: String,
    http: Client,
    api_key: String,
}

impl OotrProvider {
    pub fn new(base_url: Option<&str>, api_key: String, timeout_secs: Option<u64>) -> SeedResult<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let mut builder = Client::builder().user_agent(concat!("seed-backfill/", env!("CARGO_PKG_VERSION")));
        if let Some(secs) = timeout_secs.filter(|s| *s > 0) {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            base_url,
            http: builder.build()?,
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fail(endpoint: &'static str, resp: reqwest::Response) -> SeedError {
        let status = resp.status().as_u16();
        let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
        SeedError::RemoteUnavailable {
            endpoint,
            status,
            body,
        }
    }
}

#[async_trait]
impl SeedService for OotrProvider {
    #[instrument(skip(self))]
    async fn patch(&self, seed_id: u64) -> SeedResult<PatchLookup> {
        let url = format!("{}/patch/get", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("id", seed_id)])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(seed_id, "patch not found");
            return Ok(PatchLookup::NotFound);
        }
        if !resp.status().is_success() {
            return Err(Self::fail("patch/get", resp).await);
        }
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .ok_or_else(|| SeedError::parse("patch/get: missing Content-Disposition header"))?
            .to_str()
            .map_err(|e| SeedError::parse(format!("patch/get: Content-Disposition: {e}")))?
            .to_string();
        let (file_name, file_stem) = parse_content_disposition(&disposition)?;
        let bytes = resp.bytes().await?;
        Ok(PatchLookup::Found(PatchFile {
            file_name,
            file_stem,
            bytes,
        }))
    }

    #[instrument(skip(self))]
    async fn details(&self, seed_id: u64) -> SeedResult<SeedDetails> {
        let url = format!("{}/api/v2/seed/details", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .query(&[("id", seed_id.to_string().as_str()), ("key", self.api_key.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::fail("api/v2/seed/details", resp).await);
        }
        let body = resp.text().await?;
        parse_details(&body)
    }

    #[instrument(skip(self))]
    async fn unlock(&self, seed_id: u64) -> SeedResult<()> {
        let url = format!("{}/api/v2/seed/unlock", self.base_url);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str()), ("id", seed_id.to_string().as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::fail("api/v2/seed/unlock", resp).await);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn seed_page(&self, seed_id: u64) -> SeedResult<String> {
        let url = format!("{}/seed/get", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("id", seed_id)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::fail("seed/get", resp).await);
        }
        Ok(resp.text().await?)
    }

    #[instrument(skip(self))]
    async fn spoiler(&self, seed_id: u64) -> SeedResult<Option<Bytes>> {
        let url = format!("{}/spoilers/get", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("id", seed_id)])
            .send()
            .await?;
        // 400 until a spoiler log has been generated for the seed
        if resp.status() == StatusCode::BAD_REQUEST {
            debug!(seed_id, "spoiler not generated yet");
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::fail("spoilers/get", resp).await);
        }
        Ok(Some(resp.bytes().await?))
    }
}

fn disposition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^attachment; filename=((.*)\.zpfz?)$").expect("valid regex"))
}

/// Split `attachment; filename=<stem>.zpf[z]` into (filename, stem).
pub fn parse_content_disposition(value: &str) -> SeedResult<(String, String)> {
    let caps = disposition_re()
        .captures(value.trim())
        .ok_or_else(|| SeedError::parse(format!("unexpected Content-Disposition: {value:?}")))?;
    Ok((caps[1].to_string(), caps[2].to_string()))
}

/// Parse an API timestamp. The service sends RFC 3339; offset-less values are taken as UTC.
pub fn parse_api_timestamp(raw: &str) -> SeedResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| SeedError::parse(format!("creationTimestamp {raw:?}: {e}")))
}

pub fn parse_details(body: &str) -> SeedResult<SeedDetails> {
    let raw: RawSeedDetails = serde_json::from_str(body)?;
    Ok(SeedDetails {
        creation_timestamp: parse_api_timestamp(&raw.creation_timestamp)?,
        spoiler_log: raw.spoiler_log,
    })
}
