//! Scraper for the public `seed/get` page, used when the authenticated API refuses a seed.
//!
//! The page carries the generation time as RFC 2822 text in `#parsedTimestamp` and
//! the five hash icons as `<img src="/img/hash/<name>.png">` inside `#seedHashBox`.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};

use super::error::{SeedError, SeedResult};
use super::reconcile::HashSequence;

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedPage {
    pub creation_timestamp: DateTime<Utc>,
    /// `None` when the hash box holds no icons.
    pub hashes: Option<HashSequence>,
}

fn hash_src_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/img/hash/(.+)\.png$").expect("valid regex"))
}

fn selector(css: &str) -> SeedResult<Selector> {
    Selector::parse(css).map_err(|e| SeedError::parse(format!("selector {css:?}: {e}")))
}

pub fn parse_seed_page(html: &str) -> SeedResult<ScrapedPage> {
    let document = Html::parse_document(html);

    let ts_text: String = document
        .select(&selector("#parsedTimestamp")?)
        .next()
        .ok_or_else(|| SeedError::parse("seed page: #parsedTimestamp not found"))?
        .text()
        .collect();
    let creation_timestamp = parse_page_timestamp(&ts_text)?;

    let hash_box = document
        .select(&selector("#seedHashBox")?)
        .next()
        .ok_or_else(|| SeedError::parse("seed page: #seedHashBox not found"))?;
    let img = selector("img")?;
    let srcs = hash_box
        .select(&img)
        .map(|el| {
            el.value()
                .attr("src")
                .ok_or_else(|| SeedError::parse("seed page: hash icon without src"))
        })
        .collect::<SeedResult<Vec<_>>>()?;
    let hashes = parse_hash_icons(&srcs)?;

    Ok(ScrapedPage {
        creation_timestamp,
        hashes,
    })
}

/// RFC 2822 text as rendered on the page, normalized to UTC.
pub fn parse_page_timestamp(raw: &str) -> SeedResult<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SeedError::parse(format!("seed page timestamp {raw:?}: {e}")))
}

/// Icon names from the hash box `src` attributes, in document order.
pub fn parse_hash_icons(srcs: &[&str]) -> SeedResult<Option<HashSequence>> {
    let mut icons = Vec::with_capacity(5);
    for src in srcs {
        let name = hash_src_re()
            .captures(src.trim())
            .map(|c| c[1].to_string())
            .ok_or_else(|| SeedError::parse(format!("seed page: unexpected hash icon src {src:?}")))?;
        let decoded = urlencoding::decode(&name)
            .map_err(|e| SeedError::parse(format!("seed page: hash icon {name:?}: {e}")))?;
        icons.push(decoded.into_owned());
    }
    if icons.is_empty() {
        return Ok(None);
    }
    HashSequence::try_from(icons).map(Some)
}
