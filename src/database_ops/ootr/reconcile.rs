use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{SeedError, SeedResult};
use super::page::ScrapedPage;
use super::provider::SeedDetails;

/// The five hash icons, in `hash1..hash5` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashSequence([String; 5]);

impl HashSequence {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for HashSequence {
    type Error = SeedError;

    fn try_from(icons: Vec<String>) -> SeedResult<Self> {
        let n = icons.len();
        <[String; 5]>::try_from(icons)
            .map(HashSequence)
            .map_err(|_| SeedError::parse(format!("expected 5 hash icons, got {n}")))
    }
}

/// Where the metadata for a seed came from. Exactly one source feeds a record.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataSource {
    Authenticated(SeedDetails),
    Scraped(ScrapedPage),
}

impl MetadataSource {
    pub fn label(&self) -> &'static str {
        match self {
            MetadataSource::Authenticated(_) => "api",
            MetadataSource::Scraped(_) => "page",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedMetadataRecord {
    pub seed_id: u64,
    pub creation_timestamp: DateTime<Utc>,
    pub file_stem: String,
    pub hashes: Option<HashSequence>,
}

#[derive(Deserialize)]
struct SpoilerFileHash {
    file_hash: Vec<String>,
}

/// Hash icons recorded in a spoiler log (`file_hash`).
pub fn hashes_from_spoiler(spoiler_log: &str) -> SeedResult<HashSequence> {
    let parsed: SpoilerFileHash = serde_json::from_str(spoiler_log)?;
    HashSequence::try_from(parsed.file_hash)
}

/// Build the canonical record from a single metadata source.
///
/// `file_stem` is the patch-derived (or resolver-supplied) stem; neither remote
/// source reports one.
pub fn reconcile(
    seed_id: u64,
    file_stem: String,
    source: &MetadataSource,
) -> SeedResult<SeedMetadataRecord> {
    let (creation_timestamp, hashes) = match source {
        MetadataSource::Authenticated(details) => {
            let hashes = details
                .spoiler_log
                .as_deref()
                .map(hashes_from_spoiler)
                .transpose()?;
            (details.creation_timestamp, hashes)
        }
        MetadataSource::Scraped(page) => (page.creation_timestamp, page.hashes.clone()),
    };
    Ok(SeedMetadataRecord {
        seed_id,
        creation_timestamp,
        file_stem,
        hashes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn icons(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hash_sequence_requires_exactly_five() {
        assert!(HashSequence::try_from(icons(&["A", "B", "C", "D"])).is_err());
        assert!(HashSequence::try_from(icons(&["A", "B", "C", "D", "E", "F"])).is_err());
        let seq = HashSequence::try_from(icons(&["A", "B", "C", "D", "E"])).unwrap();
        assert_eq!(seq.get(0), Some("A"));
        assert_eq!(seq.get(4), Some("E"));
        assert_eq!(seq.get(5), None);
    }

    #[test]
    fn authenticated_source_uses_spoiler_hashes() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        let spoiler = r#"{":version":"8.0","file_hash":["Bow","Bow","Slingshot","Map","Compass"],"settings":{}}"#;
        let source = MetadataSource::Authenticated(SeedDetails {
            creation_timestamp: ts,
            spoiler_log: Some(spoiler.to_string()),
        });
        let rec = reconcile(42, "OoT_STEM".into(), &source).unwrap();
        assert_eq!(rec.creation_timestamp, ts);
        assert_eq!(rec.file_stem, "OoT_STEM");
        assert_eq!(
            rec.hashes.unwrap().as_slice(),
            icons(&["Bow", "Bow", "Slingshot", "Map", "Compass"]).as_slice()
        );
    }

    #[test]
    fn authenticated_source_without_spoiler_has_no_hashes() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        let source = MetadataSource::Authenticated(SeedDetails {
            creation_timestamp: ts,
            spoiler_log: None,
        });
        let rec = reconcile(123456, "stem".into(), &source).unwrap();
        assert_eq!(rec.hashes, None);
        assert_eq!(rec.creation_timestamp, ts);
    }

    #[test]
    fn malformed_spoiler_is_an_error() {
        let source = MetadataSource::Authenticated(SeedDetails {
            creation_timestamp: Utc::now(),
            spoiler_log: Some("{not json".into()),
        });
        assert!(matches!(
            reconcile(1, "s".into(), &source),
            Err(SeedError::Json(_))
        ));
    }

    #[test]
    fn scraped_source_is_taken_verbatim() {
        let ts = Utc.with_ymd_and_hms(2021, 7, 8, 9, 10, 11).unwrap();
        let hashes = HashSequence::try_from(icons(&["A", "B", "C", "D", "E"])).unwrap();
        let source = MetadataSource::Scraped(ScrapedPage {
            creation_timestamp: ts,
            hashes: Some(hashes.clone()),
        });
        let rec = reconcile(7, "from_patch".into(), &source).unwrap();
        assert_eq!(rec.hashes, Some(hashes));
        assert_eq!(rec.creation_timestamp, ts);
        assert_eq!(rec.file_stem, "from_patch");
        assert_eq!(source.label(), "page");
    }
}
