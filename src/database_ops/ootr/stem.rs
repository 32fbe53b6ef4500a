use async_trait::async_trait;

use super::error::{SeedError, SeedResult};

/// Supplies a file stem when the service has no patch for the seed.
#[async_trait]
pub trait StemResolver: Send + Sync {
    async fn resolve(&self, seed_id: u64) -> SeedResult<String>;
}

/// A stem known up front, or none at all.
#[derive(Debug, Clone, Default)]
pub struct FixedStem(pub Option<String>);

#[async_trait]
impl StemResolver for FixedStem {
    async fn resolve(&self, seed_id: u64) -> SeedResult<String> {
        normalize_stem(self.0.as_deref().unwrap_or_default()).ok_or(SeedError::MissingFileStem(seed_id))
    }
}

/// Trim whitespace and a trailing patch extension; `None` for empty input.
pub fn normalize_stem(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stem = trimmed
        .strip_suffix(".zpfz")
        .or_else(|| trimmed.strip_suffix(".zpf"))
        .unwrap_or(trimmed);
    (!stem.is_empty()).then(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_stem_resolves_or_fails() {
        let stem = FixedStem(Some("  OoT_1234 \n".into()));
        assert_eq!(stem.resolve(1).await.unwrap(), "OoT_1234");

        let none = FixedStem(None);
        assert!(matches!(none.resolve(9).await, Err(SeedError::MissingFileStem(9))));

        let blank = FixedStem(Some("   ".into()));
        assert!(blank.resolve(9).await.is_err());
    }

    #[test]
    fn normalize_strips_patch_extension() {
        assert_eq!(normalize_stem("OoT_X.zpfz").as_deref(), Some("OoT_X"));
        assert_eq!(normalize_stem("OoT_X.zpf").as_deref(), Some("OoT_X"));
        assert_eq!(normalize_stem("OoT_X").as_deref(), Some("OoT_X"));
        assert_eq!(normalize_stem(".zpf"), None);
    }
}
