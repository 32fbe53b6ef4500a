use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use super::provider::DEFAULT_BASE_URL;
use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_SEEDS_DIR: &str = "/var/www/midos.house/seed";
pub const DEFAULT_SITE_CONFIG: &str = "/etc/xdg/midos-house.json";

/// Settings loaded once at startup and handed to the pipeline's collaborators.
#[derive(Clone)]
pub struct BackfillConfig {
    pub base_url: String,
    pub api_key: String,
    pub seeds_dir: PathBuf,
    pub timeout_secs: u64,
    /// Postgres type to cast hash parameters to, if the columns are not text.
    pub hash_type: Option<String>,
}

impl std::fmt::Debug for BackfillConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackfillConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("seeds_dir", &self.seeds_dir)
            .field("timeout_secs", &self.timeout_secs)
            .field("hash_type", &self.hash_type)
            .finish()
    }
}

/// The site's shared JSON config; only the randomizer key is read here.
#[derive(Debug, Deserialize)]
struct SiteConfig {
    #[serde(rename = "ootrApiKey")]
    ootr_api_key: String,
}

impl BackfillConfig {
    /// `OOTR_BASE_URL`, `OOTR_API_KEY` (else `ootrApiKey` from `MIDOS_HOUSE_CONFIG`),
    /// `SEEDS_DIR`, `OOTR_TIMEOUT_SECS`, `RACES_HASH_TYPE`.
    pub fn from_env() -> Result<Self> {
        let api_key = match env_opt("OOTR_API_KEY") {
            Some(key) => key.trim().to_string(),
            None => {
                let path = env_opt("MIDOS_HOUSE_CONFIG").unwrap_or_else(|| DEFAULT_SITE_CONFIG.into());
                api_key_from_file(Path::new(&path))?
            }
        };
        Ok(Self {
            base_url: env_opt("OOTR_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            api_key,
            seeds_dir: env_opt("SEEDS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SEEDS_DIR)),
            timeout_secs: env_parse("OOTR_TIMEOUT_SECS", 60u64),
            hash_type: env_opt("RACES_HASH_TYPE").map(|s| s.trim().to_string()),
        })
    }
}

fn api_key_from_file(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("OOTR_API_KEY unset and {} unreadable", path.display()))?;
    let cfg: SiteConfig =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let key = cfg.ootr_api_key.trim().to_string();
    if key.is_empty() {
        return Err(anyhow!("{}: ootrApiKey is empty", path.display()));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_api_key_from_site_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("midos-house.json");
        std::fs::write(&path, r#"{"ootrApiKey":" abc123 ","discordToken":"x"}"#).unwrap();
        assert_eq!(api_key_from_file(&path).unwrap(), "abc123");
    }

    #[test]
    fn site_config_without_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("midos-house.json");
        std::fs::write(&path, r#"{"ootrApiKey":""}"#).unwrap();
        assert!(api_key_from_file(&path).is_err());
        assert!(api_key_from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn debug_hides_api_key() {
        let cfg = BackfillConfig {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: "topsecret".into(),
            seeds_dir: PathBuf::from(DEFAULT_SEEDS_DIR),
            timeout_secs: 60,
            hash_type: None,
        };
        assert!(!format!("{cfg:?}").contains("topsecret"));
    }
}
