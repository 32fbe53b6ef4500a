use std::io::Write;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser};
use tracing::{error, info};

use crate::database_ops::db::Db;
use crate::database_ops::ootr::artifacts::SeedDir;
use crate::database_ops::ootr::config::BackfillConfig;
use crate::database_ops::ootr::error::{SeedError, SeedResult};
use crate::database_ops::ootr::provider::OotrProvider;
use crate::database_ops::ootr::stem::{normalize_stem, StemResolver};
use crate::database_ops::ootr::{BackfillRequest, BackfillSummary, SeedBackfill};
use crate::database_ops::races::{AsyncSlot, CorrelationKey, PgRaceStore};
use crate::util::env as env_util;

/// One backfill invocation.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct BackfillArgs {
    /// Seed id on the randomizer site
    pub seed_id: u64,
    /// Race id (accepts the unsigned form and the signed database form)
    #[arg(long, value_parser = parse_race_id, allow_hyphen_values = true)]
    pub race_id: Option<u64>,
    /// racetime.gg room URL
    #[arg(long)]
    pub room: Option<String>,
    /// start.gg set id
    #[arg(long)]
    pub startgg: Option<String>,
    #[arg(long)]
    pub async_room1: Option<String>,
    #[arg(long)]
    pub async_room2: Option<String>,
    #[arg(long)]
    pub async_room3: Option<String>,
    /// File stem to use when the site has no patch for the seed (otherwise prompted)
    #[arg(long)]
    pub file_stem: Option<String>,
    /// Do not unlock a hidden spoiler log
    #[arg(long, default_value_t = false)]
    pub no_unlock: bool,
    /// Only back up the patch and spoiler files
    #[arg(
        long,
        default_value_t = false,
        conflicts_with_all = ["race_id", "room", "startgg", "async_room1", "async_room2", "async_room3"]
    )]
    pub artifacts_only: bool,
}

fn parse_race_id(raw: &str) -> std::result::Result<u64, String> {
    let raw = raw.trim();
    raw.parse::<u64>()
        .or_else(|_| raw.parse::<i64>().map(|signed| signed as u64))
        .map_err(|_| format!("invalid race id {raw:?}"))
}

impl BackfillArgs {
    pub fn keys(&self) -> Vec<CorrelationKey> {
        let mut keys = Vec::new();
        if let Some(id) = self.race_id {
            keys.push(CorrelationKey::RaceId(id));
        }
        if let Some(room) = &self.room {
            keys.push(CorrelationKey::Room(room.clone()));
        }
        if let Some(set) = &self.startgg {
            keys.push(CorrelationKey::StartggSet(set.clone()));
        }
        for (slot, room) in [
            (AsyncSlot::One, &self.async_room1),
            (AsyncSlot::Two, &self.async_room2),
            (AsyncSlot::Three, &self.async_room3),
        ] {
            if let Some(room) = room {
                keys.push(CorrelationKey::AsyncRoom {
                    slot,
                    room: room.clone(),
                });
            }
        }
        keys
    }

    pub fn request(&self) -> BackfillRequest {
        BackfillRequest {
            seed_id: self.seed_id,
            keys: self.keys(),
            unlock: !self.no_unlock,
            artifacts_only: self.artifacts_only,
        }
    }
}

/// A line typed at the session prompt.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct PromptLine {
    #[command(flatten)]
    args: BackfillArgs,
}

/// Read one line from stdin after printing `prompt`; `None` on EOF.
async fn read_line(prompt: &str) -> std::io::Result<Option<String>> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || -> std::io::Result<Option<String>> {
        let mut out = std::io::stdout().lock();
        out.write_all(prompt.as_bytes())?;
        out.flush()?;
        drop(out);
        let mut line = String::new();
        let n = std::io::stdin().read_line(&mut line)?;
        Ok((n > 0).then_some(line))
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Uses `--file-stem` when given, otherwise asks at the terminal.
pub struct PromptStem {
    preset: Option<String>,
}

impl PromptStem {
    pub fn new(preset: Option<String>) -> Self {
        Self { preset }
    }
}

#[async_trait]
impl StemResolver for PromptStem {
    async fn resolve(&self, seed_id: u64) -> SeedResult<String> {
        if let Some(stem) = self.preset.as_deref().and_then(normalize_stem) {
            return Ok(stem);
        }
        stem_from_line(seed_id, read_line("file stem: ").await)
    }
}

fn stem_from_line(seed_id: u64, line: std::io::Result<Option<String>>) -> SeedResult<String> {
    line?
        .as_deref()
        .and_then(normalize_stem)
        .ok_or(SeedError::MissingFileStem(seed_id))
}

/// Collaborators shared by every invocation of one session.
pub struct Session {
    provider: OotrProvider,
    sink: SeedDir,
    store: PgRaceStore,
}

impl Session {
    pub async fn open(config: &BackfillConfig, database_url: &str) -> Result<Self> {
        info!(
            db = %env_util::redact_postgres_url(database_url),
            seeds_dir = %config.seeds_dir.display(),
            base_url = %config.base_url,
            "opening backfill session"
        );
        let db = Db::connect(database_url, 1).await?;
        let store = PgRaceStore::new(db).with_hash_type(config.hash_type.clone())?;
        let provider = OotrProvider::new(
            Some(&config.base_url),
            config.api_key.clone(),
            Some(config.timeout_secs),
        )?;
        Ok(Self {
            provider,
            sink: SeedDir::new(&config.seeds_dir),
            store,
        })
    }

    pub async fn backfill(&self, args: &BackfillArgs) -> Result<BackfillSummary> {
        let stems = PromptStem::new(args.file_stem.clone());
        let pipeline = SeedBackfill::new(&self.provider, &self.sink, &self.store, &stems);
        let summary = pipeline
            .run(&args.request())
            .await
            .with_context(|| format!("backfill seed {}", args.seed_id))?;
        Ok(summary)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackfillCliConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
}

fn resolve_database_url(cfg: &BackfillCliConfig) -> Result<String> {
    let url = cfg
        .database_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(env_util::db_url);
    if url.is_empty() {
        return Err(anyhow!("database URL is empty; set DATABASE_URL or pass --db-url"));
    }
    Ok(url)
}

fn print_summary(summary: &BackfillSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Backfill a single seed and exit.
pub async fn run_once(cfg: BackfillCliConfig, args: BackfillArgs) -> Result<()> {
    env_util::init_env();
    let config = BackfillConfig::from_env()?;
    let session = Session::open(&config, &resolve_database_url(&cfg)?).await?;
    let summary = session.backfill(&args).await?;
    print_summary(&summary)
}

/// Interactive session: one invocation per line, one database handle throughout.
pub async fn repl(cfg: BackfillCliConfig) -> Result<()> {
    env_util::init_env();
    let config = BackfillConfig::from_env()?;
    let session = Session::open(&config, &resolve_database_url(&cfg)?).await?;
    eprintln!("enter: <seed_id> [--race-id N] [--room URL] [--startgg ID] [--async-room1..3 URL] [--file-stem S] [--no-unlock] [--artifacts-only]; `quit` to leave");

    while let Some(line) = read_line("seed> ").await.context("read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "quit" | "exit") {
            break;
        }
        let args = match PromptLine::try_parse_from(line.split_whitespace()) {
            Ok(parsed) => parsed.args,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        match session.backfill(&args).await {
            Ok(summary) => print_summary(&summary)?,
            Err(e) => error!(seed_id = args.seed_id, error = %format!("{e:#}"), "backfill failed"),
        }
    }
    info!("backfill session closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> BackfillArgs {
        PromptLine::try_parse_from(line.split_whitespace()).unwrap().args
    }

    #[test]
    fn prompt_line_collects_every_key() {
        let args = parse(
            "123456 --race-id 18446744073709551615 --room https://racetime.gg/ootr/a \
             --startgg S9 --async-room2 https://racetime.gg/ootr/b --no-unlock",
        );
        let req = args.request();
        assert_eq!(req.seed_id, 123456);
        assert!(!req.unlock);
        assert!(!req.artifacts_only);
        assert_eq!(
            req.keys,
            vec![
                CorrelationKey::RaceId(u64::MAX),
                CorrelationKey::Room("https://racetime.gg/ootr/a".into()),
                CorrelationKey::StartggSet("S9".into()),
                CorrelationKey::AsyncRoom {
                    slot: AsyncSlot::Two,
                    room: "https://racetime.gg/ootr/b".into(),
                },
            ]
        );
    }

    #[test]
    fn signed_race_ids_are_accepted() {
        let args = parse("1 --race-id -1");
        assert_eq!(args.race_id, Some(u64::MAX));
        assert!(parse_race_id("twelve").is_err());
    }

    #[test]
    fn artifacts_only_conflicts_with_keys() {
        assert!(PromptLine::try_parse_from("1 --artifacts-only --room x".split_whitespace()).is_err());
        let args = parse("1 --artifacts-only --file-stem OoT_X");
        let req = args.request();
        assert!(req.artifacts_only);
        assert!(req.keys.is_empty());
        assert!(req.unlock);
    }

    #[tokio::test]
    async fn preset_stem_skips_prompt() {
        let stems = PromptStem::new(Some("OoT_GIVEN.zpfz".into()));
        assert_eq!(stems.resolve(1).await.unwrap(), "OoT_GIVEN");
    }

    #[test]
    fn typed_stem_or_terminal_failure() {
        assert_eq!(
            stem_from_line(4, Ok(Some(" OoT_TYPED.zpf\n".into()))).unwrap(),
            "OoT_TYPED"
        );
        assert!(matches!(
            stem_from_line(4, Ok(None)),
            Err(SeedError::MissingFileStem(4))
        ));
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed");
        match stem_from_line(4, Err(broken)) {
            Err(SeedError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn explicit_database_url_wins() {
        let cfg = BackfillCliConfig {
            database_url: Some("  postgresql://localhost/x ".into()),
        };
        assert_eq!(resolve_database_url(&cfg).unwrap(), "postgresql://localhost/x");
    }
}
