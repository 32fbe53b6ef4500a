//! Seed metadata backfill for ootrandomizer.com seeds.
//!
//! One invocation runs three stages in order:
//! - fetch: patch, authenticated details (unlocking the spoiler if asked), and the
//!   public page plus standalone spoiler when the authenticated lookup is refused;
//! - reconcile: one [`SeedMetadataRecord`] from exactly one source;
//! - persist: artifact files first, then every correlation key in one transaction.
//!
//! Files written before a failed store update are left in place.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod page;
pub mod provider;
pub mod reconcile;
pub mod stem;

use std::path::PathBuf;

use bytes::Bytes;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::database_ops::races::{CorrelationKey, KeyUpdate, RaceStore};
use artifacts::{ArtifactBlob, ArtifactKind, ArtifactSink};
use error::{SeedError, SeedResult};
use page::parse_seed_page;
use provider::{PatchFile, PatchLookup, SeedService};
use reconcile::{reconcile, MetadataSource, SeedMetadataRecord};
use stem::StemResolver;

#[derive(Debug, Clone)]
pub struct BackfillRequest {
    pub seed_id: u64,
    pub keys: Vec<CorrelationKey>,
    /// Ask the service to reveal a hidden spoiler log before giving up on it.
    pub unlock: bool,
    /// Only back up the patch and spoiler; no page scrape, no store updates.
    pub artifacts_only: bool,
}

impl BackfillRequest {
    pub fn new(seed_id: u64, keys: Vec<CorrelationKey>) -> Self {
        Self {
            seed_id,
            keys,
            unlock: true,
            artifacts_only: false,
        }
    }
}

/// Everything the remote side produced for one seed.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub patch: Option<PatchFile>,
    pub file_stem: String,
    /// Absent only in artifact-only mode when the authenticated lookup failed.
    pub source: Option<MetadataSource>,
    pub spoiler: Option<Bytes>,
    pub unlocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WrittenArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillSummary {
    pub seed_id: u64,
    pub source: Option<&'static str>,
    pub unlocked: bool,
    pub record: Option<SeedMetadataRecord>,
    pub artifacts: Vec<WrittenArtifact>,
    pub updates: Vec<KeyUpdate>,
}

/// The backfill pipeline with its collaborators. Built once per session.
pub struct SeedBackfill<'a> {
    service: &'a dyn SeedService,
    sink: &'a dyn ArtifactSink,
    store: &'a dyn RaceStore,
    stems: &'a dyn StemResolver,
}

impl<'a> SeedBackfill<'a> {
    pub fn new(
        service: &'a dyn SeedService,
        sink: &'a dyn ArtifactSink,
        store: &'a dyn RaceStore,
        stems: &'a dyn StemResolver,
    ) -> Self {
        Self {
            service,
            sink,
            store,
            stems,
        }
    }

    #[instrument(skip(self, req), fields(seed_id = req.seed_id, keys = req.keys.len()))]
    pub async fn run(&self, req: &BackfillRequest) -> SeedResult<BackfillSummary> {
        if req.keys.is_empty() && !req.artifacts_only {
            return Err(SeedError::NoCorrelationKeys);
        }

        let fetched = self.fetch(req).await?;

        let record = fetched
            .source
            .as_ref()
            .map(|source| reconcile(req.seed_id, fetched.file_stem.clone(), source))
            .transpose()?;
        if let (Some(MetadataSource::Scraped(_)), Some(rec)) = (&fetched.source, &record) {
            if rec.hashes.is_none() {
                warn!(seed_id = req.seed_id, "seed page shows no hash icons; hash columns will be cleared");
            }
        }

        let artifacts = self.write_artifacts(&fetched).await?;

        let updates = match (&record, req.artifacts_only) {
            (Some(rec), false) => self.store.apply(rec, &req.keys).await?,
            (None, false) => {
                return Err(SeedError::Store(format!(
                    "seed {}: no metadata to apply",
                    req.seed_id
                )))
            }
            (_, true) => Vec::new(),
        };

        info!(
            seed_id = req.seed_id,
            source = ?fetched.source.as_ref().map(MetadataSource::label),
            hashes = record.as_ref().is_some_and(|r| r.hashes.is_some()),
            artifacts = artifacts.len(),
            keys = updates.len(),
            "seed backfilled"
        );
        Ok(BackfillSummary {
            seed_id: req.seed_id,
            source: fetched.source.as_ref().map(MetadataSource::label),
            unlocked: fetched.unlocked,
            record,
            artifacts,
            updates,
        })
    }

    /// Remote stage. Only a refused authenticated lookup (non-2xx) falls back to the page.
    pub async fn fetch(&self, req: &BackfillRequest) -> SeedResult<FetchOutcome> {
        let seed_id = req.seed_id;
        let (patch, file_stem) = match self.service.patch(seed_id).await? {
            PatchLookup::Found(patch) => {
                let stem = patch.file_stem.clone();
                (Some(patch), stem)
            }
            PatchLookup::NotFound => {
                warn!(seed_id, "patch not found; asking for file stem");
                (None, self.stems.resolve(seed_id).await?)
            }
        };

        match self.service.details(seed_id).await {
            Ok(mut details) => {
                let mut unlocked = false;
                if details.spoiler_log.is_none() && req.unlock {
                    info!(seed_id, "spoiler log hidden; unlocking");
                    self.service.unlock(seed_id).await?;
                    details = self.service.details(seed_id).await?;
                    unlocked = true;
                    if details.spoiler_log.is_none() {
                        warn!(seed_id, "spoiler log still unavailable after unlock");
                    }
                }
                let spoiler = details.spoiler_log.clone().map(Bytes::from);
                Ok(FetchOutcome {
                    patch,
                    file_stem,
                    source: Some(MetadataSource::Authenticated(details)),
                    spoiler,
                    unlocked,
                })
            }
            Err(err @ SeedError::RemoteUnavailable { .. }) => {
                warn!(seed_id, error = %err, "authenticated lookup refused; falling back to seed page");
                let source = if req.artifacts_only {
                    None
                } else {
                    let html = self.service.seed_page(seed_id).await?;
                    Some(MetadataSource::Scraped(parse_seed_page(&html)?))
                };
                let spoiler = self.service.spoiler(seed_id).await?;
                Ok(FetchOutcome {
                    patch,
                    file_stem,
                    source,
                    spoiler,
                    unlocked: false,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn write_artifacts(&self, fetched: &FetchOutcome) -> SeedResult<Vec<WrittenArtifact>> {
        let mut blobs = Vec::with_capacity(2);
        if let Some(patch) = &fetched.patch {
            blobs.push(ArtifactBlob::patch(&patch.file_name, patch.bytes.clone()));
        }
        if let Some(spoiler) = &fetched.spoiler {
            blobs.push(ArtifactBlob::spoiler(&fetched.file_stem, spoiler.clone()));
        }
        let mut written = Vec::with_capacity(blobs.len());
        for blob in &blobs {
            let path = self.sink.write(blob).await?;
            written.push(WrittenArtifact {
                kind: blob.kind,
                path,
            });
        }
        Ok(written)
    }
}
