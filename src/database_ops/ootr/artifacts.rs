use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::info;

use super::error::{SeedError, SeedResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Patch,
    Spoiler,
}

#[derive(Debug, Clone)]
pub struct ArtifactBlob {
    pub kind: ArtifactKind,
    /// Final file name inside the sink.
    pub file_name: String,
    pub bytes: Bytes,
}

impl ArtifactBlob {
    /// Patch blobs keep the name the service gave them.
    pub fn patch(file_name: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            kind: ArtifactKind::Patch,
            file_name: file_name.into(),
            bytes,
        }
    }

    pub fn spoiler(file_stem: &str, bytes: Bytes) -> Self {
        Self {
            kind: ArtifactKind::Spoiler,
            file_name: spoiler_file_name(file_stem),
            bytes,
        }
    }
}

pub fn spoiler_file_name(file_stem: &str) -> String {
    format!("{file_stem}_Spoiler.json")
}

/// Where patch and spoiler files end up.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn write(&self, blob: &ArtifactBlob) -> SeedResult<PathBuf>;
}

/// Flat directory of seed files (the site's `seed/` directory).
#[derive(Debug, Clone)]
pub struct SeedDir {
    root: PathBuf,
}

impl SeedDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, file_name: &str) -> SeedResult<PathBuf> {
        let rel = Path::new(file_name);
        let mut comps = rel.components();
        match (comps.next(), comps.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(rel)),
            _ => Err(SeedError::parse(format!(
                "refusing to write artifact outside seed dir: {file_name:?}"
            ))),
        }
    }
}

#[async_trait]
impl ArtifactSink for SeedDir {
    async fn write(&self, blob: &ArtifactBlob) -> SeedResult<PathBuf> {
        let path = self.target(&blob.file_name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, &blob.bytes).await?;
        info!(kind = ?blob.kind, path = %path.display(), bytes = blob.bytes.len(), "wrote artifact");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_patch_and_spoiler_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SeedDir::new(dir.path());

        let patch = ArtifactBlob::patch("OoT_ABC.zpfz", Bytes::from_static(b"\x00\x01"));
        let p = sink.write(&patch).await.unwrap();
        assert_eq!(p, dir.path().join("OoT_ABC.zpfz"));
        assert_eq!(std::fs::read(&p).unwrap(), b"\x00\x01");

        let spoiler = ArtifactBlob::spoiler("OoT_ABC", Bytes::from_static(b"{}"));
        let s = sink.write(&spoiler).await.unwrap();
        assert_eq!(s, dir.path().join("OoT_ABC_Spoiler.json"));
        assert_eq!(std::fs::read_to_string(&s).unwrap(), "{}");
    }

    #[tokio::test]
    async fn rejects_names_that_escape_the_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SeedDir::new(dir.path());
        for bad in ["../x.zpf", "a/b.zpf", "/etc/passwd", ""] {
            let blob = ArtifactBlob::patch(bad, Bytes::new());
            assert!(sink.write(&blob).await.is_err(), "{bad}");
        }
    }
}
