//! Artifact storage: writing generated images to disk and mapping stored
//! files to public URLs.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::engine::contracts::EngineKind;

/// Output directory for one engine: an explicit `output_dir` option wins,
/// otherwise a per-kind subdirectory of the configured base path.
pub fn resolve_output_dir(settings: &EngineSettings, default_base: &Path) -> PathBuf {
    match settings.option("output_dir") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default_base.join(settings.kind.as_str()),
    }
}

/// Write one image under `dir` with a collision-free name and return the
/// absolute path. The directory is created on demand, not before.
pub async fn write_artifact(
    dir: &Path,
    kind: EngineKind,
    ext: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let filename = format!("{}_{}_{}.{}", kind, stamp, short_id(), ext);
    let path = dir.join(filename);

    tokio::fs::write(&path, bytes).await?;
    debug!(path = %path.display(), size = bytes.len(), "Artifact written");

    absolute(&path)
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Maps stored artifact files to the public URLs they are served from
pub struct ArtifactStore {
    base_path: PathBuf,
    url_prefix: String,
}

impl ArtifactStore {
    pub fn new(base_path: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix = url_prefix.into().trim_end_matches('/').to_string();
        Self {
            base_path: base_path.into(),
            url_prefix,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Public URL for a stored artifact. The path is rooted at the storage
    /// base so per-engine subdirectories survive into the URL.
    pub fn url_for(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.base_path)
            .ok()
            .or_else(|| {
                // Absolute artifact paths still contain the base dir name.
                let base_name = self.base_path.file_name()?;
                let mut components = path.components();
                while let Some(component) = components.next() {
                    if component.as_os_str() == base_name {
                        return Some(components.as_path());
                    }
                }
                None
            })
            .unwrap_or_else(|| Path::new(path.file_name().unwrap_or(path.as_os_str())));

        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        format!("{}/{}", self.url_prefix, segments.join("/"))
    }

    pub fn is_local_url(&self, url: &str) -> bool {
        url.starts_with(&self.url_prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.url_prefix
    }
}
