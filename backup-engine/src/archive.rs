//! Archive builder: one zstd-compressed tarball per backup folder.
//!
//! The archive is streamed into `<name>.partial` and only renamed to its
//! final name once the tar and zstd streams have both been closed and the file
//! synced. Any failure removes the partial file, so nothing incomplete can be
//! picked up by the uploader or by retention.

use chrono::{DateTime, Utc};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{EngineError, Result};
use crate::naming::{archive_file_name, archive_instant};
use crate::types::{ArchiveArtifact, BackupTask};

/// zstd level used for archives. 20-22 need the long-window "ultra" mode and
/// several times the memory for little gain on world data.
pub const COMPRESSION_LEVEL: i32 = 19;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Default, Clone, Copy)]
struct ArchiveStats {
    files: u64,
    bytes: u64,
}

pub struct ArchiveBuilder {
    backup_dir: PathBuf,
    level: i32,
}

impl ArchiveBuilder {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            level: COMPRESSION_LEVEL,
        }
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub async fn build_archive(&self, task: &BackupTask) -> Result<ArchiveArtifact> {
        self.build_archive_at(task, Utc::now()).await
    }

    pub async fn build_archive_at(&self, task: &BackupTask, at: DateTime<Utc>) -> Result<ArchiveArtifact> {
        check_source(&task.source_path).await?;
        tokio::fs::create_dir_all(&self.backup_dir).await?;

        let created_at = archive_instant(at);
        let file_name = archive_file_name(&task.label, created_at);
        let final_path = self.backup_dir.join(&file_name);
        let partial_path = self.backup_dir.join(format!("{file_name}{PARTIAL_SUFFIX}"));

        info!(label = %task.label, source = %task.source_path.display(), "Building archive");

        let source = task.source_path.clone();
        let root = PathBuf::from(&task.label);
        let dest = partial_path.clone();
        let level = self.level;
        let written = tokio::task::spawn_blocking(move || write_archive(&source, &root, &dest, level))
            .await
            .map_err(EngineError::from)
            .and_then(|r| r);

        let stats = match written {
            Ok(stats) => stats,
            Err(e) => {
                discard(&partial_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
            discard(&partial_path).await;
            return Err(e.into());
        }

        let size = tokio::fs::metadata(&final_path).await.map(|m| m.len()).unwrap_or(0);
        info!(
            label = %task.label,
            archive = %file_name,
            files = stats.files,
            source_bytes = stats.bytes,
            archive_bytes = size,
            "Archive complete"
        );

        Ok(ArchiveArtifact {
            local_path: final_path,
            label: task.label.clone(),
            created_at,
        })
    }
}

/// Fails with `SourceUnavailable` unless `path` is a directory we can list.
pub async fn check_source(path: &Path) -> Result<()> {
    let unavailable = |reason: String| EngineError::SourceUnavailable {
        path: path.display().to_string(),
        reason,
    };

    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    if !meta.is_dir() {
        return Err(unavailable("not a directory".into()));
    }
    tokio::fs::read_dir(path)
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial archive");
        }
    }
}

fn write_archive(source: &Path, root: &Path, dest: &Path, level: i32) -> Result<ArchiveStats> {
    let file = File::create(dest)?;
    let encoder = zstd::Encoder::new(file, level)?;
    let mut tar = tar::Builder::new(encoder);
    tar.follow_symlinks(false);

    let mut stats = ArchiveStats::default();
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| EngineError::Archive(format!("walking {}: {}", source.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| EngineError::Archive(e.to_string()))?;
        let name = root.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            tar.append_dir(&name, entry.path())?;
        } else if file_type.is_file() {
            let mut f = File::open(entry.path())?;
            stats.bytes += f.metadata()?.len();
            tar.append_file(&name, &mut f)?;
            stats.files += 1;
        } else if file_type.is_symlink() {
            tar.append_path_with_name(entry.path(), &name)?;
        }
    }

    let encoder = tar.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(stats)
}
