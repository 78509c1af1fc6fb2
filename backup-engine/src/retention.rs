//! Retention: keep the newest `max_backups` archives of a folder, in either store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::naming::parse_archive_file_name;
use crate::remote::ObjectStore;
use crate::types::{RemoteFileRef, RemoteFolderRef, RetentionPolicy};

/// One archive as seen by retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedItem {
    /// Store-specific handle: a path locally, a file id remotely
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// The set of archives belonging to one label in one store.
#[async_trait]
pub trait RetentionScope: Send + Sync {
    fn describe(&self) -> String;

    async fn list(&self) -> Result<Vec<RetainedItem>>;

    async fn delete(&self, item: &RetainedItem) -> Result<()>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    pub kept: usize,
    pub deleted: usize,
    /// Names of excess items that could not be deleted
    pub failed: Vec<String>,
}

impl RetentionReport {
    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Delete everything past the newest `policy.max_backups` items. `protect`
/// names an item that is never deleted, normally the archive just produced.
pub async fn enforce<S>(scope: &S, policy: RetentionPolicy, protect: Option<&str>) -> Result<RetentionReport>
where
    S: RetentionScope + ?Sized,
{
    if !policy.is_enabled() {
        debug!(scope = %scope.describe(), "Retention disabled, keeping all archives");
        return Ok(RetentionReport::default());
    }

    let mut items = scope.list().await?;
    items.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });

    let total = items.len();
    let excess: Vec<RetainedItem> = items
        .into_iter()
        .skip(policy.max_backups)
        .filter(|item| Some(item.name.as_str()) != protect)
        .collect();

    let mut report = RetentionReport {
        kept: total - excess.len(),
        ..RetentionReport::default()
    };

    for item in &excess {
        match scope.delete(item).await {
            Ok(()) => {
                report.deleted += 1;
                info!(scope = %scope.describe(), name = %item.name, "Removed old backup");
            }
            Err(e) => {
                warn!(scope = %scope.describe(), name = %item.name, error = %e, "Failed to remove old backup");
                report.failed.push(item.name.clone());
            }
        }
    }

    if report.deleted > 0 || report.is_partial_failure() {
        info!(
            scope = %scope.describe(),
            kept = report.kept,
            deleted = report.deleted,
            failed = report.failed.len(),
            "Retention applied"
        );
    }
    Ok(report)
}

/// Archives of one label in the local backup directory, identified by file name.
pub struct LocalScope {
    dir: PathBuf,
    label: String,
}

impl LocalScope {
    pub fn new(dir: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            label: label.into(),
        }
    }
}

#[async_trait]
impl RetentionScope for LocalScope {
    fn describe(&self) -> String {
        format!("local:{}", self.label)
    }

    async fn list(&self) -> Result<Vec<RetainedItem>> {
        let mut items = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(parsed) = parse_archive_file_name(&name) else {
                continue;
            };
            if parsed.label != self.label {
                continue;
            }
            items.push(RetainedItem {
                id: entry.path().to_string_lossy().into_owned(),
                name,
                created_at: parsed.created_at,
            });
        }
        Ok(items)
    }

    async fn delete(&self, item: &RetainedItem) -> Result<()> {
        tokio::fs::remove_file(&item.id).await?;
        Ok(())
    }
}

/// Files inside a label's remote folder, ordered by the store's creation time.
pub struct RemoteScope {
    store: Arc<dyn ObjectStore>,
    folder: RemoteFolderRef,
}

impl RemoteScope {
    pub fn new(store: Arc<dyn ObjectStore>, folder: RemoteFolderRef) -> Self {
        Self { store, folder }
    }
}

#[async_trait]
impl RetentionScope for RemoteScope {
    fn describe(&self) -> String {
        format!("remote:{}", self.folder.name)
    }

    async fn list(&self) -> Result<Vec<RetainedItem>> {
        let files = self.store.list_files(&self.folder).await?;
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            let created_at = file
                .created_at
                .or_else(|| parse_archive_file_name(&file.name).map(|p| p.created_at));
            match created_at {
                Some(created_at) => items.push(RetainedItem {
                    id: file.id,
                    name: file.name,
                    created_at,
                }),
                None => debug!(name = %file.name, "Skipping remote file without a creation time"),
            }
        }
        Ok(items)
    }

    async fn delete(&self, item: &RetainedItem) -> Result<()> {
        self.store
            .delete_file(&RemoteFileRef {
                id: item.id.clone(),
                name: item.name.clone(),
                created_at: Some(item.created_at),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::archive_file_name;
    use crate::testing::MockStore;
    use chrono::{Duration, TimeZone};
    use std::fs;
    use tempfile::TempDir;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 4, 20, 0).unwrap() + Duration::days(n)
    }

    fn seed_local(dir: &std::path::Path, label: &str, count: i64) -> Vec<String> {
        (0..count)
            .map(|n| {
                let name = archive_file_name(label, day(n));
                fs::write(dir.join(&name), b"archive").unwrap();
                name
            })
            .collect()
    }

    fn local_names(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_keeps_newest_k_for_every_n_and_k() {
        for n in 0..8i64 {
            for k in 0..8usize {
                let tmp = TempDir::new().unwrap();
                let names = seed_local(tmp.path(), "world1", n);
                let scope = LocalScope::new(tmp.path(), "world1");

                let report = enforce(&scope, RetentionPolicy::keep(k), None).await.unwrap();

                let expected: Vec<String> = if k == 0 {
                    names.clone()
                } else {
                    names.iter().skip((n as usize).saturating_sub(k)).cloned().collect()
                };
                assert_eq!(local_names(tmp.path()), expected, "n={n} k={k}");
                let deleted = if k == 0 { 0 } else { (n as usize).saturating_sub(k) };
                assert_eq!(report.deleted, deleted, "n={n} k={k}");
            }
        }
    }

    #[tokio::test]
    async fn test_zero_policy_deletes_nothing() {
        let tmp = TempDir::new().unwrap();
        seed_local(tmp.path(), "world1", 12);

        let report = enforce(&LocalScope::new(tmp.path(), "world1"), RetentionPolicy::keep(0), None)
            .await
            .unwrap();

        assert_eq!(report, RetentionReport::default());
        assert_eq!(local_names(tmp.path()).len(), 12);
    }

    #[tokio::test]
    async fn test_local_scope_only_touches_own_label() {
        let tmp = TempDir::new().unwrap();
        seed_local(tmp.path(), "world1", 4);
        let others = seed_local(tmp.path(), "world10", 3);
        fs::write(tmp.path().join("README.txt"), b"keep me").unwrap();

        enforce(&LocalScope::new(tmp.path(), "world1"), RetentionPolicy::keep(1), None)
            .await
            .unwrap();

        let remaining = local_names(tmp.path());
        assert_eq!(remaining.len(), 1 + others.len() + 1);
        for other in &others {
            assert!(remaining.contains(other));
        }
        assert!(remaining.contains(&"README.txt".to_string()));
        assert!(remaining.contains(&archive_file_name("world1", day(3))));
    }

    #[tokio::test]
    async fn test_missing_local_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let scope = LocalScope::new(tmp.path().join("nope"), "world1");
        let report = enforce(&scope, RetentionPolicy::keep(2), None).await.unwrap();
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn test_seven_remote_archives_keep_five() {
        let store = Arc::new(MockStore::new());
        let folder = store.add_folder("world1");
        // uploaded out of order; the store's timestamps decide
        for n in [3, 0, 6, 1, 5, 2, 4] {
            store.add_file(&folder, &archive_file_name("world1", day(n)));
        }

        let scope = RemoteScope::new(store.clone(), folder.clone());
        let report = enforce(&scope, RetentionPolicy::keep(5), None).await.unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.kept, 5);
        let remaining = store.file_names(&folder);
        assert_eq!(remaining.len(), 5);
        assert!(!remaining.contains(&archive_file_name("world1", day(0))));
        assert!(!remaining.contains(&archive_file_name("world1", day(1))));
    }

    #[tokio::test]
    async fn test_remote_delete_failure_does_not_stop_others() {
        let store = Arc::new(MockStore::new());
        let folder = store.add_folder("world1");
        let files: Vec<_> = (0..5)
            .map(|n| store.add_file(&folder, &archive_file_name("world1", day(n))))
            .collect();
        store.fail_delete(&files[0]);

        let scope = RemoteScope::new(store.clone(), folder.clone());
        let report = enforce(&scope, RetentionPolicy::keep(2), None).await.unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, vec![files[0].name.clone()]);
        assert!(report.is_partial_failure());
        assert_eq!(store.file_names(&folder).len(), 3);
    }

    #[tokio::test]
    async fn test_protected_item_is_never_excess() {
        let tmp = TempDir::new().unwrap();
        let names = seed_local(tmp.path(), "world1", 3);
        // the newest archive claims to be from the past (clock went backwards)
        let current = archive_file_name("world1", day(-10));
        fs::write(tmp.path().join(&current), b"fresh").unwrap();

        let report = enforce(
            &LocalScope::new(tmp.path(), "world1"),
            RetentionPolicy::keep(2),
            Some(&current),
        )
        .await
        .unwrap();

        assert_eq!(report.deleted, 1);
        let remaining = local_names(tmp.path());
        assert!(remaining.contains(&current));
        assert!(!remaining.contains(&names[0]));
    }
}
