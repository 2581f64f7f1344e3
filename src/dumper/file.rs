use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use sysinfo::Disks;
use tempfile::NamedTempFile;

use super::{ensure_persistable, DumpError, Dumper};
use crate::storage::snapshot::Snapshot;

const MAX_DISK_USAGE_PERCENT: f64 = 90.0;
#[cfg(unix)]
const NEW_SNAPSHOT_MODE: u32 = 0o644;

/// Keeps the snapshot as a pretty-printed JSON document.
///
/// Saves go through a temporary file in the same directory which is then
/// renamed over the target, so an interrupted save leaves the previous
/// document in place. The replacement keeps the permissions of the document
/// it replaces (`0644` for a new one) and the directory is synced after the
/// rename so the new entry survives a power loss.
#[derive(Debug)]
pub struct FileDumper {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDumper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        self.path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn snapshot_permissions(&self) -> Option<fs::Permissions> {
        match fs::metadata(&self.path) {
            Ok(meta) => Some(meta.permissions()),
            #[cfg(unix)]
            Err(_) => {
                use std::os::unix::fs::PermissionsExt;
                Some(fs::Permissions::from_mode(NEW_SNAPSHOT_MODE))
            }
            #[cfg(not(unix))]
            Err(_) => None,
        }
    }

    #[cfg(unix)]
    fn sync_directory(&self) {
        if let Err(err) = fs::File::open(self.directory()).and_then(|dir| dir.sync_all()) {
            log::warn!(
                "Cannot sync directory of '{}' - {err}",
                self.path.display()
            );
        }
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) {}
}

impl Dumper for FileDumper {
    fn save_data(&self, snapshot: &Snapshot) -> Result<(), DumpError> {
        ensure_persistable(snapshot)?;
        let data = serde_json::to_vec_pretty(snapshot).map_err(DumpError::Serialize)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tmp = NamedTempFile::new_in(self.directory())?;
        tmp.write_all(&data)?;
        if let Some(permissions) = self.snapshot_permissions() {
            tmp.as_file().set_permissions(permissions)?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| DumpError::Io(err.error))?;
        self.sync_directory();

        log::debug!(
            "Saved {} metrics to '{}'",
            snapshot.len(),
            self.path.display()
        );
        Ok(())
    }

    fn restore_data(&self) -> Result<Snapshot, DumpError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(DumpError::NotFound {
                    path: self.path.clone(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&data).map_err(|source| DumpError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    fn check_health(&self) -> bool {
        let dir = match fs::canonicalize(self.directory()) {
            Ok(dir) => dir,
            Err(err) => {
                log::warn!("Snapshot directory of '{}' unavailable - {err}", self.path.display());
                return false;
            }
        };
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| dir.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| has_room(disk.total_space(), disk.available_space()))
            .unwrap_or_else(|| {
                log::warn!("No filesystem found for '{}'", dir.display());
                false
            })
    }
}

fn has_room(total: u64, available: u64) -> bool {
    if total == 0 {
        return false;
    }
    let usage = (1.0 - available as f64 / total as f64) * 100.0;
    usage < MAX_DISK_USAGE_PERCENT
}
