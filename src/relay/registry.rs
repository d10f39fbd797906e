//! Registration table: which channel of each group takes part in the relay.

use super::message::ChannelRegistration;
use crate::error::{RelayError, RelayResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

/// Header written to the durable table. A `groupId` first column is accepted on load.
const TABLE_HEADER: &str = "serverId,channelId";
const ALT_GROUP_COLUMN: &str = "groupId";

/// In-memory ordered registration list backed by a two-column table on disk
#[derive(Debug)]
pub struct RegistrationStore {
    /// Path of the durable table
    path: PathBuf,
    /// Registrations in registration order
    entries: RwLock<Vec<ChannelRegistration>>,
    /// Serializes snapshot + rename so an older snapshot never lands last
    save_lock: Mutex<()>,
}

impl RegistrationStore {
    /// Create an empty store backed by `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(Vec::new()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory list with the durable table.
    ///
    /// A missing or unreadable table leaves the store empty; the failure is logged and
    /// startup continues.
    pub fn load(&self) -> Vec<ChannelRegistration> {
        let loaded = match read_table(&self.path) {
            Ok(entries) => {
                info!(
                    path = %self.path.display(),
                    count = entries.len(),
                    "Loaded registration table"
                );
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No registration table yet, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read registration table, starting empty");
                Vec::new()
            }
        };

        *self.write() = loaded.clone();
        loaded
    }

    /// Rewrite the durable table from the in-memory list.
    ///
    /// The table is written to a temporary file in the same directory and renamed over
    /// the old one, so a failed write never corrupts the previous state.
    pub fn save(&self) -> RelayResult<()> {
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = self.all();
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(render_table(&snapshot).as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| RelayError::Persist(e.error))?;
        Ok(())
    }

    /// Add a registration. A group may own at most one relay channel.
    pub fn register(&self, group_id: &str, channel_id: &str) -> RelayResult<ChannelRegistration> {
        let mut entries = self.write();
        if let Some(existing) = entries.iter().find(|r| r.group_id == group_id) {
            return Err(RelayError::AlreadyRegistered {
                group_id: group_id.to_string(),
                channel_id: existing.channel_id.clone(),
            });
        }

        let registration = ChannelRegistration::new(group_id, channel_id);
        entries.push(registration.clone());
        Ok(registration)
    }

    /// Remove the registration of a group
    pub fn unregister(&self, group_id: &str) -> RelayResult<ChannelRegistration> {
        let mut entries = self.write();
        let pos = entries
            .iter()
            .position(|r| r.group_id == group_id)
            .ok_or_else(|| RelayError::NotRegistered {
                group_id: group_id.to_string(),
            })?;
        Ok(entries.remove(pos))
    }

    /// Snapshot of all registrations, in registration order
    pub fn all(&self) -> Vec<ChannelRegistration> {
        self.read().clone()
    }

    /// Registration owned by a group
    pub fn find_by_group(&self, group_id: &str) -> Option<ChannelRegistration> {
        self.read().iter().find(|r| r.group_id == group_id).cloned()
    }

    /// Whether a channel is part of the mesh
    pub fn contains_channel(&self, channel_id: &str) -> bool {
        self.read().iter().any(|r| r.channel_id == channel_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ChannelRegistration>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ChannelRegistration>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn read_table(path: &Path) -> std::io::Result<Vec<ChannelRegistration>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_table(&content))
}

/// Parse the two-column table. Blank and malformed lines are skipped.
fn parse_table(content: &str) -> Vec<ChannelRegistration> {
    let mut entries = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut cols = line.split(',').map(str::trim);
        let (group_id, channel_id) = match (cols.next(), cols.next(), cols.next()) {
            (Some(g), Some(c), None) if !g.is_empty() && !c.is_empty() => (g, c),
            _ => {
                warn!(line = idx + 1, "Skipping malformed registration row");
                continue;
            }
        };

        if idx == 0 && is_header(group_id, channel_id) {
            continue;
        }

        entries.push(ChannelRegistration::new(group_id, channel_id));
    }

    entries
}

fn is_header(first: &str, second: &str) -> bool {
    let expected_group = TABLE_HEADER.split(',').next().unwrap_or_default();
    (first == expected_group || first == ALT_GROUP_COLUMN) && second == "channelId"
}

fn render_table(entries: &[ChannelRegistration]) -> String {
    let mut out = String::with_capacity(TABLE_HEADER.len() + 1 + entries.len() * 40);
    out.push_str(TABLE_HEADER);
    out.push('\n');
    for entry in entries {
        out.push_str(&entry.group_id);
        out.push(',');
        out.push_str(&entry.channel_id);
        out.push('\n');
    }
    out
}
