// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent alias store.
//!
//! Two tables in one JSON file: at most one provider alias, and a
//! device-name → alias map where both columns are unique. Writes are
//! staged on a scoped transaction whose release path rolls back; only an
//! explicit `commit()` persists (atomic tmp-file + rename). A missing or
//! unreadable backing file degrades the store to `ErrFile`, a
//! write-protected one to `ReadOnly`; reads keep working in both cases and
//! writes report failure instead of raising.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fswatch::{mask, FsListener, FsWatcher};

/// Notified after every committed or externally observed change.
pub trait AliasListener: Send + Sync {
    fn on_alias_change(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Init,
    Ok,
    /// Backing file exists but cannot be written.
    ReadOnly,
    /// Backing file missing, unreadable or corrupt.
    ErrFile,
}

impl StoreState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Ok => "OK",
            Self::ReadOnly => "READONLY",
            Self::ErrFile => "ERR_FILE",
        }
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct AliasFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider_alias: Option<String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

struct StoreInner {
    state: StoreState,
    data: AliasFile,
}

/// Alias persistence keyed by device name, plus the single provider alias.
pub struct AliasStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
    listeners: Mutex<Vec<Weak<dyn AliasListener>>>,
}

impl AliasStore {
    /// Opens (creating if necessary) the backing file. Failures degrade the
    /// store instead of failing construction.
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let mut inner = StoreInner { state: StoreState::Init, data: AliasFile::default() };

        if !path.exists() {
            if let Err(e) = persist(&path, &inner.data) {
                warn!(path = %path.display(), "cannot create alias file, store degraded: {e}");
                inner.state = StoreState::ErrFile;
            }
        }

        if inner.state == StoreState::Init {
            match load(&path) {
                Ok(data) => {
                    inner.data = data;
                    inner.state = if writable(&path) { StoreState::Ok } else { StoreState::ReadOnly };
                }
                Err(e) => {
                    warn!(path = %path.display(), "cannot load alias file, store degraded: {e}");
                    inner.state = StoreState::ErrFile;
                }
            }
        }

        info!(path = %path.display(), state = %inner.state, "alias store opened");
        Arc::new(Self { path, inner: Mutex::new(inner), listeners: Mutex::new(Vec::new()) })
    }

    /// Watches the backing file's directory so external edits are picked up
    /// and fanned out to subscribers.
    pub fn watch_file(self: &Arc<Self>, watcher: &FsWatcher) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new(".")).to_owned();
        let as_listener: Arc<dyn FsListener> = Arc::clone(self) as Arc<dyn FsListener>;
        watcher.register(dir, mask::CREATE | mask::ATTRIB, &as_listener)
    }

    pub fn state(&self) -> StoreState {
        self.inner.lock().state
    }

    pub fn provider_alias(&self) -> Option<String> {
        let inner = self.inner.lock();
        if inner.state == StoreState::ErrFile {
            return None;
        }
        inner.data.provider_alias.clone()
    }

    /// Full device → alias map. Empty when the store is degraded.
    pub fn get_all(&self) -> BTreeMap<String, String> {
        let inner = self.inner.lock();
        if inner.state == StoreState::ErrFile {
            return BTreeMap::new();
        }
        inner.data.aliases.clone()
    }

    pub fn subscribe(&self, listener: &Arc<dyn AliasListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    /// Stages a write. Returns `None` unless the store is writable.
    pub fn begin(&self) -> Option<AliasTxn<'_>> {
        let guard = self.inner.lock();
        if guard.state != StoreState::Ok {
            return None;
        }
        let staged = guard.data.clone();
        Some(AliasTxn { path: &self.path, guard, staged })
    }

    pub fn set_provider_alias(&self, alias: &str) -> bool {
        let committed = match self.begin() {
            Some(mut txn) => {
                txn.set_provider_alias(alias);
                txn.commit()
            }
            None => false,
        };
        if committed {
            self.notify_listeners();
        }
        committed
    }

    pub fn set_alias(&self, device: &str, alias: &str) -> bool {
        if device.is_empty() {
            return false;
        }
        if alias.is_empty() {
            return self.remove_alias(device);
        }
        let committed = match self.begin() {
            Some(mut txn) => {
                if !txn.insert_device_alias(device, alias) {
                    return false;
                }
                txn.commit()
            }
            None => false,
        };
        if committed {
            self.notify_listeners();
        }
        committed
    }

    pub fn remove_alias(&self, device: &str) -> bool {
        if device.is_empty() {
            return false;
        }
        let committed = match self.begin() {
            Some(mut txn) => {
                txn.remove_device_alias(device);
                txn.commit()
            }
            None => false,
        };
        if committed {
            self.notify_listeners();
        }
        committed
    }

    fn reload(&self) {
        match load(&self.path) {
            Ok(data) => {
                let mut inner = self.inner.lock();
                if inner.data != data {
                    debug!(path = %self.path.display(), "alias file changed on disk");
                }
                inner.data = data;
            }
            Err(e) => warn!(path = %self.path.display(), "alias file reload failed: {e}"),
        }
    }

    fn notify_listeners(&self) {
        let listeners: Vec<Arc<dyn AliasListener>> =
            self.listeners.lock().iter().filter_map(Weak::upgrade).collect();
        for listener in listeners {
            listener.on_alias_change();
        }
    }
}

impl FsListener for AliasStore {
    fn on_fs_event(&self, _path: &Path, _event_mask: u32, name: Option<&str>) {
        let own_name = self.path.file_name().map(|n| n.to_string_lossy().into_owned());
        if name.map(str::to_owned) != own_name {
            return;
        }
        self.reload();
        self.notify_listeners();
    }
}

/// Scoped alias write. Dropping the handle discards the staged mutation;
/// `commit()` persists it atomically and publishes it to readers.
pub struct AliasTxn<'a> {
    path: &'a Path,
    guard: MutexGuard<'a, StoreInner>,
    staged: AliasFile,
}

impl AliasTxn<'_> {
    /// Stages the provider alias; an empty string clears it.
    pub fn set_provider_alias(&mut self, alias: &str) {
        self.staged.provider_alias = if alias.is_empty() { None } else { Some(alias.to_owned()) };
    }

    /// Stages a device alias. Fails when another device already holds the
    /// alias (both columns are unique).
    pub fn insert_device_alias(&mut self, device: &str, alias: &str) -> bool {
        let taken = self.staged.aliases.iter().any(|(d, a)| a == alias && d != device);
        if taken {
            debug!(alias, "alias already assigned to another device");
            return false;
        }
        self.staged.aliases.insert(device.to_owned(), alias.to_owned());
        true
    }

    pub fn remove_device_alias(&mut self, device: &str) {
        self.staged.aliases.remove(device);
    }

    /// Persists the staged tables. On failure nothing is applied and the
    /// in-memory view keeps its previous content.
    pub fn commit(mut self) -> bool {
        match persist(self.path, &self.staged) {
            Ok(()) => {
                self.guard.data = std::mem::take(&mut self.staged);
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), "alias write failed, rolled back: {e}");
                false
            }
        }
    }
}

fn load(path: &Path) -> anyhow::Result<AliasFile> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Atomic save: write a sibling tmp file, then rename over the target.
/// Contention with a concurrent writer is absorbed by a short busy-wait.
fn persist(path: &Path, data: &AliasFile) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    let tmp_path = path.with_extension("tmp");
    let mut last_err = None;
    for _ in 0..3 {
        let attempt = std::fs::write(&tmp_path, &json)
            .and_then(|()| std::fs::rename(&tmp_path, path));
        match attempt {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_err = Some(e);
                std::thread::sleep(Duration::from_millis(3));
            }
        }
    }
    match last_err {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn writable(path: &Path) -> bool {
    std::fs::OpenOptions::new().write(true).open(path).is_ok()
}

#[cfg(test)]
#[path = "aliases_tests.rs"]
mod tests;
