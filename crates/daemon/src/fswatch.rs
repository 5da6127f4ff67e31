// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem watcher fanout.
//!
//! Wraps the platform watcher behind `(path, event_mask, listener)`
//! registrations. Masks on the same path coalesce additively. Raw events
//! are queued by the backend thread and delivered to listeners on the
//! normal reactor via a user event, so listener code never runs on the
//! watcher backend thread.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use anyhow::Context;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::reactor::{Reactor, UserEvent};

/// Event bits delivered to listeners.
pub mod mask {
    pub const CREATE: u32 = 1 << 0;
    pub const ATTRIB: u32 = 1 << 1;
    pub const DELETE: u32 = 1 << 2;
    /// Modifier: the entry the event names is a directory.
    pub const IS_DIR: u32 = 1 << 3;
    /// The watched path itself was removed.
    pub const DELETE_SELF: u32 = 1 << 4;
}

/// Receives filesystem events for registered paths. `name` is present iff
/// the event names an entry inside the watched directory.
pub trait FsListener: Send + Sync {
    fn on_fs_event(&self, path: &Path, event_mask: u32, name: Option<&str>);
}

struct WatchEntry {
    path: PathBuf,
    mask: u32,
    listeners: Vec<Weak<dyn FsListener>>,
}

#[derive(Default)]
struct WatchState {
    entries: Vec<WatchEntry>,
    queue: VecDeque<(PathBuf, u32, Option<String>)>,
}

/// Directory/file watcher with listener fanout on the normal reactor.
pub struct FsWatcher {
    state: Arc<Mutex<WatchState>>,
    watcher: Mutex<RecommendedWatcher>,
    user_event: UserEvent,
}

impl FsWatcher {
    pub fn new(normal: &Reactor) -> anyhow::Result<Arc<Self>> {
        let state = Arc::new(Mutex::new(WatchState::default()));

        let dispatch_state = Arc::clone(&state);
        let user_event = normal.create_user_event(Box::new(move || {
            dispatch_queued(&dispatch_state);
        }));

        let handler_state = Arc::clone(&state);
        let handler_event = user_event.clone();
        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    enqueue(&handler_state, &event);
                    handler_event.trigger();
                }
                Err(e) => error!("filesystem watcher read error: {e}"),
            }
        })
        .context("creating filesystem watcher")?;

        Ok(Arc::new(Self { state, watcher: Mutex::new(watcher), user_event }))
    }

    /// Starts watching `path` and binds `listener` to the given mask bits.
    /// Registering the same path again widens the mask.
    pub fn register(
        &self,
        path: impl Into<PathBuf>,
        event_mask: u32,
        listener: &Arc<dyn FsListener>,
    ) -> anyhow::Result<()> {
        let path = path.into();
        let mut st = self.state.lock();
        if let Some(entry) = st.entries.iter_mut().find(|e| e.path == path) {
            entry.mask |= event_mask;
            entry.listeners.push(Arc::downgrade(listener));
            return Ok(());
        }
        self.watcher
            .lock()
            .watch(&path, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", path.display()))?;
        st.entries.push(WatchEntry {
            path,
            mask: event_mask,
            listeners: vec![Arc::downgrade(listener)],
        });
        Ok(())
    }

    /// Removes `listener` from one path, or from every path when `path` is
    /// `None`. Paths left without listeners are unwatched.
    pub fn unregister(&self, path: Option<&Path>, listener: &Arc<dyn FsListener>) {
        let mut st = self.state.lock();
        let mut unwatch = Vec::new();
        st.entries.retain_mut(|entry| {
            if path.is_some_and(|p| p != entry.path) {
                return true;
            }
            entry.listeners.retain(|weak| {
                weak.upgrade().is_some_and(|l| !Arc::ptr_eq(&l, listener))
            });
            if entry.listeners.is_empty() {
                unwatch.push(entry.path.clone());
                false
            } else {
                true
            }
        });
        drop(st);
        for p in unwatch {
            if let Err(e) = self.watcher.lock().unwatch(&p) {
                debug!(path = %p.display(), "unwatch failed: {e}");
            }
        }
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.user_event.disable();
    }
}

/// Converts a backend event into `(watch_path, mask, name)` tuples.
fn enqueue(state: &Mutex<WatchState>, event: &notify::Event) {
    use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
    use notify::EventKind;

    let mut st = state.lock();
    let st = &mut *st;
    for (idx, event_path) in event.paths.iter().enumerate() {
        let is_dir = matches!(
            event.kind,
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder)
        );
        let base = match event.kind {
            EventKind::Create(_) => mask::CREATE,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // [from, to]: the source vanishes, the target appears.
                if idx == 0 {
                    mask::DELETE
                } else {
                    mask::CREATE
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => mask::DELETE,
            EventKind::Modify(ModifyKind::Name(_)) => mask::CREATE,
            EventKind::Modify(_) => mask::ATTRIB,
            EventKind::Remove(_) => mask::DELETE,
            _ => continue,
        };

        for entry in &st.entries {
            let (fired, name) = if *event_path == entry.path {
                let fired = if base == mask::DELETE { mask::DELETE_SELF } else { base };
                (fired, None)
            } else if event_path.parent() == Some(entry.path.as_path()) {
                let name = event_path.file_name().map(|n| n.to_string_lossy().into_owned());
                (base | if is_dir { mask::IS_DIR } else { 0 }, name)
            } else {
                continue;
            };
            if fired & entry.mask != 0 {
                st.queue.push_back((entry.path.clone(), fired, name));
            }
        }
    }
}

/// Drains the pending queue on the normal reactor thread. No lock is held
/// across a listener callback.
fn dispatch_queued(state: &Mutex<WatchState>) {
    loop {
        let (path, fired, name, listeners) = {
            let mut st = state.lock();
            let Some((path, fired, name)) = st.queue.pop_front() else { break };
            let listeners: Vec<Arc<dyn FsListener>> = st
                .entries
                .iter()
                .filter(|e| e.path == path && e.mask & fired != 0)
                .flat_map(|e| e.listeners.iter().filter_map(Weak::upgrade))
                .collect();
            (path, fired, name, listeners)
        };
        for listener in listeners {
            listener.on_fs_event(&path, fired, name.as_deref());
        }
    }
}

#[cfg(test)]
#[path = "fswatch_tests.rs"]
mod tests;
