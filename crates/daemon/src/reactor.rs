// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event reactor: one worker thread multiplexing fd readiness and
//! user-triggered events over poll(2).
//!
//! Two instances exist in a daemon: a normal-priority reactor for listener
//! fanout and housekeeping, and a realtime reactor (SCHED_FIFO, mid-range
//! priority) that drives the serial fds. Read/write callbacks return
//! whether they wish to stay armed; an armed callback is re-fired after a
//! one second keep-alive timeout even when its fd stays idle.
//! `UserEvent::trigger` may be called from any thread and coalesces: N
//! triggers produce between one and N listener invocations on the reactor
//! thread.

use std::collections::HashMap;
use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use nix::errno::Errno;
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

/// Readiness callback. Returns `true` to stay armed.
pub type IoCallback = Box<dyn FnMut(RawFd) -> bool + Send>;

/// Listener invoked on the reactor thread for a triggered [`UserEvent`].
pub type UserCallback = Box<dyn FnMut() + Send>;

/// Scheduling policy of the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Normal,
    /// SCHED_FIFO at mid-range priority. Falls back to normal scheduling
    /// with a warning when the process lacks the privilege.
    Realtime,
}

const KEEP_ALIVE: Duration = Duration::from_secs(1);

struct IoSlot {
    cb: IoCallback,
    deadline: Instant,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

struct UserState {
    enabled: bool,
    listener: Option<UserCallback>,
}

struct UserSlot {
    pending: AtomicBool,
    state: Mutex<UserState>,
}

/// Handle to a registered user event.
///
/// Dropping the handle does not disable the event; call
/// [`UserEvent::disable`] to detach the listener.
#[derive(Clone)]
pub struct UserEvent {
    slot: Arc<UserSlot>,
    reactor: Arc<Inner>,
}

impl UserEvent {
    /// Schedules one listener invocation on the reactor thread. Triggers
    /// arriving before the listener ran coalesce into a single invocation.
    pub fn trigger(&self) {
        let enabled = self.slot.state.lock().enabled;
        if enabled {
            self.slot.pending.store(true, Ordering::SeqCst);
            self.reactor.wake();
        }
    }

    /// Detaches the listener. No invocation starts after this returns,
    /// though one already running on the reactor thread may finish.
    pub fn disable(&self) {
        {
            let mut st = self.slot.state.lock();
            st.enabled = false;
            st.listener = None;
        }
        self.slot.pending.store(false, Ordering::SeqCst);
        self.reactor.wake();
    }
}

struct LoopState {
    running: bool,
    read: HashMap<RawFd, IoSlot>,
    write: HashMap<RawFd, IoSlot>,
    user: Vec<Arc<UserSlot>>,
    /// fd whose callback currently runs, per direction, and whether it was
    /// unregistered while running.
    in_flight: [Option<(RawFd, bool)>; 2],
}

struct Inner {
    name: &'static str,
    wake_fd: EventFd,
    state: Mutex<LoopState>,
}

impl Inner {
    fn wake(&self) {
        if let Err(e) = nix::unistd::write(&self.wake_fd, &1u64.to_ne_bytes()) {
            if e != Errno::EAGAIN {
                warn!(reactor = self.name, "wake write failed: {e}");
            }
        }
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 8];
        while let Ok(n) = nix::unistd::read(&self.wake_fd, &mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

/// A poll(2) event loop on a dedicated worker thread.
pub struct Reactor {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    pub fn new(name: &'static str, policy: Policy) -> anyhow::Result<Arc<Self>> {
        let wake_fd = EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK)
            .context("creating reactor wake eventfd")?;
        let inner = Arc::new(Inner {
            name,
            wake_fd,
            state: Mutex::new(LoopState {
                running: true,
                read: HashMap::new(),
                write: HashMap::new(),
                user: Vec::new(),
                in_flight: [None, None],
            }),
        });

        let loop_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                if policy == Policy::Realtime {
                    match enable_realtime() {
                        Ok(prio) => debug!(reactor = loop_inner.name, prio, "SCHED_FIFO enabled"),
                        Err(e) => warn!(
                            reactor = loop_inner.name,
                            "realtime scheduling unavailable, continuing at normal priority: {e}"
                        ),
                    }
                }
                run(&loop_inner);
            })
            .context("spawning reactor thread")?;

        let reactor = Arc::new(Self { inner, worker: Mutex::new(Some(handle)) });
        Ok(reactor)
    }

    /// Arms a readable callback for `fd`. The registrant must keep the fd
    /// open until it unregisters; the reactor never closes it. Registering
    /// the same fd again replaces the previous callback.
    pub fn register_readable(&self, fd: RawFd, cb: IoCallback) {
        self.register(Direction::Read, fd, cb);
    }

    /// Arms a writable callback for `fd`. Same contract as
    /// [`Reactor::register_readable`].
    pub fn register_writable(&self, fd: RawFd, cb: IoCallback) {
        self.register(Direction::Write, fd, cb);
    }

    pub fn unregister_readable(&self, fd: RawFd) {
        self.unregister(Direction::Read, fd);
    }

    pub fn unregister_writable(&self, fd: RawFd) {
        self.unregister(Direction::Write, fd);
    }

    /// Registers `listener` and returns its trigger handle.
    pub fn create_user_event(&self, listener: UserCallback) -> UserEvent {
        let slot = Arc::new(UserSlot {
            pending: AtomicBool::new(false),
            state: Mutex::new(UserState { enabled: true, listener: Some(listener) }),
        });
        self.inner.state.lock().user.push(Arc::clone(&slot));
        UserEvent { slot, reactor: Arc::clone(&self.inner) }
    }

    /// Stops the loop and joins the worker thread.
    pub fn shutdown(&self) {
        {
            let mut st = self.inner.state.lock();
            if !st.running {
                return;
            }
            st.running = false;
        }
        self.inner.wake();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!(reactor = self.inner.name, "reactor worker exited abnormally");
            }
        }
    }

    fn register(&self, dir: Direction, fd: RawFd, cb: IoCallback) {
        let slot = IoSlot { cb, deadline: Instant::now() + KEEP_ALIVE };
        {
            let mut st = self.inner.state.lock();
            if let Some((in_fd, dropped)) = &mut st.in_flight[dir as usize] {
                if *in_fd == fd {
                    *dropped = false;
                }
            }
            map_for(&mut st, dir).insert(fd, slot);
        }
        self.inner.wake();
    }

    fn unregister(&self, dir: Direction, fd: RawFd) {
        {
            let mut st = self.inner.state.lock();
            map_for(&mut st, dir).remove(&fd);
            if let Some((in_fd, dropped)) = &mut st.in_flight[dir as usize] {
                if *in_fd == fd {
                    *dropped = true;
                }
            }
        }
        self.inner.wake();
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn map_for(st: &mut LoopState, dir: Direction) -> &mut HashMap<RawFd, IoSlot> {
    match dir {
        Direction::Read => &mut st.read,
        Direction::Write => &mut st.write,
    }
}

fn run(inner: &Inner) {
    loop {
        let (read_fds, write_fds, timeout_ms) = {
            let st = inner.state.lock();
            if !st.running {
                break;
            }
            let now = Instant::now();
            let mut timeout = KEEP_ALIVE;
            for slot in st.read.values().chain(st.write.values()) {
                timeout = timeout.min(slot.deadline.saturating_duration_since(now));
            }
            let read_fds: Vec<RawFd> = st.read.keys().copied().collect();
            let write_fds: Vec<RawFd> = st.write.keys().copied().collect();
            (read_fds, write_fds, timeout.as_millis() as u16)
        };

        let (wake_hit, read_ready, write_ready) =
            match poll_once(inner, &read_fds, &write_fds, timeout_ms) {
                Ok(result) => result,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!(reactor = inner.name, "poll failed: {e}");
                    break;
                }
            };

        if wake_hit {
            inner.drain_wake();
        }

        let now = Instant::now();
        dispatch_io(inner, Direction::Read, &read_fds, &read_ready, now);
        dispatch_io(inner, Direction::Write, &write_fds, &write_ready, now);
        dispatch_user(inner);
    }
    debug!(reactor = inner.name, "reactor loop exited");
}

/// Polls the wake fd plus the registered sets; returns readiness per set.
fn poll_once(
    inner: &Inner,
    read_fds: &[RawFd],
    write_fds: &[RawFd],
    timeout_ms: u16,
) -> Result<(bool, Vec<bool>, Vec<bool>), Errno> {
    // SAFETY: registrants keep their fds open until they unregister; the
    // borrow only lives for this poll call.
    #[allow(unsafe_code)]
    fn borrow(fd: RawFd) -> BorrowedFd<'static> {
        unsafe { BorrowedFd::borrow_raw(fd) }
    }

    let mut fds = Vec::with_capacity(1 + read_fds.len() + write_fds.len());
    fds.push(PollFd::new(inner.wake_fd.as_fd(), PollFlags::POLLIN));
    for fd in read_fds {
        fds.push(PollFd::new(borrow(*fd), PollFlags::POLLIN));
    }
    for fd in write_fds {
        fds.push(PollFd::new(borrow(*fd), PollFlags::POLLOUT));
    }

    poll(&mut fds, PollTimeout::from(timeout_ms))?;

    let ready = |pfd: &PollFd<'_>, want: PollFlags| {
        pfd.revents()
            .is_some_and(|r| r.intersects(want | PollFlags::POLLERR | PollFlags::POLLHUP))
    };
    let wake_hit = ready(&fds[0], PollFlags::POLLIN);
    let read_ready = (0..read_fds.len()).map(|i| ready(&fds[1 + i], PollFlags::POLLIN)).collect();
    let off = 1 + read_fds.len();
    let write_ready =
        (0..write_fds.len()).map(|i| ready(&fds[off + i], PollFlags::POLLOUT)).collect();
    Ok((wake_hit, read_ready, write_ready))
}

/// Fires callbacks whose fd is ready or whose keep-alive deadline passed.
/// The state lock is never held across a callback.
fn dispatch_io(inner: &Inner, dir: Direction, fds: &[RawFd], ready: &[bool], now: Instant) {
    for (i, fd) in fds.iter().enumerate() {
        let mut st = inner.state.lock();
        let due = match map_for(&mut st, dir).get(fd) {
            Some(slot) => ready.get(i).copied().unwrap_or(false) || slot.deadline <= now,
            None => false,
        };
        if !due {
            continue;
        }
        let Some(mut slot) = map_for(&mut st, dir).remove(fd) else { continue };
        st.in_flight[dir as usize] = Some((*fd, false));
        drop(st);

        let keep = (slot.cb)(*fd);

        let mut st = inner.state.lock();
        let (_, dropped) = st.in_flight[dir as usize].take().unwrap_or((*fd, false));
        if keep && !dropped && !map_for(&mut st, dir).contains_key(fd) {
            slot.deadline = Instant::now() + KEEP_ALIVE;
            map_for(&mut st, dir).insert(*fd, slot);
        }
    }
}

fn dispatch_user(inner: &Inner) {
    let slots: Vec<Arc<UserSlot>> = {
        let mut st = inner.state.lock();
        st.user.retain(|slot| slot.state.lock().enabled);
        st.user.clone()
    };

    for slot in slots {
        if !slot.pending.swap(false, Ordering::SeqCst) {
            continue;
        }
        let listener = {
            let mut st = slot.state.lock();
            if !st.enabled {
                continue;
            }
            st.listener.take()
        };
        if let Some(mut listener) = listener {
            listener();
            let mut st = slot.state.lock();
            if st.enabled && st.listener.is_none() {
                st.listener = Some(listener);
            }
        }
    }
}

/// Raises the calling thread to SCHED_FIFO at mid-range priority.
#[allow(unsafe_code)]
fn enable_realtime() -> std::io::Result<i32> {
    // SAFETY: the pthread scheduling calls only read the param struct owned
    // by this frame.
    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        if max == -1 || min == -1 {
            return Err(std::io::Error::last_os_error());
        }
        let param = libc::sched_param { sched_priority: (min + max) / 2 };
        let rc = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if rc != 0 {
            return Err(std::io::Error::from_raw_os_error(rc));
        }
        Ok(param.sched_priority)
    }
}

#[cfg(test)]
#[path = "reactor_tests.rs"]
mod tests;
