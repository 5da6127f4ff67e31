// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-printer session: a full-duplex, line-oriented command/response state
//! machine over a serial fd driven by the realtime reactor.
//!
//! Outbound commands queue in *to-send* and drain on writable events; each
//! written command moves to *awaiting-ok* until the device acknowledges it
//! with an `ok` line. Listener fanout (state transitions, coalesced
//! progress, level-triggered sensor updates) is queued and drained through
//! a user event on the normal reactor so application code never runs on
//! the realtime thread.

use std::collections::{BTreeMap, VecDeque};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use nix::errno::Errno;
use nix::libc;
use nix::sys::termios::{self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use herd_proto::gcode;
use herd_proto::state::{DeviceState, PrintResult, SensorValue};

use super::telemetry::{Telemetry, TelemetryParser};
use super::DeviceListener;
use crate::reactor::{Reactor, UserEvent};

/// Line-protocol sub-state during device bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolState {
    NotReady,
    AcceptsCommands,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineParser {
    None,
    /// Harvest `Cap:<NAME>:1` lines from the `M115` report.
    Capability,
}

/// Continuation fired when the device acknowledges a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnOk {
    None,
    /// `M115` finished: compose the autoreport bitmap and send `M155`.
    CapsDone,
    /// `M155` acknowledged: the device is ready for jobs.
    AutoreportConfigured,
    /// Feed the next job line, or finish the print.
    NextJobLine,
}

struct Command {
    bytes: Vec<u8>,
    sent: usize,
    parser: LineParser,
    on_ok: OnOk,
}

struct Inner {
    fd: Option<OwnedFd>,
    state: DeviceState,
    pstate: ProtocolState,
    to_send: VecDeque<Command>,
    awaiting_ok: VecDeque<Command>,
    job: VecDeque<String>,
    sensors: BTreeMap<String, SensorValue>,
    capabilities: Vec<String>,
    progress: (u8, u32),
    listeners: Vec<Weak<dyn DeviceListener>>,
    dispatching: bool,
    queued_states: VecDeque<DeviceState>,
    queued_progress: Option<(u8, u32)>,
    sensors_dirty: bool,
    write_armed: bool,
}

/// One attached printer.
pub struct DeviceSession {
    name: String,
    path: PathBuf,
    rt: Arc<Reactor>,
    inner: Mutex<Inner>,
    /// Listener identities unregistered while a dispatch round runs.
    pending_unregister: Mutex<Vec<usize>>,
    fan_out: Mutex<Option<UserEvent>>,
    telemetry: TelemetryParser,
}

impl DeviceSession {
    /// Opens the serial device and starts the bring-up sequence. The
    /// session is returned in whatever state the open attempt produced
    /// (`INIT_DEVICE`, `BUSY` or `ERROR`).
    pub fn open(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        rt: Arc<Reactor>,
        normal: &Reactor,
    ) -> anyhow::Result<Arc<Self>> {
        let session = Arc::new(Self {
            name: name.into(),
            path: path.into(),
            rt,
            inner: Mutex::new(Inner {
                fd: None,
                state: DeviceState::Uninitialized,
                pstate: ProtocolState::NotReady,
                to_send: VecDeque::new(),
                awaiting_ok: VecDeque::new(),
                job: VecDeque::new(),
                sensors: BTreeMap::new(),
                capabilities: Vec::new(),
                progress: (0, 0),
                listeners: Vec::new(),
                dispatching: false,
                queued_states: VecDeque::new(),
                queued_progress: None,
                sensors_dirty: false,
                write_armed: false,
            }),
            pending_unregister: Mutex::new(Vec::new()),
            fan_out: Mutex::new(None),
            telemetry: TelemetryParser::new()?,
        });

        let weak = Arc::downgrade(&session);
        let event = normal.create_user_event(Box::new(move || {
            if let Some(session) = weak.upgrade() {
                session.dispatch_events();
            }
        }));
        *session.fan_out.lock() = Some(event);

        session.initialize();
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> DeviceState {
        self.inner.lock().state
    }

    pub fn progress(&self) -> (u8, u32) {
        self.inner.lock().progress
    }

    pub fn sensor_readings(&self) -> BTreeMap<String, SensorValue> {
        self.inner.lock().sensors.clone()
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.inner.lock().capabilities.clone()
    }

    pub fn register_listener(&self, listener: &Arc<dyn DeviceListener>) {
        self.inner.lock().listeners.push(Arc::downgrade(listener));
    }

    /// May be called from inside a listener callback; the removal is then
    /// deferred to the end of the running dispatch round.
    pub fn unregister_listener(&self, listener: &Arc<dyn DeviceListener>) {
        let key = Arc::as_ptr(listener) as *const () as usize;
        let mut inner = self.inner.lock();
        if inner.dispatching {
            drop(inner);
            self.pending_unregister.lock().push(key);
        } else {
            inner.listeners.retain(|w| Weak::as_ptr(w) as *const () as usize != key);
        }
    }

    /// (Re)enters device bring-up. Also used when the device reports
    /// `start` after a reset, and when a BUSY device file becomes
    /// available again.
    pub fn initialize(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.state == DeviceState::Shutdown {
            return;
        }
        inner.sensors.clear();
        inner.to_send.clear();
        inner.awaiting_ok.clear();
        inner.job.clear();
        inner.capabilities.clear();
        inner.pstate = ProtocolState::NotReady;
        self.set_state_locked(&mut inner, DeviceState::InitDevice);

        if inner.fd.is_some() {
            // Device reset on an already-open fd; the read callback stays
            // armed.
            return;
        }

        let fd = match open_serial(&self.path) {
            Ok(fd) => fd,
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                debug!(device = %self.name, "device file busy");
                self.set_state_locked(&mut inner, DeviceState::Busy);
                return;
            }
            Err(e) => {
                warn!(device = %self.name, "opening serial device failed: {e}");
                self.set_state_locked(&mut inner, DeviceState::Error);
                return;
            }
        };

        if let Err(e) = configure_serial(&fd) {
            warn!(device = %self.name, "serial configuration failed: {e}");
            self.set_state_locked(&mut inner, DeviceState::Error);
            return;
        }

        let raw = fd.as_raw_fd();
        inner.fd = Some(fd);
        drop(inner);

        let weak = Arc::downgrade(self);
        self.rt.register_readable(
            raw,
            Box::new(move |fd| match weak.upgrade() {
                Some(session) => session.on_readable(fd),
                None => false,
            }),
        );
        info!(device = %self.name, path = %self.path.display(), "serial session opened");
    }

    /// Loads a print job. The G-code is comment-stripped and trimmed; the
    /// first two lines are pipelined immediately.
    pub fn print(self: &Arc<Self>, raw_gcode: &str) -> PrintResult {
        let mut inner = self.inner.lock();
        if inner.state != DeviceState::Ok {
            return PrintResult::ErrInvalidState;
        }
        if !inner.job.is_empty() {
            return PrintResult::ErrPrinting;
        }
        inner.job = gcode::job_lines(raw_gcode).into();
        self.start_print_locked(&mut inner);
        PrintResult::Ok
    }

    /// Cooperative teardown into the terminal SHUTDOWN state.
    pub fn shutdown(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.state == DeviceState::Shutdown {
            return;
        }
        if let Some(fd) = inner.fd.take() {
            self.rt.unregister_readable(fd.as_raw_fd());
            self.rt.unregister_writable(fd.as_raw_fd());
        }
        inner.write_armed = false;
        self.set_state_locked(&mut inner, DeviceState::Shutdown);
    }

    // -- realtime-thread half -------------------------------------------------

    fn on_readable(self: &Arc<Self>, raw: RawFd) -> bool {
        let mut buf = [0u8; 1024];
        loop {
            match nix::unistd::read(borrow_fd(raw), &mut buf) {
                Ok(0) => {
                    info!(device = %self.name, "device vanished");
                    self.fail(DeviceState::Disconnected);
                    return false;
                }
                Ok(n) => {
                    // Canonical mode delivers one line per read.
                    let line = String::from_utf8_lossy(&buf[..n]);
                    let line = line.trim_end_matches(['\n', '\r']);
                    self.on_line(line);
                }
                Err(Errno::EAGAIN) => return true,
                Err(e) => {
                    warn!(device = %self.name, "serial read failed: {e}");
                    self.fail(DeviceState::Error);
                    return false;
                }
            }
        }
    }

    fn on_line(self: &Arc<Self>, line: &str) {
        if line == "start" {
            info!(device = %self.name, "device reset, reinitializing");
            self.initialize();
            return;
        }

        if line == "ok" {
            let acknowledged = self.inner.lock().awaiting_ok.pop_front();
            match acknowledged {
                Some(cmd) => self.command_acknowledged(cmd.on_ok),
                None => warn!(device = %self.name, "ok without a pending command"),
            }
            return;
        }

        if line.starts_with("echo:Unknown command:") {
            let pending = {
                let inner = self.inner.lock();
                inner
                    .awaiting_ok
                    .front()
                    .map(|c| String::from_utf8_lossy(&c.bytes).trim_end().to_owned())
            };
            match pending {
                Some(cmd) => {
                    warn!(device = %self.name, command = %cmd, "device rejected command");
                    self.fail(DeviceState::Error);
                }
                None => debug!(device = %self.name, line, "unknown-command echo with empty queue"),
            }
            return;
        }

        let parser = self.inner.lock().awaiting_ok.front().map(|c| c.parser);
        if parser == Some(LineParser::Capability) {
            self.record_capability(line);
        }

        let (state, pstate) = {
            let inner = self.inner.lock();
            (inner.state, inner.pstate)
        };
        match state {
            DeviceState::InitDevice => {
                if pstate == ProtocolState::NotReady && line == "LCD status changed" {
                    self.enter_accepts_commands();
                }
            }
            DeviceState::Ok | DeviceState::Printing => {
                if let Some(telemetry) = self.telemetry.classify(line) {
                    self.apply_telemetry(telemetry);
                }
            }
            _ => {}
        }
    }

    fn record_capability(&self, line: &str) {
        let Some(rest) = line.strip_prefix("Cap:") else { return };
        let Some((name, value)) = rest.split_once(':') else { return };
        if value.starts_with('1') {
            self.inner.lock().capabilities.push(name.to_owned());
        }
    }

    fn enter_accepts_commands(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.pstate = ProtocolState::AcceptsCommands;
        self.send_command_locked(&mut inner, "M115", LineParser::Capability, OnOk::CapsDone);
    }

    fn command_acknowledged(self: &Arc<Self>, on_ok: OnOk) {
        match on_ok {
            OnOk::None => {}
            OnOk::CapsDone => {
                let mut inner = self.inner.lock();
                let bitmap = autoreport_bitmap(&inner.capabilities);
                let command = format!("M155 S2 C{bitmap}");
                self.send_command_locked(&mut inner, &command, LineParser::None, OnOk::AutoreportConfigured);
            }
            OnOk::AutoreportConfigured => {
                let mut inner = self.inner.lock();
                inner.pstate = ProtocolState::Ready;
                self.set_state_locked(&mut inner, DeviceState::Ok);
                self.start_print_locked(&mut inner);
            }
            OnOk::NextJobLine => {
                let mut inner = self.inner.lock();
                match inner.job.pop_front() {
                    Some(line) => {
                        self.send_command_locked(&mut inner, &line, LineParser::None, OnOk::NextJobLine)
                    }
                    None => {
                        self.update_progress_locked(&mut inner, 100, 0);
                        self.set_state_locked(&mut inner, DeviceState::Ok);
                    }
                }
            }
        }
    }

    fn start_print_locked(self: &Arc<Self>, inner: &mut Inner) {
        if inner.state != DeviceState::Ok || inner.job.is_empty() {
            return;
        }
        self.set_state_locked(inner, DeviceState::Printing);
        // Keep two commands in flight so the device never waits on us.
        for _ in 0..2 {
            match inner.job.pop_front() {
                Some(line) => {
                    self.send_command_locked(inner, &line, LineParser::None, OnOk::NextJobLine)
                }
                None => {
                    self.update_progress_locked(inner, 100, 0);
                    self.set_state_locked(inner, DeviceState::Ok);
                    return;
                }
            }
        }
    }

    fn send_command_locked(self: &Arc<Self>, inner: &mut Inner, line: &str, parser: LineParser, on_ok: OnOk) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        inner.to_send.push_back(Command { bytes, sent: 0, parser, on_ok });
        self.arm_write_locked(inner);
    }

    fn arm_write_locked(self: &Arc<Self>, inner: &mut Inner) {
        if inner.write_armed {
            return;
        }
        let Some(fd) = &inner.fd else { return };
        let raw = fd.as_raw_fd();
        inner.write_armed = true;
        let weak = Arc::downgrade(self);
        self.rt.register_writable(
            raw,
            Box::new(move |fd| match weak.upgrade() {
                Some(session) => session.on_writable(fd),
                None => false,
            }),
        );
    }

    fn on_writable(self: &Arc<Self>, raw: RawFd) -> bool {
        enum Outcome {
            Drained,
            WouldBlock,
            Failed,
        }

        let outcome = {
            let mut inner = self.inner.lock();
            let outcome = loop {
                let Some(front) = inner.to_send.front_mut() else { break Outcome::Drained };
                let mut blocked = false;
                let mut failed = false;
                while front.sent < front.bytes.len() {
                    match nix::unistd::write(borrow_fd(raw), &front.bytes[front.sent..]) {
                        Ok(n) => front.sent += n,
                        Err(Errno::EAGAIN) => {
                            blocked = true;
                            break;
                        }
                        Err(e) => {
                            warn!(device = %self.name, "serial write failed: {e}");
                            failed = true;
                            break;
                        }
                    }
                }
                if failed {
                    break Outcome::Failed;
                }
                if blocked {
                    break Outcome::WouldBlock;
                }
                if let Some(cmd) = inner.to_send.pop_front() {
                    inner.awaiting_ok.push_back(cmd);
                }
            };
            if matches!(outcome, Outcome::Drained) {
                inner.write_armed = false;
            }
            outcome
        };

        match outcome {
            Outcome::Drained => false,
            Outcome::WouldBlock => true,
            Outcome::Failed => {
                self.fail(DeviceState::Error);
                false
            }
        }
    }

    /// Closes the fd, detaches from the reactor and transitions to a
    /// non-operational state.
    fn fail(self: &Arc<Self>, state: DeviceState) {
        let mut inner = self.inner.lock();
        if inner.state == state {
            return;
        }
        if let Some(fd) = inner.fd.take() {
            self.rt.unregister_readable(fd.as_raw_fd());
            self.rt.unregister_writable(fd.as_raw_fd());
        }
        inner.write_armed = false;
        self.set_state_locked(&mut inner, state);
    }

    fn apply_telemetry(&self, telemetry: Telemetry) {
        let mut inner = self.inner.lock();
        match telemetry {
            Telemetry::Readings(readings) => {
                for (name, value) in readings {
                    inner.sensors.insert(name, value);
                }
                inner.sensors_dirty = true;
                self.trigger_fan_out();
            }
            Telemetry::Progress { percentage, remaining_minutes } => {
                self.update_progress_locked(&mut inner, percentage, remaining_minutes);
            }
        }
    }

    // -- fanout half ----------------------------------------------------------

    fn set_state_locked(&self, inner: &mut Inner, state: DeviceState) {
        if inner.state == DeviceState::Shutdown && state != DeviceState::Shutdown {
            return;
        }
        inner.state = state;
        inner.queued_states.push_back(state);
        self.trigger_fan_out();
    }

    fn update_progress_locked(&self, inner: &mut Inner, percentage: u8, remaining_minutes: u32) {
        inner.progress = (percentage, remaining_minutes);
        inner.queued_progress = Some((percentage, remaining_minutes));
        self.trigger_fan_out();
    }

    fn trigger_fan_out(&self) {
        if let Some(event) = self.fan_out.lock().as_ref() {
            event.trigger();
        }
    }

    /// Drains the event queue on the normal reactor thread. State
    /// transitions are delivered in order; progress coalesces to the most
    /// recent pair; sensor updates deliver the current reading set.
    fn dispatch_events(self: &Arc<Self>) {
        loop {
            let (states, progress, sensors, listeners) = {
                let mut inner = self.inner.lock();
                if inner.queued_states.is_empty()
                    && inner.queued_progress.is_none()
                    && !inner.sensors_dirty
                {
                    inner.dispatching = false;
                    break;
                }
                inner.dispatching = true;
                let states: Vec<DeviceState> = inner.queued_states.drain(..).collect();
                let progress = inner.queued_progress.take();
                let sensors = if inner.sensors_dirty {
                    inner.sensors_dirty = false;
                    Some(inner.sensors.clone())
                } else {
                    None
                };
                (states, progress, sensors, inner.listeners.clone())
            };

            for state in &states {
                self.for_each_listener(&listeners, |l| l.on_state_change(&self.name, *state));
            }
            if let Some((percentage, remaining)) = progress {
                self.for_each_listener(&listeners, |l| {
                    l.on_print_progress(&self.name, percentage, remaining)
                });
            }
            if let Some(sensors) = &sensors {
                self.for_each_listener(&listeners, |l| l.on_sensor_update(&self.name, sensors));
            }

            let removed: Vec<usize> = self.pending_unregister.lock().drain(..).collect();
            let mut inner = self.inner.lock();
            inner.listeners.retain(|w| {
                w.upgrade().is_some()
                    && !removed.contains(&(Weak::as_ptr(w) as *const () as usize))
            });
        }

        if self.inner.lock().state == DeviceState::Shutdown {
            if let Some(event) = self.fan_out.lock().take() {
                event.disable();
            }
        }
    }

    fn for_each_listener(
        &self,
        listeners: &[Weak<dyn DeviceListener>],
        mut f: impl FnMut(&Arc<dyn DeviceListener>),
    ) {
        for weak in listeners {
            let key = Weak::as_ptr(weak) as *const () as usize;
            if self.pending_unregister.lock().contains(&key) {
                continue;
            }
            if let Some(listener) = weak.upgrade() {
                f(&listener);
            }
        }
    }
}

fn autoreport_bitmap(capabilities: &[String]) -> u32 {
    let mut bitmap = 0;
    for cap in capabilities {
        match cap.as_str() {
            "AUTOREPORT_TEMP" => bitmap |= 1 << 0,
            "AUTOREPORT_FANS" => bitmap |= 1 << 1,
            "AUTOREPORT_POSITION" => bitmap |= 1 << 2,
            _ => {}
        }
    }
    bitmap
}

fn open_serial(path: &Path) -> std::io::Result<OwnedFd> {
    use std::os::unix::fs::OpenOptionsExt;
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_SYNC)
        .open(path)?;
    Ok(file.into())
}

/// 115200 8N1, canonical mode, no flow control, exclusive open.
fn configure_serial(fd: &OwnedFd) -> anyhow::Result<()> {
    // SAFETY: TIOCEXCL takes no argument and only affects the given fd.
    #[allow(unsafe_code)]
    unsafe {
        ioctl::tioc_excl(fd.as_raw_fd())?;
    }

    let mut tty = termios::tcgetattr(fd)?;
    termios::cfsetispeed(&mut tty, BaudRate::B115200)?;
    termios::cfsetospeed(&mut tty, BaudRate::B115200)?;

    tty.control_flags.remove(ControlFlags::CSIZE);
    tty.control_flags.insert(ControlFlags::CS8);
    tty.control_flags.insert(ControlFlags::CLOCAL | ControlFlags::CREAD);
    tty.control_flags.remove(
        ControlFlags::PARENB | ControlFlags::PARODD | ControlFlags::CSTOPB | ControlFlags::CRTSCTS,
    );
    tty.input_flags.remove(
        InputFlags::IGNBRK | InputFlags::IXON | InputFlags::IXOFF | InputFlags::IXANY,
    );
    tty.local_flags = LocalFlags::ICANON;
    tty.output_flags = OutputFlags::empty();

    termios::tcsetattr(fd, SetArg::TCSANOW, &tty)?;
    Ok(())
}

#[allow(unsafe_code)]
mod ioctl {
    use nix::libc;
    nix::ioctl_none_bad!(tioc_excl, libc::TIOCEXCL);
}

/// The registrant keeps the fd open for the lifetime of its reactor
/// registration, so borrowing the raw fd inside a callback is sound.
#[allow(unsafe_code)]
fn borrow_fd(raw: RawFd) -> BorrowedFd<'static> {
    // SAFETY: see above.
    unsafe { BorrowedFd::borrow_raw(raw) }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
