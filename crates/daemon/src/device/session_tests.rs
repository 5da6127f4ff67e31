// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session tests against a pty standing in for the printer's serial port.

use std::collections::BTreeMap;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use parking_lot::Mutex;

use super::*;
use crate::device::DeviceListener;
use crate::reactor::{Policy, Reactor};
use herd_proto::state::{DeviceState, PrintResult, SensorValue};

struct FakePrinter {
    master: PtyMaster,
    slave_path: String,
    buffer: Vec<u8>,
}

impl FakePrinter {
    fn new() -> anyhow::Result<Self> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)?;
        grantpt(&master)?;
        unlockpt(&master)?;
        let slave_path = ptsname_r(&master)?;
        Ok(Self { master, slave_path, buffer: Vec::new() })
    }

    fn send(&self, line: &str) -> anyhow::Result<()> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        let mut written = 0;
        while written < bytes.len() {
            written += nix::unistd::write(borrow_fd(self.master.as_raw_fd()), &bytes[written..])?;
        }
        Ok(())
    }

    /// Reads the next newline-terminated command the session wrote.
    fn expect_line(&mut self, timeout: Duration) -> anyhow::Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("timed out waiting for a command line");
            }
            let mut fds = [PollFd::new(borrow_fd(self.master.as_raw_fd()), PollFlags::POLLIN)];
            let timeout_ms = remaining.as_millis().min(100) as u16;
            poll(&mut fds, PollTimeout::from(timeout_ms))?;
            let ready = fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN));
            if ready {
                let mut buf = [0u8; 256];
                let n = nix::unistd::read(borrow_fd(self.master.as_raw_fd()), &mut buf)?;
                self.buffer.extend_from_slice(&buf[..n]);
            }
        }
    }
}

#[derive(Default)]
struct RecordingListener {
    states: Mutex<Vec<DeviceState>>,
    progress: Mutex<Vec<(u8, u32)>>,
    sensor_updates: Mutex<Vec<BTreeMap<String, SensorValue>>>,
}

impl DeviceListener for RecordingListener {
    fn on_state_change(&self, _device: &str, state: DeviceState) {
        self.states.lock().push(state);
    }

    fn on_print_progress(&self, _device: &str, percentage: u8, remaining_minutes: u32) {
        self.progress.lock().push((percentage, remaining_minutes));
    }

    fn on_sensor_update(&self, _device: &str, readings: &BTreeMap<String, SensorValue>) {
        self.sensor_updates.lock().push(readings.clone());
    }
}

struct Harness {
    rt: Arc<Reactor>,
    normal: Arc<Reactor>,
    printer: FakePrinter,
    session: Arc<DeviceSession>,
    listener: Arc<RecordingListener>,
}

impl Harness {
    fn start() -> anyhow::Result<Self> {
        let rt = Reactor::new("test-rt", Policy::Normal)?;
        let normal = Reactor::new("test-normal", Policy::Normal)?;
        let printer = FakePrinter::new()?;
        let session = DeviceSession::open(
            printer.slave_path.clone(),
            "prusa-TEST123",
            Arc::clone(&rt),
            &normal,
        )?;
        let listener = Arc::new(RecordingListener::default());
        let as_dyn: Arc<dyn DeviceListener> = listener.clone();
        session.register_listener(&as_dyn);
        Ok(Self { rt, normal, printer, session, listener })
    }

    /// Drives the handshake to the READY/OK state.
    fn bring_up(&mut self) -> anyhow::Result<()> {
        assert_eq!(self.session.state(), DeviceState::InitDevice);
        self.printer.send("LCD status changed")?;
        assert_eq!(self.printer.expect_line(Duration::from_secs(3))?, "M115");
        self.printer.send("Cap:AUTOREPORT_TEMP:1")?;
        self.printer.send("Cap:AUTOREPORT_FANS:1")?;
        self.printer.send("Cap:EXTENDED_M20:0")?;
        self.printer.send("ok")?;
        assert_eq!(self.printer.expect_line(Duration::from_secs(3))?, "M155 S2 C3");
        self.printer.send("ok")?;
        assert!(self.wait_for_state(DeviceState::Ok));
        Ok(())
    }

    fn wait_for_state(&self, state: DeviceState) -> bool {
        let end = Instant::now() + Duration::from_secs(3);
        while Instant::now() < end {
            if self.session.state() == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.session.state() == state
    }

    fn stop(self) {
        self.session.shutdown();
        self.rt.shutdown();
        self.normal.shutdown();
    }
}

#[test]
#[serial_test::serial]
fn bring_up_handshake_reaches_ok() -> anyhow::Result<()> {
    let mut h = Harness::start()?;
    h.bring_up()?;

    let caps = h.session.capabilities();
    assert_eq!(caps, vec!["AUTOREPORT_TEMP".to_owned(), "AUTOREPORT_FANS".to_owned()]);

    // Ordered fanout: INIT_DEVICE first, OK last.
    let end = Instant::now() + Duration::from_secs(2);
    while Instant::now() < end && h.listener.states.lock().last() != Some(&DeviceState::Ok) {
        std::thread::sleep(Duration::from_millis(5));
    }
    let states = h.listener.states.lock().clone();
    assert_eq!(states.first(), Some(&DeviceState::InitDevice));
    assert_eq!(states.last(), Some(&DeviceState::Ok));

    h.stop();
    Ok(())
}

#[test]
#[serial_test::serial]
fn print_pipelines_two_lines_and_completes() -> anyhow::Result<()> {
    let mut h = Harness::start()?;
    h.bring_up()?;

    let result = h.session.print("G28 ; home\n\nG1 X10\nG1 X20 ; move\n");
    assert_eq!(result, PrintResult::Ok);
    assert_eq!(h.session.state(), DeviceState::Printing);

    // Two lines are in flight before any acknowledgement.
    assert_eq!(h.printer.expect_line(Duration::from_secs(3))?, "G28");
    assert_eq!(h.printer.expect_line(Duration::from_secs(3))?, "G1 X10");

    // A second job while printing is refused.
    assert_eq!(h.session.print("G1 Y1\n"), PrintResult::ErrPrinting);

    h.printer.send("ok")?;
    assert_eq!(h.printer.expect_line(Duration::from_secs(3))?, "G1 X20");
    h.printer.send("ok")?;
    h.printer.send("ok")?;

    assert!(h.wait_for_state(DeviceState::Ok));
    let end = Instant::now() + Duration::from_secs(2);
    while Instant::now() < end && h.listener.progress.lock().is_empty() {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(h.listener.progress.lock().last(), Some(&(100u8, 0u32)));
    assert_eq!(h.session.progress(), (100, 0));

    h.stop();
    Ok(())
}

#[test]
#[serial_test::serial]
fn print_before_ready_is_invalid_state() -> anyhow::Result<()> {
    let h = Harness::start()?;
    assert_eq!(h.session.state(), DeviceState::InitDevice);
    assert_eq!(h.session.print("G28\n"), PrintResult::ErrInvalidState);
    h.stop();
    Ok(())
}

#[test]
#[serial_test::serial]
fn temperature_lines_update_sensors() -> anyhow::Result<()> {
    let mut h = Harness::start()?;
    h.bring_up()?;

    h.printer.send("T:215.3 /215.0 B:60.1 /60.0 @:0 B@:0 P:0.0 A:31.2")?;

    let end = Instant::now() + Duration::from_secs(3);
    while Instant::now() < end && h.session.sensor_readings().is_empty() {
        std::thread::sleep(Duration::from_millis(5));
    }
    let sensors = h.session.sensor_readings();
    assert_eq!(
        sensors.get("temp_extruder"),
        Some(&SensorValue::new(215.3).with_set_point(215.0).with_unit("C"))
    );
    assert_eq!(
        sensors.get("temp_bed"),
        Some(&SensorValue::new(60.1).with_set_point(60.0).with_unit("C"))
    );
    assert_eq!(sensors.get("temp_ambient"), Some(&SensorValue::new(31.2).with_unit("C")));

    let end = Instant::now() + Duration::from_secs(2);
    while Instant::now() < end && h.listener.sensor_updates.lock().is_empty() {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!h.listener.sensor_updates.lock().is_empty());

    h.stop();
    Ok(())
}

#[test]
#[serial_test::serial]
fn unknown_command_echo_is_fatal() -> anyhow::Result<()> {
    let mut h = Harness::start()?;
    h.bring_up()?;

    assert_eq!(h.session.print("G999\n"), PrintResult::Ok);
    assert_eq!(h.printer.expect_line(Duration::from_secs(3))?, "G999");
    h.printer.send("echo:Unknown command: \"G999\"")?;

    assert!(h.wait_for_state(DeviceState::Error));
    h.stop();
    Ok(())
}

#[test]
#[serial_test::serial]
fn master_close_tears_the_session_down() -> anyhow::Result<()> {
    let mut h = Harness::start()?;
    h.bring_up()?;

    drop(h.printer.master);
    let end = Instant::now() + Duration::from_secs(3);
    while Instant::now() < end && h.session.state().is_operational() {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!h.session.state().is_operational());

    h.session.shutdown();
    h.rt.shutdown();
    h.normal.shutdown();
    Ok(())
}

#[test]
#[serial_test::serial]
fn shutdown_is_terminal() -> anyhow::Result<()> {
    let h = Harness::start()?;
    h.session.shutdown();
    assert_eq!(h.session.state(), DeviceState::Shutdown);
    // No transition leaves SHUTDOWN.
    assert_eq!(h.session.print("G28\n"), PrintResult::ErrInvalidState);
    h.session.initialize();
    assert_eq!(h.session.state(), DeviceState::Shutdown);
    h.rt.shutdown();
    h.normal.shutdown();
    Ok(())
}
