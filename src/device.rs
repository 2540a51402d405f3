// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Device handle and its command queue
//!
//! Each device owns a FIFO of commands and an idle/running flag. With
//! `auto_run` enabled, adding a command to an idle device starts a drain
//! that keeps dispatching until the queue is empty or a checker fails.
//! With `auto_run` disabled, the caller steps through the queue with
//! [`Device::next_command`] or [`Device::run_command`].
//!
//! Dispatches on one device never overlap. A command issued while another
//! is in flight waits its turn, and only the drain that holds the running
//! flag pops the queue.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::bridge::Bridge;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::events::{CommandEvent, ListenerId, Listeners};
use crate::parser::{parse_current_focus, parse_devices, parse_packages, parse_resolution};
use crate::types::{ResolutionRatio, Vector2};

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    // Resolution commands are authored against
    pub command_resolution: Vector2,
    pub auto_run: bool,
    // Verify the device is listed as connected before each dispatch
    pub auto_check_connected: bool,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            command_resolution: Vector2::new(1280, 720),
            auto_run: true,
            auto_check_connected: false,
            connect_attempts: 3,
            connect_backoff: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Running,
}

/// How a single dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Finished,
    /// The checker rejected the command and the pending queue was dropped.
    CheckFailed,
    /// The connection check failed and nothing was sent.
    Disconnected,
}

struct State {
    queue: VecDeque<Command>,
    running: bool,
    connected: bool,
    resolution: Vector2,
    config: DeviceConfig,
}

pub struct Device {
    serial: String,
    bridge: Arc<dyn Bridge>,
    state: Mutex<State>,
    // Held for the whole of one dispatch
    turn: AsyncMutex<()>,
    listeners: Listeners<CommandEvent, Command>,
}

impl Device {
    pub fn new(serial: impl Into<String>, bridge: Arc<dyn Bridge>, config: DeviceConfig) -> Arc<Self> {
        Self::with_status(serial, bridge, false, config)
    }

    pub fn with_status(
        serial: impl Into<String>,
        bridge: Arc<dyn Bridge>,
        connected: bool,
        config: DeviceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            serial: serial.into(),
            bridge,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                running: false,
                connected,
                resolution: Vector2::default(),
                config,
            }),
            turn: AsyncMutex::new(()),
            listeners: Listeners::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn bridge(&self) -> &Arc<dyn Bridge> {
        &self.bridge
    }

    /// Connection state as of the last refresh.
    pub fn connected(&self) -> bool {
        self.lock().connected
    }

    pub fn running(&self) -> bool {
        self.lock().running
    }

    pub fn queue_state(&self) -> QueueState {
        if self.running() {
            QueueState::Running
        } else {
            QueueState::Idle
        }
    }

    pub fn auto_run(&self) -> bool {
        self.lock().config.auto_run
    }

    pub fn set_auto_run(&self, auto_run: bool) {
        self.lock().config.auto_run = auto_run;
    }

    pub fn auto_check_connected(&self) -> bool {
        self.lock().config.auto_check_connected
    }

    pub fn set_auto_check_connected(&self, enabled: bool) {
        self.lock().config.auto_check_connected = enabled;
    }

    pub fn command_resolution(&self) -> Vector2 {
        self.lock().config.command_resolution
    }

    pub fn set_command_resolution(&self, resolution: Vector2) {
        self.lock().config.command_resolution = resolution;
    }

    /// Physical resolution, zero until [`Device::init`] has run.
    pub fn resolution(&self) -> Vector2 {
        self.lock().resolution
    }

    pub fn set_resolution(&self, resolution: Vector2) {
        self.lock().resolution = resolution;
    }

    pub fn resolution_ratio(&self) -> ResolutionRatio {
        let state = self.lock();
        ResolutionRatio::between(state.resolution, state.config.command_resolution)
    }

    /// Snapshot of the pending commands.
    pub fn command_queue(&self) -> Vec<Command> {
        self.lock().queue.iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Drop all pending commands, returning how many were removed.
    pub fn clear_queue(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        dropped
    }

    pub fn on<F>(&self, event: CommandEvent, handler: F) -> ListenerId
    where
        F: Fn(&Command) + Send + Sync + 'static,
    {
        self.listeners.on(event, handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    pub fn off_all(&self, event: CommandEvent) {
        self.listeners.off_all(event)
    }

    /// Query and store the physical resolution.
    pub async fn init(&self) -> Result<Vector2> {
        let resolution = self.get_resolution().await?;
        self.set_resolution(resolution);
        Ok(resolution)
    }

    pub async fn get_resolution(&self) -> Result<Vector2> {
        let output = self.shell(&["wm", "size"]).await?;
        parse_resolution(&output).ok_or_else(|| Error::UnexpectedOutput {
            command: "wm size".to_string(),
            output: output.trim().to_string(),
        })
    }

    /// Re-read the device list, retrying with a fixed backoff.
    ///
    /// Failures are reported as `false`, never as an error.
    pub async fn refresh_connection(&self) -> bool {
        let (attempts, backoff) = {
            let state = self.lock();
            (state.config.connect_attempts.max(1), state.config.connect_backoff)
        };
        let args = ["devices".to_string()];

        for attempt in 1..=attempts {
            match self.bridge.issue(None, false, &args).await {
                Ok(output) => {
                    let found = parse_devices(&output)
                        .iter()
                        .any(|entry| entry.serial == self.serial && entry.connected);
                    if found {
                        self.lock().connected = true;
                        return true;
                    }
                    debug!(serial = %self.serial, attempt, "device not connected");
                }
                Err(err) => {
                    warn!(serial = %self.serial, attempt, error = %err, "failed to list devices");
                }
            }

            if attempt < attempts {
                sleep(backoff).await;
            }
        }

        self.lock().connected = false;
        warn!(serial = %self.serial, attempts, "device is not connected");
        false
    }

    /// Add a command to the queue.
    ///
    /// On an idle device with `auto_run` enabled the command is dispatched
    /// right away on a spawned drain, whose handle resolves to the outcome of
    /// that first command.
    pub fn add_command(
        self: &Arc<Self>,
        command: Command,
    ) -> Option<JoinHandle<Result<DispatchOutcome>>> {
        {
            let mut state = self.lock();
            if !state.config.auto_run || state.running {
                debug!(serial = %self.serial, id = command.id(), "queued command");
                state.queue.push_back(command);
                return None;
            }
            state.running = true;
        }

        let device = Arc::clone(self);
        Some(tokio::spawn(async move { device.drive(command).await }))
    }

    /// Dispatch `command` ahead of the queue.
    ///
    /// On an idle device this starts a drain that keeps going through the
    /// queue if `auto_run` is enabled. On a busy device the command waits for
    /// the in-flight dispatch to end and runs between two queue entries,
    /// leaving the queue to the drain that owns it.
    ///
    /// Must not be awaited from inside a checker on the same device.
    pub async fn issue_command(&self, command: Command) -> Result<DispatchOutcome> {
        let owner = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.running, true)
        };
        if owner {
            return self.drive(command).await;
        }

        debug!(serial = %self.serial, id = command.id(), "device busy, waiting for turn");
        self.dispatch(&command, false).await
    }

    /// Dispatch the head of the queue. Only works when `auto_run` is off and
    /// nothing is running.
    ///
    /// Returns whether the command was sent to the device. A command whose
    /// checker fails is consumed along with the rest of the queue and counts
    /// as not sent.
    pub async fn next_command(&self) -> Result<bool> {
        let command = {
            let mut state = self.lock();
            if state.config.auto_run || state.running {
                return Ok(false);
            }
            let Some(command) = state.queue.pop_front() else {
                return Ok(false);
            };
            state.running = true;
            command
        };

        self.step(command, 0).await
    }

    /// Dispatch the queued command with `id`, wherever it sits in the queue.
    /// Same preconditions and return value as [`Device::next_command`].
    pub async fn run_command(&self, id: &str) -> Result<bool> {
        let (command, index) = {
            let mut state = self.lock();
            if state.config.auto_run || state.running {
                return Ok(false);
            }
            let Some(index) = state.queue.iter().position(|c| c.id() == id) else {
                return Ok(false);
            };
            let Some(command) = state.queue.remove(index) else {
                return Ok(false);
            };
            state.running = true;
            (command, index)
        };

        self.step(command, index).await
    }

    // Dispatch one manually selected command without draining.
    async fn step(&self, command: Command, index: usize) -> Result<bool> {
        match self.dispatch(&command, true).await {
            Ok(DispatchOutcome::Finished) => {
                self.set_idle();
                Ok(true)
            }
            Ok(DispatchOutcome::CheckFailed) => Ok(false),
            Ok(DispatchOutcome::Disconnected) => {
                let mut state = self.lock();
                let index = index.min(state.queue.len());
                state.queue.insert(index, command);
                state.running = false;
                Ok(false)
            }
            Err(err) => {
                self.set_idle();
                Err(err)
            }
        }
    }

    // Run `first`, then pop and run queued commands while auto_run holds.
    // The caller has already set the running flag.
    async fn drive(&self, first: Command) -> Result<DispatchOutcome> {
        let first_outcome = self.dispatch_or_idle(&first).await?;
        if first_outcome != DispatchOutcome::Finished {
            return Ok(first_outcome);
        }

        while let Some(command) = self.pop_next_or_idle() {
            match self.dispatch_or_idle(&command).await? {
                DispatchOutcome::Finished => {}
                DispatchOutcome::CheckFailed => break,
                DispatchOutcome::Disconnected => {
                    self.lock().queue.push_front(command);
                    break;
                }
            }
        }

        Ok(first_outcome)
    }

    async fn dispatch_or_idle(&self, command: &Command) -> Result<DispatchOutcome> {
        match self.dispatch(command, true).await {
            Ok(DispatchOutcome::Disconnected) => {
                self.set_idle();
                Ok(DispatchOutcome::Disconnected)
            }
            // Already idle, and a check_fail listener may have started a new drain
            Ok(DispatchOutcome::CheckFailed) => Ok(DispatchOutcome::CheckFailed),
            Ok(DispatchOutcome::Finished) => Ok(DispatchOutcome::Finished),
            Err(err) => {
                self.set_idle();
                Err(err)
            }
        }
    }

    fn pop_next_or_idle(&self) -> Option<Command> {
        let mut state = self.lock();
        if state.config.auto_run {
            if let Some(command) = state.queue.pop_front() {
                return Some(command);
            }
        }
        state.running = false;
        None
    }

    fn set_idle(&self) {
        self.lock().running = false;
    }

    // `owner` is set when the caller holds the running flag, which a failed
    // check then releases.
    async fn dispatch(&self, command: &Command, owner: bool) -> Result<DispatchOutcome> {
        let _turn = self.turn.lock().await;

        if self.auto_check_connected() && !self.refresh_connection().await {
            warn!(serial = %self.serial, id = command.id(), "skipping command, device not connected");
            return Ok(DispatchOutcome::Disconnected);
        }

        debug!(serial = %self.serial, id = command.id(), action = command.action().name(), "command start");
        self.listeners.emit(CommandEvent::Start, command);

        sleep(command.pre_delay()).await;

        if !command.checker().check(self).await? {
            let dropped = {
                let mut state = self.lock();
                let dropped = state.queue.len();
                state.queue.clear();
                if owner {
                    state.running = false;
                }
                dropped
            };
            warn!(serial = %self.serial, id = command.id(), dropped, "command check failed, queue cleared");
            self.listeners.emit(CommandEvent::CheckFail, command);
            return Ok(DispatchOutcome::CheckFailed);
        }
        self.listeners.emit(CommandEvent::CheckPass, command);

        let args = command.dispatch_args(self.resolution_ratio());
        self.bridge.issue(Some(&self.serial), true, &args).await?;

        sleep(command.post_delay()).await;

        debug!(serial = %self.serial, id = command.id(), "command finish");
        self.listeners.emit(CommandEvent::Finish, command);
        Ok(DispatchOutcome::Finished)
    }

    async fn shell(&self, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        Ok(self.bridge.issue(Some(&self.serial), true, &args).await?)
    }

    /// Run raw text on the device shell, outside the queue.
    pub async fn issue_shell_text(&self, text: &str) -> Result<String> {
        self.shell(&[text]).await
    }

    /// The `mCurrentFocus` line of `dumpsys window`, or empty if absent.
    pub async fn current_activity(&self) -> Result<String> {
        let output = self.shell(&["dumpsys", "window"]).await?;
        Ok(parse_current_focus(&output).unwrap_or_default())
    }

    pub async fn start_app(&self, package: &str, activity: &str) -> Result<String> {
        let component = format!("{}/{}", package, activity);
        self.shell(&["am", "start", "-n", &component]).await
    }

    pub async fn close_app(&self, package: &str) -> Result<String> {
        self.shell(&["am", "force-stop", package]).await
    }

    pub async fn third_party_packages(&self) -> Result<Vec<String>> {
        let output = self.shell(&["pm", "list", "packages", "-3"]).await?;
        Ok(parse_packages(&output))
    }

    /// Capture the screen to a PNG at `remote` on the device.
    pub async fn screencap(&self, remote: &str) -> Result<String> {
        self.shell(&["screencap", "-p", remote]).await
    }

    /// Copy a file from the device to the host.
    pub async fn pull(&self, remote: &str, local: &Path) -> Result<String> {
        let args = [
            "pull".to_string(),
            remote.to_string(),
            local.display().to_string(),
        ];
        Ok(self.bridge.issue(Some(&self.serial), false, &args).await?)
    }

    /// Poll the focused window until it contains `fragment` or `timeout` passes.
    pub async fn wait_for_activity(
        &self,
        fragment: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.current_activity().await?.contains(fragment) {
                return Ok(true);
            }
            if Instant::now() + interval > deadline {
                debug!(serial = %self.serial, fragment, "gave up waiting for activity");
                return Ok(false);
            }
            sleep(interval).await;
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Device")
            .field("serial", &self.serial)
            .field("connected", &state.connected)
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .field("resolution", &state.resolution)
            .field("config", &state.config)
            .finish()
    }
}
