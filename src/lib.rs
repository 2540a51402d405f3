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

//! Scripted input automation for Android devices
//!
//! Commands (tap, swipe, key event, text) are queued per device and sent
//! through the device-bridge CLI. Tasks group commands into named,
//! conditional, repeatable steps linked into a flow graph.

pub mod adb;
pub mod bridge;
pub mod checker;
pub mod command;
pub mod device;
pub mod error;
pub mod events;
pub mod flow;
pub mod parser;
pub mod position;
pub mod task;
pub mod types;

pub use adb::Adb;
pub use bridge::{AdbBridge, Bridge, BridgeError};
pub use checker::{Checker, CheckerRegistry, SharedChecker, checker_fn};
pub use command::{Action, Command};
pub use device::{Device, DeviceConfig, DispatchOutcome, QueueState};
pub use error::{Error, Result};
pub use events::{CommandEvent, ListenerId, TaskEvent};
pub use flow::FlowDescription;
pub use task::{Task, TaskFlow};
pub use types::{Rect2, ResolutionRatio, Vector2};
