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

//! Declarative flow descriptions
//!
//! A flow file is a JSON list of tasks:
//!
//! ```json
//! [
//!   {
//!     "name": "quick_make",
//!     "checker": { "name": "activity_focused", "args": ["game.example/"] },
//!     "commands": [
//!       { "type": "tap", "rect": { "x": 41, "y": 640, "width": 28, "height": 25 } },
//!       { "type": "swipe", "originRect": { "x": 519, "y": 361 }, "targetRect": { "x": 747, "y": 368 } },
//!       { "type": "keyevent", "keyCode": 4, "postDelay": 1000 },
//!       { "type": "text", "content": "hello" }
//!     ],
//!     "times": 2,
//!     "next": ["save_data"]
//!   },
//!   { "name": "save_data", "commands": [] }
//! ]
//! ```
//!
//! Delays are in milliseconds. Unknown command types are skipped.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::checker::{CheckerRegistry, SharedChecker};
use crate::command::{Action, Command, DEFAULT_SWIPE_DURATION};
use crate::device::Device;
use crate::error::Result;
use crate::position::random_position;
use crate::task::{Task, TaskFlow};
use crate::types::Rect2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CommandKind {
    Tap {
        rect: Rect2,
    },
    #[serde(rename_all = "camelCase")]
    Swipe {
        origin_rect: Rect2,
        target_rect: Rect2,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
    },
    #[serde(rename = "keyevent", rename_all = "camelCase")]
    KeyEvent {
        key_code: i32,
    },
    Text {
        content: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescription {
    #[serde(flatten)]
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker: Option<CheckerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_delay: Option<u64>,
}

fn default_times() -> u32 {
    1
}

// `next` may be a single name or a list of names
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(name)) => vec![name],
        Some(OneOrMany::Many(names)) => names,
        None => Vec::new(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescription {
    pub name: String,
    #[serde(default)]
    pub commands: Vec<CommandDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker: Option<CheckerRef>,
    #[serde(default = "default_times")]
    pub times: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_delay: Option<u64>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowDescription {
    pub tasks: Vec<TaskDescription>,
}

fn resolve_checker(
    checker: Option<&CheckerRef>,
    registry: &CheckerRegistry,
) -> Result<Option<SharedChecker>> {
    checker
        .map(|c| registry.resolve(&c.name, &c.args))
        .transpose()
}

impl CommandDescription {
    /// Build the command, or `None` for an unknown command type.
    pub fn build(&self, registry: &CheckerRegistry) -> Result<Option<Command>> {
        let action = match &self.kind {
            CommandKind::Tap { rect } => Action::Tap {
                target: random_position(rect),
            },
            CommandKind::Swipe {
                origin_rect,
                target_rect,
                duration,
            } => Action::Swipe {
                origin: random_position(origin_rect),
                target: random_position(target_rect),
                duration: duration
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_SWIPE_DURATION),
            },
            CommandKind::KeyEvent { key_code } => Action::KeyEvent(*key_code),
            CommandKind::Text { content } => Action::Text(content.clone()),
            CommandKind::Unknown => return Ok(None),
        };

        let mut command = Command::new(action);
        if let Some(id) = &self.id {
            command = command.with_id(id.clone());
        }
        if let Some(ms) = self.pre_delay {
            command = command.with_pre_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.post_delay {
            command = command.with_post_delay(Duration::from_millis(ms));
        }
        if let Some(checker) = resolve_checker(self.checker.as_ref(), registry)? {
            command = command.with_checker(checker);
        }
        Ok(Some(command))
    }
}

impl TaskDescription {
    pub fn build(&self, registry: &CheckerRegistry) -> Result<Task> {
        let mut task = Task::new(self.name.clone())
            .with_times(self.times)
            .with_next(self.next.iter().cloned());

        for (index, description) in self.commands.iter().enumerate() {
            match description.build(registry)? {
                Some(command) => task = task.with_command(command),
                None => warn!(task = %self.name, index, "skipping command of unknown type"),
            }
        }
        if let Some(ms) = self.pre_delay {
            task = task.with_pre_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.post_delay {
            task = task.with_post_delay(Duration::from_millis(ms));
        }
        if let Some(checker) = resolve_checker(self.checker.as_ref(), registry)? {
            task = task.with_checker(checker);
        }
        Ok(task)
    }
}

impl FlowDescription {
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_json(&input)
    }

    pub fn build(&self, device: Arc<Device>, registry: &CheckerRegistry) -> Result<TaskFlow> {
        let mut flow = TaskFlow::new(device);
        for description in &self.tasks {
            flow.add_task(description.build(registry)?);
        }
        Ok(flow)
    }
}

impl TaskFlow {
    pub fn from_description(
        device: Arc<Device>,
        description: &FlowDescription,
        registry: &CheckerRegistry,
    ) -> Result<Self> {
        description.build(device, registry)
    }

    pub fn from_path(
        device: Arc<Device>,
        path: impl AsRef<Path>,
        registry: &CheckerRegistry,
    ) -> Result<Self> {
        FlowDescription::from_path(path)?.build(device, registry)
    }
}
