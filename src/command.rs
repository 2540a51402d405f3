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

//! Input commands issued to a device
//!
//! Coordinates are stored in logical (authoring) resolution and only scaled
//! when the dispatch arguments are built.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::checker::{self, SharedChecker};
use crate::position::random_position;
use crate::types::{Rect2, ResolutionRatio, Vector2};

pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_SWIPE_DURATION: Duration = Duration::from_millis(500);

static COMMAND_COUNT: AtomicU64 = AtomicU64::new(0);

fn next_command_id() -> String {
    format!("command-{}", COMMAND_COUNT.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Tap {
        target: Vector2,
    },
    Swipe {
        origin: Vector2,
        target: Vector2,
        duration: Duration,
    },
    KeyEvent(i32),
    Text(String),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Tap { .. } => "tap",
            Action::Swipe { .. } => "swipe",
            Action::KeyEvent(_) => "keyevent",
            Action::Text(_) => "text",
        }
    }

    /// Arguments for `input` on the device shell.
    pub fn dispatch_args(&self, ratio: ResolutionRatio) -> Vec<String> {
        match self {
            Action::Tap { target } => {
                let target = ratio.scale(*target);
                vec![
                    "input".to_string(),
                    "tap".to_string(),
                    target.x.to_string(),
                    target.y.to_string(),
                ]
            }
            Action::Swipe {
                origin,
                target,
                duration,
            } => {
                let origin = ratio.scale(*origin);
                let target = ratio.scale(*target);
                vec![
                    "input".to_string(),
                    "swipe".to_string(),
                    origin.x.to_string(),
                    origin.y.to_string(),
                    target.x.to_string(),
                    target.y.to_string(),
                    duration.as_millis().to_string(),
                ]
            }
            Action::KeyEvent(code) => vec![
                "input".to_string(),
                "keyevent".to_string(),
                code.to_string(),
            ],
            Action::Text(content) => vec!["input".to_string(), "text".to_string(), content.clone()],
        }
    }
}

/// A single unit of work for a device queue.
///
/// Cloning a command is cheap and keeps its id and sampled position, so a
/// replayed command always hits the same coordinates.
#[derive(Clone)]
pub struct Command {
    id: String,
    pre_delay: Duration,
    post_delay: Duration,
    checker: SharedChecker,
    action: Action,
}

impl Command {
    pub fn new(action: Action) -> Self {
        Self {
            id: next_command_id(),
            pre_delay: DEFAULT_DELAY,
            post_delay: DEFAULT_DELAY,
            checker: checker::always(),
            action,
        }
    }

    /// Tap a point sampled once from `rect`.
    pub fn tap(rect: Rect2) -> Self {
        Self::new(Action::Tap {
            target: random_position(&rect),
        })
    }

    pub fn swipe(origin: Rect2, target: Rect2) -> Self {
        Self::new(Action::Swipe {
            origin: random_position(&origin),
            target: random_position(&target),
            duration: DEFAULT_SWIPE_DURATION,
        })
    }

    pub fn key_event(code: i32) -> Self {
        Self::new(Action::KeyEvent(code))
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(Action::Text(content.into()))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_pre_delay(mut self, delay: Duration) -> Self {
        self.pre_delay = delay;
        self
    }

    pub fn with_post_delay(mut self, delay: Duration) -> Self {
        self.post_delay = delay;
        self
    }

    pub fn with_checker(mut self, checker: SharedChecker) -> Self {
        self.checker = checker;
        self
    }

    /// Set the gesture duration. Only meaningful for swipes.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        if let Action::Swipe { duration: d, .. } = &mut self.action {
            *d = duration;
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pre_delay(&self) -> Duration {
        self.pre_delay
    }

    pub fn post_delay(&self) -> Duration {
        self.post_delay
    }

    pub fn checker(&self) -> &SharedChecker {
        &self.checker
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn dispatch_args(&self, ratio: ResolutionRatio) -> Vec<String> {
        self.action.dispatch_args(ratio)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("pre_delay", &self.pre_delay)
            .field("post_delay", &self.post_delay)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}
