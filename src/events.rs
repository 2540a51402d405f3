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

//! Typed lifecycle listeners for commands and tasks

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandEvent {
    Start,
    CheckPass,
    CheckFail,
    Finish,
}

impl CommandEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandEvent::Start => "command_start",
            CommandEvent::CheckPass => "check_pass",
            CommandEvent::CheckFail => "check_fail",
            CommandEvent::Finish => "command_finish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEvent {
    Start,
    CheckPass,
    CheckFail,
    Finish,
}

impl TaskEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEvent::Start => "task_start",
            TaskEvent::CheckPass => "check_pass",
            TaskEvent::CheckFail => "check_fail",
            TaskEvent::Finish => "task_finish",
        }
    }
}

impl fmt::Display for CommandEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by `on`, used to remove a single listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(0);

/// Event kind to subscriber list.
pub struct Listeners<E, P: ?Sized> {
    handlers: Mutex<Vec<(ListenerId, E, Arc<dyn Fn(&P) + Send + Sync>)>>,
}

impl<E, P> Listeners<E, P>
where
    E: Copy + PartialEq,
    P: ?Sized,
{
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn on<F>(&self, event: E, handler: F) -> ListenerId
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let id = ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed));
        let handler: Arc<dyn Fn(&P) + Send + Sync> = Arc::new(handler);
        self.lock().push((id, event, handler));
        id
    }

    /// Remove one listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(listener, _, _)| *listener != id);
        handlers.len() != before
    }

    pub fn off_all(&self, event: E) {
        self.lock().retain(|(_, kind, _)| *kind != event);
    }

    pub fn emit(&self, event: E, payload: &P) {
        // Handlers may register or remove listeners, so call them unlocked
        let matching: Vec<Arc<dyn Fn(&P) + Send + Sync>> = self
            .lock()
            .iter()
            .filter(|(_, kind, _)| *kind == event)
            .map(|(_, _, handler)| handler.clone())
            .collect();

        for handler in matching {
            handler(payload);
        }
    }

    #[allow(clippy::type_complexity)]
    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, E, Arc<dyn Fn(&P) + Send + Sync>)>> {
        // A panicking listener must not disable event delivery
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<E, P> Default for Listeners<E, P>
where
    E: Copy + PartialEq,
    P: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}
