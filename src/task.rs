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

//! Task graphs
//!
//! A [`TaskFlow`] holds named tasks linked by successor names. Running a
//! task executes its commands `times` times. After every repetition each
//! successor subtree is run to completion, left to right, before the next
//! sibling or repetition starts.
//!
//! A task checker only gates the task's own commands. Successors are
//! traversed whatever it returns. Cycles are not detected; a cyclic flow
//! runs until its stop flag is raised.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::checker::{self, SharedChecker};
use crate::command::{Command, DEFAULT_DELAY};
use crate::device::{Device, DispatchOutcome};
use crate::error::Result;
use crate::events::{ListenerId, Listeners, TaskEvent};

#[derive(Clone)]
pub struct Task {
    name: String,
    commands: Vec<Command>,
    checker: SharedChecker,
    times: u32,
    pre_delay: Duration,
    post_delay: Duration,
    next: Vec<String>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
            checker: checker::always(),
            times: 1,
            pre_delay: DEFAULT_DELAY,
            post_delay: DEFAULT_DELAY,
            next: Vec::new(),
        }
    }

    pub fn with_commands(mut self, commands: impl IntoIterator<Item = Command>) -> Self {
        self.commands.extend(commands);
        self
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn with_checker(mut self, checker: SharedChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_times(mut self, times: u32) -> Self {
        self.times = times;
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

    pub fn with_next<I, S>(mut self, next: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next.extend(next.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn checker(&self) -> &SharedChecker {
        &self.checker
    }

    pub fn times(&self) -> u32 {
        self.times
    }

    pub fn pre_delay(&self) -> Duration {
        self.pre_delay
    }

    pub fn post_delay(&self) -> Duration {
        self.post_delay
    }

    pub fn next(&self) -> &[String] {
        &self.next
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("commands", &self.commands)
            .field("times", &self.times)
            .field("pre_delay", &self.pre_delay)
            .field("post_delay", &self.post_delay)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

// Pending work on the traversal stack
enum Frame<'a> {
    Visit(&'a str),
    Repeat { task: &'a Task, iteration: u32 },
}

pub struct TaskFlow {
    device: Arc<Device>,
    tasks: Vec<Task>,
    listeners: Listeners<TaskEvent, Task>,
    stop: Option<Arc<AtomicBool>>,
}

impl TaskFlow {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            tasks: Vec::new(),
            listeners: Listeners::new(),
            stop: None,
        }
    }

    /// Stop traversal once `flag` becomes true. Checked before each task repetition.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn add_task(&mut self, task: Task) {
        if self.task(task.name()).is_some() {
            warn!(task = task.name(), "duplicate task name, lookups resolve to the first");
        }
        self.tasks.push(task);
    }

    pub fn add_tasks(&mut self, tasks: impl IntoIterator<Item = Task>) {
        for task in tasks {
            self.add_task(task);
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name() == name)
    }

    pub fn on<F>(&self, event: TaskEvent, handler: F) -> ListenerId
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.listeners.on(event, handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    pub fn off_all(&self, event: TaskEvent) {
        self.listeners.off_all(event)
    }

    fn should_continue(&self) -> bool {
        self.stop
            .as_ref()
            .is_none_or(|flag| !flag.load(Ordering::SeqCst))
    }

    /// Run the flow from `start`, or from the first registered task.
    ///
    /// An empty flow or an unknown start name is a no-op.
    pub async fn run(&self, start: Option<&str>) -> Result<()> {
        let start = match start {
            Some(name) => name,
            None => match self.tasks.first() {
                Some(task) => task.name(),
                None => return Ok(()),
            },
        };

        let mut stack = vec![Frame::Visit(start)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Visit(name) => match self.task(name) {
                    Some(task) => stack.push(Frame::Repeat { task, iteration: 0 }),
                    None => debug!(task = name, "no such task, skipping"),
                },
                Frame::Repeat { task, iteration } => {
                    if iteration >= task.times() {
                        continue;
                    }
                    if !self.should_continue() {
                        info!(task = task.name(), "flow stopped");
                        return Ok(());
                    }

                    self.run_once(task, iteration).await?;

                    // Successors run before the next repetition, first name on top
                    if iteration + 1 < task.times() {
                        stack.push(Frame::Repeat {
                            task,
                            iteration: iteration + 1,
                        });
                    }
                    stack.extend(task.next().iter().rev().map(|name| Frame::Visit(name.as_str())));
                }
            }
        }
        Ok(())
    }

    async fn run_once(&self, task: &Task, iteration: u32) -> Result<()> {
        info!(task = task.name(), iteration = iteration + 1, times = task.times(), "task start");
        self.listeners.emit(TaskEvent::Start, task);

        sleep(task.pre_delay()).await;

        if task.checker().check(&self.device).await? {
            self.listeners.emit(TaskEvent::CheckPass, task);
            for command in task.commands() {
                let outcome = self.device.issue_command(command.clone()).await?;
                if outcome != DispatchOutcome::Finished {
                    warn!(task = task.name(), id = command.id(), ?outcome, "stopping task commands");
                    break;
                }
            }
        } else {
            debug!(task = task.name(), "task check failed, skipping its commands");
            self.listeners.emit(TaskEvent::CheckFail, task);
        }

        sleep(task.post_delay()).await;

        self.listeners.emit(TaskEvent::Finish, task);
        Ok(())
    }
}

impl fmt::Debug for TaskFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFlow")
            .field("device", &self.device.serial())
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::ScriptedBridge;
    use crate::checker::{Checker, Never};
    use crate::device::DeviceConfig;
    use crate::events::CommandEvent;
    use crate::types::Rect2;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Checker for Counting {
        async fn check(&self, _device: &Device) -> Result<bool> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn setup() -> (Arc<ScriptedBridge>, TaskFlow) {
        let bridge = Arc::new(ScriptedBridge::new());
        let device = Device::new("emulator-5554", bridge.clone(), DeviceConfig::default());
        (bridge, TaskFlow::new(device))
    }

    fn started(flow: &TaskFlow) -> Arc<Mutex<Vec<String>>> {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        flow.on(TaskEvent::Start, move |task| {
            o.lock().unwrap().push(task.name().to_string())
        });
        order
    }

    fn key(code: i32) -> Command {
        Command::key_event(code)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successors_run_depth_first() {
        let (_bridge, mut flow) = setup();
        flow.add_tasks([
            Task::new("T1").with_next(["T2", "T3"]),
            Task::new("T2"),
            Task::new("T3"),
        ]);
        let order = started(&flow);

        flow.run(Some("T1")).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["T1", "T2", "T3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subtree_completes_before_sibling() {
        let (_bridge, mut flow) = setup();
        flow.add_tasks([
            Task::new("T1").with_next(["T2", "T3"]),
            Task::new("T2").with_next(["T4"]),
            Task::new("T3"),
            Task::new("T4").with_times(2),
        ]);
        let order = started(&flow);

        flow.run(None).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["T1", "T2", "T4", "T4", "T3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_runs_commands_each_time() {
        let (bridge, mut flow) = setup();
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        flow.add_task(
            Task::new("repeat")
                .with_times(3)
                .with_checker(counting.clone())
                .with_commands([key(3), key(4)]),
        );

        flow.run(Some("repeat")).await.unwrap();

        assert_eq!(counting.0.load(Ordering::SeqCst), 3);
        let codes: Vec<String> = bridge.inputs().into_iter().map(|a| a[2].clone()).collect();
        assert_eq!(codes, vec!["3", "4", "3", "4", "3", "4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successors_follow_every_repetition() {
        let (_bridge, mut flow) = setup();
        flow.add_tasks([
            Task::new("T1").with_times(2).with_next(["T2"]),
            Task::new("T2"),
        ]);
        let order = started(&flow);

        flow.run(None).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["T1", "T2", "T1", "T2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_check_fail_still_visits_successors() {
        let (bridge, mut flow) = setup();
        flow.add_tasks([
            Task::new("gated")
                .with_checker(Arc::new(Never))
                .with_command(key(1))
                .with_next(["after"]),
            Task::new("after").with_command(key(2)),
        ]);
        let failed = Arc::new(Mutex::new(Vec::new()));
        let f = failed.clone();
        flow.on(TaskEvent::CheckFail, move |task| {
            f.lock().unwrap().push(task.name().to_string())
        });

        flow.run(None).await.unwrap();

        assert_eq!(bridge.inputs(), vec![vec!["input", "keyevent", "2"]]);
        assert_eq!(*failed.lock().unwrap(), vec!["gated"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_check_fail_stops_task_commands() {
        let (bridge, mut flow) = setup();
        flow.add_tasks([
            Task::new("first")
                .with_commands([key(1), key(2).with_checker(Arc::new(Never)), key(3)])
                .with_next(["second"]),
            Task::new("second").with_command(key(4)),
        ]);

        flow.run(None).await.unwrap();

        let codes: Vec<String> = bridge.inputs().into_iter().map(|a| a[2].clone()).collect();
        assert_eq!(codes, vec!["1", "4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_or_unknown_is_noop() {
        let (bridge, flow) = setup();
        flow.run(None).await.unwrap();

        let (_, mut named) = setup();
        named.add_task(Task::new("only").with_command(key(1)));
        let order = started(&named);
        named.run(Some("missing")).await.unwrap();

        assert!(bridge.calls().is_empty());
        assert!(order.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_successor_is_skipped() {
        let (_bridge, mut flow) = setup();
        flow.add_tasks([
            Task::new("T1").with_next(["ghost", "T2"]),
            Task::new("T2"),
        ]);
        let order = started(&flow);

        flow.run(None).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["T1", "T2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_delays() {
        let (_bridge, mut flow) = setup();
        flow.add_task(
            Task::new("slow")
                .with_pre_delay(Duration::from_secs(1))
                .with_post_delay(Duration::from_secs(2)),
        );

        let start = Instant::now();
        flow.run(None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_runs_until_stopped() {
        let (_bridge, flow) = setup();
        let stop = Arc::new(AtomicBool::new(false));
        let mut flow = flow.with_stop_flag(stop.clone());
        flow.add_task(
            Task::new("loop")
                .with_pre_delay(Duration::ZERO)
                .with_post_delay(Duration::ZERO)
                .with_next(["loop"]),
        );

        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        flow.on(TaskEvent::Finish, move |_| {
            if r.fetch_add(1, Ordering::SeqCst) + 1 == 10_000 {
                stop.store(true, Ordering::SeqCst);
            }
        });

        flow.run(None).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_before_run() {
        let (bridge, flow) = setup();
        let mut flow = flow.with_stop_flag(Arc::new(AtomicBool::new(true)));
        flow.add_task(Task::new("never").with_command(key(1)));

        flow.run(None).await.unwrap();
        assert!(bridge.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_commands_use_device_queue_path() {
        let (bridge, mut flow) = setup();
        flow.add_task(Task::new("tap").with_command(Command::tap(Rect2::point(10, 20))));
        flow.device().set_resolution(crate::types::Vector2::new(2560, 1440));

        flow.run(None).await.unwrap();
        assert_eq!(bridge.inputs(), vec![vec!["input", "tap", "20", "40"]]);
        assert!(!flow.device().running());
    }

    fn command_spans(device: &Device) -> Arc<Mutex<Vec<String>>> {
        let spans = Arc::new(Mutex::new(Vec::new()));
        for (event, label) in [(CommandEvent::Start, "start"), (CommandEvent::Finish, "finish")] {
            let s = spans.clone();
            device.on(event, move |cmd| {
                s.lock().unwrap().push(format!("{} {}", label, cmd.id()))
            });
        }
        spans
    }

    // Each start is directly followed by the finish of the same command
    fn assert_serial(spans: &[String]) {
        assert_eq!(spans.len() % 2, 0, "{:?}", spans);
        for pair in spans.chunks(2) {
            let id = pair[0].strip_prefix("start ").expect("start first");
            assert_eq!(pair[1], format!("finish {}", id), "{:?}", spans);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flows_sharing_device_do_not_overlap() {
        let bridge = Arc::new(ScriptedBridge::new());
        let device = Device::new("emulator-5554", bridge.clone(), DeviceConfig::default());
        let spans = command_spans(&device);

        let mut first = TaskFlow::new(device.clone());
        first.add_task(Task::new("A").with_command(key(1).with_id("A")));
        let mut second = TaskFlow::new(device.clone());
        second.add_task(Task::new("B").with_command(key(2).with_id("B")));

        let (a, b) = tokio::join!(first.run(None), second.run(None));
        a.unwrap();
        b.unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 4);
        assert_serial(&spans);
        assert_eq!(bridge.inputs().len(), 2);
        assert!(!device.running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_waits_for_queue_drain() {
        let bridge = Arc::new(ScriptedBridge::new());
        let device = Device::new("emulator-5554", bridge.clone(), DeviceConfig::default());
        let spans = command_spans(&device);

        let handle = device.add_command(key(1).with_id("Q1")).unwrap();
        device.add_command(key(2).with_id("Q2"));
        device.add_command(key(3).with_id("Q3"));

        let mut flow = TaskFlow::new(device.clone());
        flow.add_task(Task::new("T").with_command(key(4).with_id("T")));
        flow.run(None).await.unwrap();
        handle.await.unwrap().unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 8);
        assert_serial(&spans);
        let queued: Vec<&String> = spans.iter().filter(|s| s.starts_with("start Q")).collect();
        assert_eq!(queued, vec!["start Q1", "start Q2", "start Q3"]);
        assert_eq!(device.queue_len(), 0);
        assert!(!device.running());
    }
}
