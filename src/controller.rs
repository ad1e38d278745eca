//! 操作控制器
//!
//! 同一时刻最多只有一个操作处于非终态（scoop 自身的锁不允许并发调用）。
//! 进程在 UI 线程中同步启动，之后交给专用工作线程读取输出；
//! UI 线程通过 `pump` 取回事件并推进状态机。

use crate::error::RequestError;
use crate::package_manager::streaming::{ProcessExit, ProcessKiller, ProcessRun};
use crate::package_manager::{CommandLine, OperationKind, OperationState};
use crate::relay::{self, RelayEvent, RelayReceiver, RelaySender};
use chrono::{DateTime, Local};
use std::fmt;

/// 已完成操作最多保留的条数
const HISTORY_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationHandle(u64);

impl OperationHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 一次外部命令调用及其生命周期
#[derive(Debug, Clone)]
pub struct Operation {
    pub handle: OperationHandle,
    pub kind: OperationKind,
    pub command: CommandLine,
    /// 本次操作针对的包名（搜索时为关键字）
    pub targets: Vec<String>,
    pub state: OperationState,
    /// 只追加，不重排；以 `\r` 结束的进度片段也按行记录
    pub lines: Vec<String>,
    /// 最近一次进度片段，终态时清空
    pub progress: Option<String>,
    /// 仅在终态时存在
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub diagnostic: Option<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub cancel_requested: bool,
}

impl Operation {
    fn new(
        handle: OperationHandle,
        kind: OperationKind,
        command: CommandLine,
        targets: Vec<String>,
    ) -> Self {
        Self {
            handle,
            kind,
            command,
            targets,
            state: OperationState::Pending,
            lines: Vec::new(),
            progress: None,
            exit_code: None,
            stderr: String::new(),
            diagnostic: None,
            started_at: Local::now(),
            finished_at: None,
            cancel_requested: false,
        }
    }

    pub fn output_text(&self) -> String {
        self.lines.join("\n")
    }

    /// 结束时显示给用户的一句话
    pub fn summary(&self) -> String {
        match self.state {
            OperationState::Pending | OperationState::Running => "运行中...".to_string(),
            OperationState::Succeeded => "命令执行成功。".to_string(),
            OperationState::Cancelled => "命令已取消。".to_string(),
            OperationState::Failed => self
                .diagnostic
                .clone()
                .unwrap_or_else(|| "命令执行失败。".to_string()),
        }
    }
}

/// 操作事件的接收方（UI 外壳实现）
pub trait OperationObserver {
    fn on_operation_state_changed(&mut self, handle: OperationHandle, state: OperationState);
    fn on_output_line(&mut self, handle: OperationHandle, line: &str);
    fn on_progress(&mut self, _handle: OperationHandle, _text: &str) {}
}

struct ActiveOperation {
    operation: Operation,
    killer: Option<ProcessKiller>,
}

pub struct OperationController {
    active: Option<ActiveOperation>,
    completed: Vec<Operation>,
    /// 已到终态、尚未通过 `pump` 交出的操作
    unclaimed: Vec<OperationHandle>,
    sender: RelaySender,
    receiver: RelayReceiver,
    next_id: u64,
}

impl OperationController {
    pub fn new() -> Self {
        let (sender, receiver) = relay::channel();
        Self {
            active: None,
            completed: Vec::new(),
            unclaimed: Vec::new(),
            sender,
            receiver,
            next_id: 0,
        }
    }

    /// 正在运行或尚未交出的操作
    fn occupied_by(&self) -> Option<OperationHandle> {
        self.active
            .as_ref()
            .map(|a| a.operation.handle)
            .or_else(|| self.unclaimed.first().copied())
    }

    pub fn is_busy(&self) -> bool {
        self.occupied_by().is_some()
    }

    pub fn active_handle(&self) -> Option<OperationHandle> {
        self.active.as_ref().map(|a| a.operation.handle)
    }

    pub fn operation(&self, handle: OperationHandle) -> Option<&Operation> {
        self.active
            .as_ref()
            .map(|a| &a.operation)
            .filter(|op| op.handle == handle)
            .or_else(|| self.completed.iter().find(|op| op.handle == handle))
    }

    /// 启动一个新操作
    ///
    /// 已有操作未结束（或结果尚未交出）时返回 `Busy`，不排队。
    /// 启动失败不算请求错误：返回的操作直接处于 `Failed`。
    pub fn start(
        &mut self,
        kind: OperationKind,
        command: CommandLine,
        targets: Vec<String>,
        observer: &mut dyn OperationObserver,
    ) -> Result<OperationHandle, RequestError> {
        if let Some(running) = self.occupied_by() {
            log::warn!("拒绝启动 `{}`：操作 {} 尚未结束", command, running);
            return Err(RequestError::Busy(running));
        }

        self.next_id += 1;
        let handle = OperationHandle(self.next_id);
        let mut operation = Operation::new(handle, kind, command, targets);
        log::info!("操作 {} [{}] 开始: {}", handle, kind.label(), operation.command);
        observer.on_operation_state_changed(handle, OperationState::Pending);

        let run = match ProcessRun::spawn(&operation.command, kind.stream_mode()) {
            Ok(run) => run,
            Err(e) => {
                log::warn!("操作 {} 启动失败: {}", handle, e);
                operation.diagnostic = Some(e.to_string());
                self.complete(operation, OperationState::Failed, observer);
                return Ok(handle);
            }
        };
        let killer = run.killer();

        // 线程创建失败时 run 随闭包一起被 drop，子进程会被终止
        if let Err(e) = relay::spawn_worker(handle, run, self.sender.clone()) {
            log::warn!("操作 {} 无法创建工作线程: {}", handle, e);
            operation.diagnostic = Some(format!("无法创建工作线程: {}", e));
            self.complete(operation, OperationState::Failed, observer);
            return Ok(handle);
        }

        operation.state = OperationState::Running;
        observer.on_operation_state_changed(handle, OperationState::Running);
        self.active = Some(ActiveOperation { operation, killer });
        Ok(handle)
    }

    /// 请求取消（尽力而为）
    ///
    /// 操作在进程确认退出后才变为 `Cancelled`。对未知或已结束的操作、
    /// 以及重复取消，均不做任何事并返回 false。
    pub fn cancel(&mut self, handle: OperationHandle) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.operation.handle != handle || active.operation.cancel_requested {
            return false;
        }
        active.operation.cancel_requested = true;
        log::info!("取消操作 {}", handle);
        if let Some(killer) = &active.killer {
            if let Err(e) = killer.kill() {
                log::warn!("终止操作 {} 的进程失败: {}", handle, e);
            }
        }
        true
    }

    /// 在 UI 线程中取走转发过来的事件，返回本次到达终态的操作
    pub fn pump(&mut self, observer: &mut dyn OperationObserver) -> Vec<Operation> {
        for event in self.receiver.drain() {
            match event {
                RelayEvent::Line { handle, line } => {
                    self.on_line_received(handle, line, observer);
                }
                RelayEvent::Progress { handle, text } => {
                    self.on_progress(handle, text, observer);
                }
                RelayEvent::Finished { handle, exit } => {
                    self.on_completed(handle, exit, observer);
                }
            }
        }

        let handles = std::mem::take(&mut self.unclaimed);
        handles
            .into_iter()
            .filter_map(|h| self.completed.iter().find(|op| op.handle == h).cloned())
            .collect()
    }

    fn running_mut(&mut self, handle: OperationHandle) -> Option<&mut Operation> {
        match self.active.as_mut() {
            Some(active) if active.operation.handle == handle => Some(&mut active.operation),
            _ => {
                log::debug!("忽略操作 {} 的过期事件", handle);
                None
            }
        }
    }

    pub fn on_line_received(
        &mut self,
        handle: OperationHandle,
        line: String,
        observer: &mut dyn OperationObserver,
    ) -> bool {
        let Some(operation) = self.running_mut(handle) else {
            return false;
        };
        observer.on_output_line(handle, &line);
        operation.lines.push(line);
        true
    }

    fn on_progress(
        &mut self,
        handle: OperationHandle,
        text: String,
        observer: &mut dyn OperationObserver,
    ) {
        if let Some(operation) = self.running_mut(handle) {
            observer.on_progress(handle, &text);
            operation.lines.push(text.clone());
            operation.progress = Some(text);
        }
    }

    pub fn on_completed(
        &mut self,
        handle: OperationHandle,
        exit: ProcessExit,
        observer: &mut dyn OperationObserver,
    ) -> bool {
        if self.running_mut(handle).is_none() {
            return false;
        }
        let Some(ActiveOperation {
            mut operation,
            killer,
        }) = self.active.take()
        else {
            return false;
        };

        // 读取失败时进程可能仍在运行
        if let (ProcessExit::ReadFailed(_), Some(killer)) = (&exit, &killer) {
            if let Err(e) = killer.kill() {
                log::warn!("终止操作 {} 的进程失败: {}", handle, e);
            }
        }

        operation.exit_code = exit.code();
        let state = if exit.success() {
            OperationState::Succeeded
        } else if operation.cancel_requested {
            operation.diagnostic = Some("操作已被用户取消".to_string());
            OperationState::Cancelled
        } else {
            operation.diagnostic = Some(describe_failure(&exit));
            OperationState::Failed
        };
        if let ProcessExit::Exited { stderr, .. } = exit {
            operation.stderr = stderr;
        }

        self.complete(operation, state, observer);
        true
    }

    fn complete(
        &mut self,
        mut operation: Operation,
        state: OperationState,
        observer: &mut dyn OperationObserver,
    ) {
        operation.state = state;
        operation.progress = None;
        operation.finished_at = Some(Local::now());
        let handle = operation.handle;
        log::info!(
            "操作 {} 结束: {} (退出码 {:?}, {} 行输出)",
            handle,
            state,
            operation.exit_code,
            operation.lines.len()
        );
        observer.on_operation_state_changed(handle, state);

        if self.completed.len() >= HISTORY_LIMIT {
            let dropped = self.completed.remove(0);
            log::debug!("丢弃最早的操作记录 {}", dropped.handle);
        }
        self.completed.push(operation);
        self.unclaimed.push(handle);
    }

    /// 关闭输出窗口后释放已完成的操作
    pub fn dismiss(&mut self, handle: OperationHandle) -> Option<Operation> {
        if self.unclaimed.contains(&handle) {
            return None;
        }
        let index = self.completed.iter().position(|op| op.handle == handle)?;
        Some(self.completed.remove(index))
    }
}

impl Default for OperationController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OperationController {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            log::info!("退出时终止仍在运行的操作 {}", active.operation.handle);
            if let Some(killer) = &active.killer {
                if let Err(e) = killer.kill() {
                    log::warn!("终止操作 {} 的进程失败: {}", active.operation.handle, e);
                }
            }
        }
    }
}

fn describe_failure(exit: &ProcessExit) -> String {
    match exit {
        ProcessExit::Exited {
            code: Some(code),
            stderr,
        } => {
            if stderr.is_empty() {
                format!("命令失败，退出码 {}。", code)
            } else {
                format!("命令失败，退出码 {}。\n{}", code, stderr)
            }
        }
        ProcessExit::Exited { code: None, .. } => "进程被意外终止。".to_string(),
        ProcessExit::LaunchFailed(reason) => reason.clone(),
        ProcessExit::ReadFailed(reason) => format!("读取命令输出失败: {}", reason),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Seen {
        State(OperationHandle, OperationState),
        Line(OperationHandle, String),
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<Seen>,
    }

    impl OperationObserver for Recorder {
        fn on_operation_state_changed(&mut self, handle: OperationHandle, state: OperationState) {
            self.seen.push(Seen::State(handle, state));
        }

        fn on_output_line(&mut self, handle: OperationHandle, line: &str) {
            self.seen.push(Seen::Line(handle, line.to_string()));
        }
    }

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("sh").arg("-c").arg(script)
    }

    fn wait_for_completion(
        controller: &mut OperationController,
        recorder: &mut Recorder,
    ) -> Vec<Operation> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let done = controller.pump(recorder);
            if !done.is_empty() {
                return done;
            }
            assert!(Instant::now() < deadline, "operation did not finish in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn install_runs_to_success_and_rejects_concurrent_start() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();

        let handle = controller
            .start(
                OperationKind::Install,
                sh("echo 'Installing git'; sleep 0.2; echo 'git was installed successfully!'"),
                vec!["git".to_string()],
                &mut recorder,
            )
            .unwrap();
        assert_eq!(
            recorder.seen,
            vec![
                Seen::State(handle, OperationState::Pending),
                Seen::State(handle, OperationState::Running),
            ]
        );

        let second = controller.start(
            OperationKind::Install,
            sh("echo other"),
            vec!["other".to_string()],
            &mut recorder,
        );
        assert_eq!(second, Err(RequestError::Busy(handle)));
        assert_eq!(recorder.seen.len(), 2);
        assert_eq!(
            controller.operation(handle).unwrap().state,
            OperationState::Running
        );

        let done = wait_for_completion(&mut controller, &mut recorder);
        assert_eq!(done.len(), 1);
        let op = &done[0];
        assert_eq!(op.state, OperationState::Succeeded);
        assert_eq!(op.exit_code, Some(0));
        assert_eq!(
            op.lines,
            vec!["Installing git", "git was installed successfully!"]
        );
        assert_eq!(
            recorder.seen[2..],
            [
                Seen::Line(handle, "Installing git".to_string()),
                Seen::Line(handle, "git was installed successfully!".to_string()),
                Seen::State(handle, OperationState::Succeeded),
            ]
        );
        assert!(!controller.is_busy());
    }

    #[test]
    fn launch_error_fails_immediately_without_output() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();

        let handle = controller
            .start(
                OperationKind::Install,
                CommandLine::new("lian-scoop-no-such-tool-4711").arg("install"),
                vec!["git".to_string()],
                &mut recorder,
            )
            .unwrap();

        let op = controller.operation(handle).unwrap();
        assert_eq!(op.state, OperationState::Failed);
        assert!(op.lines.is_empty());
        assert!(op.diagnostic.as_deref().unwrap().contains("未找到命令"));
        assert_eq!(
            recorder.seen,
            vec![
                Seen::State(handle, OperationState::Pending),
                Seen::State(handle, OperationState::Failed),
            ]
        );

        // 交出之前仍视为占用
        assert!(controller.is_busy());
        let done = controller.pump(&mut recorder);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].handle, handle);
        assert!(!controller.is_busy());
    }

    #[test]
    fn non_zero_exit_fails_with_captured_stderr() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();
        controller
            .start(
                OperationKind::Status,
                sh("echo partial; echo 'bucket is broken' >&2; exit 2"),
                Vec::new(),
                &mut recorder,
            )
            .unwrap();

        let op = wait_for_completion(&mut controller, &mut recorder).remove(0);
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.exit_code, Some(2));
        assert_eq!(op.lines, vec!["partial"]);
        assert_eq!(op.stderr, "bucket is broken");
        let diagnostic = op.diagnostic.unwrap();
        assert!(diagnostic.contains("退出码 2"));
        assert!(diagnostic.contains("bucket is broken"));
    }

    #[test]
    fn output_lines_are_relayed_in_order() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();
        let handle = controller
            .start(
                OperationKind::Update,
                sh("i=1; while [ $i -le 500 ]; do echo n$i; i=$((i+1)); done"),
                Vec::new(),
                &mut recorder,
            )
            .unwrap();
        let op = wait_for_completion(&mut controller, &mut recorder).remove(0);

        let expected: Vec<String> = (1..=500).map(|i| format!("n{i}")).collect();
        assert_eq!(op.lines, expected);
        let observed: Vec<String> = recorder
            .seen
            .iter()
            .filter_map(|s| match s {
                Seen::Line(h, l) if *h == handle => Some(l.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(observed, expected);
    }

    #[test]
    fn cancel_keeps_received_output_and_is_idempotent() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();
        let handle = controller
            .start(
                OperationKind::Update,
                sh("echo started; exec sleep 30"),
                Vec::new(),
                &mut recorder,
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while controller.operation(handle).unwrap().lines.is_empty() {
            assert!(controller.pump(&mut recorder).is_empty());
            assert!(Instant::now() < deadline, "no output received");
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(controller.cancel(handle));
        assert!(!controller.cancel(handle));
        assert_eq!(
            controller.operation(handle).unwrap().state,
            OperationState::Running
        );

        let op = wait_for_completion(&mut controller, &mut recorder).remove(0);
        assert_eq!(op.state, OperationState::Cancelled);
        assert_eq!(op.lines, vec!["started"]);
    }

    #[test]
    fn cancelling_a_terminal_operation_is_a_no_op() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();
        let handle = controller
            .start(OperationKind::Search, sh("echo done"), Vec::new(), &mut recorder)
            .unwrap();
        wait_for_completion(&mut controller, &mut recorder);

        let seen_before = recorder.seen.clone();
        assert!(!controller.cancel(handle));
        assert!(controller.pump(&mut recorder).is_empty());
        assert_eq!(recorder.seen, seen_before);
        assert_eq!(
            controller.operation(handle).unwrap().state,
            OperationState::Succeeded
        );
        assert!(!controller.operation(handle).unwrap().cancel_requested);
    }

    #[test]
    fn cancel_of_unknown_handle_is_rejected() {
        let mut controller = OperationController::new();
        assert!(!controller.cancel(OperationHandle::new(42)));
    }

    #[test]
    fn dismiss_releases_completed_operation() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();
        let handle = controller
            .start(OperationKind::Search, sh("true"), Vec::new(), &mut recorder)
            .unwrap();
        wait_for_completion(&mut controller, &mut recorder);

        assert!(controller.dismiss(handle).is_some());
        assert!(controller.operation(handle).is_none());
        assert!(controller.dismiss(handle).is_none());
    }

    fn wait_for_first_line(
        controller: &mut OperationController,
        recorder: &mut Recorder,
        handle: OperationHandle,
    ) -> String {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            assert!(controller.pump(recorder).is_empty());
            if let Some(line) = controller.operation(handle).unwrap().lines.first() {
                return line.clone();
            }
            assert!(Instant::now() < deadline, "no output received");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn progress_segments_are_kept_in_output() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();
        controller
            .start(
                OperationKind::Install,
                sh(r"printf 'a\r\nb\r10%%\r100%%\n'"),
                Vec::new(),
                &mut recorder,
            )
            .unwrap();

        let op = wait_for_completion(&mut controller, &mut recorder).remove(0);
        assert_eq!(op.state, OperationState::Succeeded);
        assert_eq!(op.lines, vec!["a", "b", "10%", "100%"]);
        assert_eq!(op.progress, None);
    }

    #[test]
    fn cancel_stops_child_processes_of_the_command() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();
        let handle = controller
            .start(
                OperationKind::Update,
                sh("echo started; sleep 30; echo after"),
                Vec::new(),
                &mut recorder,
            )
            .unwrap();
        assert_eq!(
            wait_for_first_line(&mut controller, &mut recorder, handle),
            "started"
        );

        let cancelled_at = Instant::now();
        assert!(controller.cancel(handle));
        let op = wait_for_completion(&mut controller, &mut recorder).remove(0);
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));
        assert_eq!(op.state, OperationState::Cancelled);
        assert_eq!(op.lines, vec!["started"]);
    }

    #[test]
    fn read_failure_mid_stream_fails_and_frees_the_controller() {
        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();
        let handle = controller
            .start(
                OperationKind::Install,
                sh("echo one; exec sleep 30"),
                vec!["git".to_string()],
                &mut recorder,
            )
            .unwrap();
        wait_for_first_line(&mut controller, &mut recorder, handle);

        assert!(controller.on_completed(
            handle,
            ProcessExit::ReadFailed("broken pipe".to_string()),
            &mut recorder,
        ));
        let op = controller.operation(handle).unwrap();
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.lines, vec!["one"]);
        assert_eq!(op.exit_code, None);
        let diagnostic = op.diagnostic.as_deref().unwrap();
        assert!(diagnostic.contains("读取命令输出失败"));
        assert!(diagnostic.contains("broken pipe"));
        assert_eq!(
            recorder.seen.last(),
            Some(&Seen::State(handle, OperationState::Failed))
        );

        // 工作线程随后送来的结束事件已过期，不影响结果
        let done = controller.pump(&mut recorder);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].state, OperationState::Failed);

        let next = controller
            .start(OperationKind::Search, sh("echo again"), Vec::new(), &mut recorder)
            .unwrap();
        let op = wait_for_completion(&mut controller, &mut recorder).remove(0);
        assert_eq!(op.handle, next);
        assert_eq!(op.state, OperationState::Succeeded);
        assert_eq!(op.lines, vec!["again"]);
        assert_eq!(
            controller.operation(handle).unwrap().state,
            OperationState::Failed
        );
    }

    #[test]
    fn dropping_the_controller_kills_the_running_process_tree() {
        use crate::test_support::{process_alive, wait_until_gone};

        let mut controller = OperationController::new();
        let mut recorder = Recorder::default();
        let handle = controller
            .start(
                OperationKind::Update,
                sh("sleep 30 & echo $!; wait"),
                Vec::new(),
                &mut recorder,
            )
            .unwrap();
        let grandchild: u32 = wait_for_first_line(&mut controller, &mut recorder, handle)
            .trim()
            .parse()
            .unwrap();
        let child = controller.active.as_ref().unwrap().killer.as_ref().unwrap().pids()[0];
        assert!(process_alive(child));
        assert!(process_alive(grandchild));

        drop(controller);
        assert!(wait_until_gone(child), "child {child} still running");
        assert!(wait_until_gone(grandchild), "grandchild {grandchild} still running");
    }
}
