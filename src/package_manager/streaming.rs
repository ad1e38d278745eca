//! 流式命令执行（status / search / install / uninstall / update）
//!
//! 每次调用启动一个外部进程，输出到达即按行产出事件，
//! 最后产出且只产出一个结束事件。

use super::parser::clean_terminal_output;
use super::types::{CommandLine, StreamMode};
use duct::ReaderHandle;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use thiserror::Error;

const READ_CHUNK: usize = 4096;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("未找到命令 {program}，请确认 Scoop 已安装并位于 PATH 中")]
    NotFound { program: String },
    #[error("启动 {program} 失败: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// 进程的结束状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// 正常退出；`code` 为 `None` 表示被信号终止
    Exited { code: Option<i32>, stderr: String },
    /// 可执行文件找不到或无法启动，没有进程产生
    LaunchFailed(String),
    /// 读取输出时发生 I/O 错误
    ReadFailed(String),
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited { code: Some(0), .. })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessExit::Exited { code, .. } => *code,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// 以 `\n` 或 `\r\n` 结束的一行
    Line(String),
    /// 以单独 `\r` 结束的就地刷新片段（下载进度条等），空白片段也会产出
    Progress(String),
    Finished(ProcessExit),
}

/// 可以在其他线程终止子进程的开关
///
/// 终止的是整棵进程树：scoop 是 .cmd/.ps1 垫片，真正干活的是它拉起的 powershell。
#[derive(Clone)]
pub struct ProcessKiller {
    handle: Arc<ReaderHandle>,
}

impl ProcessKiller {
    pub fn kill(&self) -> io::Result<()> {
        kill_tree(&self.handle)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.handle.pids()
    }
}

impl fmt::Debug for ProcessKiller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessKiller")
            .field("pids", &self.handle.pids())
            .finish()
    }
}

/// 一次进程运行产生的事件序列
///
/// 惰性、有限、不可重启。读到 EOF 后回收子进程并产出 `Finished`；
/// 提前 drop 时由 duct 负责 kill 并回收，不会泄漏进程句柄。
pub struct ProcessRun {
    command: String,
    handle: Option<Arc<ReaderHandle>>,
    buffer: Vec<u8>,
    pending: VecDeque<ProcessEvent>,
    finished: bool,
}

impl ProcessRun {
    pub fn spawn(command: &CommandLine, mode: StreamMode) -> Result<Self, ProcessError> {
        let program = which::which(&command.program).map_err(|_| ProcessError::NotFound {
            program: command.program.clone(),
        })?;

        let mut expr = duct::cmd(program, command.args.iter());
        if let Some(dir) = &command.cwd {
            expr = expr.dir(dir);
        }
        for (key, value) in &command.env {
            expr = expr.env(key, value);
        }
        expr = match mode {
            StreamMode::Combined => expr.stderr_to_stdout(),
            StreamMode::Split => expr.stderr_capture(),
        };
        // 退出码由调用方检查，非零不算读取错误
        let expr = isolate_process_tree(expr.stdin_null().unchecked());

        let handle = expr.reader().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: command.program.clone(),
                }
            } else {
                ProcessError::Spawn {
                    program: command.program.clone(),
                    source,
                }
            }
        })?;
        log::debug!("已启动 `{}` (pid {:?})", command, handle.pids());

        Ok(Self {
            command: command.to_string(),
            handle: Some(Arc::new(handle)),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        })
    }

    /// 只包含一个结束事件的运行，用于启动失败
    fn already_finished(command: &CommandLine, exit: ProcessExit) -> Self {
        Self {
            command: command.to_string(),
            handle: None,
            buffer: Vec::new(),
            pending: VecDeque::from([ProcessEvent::Finished(exit)]),
            finished: false,
        }
    }

    pub fn killer(&self) -> Option<ProcessKiller> {
        self.handle.as_ref().map(|handle| ProcessKiller {
            handle: Arc::clone(handle),
        })
    }

    fn read_chunk(&mut self, handle: &ReaderHandle) {
        let mut chunk = [0u8; READ_CHUNK];
        let mut reader: &ReaderHandle = handle;
        match reader.read(&mut chunk) {
            Ok(0) => {
                self.split_lines(true);
                let exit = wait_for_exit(handle);
                self.finish(exit);
            }
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                self.split_lines(false);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::warn!("读取 `{}` 的输出失败: {}", self.command, e);
                if let Err(kill_err) = kill_tree(handle) {
                    log::warn!("终止 `{}` 失败: {}", self.command, kill_err);
                }
                self.split_lines(true);
                self.finish(ProcessExit::ReadFailed(e.to_string()));
            }
        }
    }

    /// 把缓冲区中完整的行切出来
    ///
    /// 块末尾的单独 `\r` 先留在缓冲区，等下一块确认是不是 `\r\n`。
    fn split_lines(&mut self, at_eof: bool) {
        let mut start = 0;
        let mut i = 0;
        while i < self.buffer.len() {
            match self.buffer[i] {
                b'\n' => {
                    let line = decode(&self.buffer[start..i]);
                    self.pending.push_back(ProcessEvent::Line(line));
                    i += 1;
                    start = i;
                }
                b'\r' => match self.buffer.get(i + 1) {
                    Some(b'\n') => {
                        let line = decode(&self.buffer[start..i]);
                        self.pending.push_back(ProcessEvent::Line(line));
                        i += 2;
                        start = i;
                    }
                    Some(_) => {
                        let text = decode(&self.buffer[start..i]);
                        self.pending.push_back(ProcessEvent::Progress(text));
                        i += 1;
                        start = i;
                    }
                    None if at_eof => {
                        let line = decode(&self.buffer[start..i]);
                        self.pending.push_back(ProcessEvent::Line(line));
                        i += 1;
                        start = i;
                    }
                    None => break,
                },
                _ => i += 1,
            }
        }
        self.buffer.drain(..start);

        if at_eof && !self.buffer.is_empty() {
            let line = decode(&self.buffer);
            self.buffer.clear();
            self.pending.push_back(ProcessEvent::Line(line));
        }
    }

    fn finish(&mut self, exit: ProcessExit) {
        self.pending.push_back(ProcessEvent::Finished(exit));
        self.handle = None;
    }
}

impl Iterator for ProcessRun {
    type Item = ProcessEvent;

    fn next(&mut self) -> Option<ProcessEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if matches!(event, ProcessEvent::Finished(_)) {
                    self.finished = true;
                    self.pending.clear();
                }
                return Some(event);
            }
            if self.finished {
                return None;
            }
            let handle = Arc::clone(self.handle.as_ref()?);
            self.read_chunk(&handle);
        }
    }
}

impl std::iter::FusedIterator for ProcessRun {}

impl Drop for ProcessRun {
    fn drop(&mut self) {
        // 提前放弃读取时连同孙进程一起终止
        if let Some(handle) = self.handle.take() {
            if let Err(e) = kill_tree(&handle) {
                log::warn!("终止 `{}` 失败: {}", self.command, e);
            }
        }
    }
}

/// 启动命令并返回事件序列；启动失败时序列只包含一个 `LaunchFailed`
pub fn run(command: &CommandLine, mode: StreamMode) -> ProcessRun {
    match ProcessRun::spawn(command, mode) {
        Ok(run) => run,
        Err(e) => {
            log::warn!("{}", e);
            ProcessRun::already_finished(command, ProcessExit::LaunchFailed(e.to_string()))
        }
    }
}

fn decode(bytes: &[u8]) -> String {
    clean_terminal_output(&String::from_utf8_lossy(bytes))
}

/// duct 读到 EOF 时已经回收了子进程，这里只取结果
fn wait_for_exit(handle: &ReaderHandle) -> ProcessExit {
    match handle.try_wait() {
        Ok(Some(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(clean_terminal_output)
                .collect::<Vec<_>>()
                .join("\n");
            ProcessExit::Exited {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            }
        }
        Ok(None) => ProcessExit::ReadFailed("输出已结束但进程尚未退出".to_string()),
        Err(e) => ProcessExit::ReadFailed(e.to_string()),
    }
}

/// 子进程自成一个进程组（Unix）或不弹出控制台窗口（Windows）
#[cfg(unix)]
fn isolate_process_tree(expr: duct::Expression) -> duct::Expression {
    use std::os::unix::process::CommandExt;
    expr.before_spawn(|cmd| {
        cmd.process_group(0);
        Ok(())
    })
}

#[cfg(windows)]
fn isolate_process_tree(expr: duct::Expression) -> duct::Expression {
    use std::os::windows::process::CommandExt;
    expr.before_spawn(|cmd| {
        cmd.creation_flags(CREATE_NO_WINDOW);
        Ok(())
    })
}

#[cfg(not(any(unix, windows)))]
fn isolate_process_tree(expr: duct::Expression) -> duct::Expression {
    expr
}

/// 先终止整棵进程树，再让 duct 回收直接子进程
fn kill_tree(handle: &ReaderHandle) -> io::Result<()> {
    for pid in handle.pids() {
        kill_process_group(pid)?;
    }
    handle.kill()
}

#[cfg(unix)]
fn kill_process_group(pid: u32) -> io::Result<()> {
    let Ok(pgid) = i32::try_from(pid) else {
        return Ok(());
    };
    // 进程组 id 等于组长 pid；组内已无进程时返回 ESRCH
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(windows)]
fn kill_process_group(pid: u32) -> io::Result<()> {
    use std::os::windows::process::CommandExt;
    let output = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .creation_flags(CREATE_NO_WINDOW)
        .output()?;
    // 进程已经退出时 taskkill 返回非零，不算错误
    if !output.status.success() {
        log::debug!(
            "taskkill /PID {} 退出码 {:?}: {}",
            pid,
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn kill_process_group(_pid: u32) -> io::Result<()> {
    Ok(())
}
