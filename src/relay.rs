//! 工作线程 → UI 线程的输出转发
//!
//! 基于无界 mpsc 通道：生产方永不阻塞，事件不丢、不乱序。
//! UI 线程按自己的节奏调用 `drain` 取走全部积压事件。

use crate::controller::OperationHandle;
use crate::package_manager::streaming::{ProcessEvent, ProcessExit, ProcessRun};
use std::io;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Line {
        handle: OperationHandle,
        line: String,
    },
    Progress {
        handle: OperationHandle,
        text: String,
    },
    Finished {
        handle: OperationHandle,
        exit: ProcessExit,
    },
}

impl RelayEvent {
    pub fn handle(&self) -> OperationHandle {
        match self {
            RelayEvent::Line { handle, .. }
            | RelayEvent::Progress { handle, .. }
            | RelayEvent::Finished { handle, .. } => *handle,
        }
    }

    fn from_process(handle: OperationHandle, event: ProcessEvent) -> Self {
        match event {
            ProcessEvent::Line(line) => RelayEvent::Line { handle, line },
            ProcessEvent::Progress(text) => RelayEvent::Progress { handle, text },
            ProcessEvent::Finished(exit) => RelayEvent::Finished { handle, exit },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelaySender {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl RelaySender {
    /// 接收端已关闭时返回 false
    pub fn send(&self, event: RelayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::UnboundedReceiver<RelayEvent>,
}

impl RelayReceiver {
    pub fn try_next(&mut self) -> Option<RelayEvent> {
        self.rx.try_recv().ok()
    }

    /// 非阻塞地取走当前积压的全部事件
    pub fn drain(&mut self) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_next() {
            events.push(event);
        }
        events
    }
}

pub fn channel() -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RelaySender { tx }, RelayReceiver { rx })
}

/// 把一次进程运行的事件逐个转发到通道（在工作线程中执行）
///
/// 接收端消失时停止读取，`run` 被 drop，子进程随之被终止。
pub fn pump(handle: OperationHandle, run: ProcessRun, sender: &RelaySender) {
    for event in run {
        if !sender.send(RelayEvent::from_process(handle, event)) {
            log::debug!("操作 {} 的接收端已关闭，停止转发", handle);
            break;
        }
    }
}

/// 为一次操作启动专用工作线程
pub fn spawn_worker(
    handle: OperationHandle,
    run: ProcessRun,
    sender: RelaySender,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("lian-scoop-op-{}", handle.id()))
        .spawn(move || pump(handle, run, &sender))
}
