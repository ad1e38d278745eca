//! 应用协调层：把用户意图变成操作，把完成的操作同步回列表
//!
//! 所有方法都在 UI 线程上调用。

use crate::config::Config;
use crate::controller::{Operation, OperationController, OperationHandle, OperationObserver};
use crate::error::RequestError;
use crate::list_model::ListModel;
use crate::package_manager::{
    CommandLine, ListKind, ListRow, OperationKind, OperationState, Scoop, UpdateTargets,
    SELF_UPDATE_NAME,
};

/// UI 外壳需要实现的回调
pub trait UiShell: OperationObserver {
    fn on_rows_changed(&mut self, list: ListKind, rows: &[ListRow]);
    fn on_selection_changed(&mut self, list: ListKind, ids: &[String]);
}

pub struct App<S: UiShell> {
    scoop: Scoop,
    controller: OperationController,
    updates: ListModel,
    search: ListModel,
    shell: S,
    last: Option<Operation>,
}

impl<S: UiShell> App<S> {
    pub fn new(config: &Config, shell: S) -> Self {
        Self::with_scoop(Scoop::from_config(config), shell)
    }

    pub fn with_scoop(scoop: Scoop, shell: S) -> Self {
        Self {
            scoop,
            controller: OperationController::new(),
            updates: ListModel::new(ListKind::Updates),
            search: ListModel::new(ListKind::SearchResults),
            shell,
            last: None,
        }
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    pub fn shell_mut(&mut self) -> &mut S {
        &mut self.shell
    }

    pub fn updates(&self) -> &ListModel {
        &self.updates
    }

    pub fn search(&self) -> &ListModel {
        &self.search
    }

    pub fn controller(&self) -> &OperationController {
        &self.controller
    }

    pub fn is_busy(&self) -> bool {
        self.controller.is_busy()
    }

    /// 最近一次结束的操作的状态
    pub fn last_outcome(&self) -> Option<OperationState> {
        self.last.as_ref().map(|op| op.state)
    }

    pub fn last_operation(&self) -> Option<&Operation> {
        self.last.as_ref()
    }

    fn start(
        &mut self,
        kind: OperationKind,
        command: CommandLine,
        targets: Vec<String>,
    ) -> Result<OperationHandle, RequestError> {
        self.controller.start(kind, command, targets, &mut self.shell)
    }

    // ===== 用户意图 =====

    /// 检查更新
    pub fn request_refresh(&mut self) -> Result<OperationHandle, RequestError> {
        let cmd = self.scoop.status();
        self.start(OperationKind::Status, cmd, Vec::new())
    }

    pub fn request_search(&mut self, query: &str) -> Result<OperationHandle, RequestError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RequestError::EmptyQuery);
        }
        let cmd = self.scoop.search(query);
        self.start(OperationKind::Search, cmd, vec![query.to_string()])
    }

    pub fn request_install(&mut self, names: &[String]) -> Result<OperationHandle, RequestError> {
        let names = normalize(names);
        if names.is_empty() {
            return Err(RequestError::NothingSelected);
        }
        let cmd = self.scoop.install(&names);
        self.start(OperationKind::Install, cmd, names)
    }

    /// `scoop` 会被忽略
    pub fn request_uninstall(&mut self, names: &[String]) -> Result<OperationHandle, RequestError> {
        let names: Vec<String> = normalize(names)
            .into_iter()
            .filter(|n| !n.eq_ignore_ascii_case(SELF_UPDATE_NAME))
            .collect();
        if names.is_empty() {
            return Err(RequestError::NothingSelected);
        }
        let cmd = self.scoop.uninstall(&names);
        self.start(OperationKind::Uninstall, cmd, names)
    }

    /// 名单中的 `scoop` 表示更新 scoop 自身
    pub fn request_update(&mut self, names: &[String]) -> Result<OperationHandle, RequestError> {
        let mut targets = UpdateTargets::default();
        for name in normalize(names) {
            if name.eq_ignore_ascii_case(SELF_UPDATE_NAME) {
                targets.self_update = true;
            } else {
                targets.apps.push(name);
            }
        }
        self.start_update(targets)
    }

    fn start_update(&mut self, targets: UpdateTargets) -> Result<OperationHandle, RequestError> {
        if targets.is_empty() {
            return Err(RequestError::NothingSelected);
        }
        let cmd = self.scoop.update(&targets);
        self.start(OperationKind::Update, cmd, targets.row_names())
    }

    pub fn request_update_selected(&mut self) -> Result<OperationHandle, RequestError> {
        let targets = self.updates.update_targets();
        self.start_update(targets)
    }

    pub fn request_uninstall_selected(&mut self) -> Result<OperationHandle, RequestError> {
        let names = self.updates.uninstall_targets();
        self.request_uninstall(&names)
    }

    pub fn request_install_selected(&mut self) -> Result<OperationHandle, RequestError> {
        let names = self.search.install_targets();
        self.request_install(&names)
    }

    /// 取消当前操作；没有可取消的操作时返回 false
    pub fn request_cancel(&mut self) -> bool {
        match self.controller.active_handle() {
            Some(handle) => self.controller.cancel(handle),
            None => false,
        }
    }

    // ===== 选中状态 =====

    fn list_mut(&mut self, list: ListKind) -> &mut ListModel {
        match list {
            ListKind::Updates => &mut self.updates,
            ListKind::SearchResults => &mut self.search,
        }
    }

    pub fn select(&mut self, list: ListKind, ids: &[String]) {
        self.list_mut(list).apply_selection(ids);
        self.notify_selection(list);
    }

    pub fn toggle(&mut self, list: ListKind, id: &str) -> bool {
        let changed = self.list_mut(list).toggle(id);
        if changed {
            self.notify_selection(list);
        }
        changed
    }

    pub fn select_all(&mut self, list: ListKind) {
        self.list_mut(list).select_all();
        self.notify_selection(list);
    }

    pub fn deselect_all(&mut self, list: ListKind) {
        self.list_mut(list).deselect_all();
        self.notify_selection(list);
    }

    pub fn clear_list(&mut self, list: ListKind) {
        self.list_mut(list).clear();
        self.notify_rows(list);
    }

    fn notify_selection(&mut self, list: ListKind) {
        let ids = match list {
            ListKind::Updates => self.updates.selected_ids(),
            ListKind::SearchResults => self.search.selected_ids(),
        };
        self.shell.on_selection_changed(list, &ids);
    }

    /// 行变化总是伴随选中状态清空
    fn notify_rows(&mut self, list: ListKind) {
        let model = match list {
            ListKind::Updates => &self.updates,
            ListKind::SearchResults => &self.search,
        };
        self.shell.on_rows_changed(list, model.rows());
        self.notify_selection(list);
    }

    // ===== 事件循环 =====

    /// 取走后台事件并同步列表，返回本次结束的操作
    pub fn tick(&mut self) -> Vec<Operation> {
        let done = self.controller.pump(&mut self.shell);
        for op in &done {
            self.reconcile(op);
        }
        if let Some(op) = done.last() {
            self.last = Some(op.clone());
        }
        done
    }

    fn reconcile(&mut self, op: &Operation) {
        match (op.kind, op.state) {
            (OperationKind::Status, OperationState::Succeeded) => {
                let count = self.updates.ingest_status_output(&op.output_text()).len();
                log::info!("发现 {} 个可更新条目", count);
                self.notify_rows(ListKind::Updates);
            }
            (OperationKind::Search, OperationState::Succeeded) => {
                let count = self.search.ingest_search_output(&op.output_text()).len();
                log::info!("搜索到 {} 个结果", count);
                self.notify_rows(ListKind::SearchResults);
            }
            // 失败时列表置空，不把错误输出当成数据
            (OperationKind::Status, OperationState::Failed) => {
                self.clear_list(ListKind::Updates);
            }
            (OperationKind::Search, OperationState::Failed) => {
                self.clear_list(ListKind::SearchResults);
            }
            (OperationKind::Uninstall | OperationKind::Update, OperationState::Succeeded) => {
                self.updates.remove_rows(&op.targets);
                self.notify_rows(ListKind::Updates);
            }
            _ => {}
        }
    }
}

fn normalize(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}
