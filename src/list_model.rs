//! 列表数据（可更新应用 / 搜索结果）与选中状态
//!
//! 行集合整体替换时选中状态一并清空，不会指向已经消失的行。

use crate::package_manager::parser::{parse_search_output, parse_status_output};
use crate::package_manager::{ListKind, ListRow, UpdateTargets};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ListModel {
    kind: ListKind,
    rows: Vec<ListRow>,
    selection: HashSet<String>,
}

impl ListModel {
    pub fn new(kind: ListKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
            selection: HashSet::new(),
        }
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    pub fn rows(&self) -> &[ListRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rows.iter().any(|row| row.name() == name)
    }

    /// 用 `scoop status` 的输出替换全部行
    pub fn ingest_status_output(&mut self, output: &str) -> &[ListRow] {
        self.replace_rows(parse_status_output(output));
        &self.rows
    }

    /// 用 `scoop search` 的输出替换全部行
    pub fn ingest_search_output(&mut self, output: &str) -> &[ListRow] {
        self.replace_rows(parse_search_output(output));
        &self.rows
    }

    pub fn replace_rows(&mut self, rows: Vec<ListRow>) {
        self.selection.clear();
        self.rows = rows;
        log::debug!("{:?} 列表更新为 {} 行", self.kind, self.rows.len());
    }

    /// 清空行与选中状态
    pub fn clear(&mut self) {
        self.replace_rows(Vec::new());
    }

    /// 更新 / 卸载成功后移除对应的行
    pub fn remove_rows(&mut self, names: &[String]) {
        let remaining = self
            .rows
            .iter()
            .filter(|row| !names.iter().any(|n| n == row.name()))
            .cloned()
            .collect();
        self.replace_rows(remaining);
    }

    /// 以给定 id 集合作为新的选中状态，不在列表中的 id 被丢弃
    pub fn apply_selection<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: HashSet<String> = ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();
        self.selection = self
            .rows
            .iter()
            .map(|row| row.name().to_string())
            .filter(|name| wanted.contains(name))
            .collect();
    }

    /// 切换一行的选中状态；行不存在时返回 false
    pub fn toggle(&mut self, name: &str) -> bool {
        if !self.contains(name) {
            return false;
        }
        if !self.selection.remove(name) {
            self.selection.insert(name.to_string());
        }
        true
    }

    pub fn select_all(&mut self) {
        self.selection = self.rows.iter().map(|row| row.name().to_string()).collect();
    }

    pub fn deselect_all(&mut self) {
        self.selection.clear();
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selection.contains(name)
    }

    /// 选中的 id，按行顺序
    pub fn selected_ids(&self) -> Vec<String> {
        self.selected_rows()
            .map(|row| row.name().to_string())
            .collect()
    }

    fn selected_rows(&self) -> impl Iterator<Item = &ListRow> {
        self.rows
            .iter()
            .filter(|row| self.selection.contains(row.name()))
    }

    /// Scoop 自身不能被卸载
    pub fn uninstall_targets(&self) -> Vec<String> {
        self.selected_rows()
            .filter(|row| !row.is_self_update())
            .map(|row| row.name().to_string())
            .collect()
    }

    pub fn update_targets(&self) -> UpdateTargets {
        let mut targets = UpdateTargets::default();
        for row in self.selected_rows() {
            if row.is_self_update() {
                targets.self_update = true;
            } else {
                targets.apps.push(row.name().to_string());
            }
        }
        targets
    }

    pub fn install_targets(&self) -> Vec<String> {
        self.selected_ids()
    }
}
