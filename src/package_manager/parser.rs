//! 输出解析函数
//!
//! scoop 的输出是给人看的表格文本，格式随版本变化。这里逐行解析，
//! 不认识的行直接跳过，单独一行格式异常不会影响其他行。

use super::types::{ListRow, SELF_UPDATE_NAME};
use std::collections::HashSet;

/// 表示"没有可用新版本"的占位值
const NO_UPDATE_MARKERS: [&str; 5] = ["n/a", "-", "unknown", "error", "latest"];

/// 清理单行终端输出中的 ANSI 转义序列和控制字符
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek().copied() {
                Some('[') => {
                    chars.next();
                    // CSI：参数 / 中间字节之后以 0x40..=0x7E 结束
                    for next in chars.by_ref() {
                        if ('@'..='~').contains(&next) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    // OSC：以 BEL 或 ESC \ 结束
                    while let Some(next) = chars.next() {
                        if next == '\x07' {
                            break;
                        }
                        if next == '\x1b' {
                            if chars.peek() == Some(&'\\') {
                                chars.next();
                            }
                            break;
                        }
                    }
                }
                Some(next) if ('@'..='_').contains(&next) => {
                    chars.next();
                }
                _ => {}
            },
            '\t' => result.push(c),
            c if c.is_control() => {}
            _ => result.push(c),
        }
    }

    result
}

fn is_package_name(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '@'))
}

fn looks_like_version(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit()) || token.eq_ignore_ascii_case("nightly")
}

fn is_separator(line: &str) -> bool {
    line.starts_with("--") && line.chars().all(|c| c == '-' || c.is_whitespace())
}

fn is_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.starts_with("name ") && lower.contains("version")
}

fn is_self(name: &str) -> bool {
    name.eq_ignore_ascii_case(SELF_UPDATE_NAME)
}

// ========== scoop status ==========

/// 解析 `scoop status` 的输出，按出现顺序返回可更新条目
///
/// 支持三种行：
///   `Scoop can be updated from version 0.3.0 to 0.3.1.`
///   `7zip 19.00 -> 21.07 [main]`
///   表格行 `git  2.39.0  2.40.0  [Missing Dependencies]  [Info]`
pub fn parse_status_output(output: &str) -> Vec<ListRow> {
    let mut rows = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for raw in output.lines() {
        let cleaned = clean_terminal_output(raw);
        let line = cleaned.trim();
        if line.is_empty() || is_separator(line) || is_header(line) {
            continue;
        }

        let row = parse_self_update_notice(line)
            .or_else(|| parse_arrow_line(line))
            .or_else(|| parse_status_table_row(line));

        if let Some(row) = row {
            if seen.insert(row.name().to_lowercase()) {
                rows.push(row);
            }
        }
    }

    rows
}

fn parse_self_update_notice(line: &str) -> Option<ListRow> {
    const MARKER: &str = "can be updated from version ";
    // 保持字节长度不变，下面用同一个下标切原始行
    let lower = line.to_ascii_lowercase();
    if !lower.starts_with("scoop ") {
        return None;
    }
    let start = lower.find(MARKER)? + MARKER.len();
    let rest = &line[start..];
    let (current, available) = rest.split_once(" to ")?;
    let current = current.trim();
    let available = available.trim().trim_end_matches('.');
    if current.is_empty() || available.is_empty() {
        return None;
    }
    Some(ListRow::SelfUpdate {
        current: current.to_string(),
        available: available.to_string(),
    })
}

fn parse_arrow_line(line: &str) -> Option<ListRow> {
    let (before, after) = line.split_once("->")?;
    let parts: Vec<&str> = before.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }
    let name = parts[0];
    let current = parts[1..].join(" ");
    let mut after_parts = after.split_whitespace();
    let available = after_parts.next()?;
    if !is_package_name(name) || !looks_like_version(&current) || !looks_like_version(available) {
        return None;
    }

    let bucket = after_parts
        .find(|t| t.starts_with('[') && t.ends_with(']'))
        .map(|t| t.trim_matches(|c| c == '[' || c == ']'));

    if is_self(name) || bucket.is_some_and(is_self) {
        return Some(ListRow::SelfUpdate {
            current,
            available: available.to_string(),
        });
    }
    Some(ListRow::Update {
        name: name.to_string(),
        current,
        available: available.to_string(),
    })
}

fn parse_status_table_row(line: &str) -> Option<ListRow> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    let name = parts[0];
    let installed = parts[1];
    if !is_package_name(name) || !looks_like_version(installed) {
        return None;
    }

    // Info 列中的 "Update available: X" 优先于 Latest 列
    let latest = if parts.len() > 3 {
        update_available_in(&parts[3..].join(" ")).unwrap_or_else(|| parts[2].to_string())
    } else {
        parts[2].to_string()
    };

    if NO_UPDATE_MARKERS.contains(&latest.to_lowercase().as_str())
        || !looks_like_version(&latest)
        || latest == installed
    {
        return None;
    }

    if is_self(name) {
        return Some(ListRow::SelfUpdate {
            current: installed.to_string(),
            available: latest,
        });
    }
    Some(ListRow::Update {
        name: name.to_string(),
        current: installed.to_string(),
        available: latest,
    })
}

fn update_available_in(info: &str) -> Option<String> {
    const MARKER: &str = "Update available:";
    let start = info.find(MARKER)? + MARKER.len();
    let version = info[start..]
        .split_whitespace()
        .next()?
        .trim_end_matches([',', '.', ';']);
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

// ========== scoop search ==========

/// 解析 `scoop search` 的输出
///
/// 新版输出为表格 `Name Version Source Binaries`；
/// 旧版按 bucket 分组：`'main' bucket:` 之后跟 `    git (2.40.0)`。
pub fn parse_search_output(output: &str) -> Vec<ListRow> {
    let mut results = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut bucket: Option<String> = None;

    for raw in output.lines() {
        let cleaned = clean_terminal_output(raw);
        let line = cleaned.trim();
        if line.is_empty() || is_separator(line) || is_header(line) {
            continue;
        }
        if let Some(name) = parse_bucket_header(line) {
            bucket = Some(name);
            continue;
        }

        let row = parse_legacy_search_row(line, bucket.as_deref())
            .or_else(|| parse_search_table_row(line));

        if let Some(row) = row {
            // scoop 自己不作为可安装的搜索结果
            if is_self(row.name()) {
                continue;
            }
            if seen.insert(row.name().to_lowercase()) {
                results.push(row);
            }
        }
    }

    results
}

fn parse_bucket_header(line: &str) -> Option<String> {
    let inner = line.strip_suffix(" bucket:")?;
    let name = inner.strip_prefix('\'')?.strip_suffix('\'')?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn parse_legacy_search_row(line: &str, bucket: Option<&str>) -> Option<ListRow> {
    let open = line.find('(')?;
    let close = open + line[open..].find(')')?;
    let name = line[..open].trim();
    let version = line[open + 1..close].trim();
    if !is_package_name(name) || !looks_like_version(version) {
        return None;
    }
    Some(ListRow::Search {
        name: name.to_string(),
        version: version.to_string(),
        source: bucket.unwrap_or("N/A").to_string(),
    })
}

fn parse_search_table_row(line: &str) -> Option<ListRow> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }
    let name = parts[0];
    let version = parts[1];
    if !is_package_name(name) || !looks_like_version(version) {
        return None;
    }
    Some(ListRow::Search {
        name: name.to_string(),
        version: version.to_string(),
        source: parts.get(2).copied().unwrap_or("N/A").to_string(),
    })
}
