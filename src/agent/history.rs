//! 运行历史：记录已执行的动作与结果，供后续提示词使用
//!
//! 只保留最近 limit 条，超出时丢弃最旧的。

use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub step: usize,
    pub summary: String,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct ActionHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl ActionHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, step: usize, summary: impl Into<String>, success: bool) {
        self.entries.push_back(HistoryEntry {
            step,
            summary: summary.into(),
            success,
        });
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 每行一条："3. [ok] tap (10, 20) -> opened menu"
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "{}. [{}] {}",
                    e.step,
                    if e.success { "ok" } else { "failed" },
                    e.summary
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_only_recent_entries() {
        let mut h = ActionHistory::new(2);
        h.push(1, "a", true);
        h.push(2, "b", false);
        h.push(3, "c", true);
        assert_eq!(h.len(), 2);
        assert_eq!(h.render(), "2. [failed] b\n3. [ok] c");
    }
}
