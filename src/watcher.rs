//! 文档变更观察
//!
//! 宿主把结构/文本变更以批次形式送入，这里做两件事：
//! 过滤掉引擎自身落地产生的变更（否则会自触发循环），
//! 以及对真实变更做滑动防抖，静默期结束才触发一轮补充翻译。

use tokio::time::Instant;

use crate::dom::node_text;
use crate::scanner::node_is_excluded;
use markup5ever_rcdom::{Handle, NodeData};
use std::time::Duration;

/// 单条变更通知
#[derive(Debug, Clone)]
pub enum Mutation {
    /// 新节点接入文档
    AddedNode(Handle),
    /// 既有文本节点内容变化
    CharacterData(Handle),
}

/// 一个批次的变更通知
#[derive(Debug, Clone, Default)]
pub struct MutationBatch {
    pub mutations: Vec<Mutation>,
}

impl MutationBatch {
    pub fn single(mutation: Mutation) -> Self {
        Self {
            mutations: vec![mutation],
        }
    }
}

/// 变更防抖器
///
/// 每个相关变更都把触发时刻往后推一个完整静默期；
/// 触发后归零，等待下一批变更。
#[derive(Debug)]
pub struct ChangeWatcher {
    debounce: Duration,
    pending: usize,
    deadline: Option<Instant>,
}

impl ChangeWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: 0,
            deadline: None,
        }
    }

    /// 送入一个变更批次；返回其中相关变更的数量
    pub fn observe(&mut self, batch: &MutationBatch, now: Instant) -> usize {
        let relevant = batch
            .mutations
            .iter()
            .filter(|m| mutation_relevant(m))
            .count();

        if relevant > 0 {
            self.pending += relevant;
            // 滑动防抖：新变更重置整个静默期
            self.deadline = Some(now + self.debounce);
            tracing::trace!(relevant, "变更入队，防抖顺延");
        }
        relevant
    }

    /// 当前的触发时刻；无待处理变更时为 None
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 静默期是否已经结束
    pub fn due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// 消费待处理状态；返回是否确有积压的变更
    pub fn take_pending(&mut self) -> bool {
        let had = self.pending > 0;
        self.pending = 0;
        self.deadline = None;
        had
    }
}

/// 变更是否值得触发翻译
///
/// 排除规则与扫描器一致：引擎自己落地的结构（覆盖层、
/// 带标记的宿主）以及被排除子树内的变更全部忽略。
fn mutation_relevant(mutation: &Mutation) -> bool {
    match mutation {
        Mutation::AddedNode(node) => {
            if node_is_excluded(node) {
                return false;
            }
            match &node.data {
                NodeData::Text { .. } => node_text(node)
                    .map(|t| !t.trim().is_empty())
                    .unwrap_or(false),
                NodeData::Element { .. } => true,
                _ => false,
            }
        }
        Mutation::CharacterData(node) => {
            !node_is_excluded(node)
                && node_text(node)
                    .map(|t| !t.trim().is_empty())
                    .unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{find_elements, first_text_child, html_to_dom, new_text};

    fn watcher() -> ChangeWatcher {
        ChangeWatcher::new(Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_slides_forward() {
        let mut w = watcher();
        let t0 = Instant::now();

        w.observe(
            &MutationBatch::single(Mutation::AddedNode(new_text("fresh content"))),
            t0,
        );
        assert_eq!(w.deadline(), Some(t0 + Duration::from_secs(2)));

        // 一秒后又来一个变更，触发时刻整体后移
        let t1 = t0 + Duration::from_secs(1);
        w.observe(
            &MutationBatch::single(Mutation::AddedNode(new_text("more content"))),
            t1,
        );
        assert_eq!(w.deadline(), Some(t1 + Duration::from_secs(2)));

        assert!(!w.due(t1 + Duration::from_millis(1999)));
        assert!(w.due(t1 + Duration::from_secs(2)));
        assert!(w.take_pending());
        assert_eq!(w.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_inflicted_mutations_ignored() {
        let dom = html_to_dom(
            b"<div class=\"translation-overlay\"><div>overlay text</div></div>\
              <p data-original-text=\"Hi\">Salut</p>",
            "utf-8",
        );
        let overlay_inner = find_elements(&dom.document, "div").remove(1);
        let marked_p = find_elements(&dom.document, "p").remove(0);
        let translated_text = first_text_child(&marked_p).unwrap();

        let mut w = watcher();
        let now = Instant::now();
        let batch = MutationBatch {
            mutations: vec![
                Mutation::AddedNode(overlay_inner),
                Mutation::CharacterData(translated_text),
            ],
        };

        assert_eq!(w.observe(&batch, now), 0);
        assert_eq!(w.deadline(), None);
        assert!(!w.take_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_whitespace_text_ignored() {
        let mut w = watcher();
        let now = Instant::now();

        let relevant = w.observe(
            &MutationBatch::single(Mutation::AddedNode(new_text("   \n  "))),
            now,
        );
        assert_eq!(relevant, 0);
    }
}
