//! 译文落地与恢复
//!
//! 把翻译结果写回文档，并维护一份恢复账本，保证任何时刻都能
//! 一次性回到原文状态。文本走原地覆盖（节点身份不变），
//! 图片走包裹加覆盖层（img 元素身份不变）。

use markup5ever_rcdom::{Handle, RcDom};
use std::rc::Rc;

use crate::config::constants;
use crate::dom::{
    append_child, get_node_attr, insert_before, new_element, new_text, node_text, parent_node,
    remove_child, set_node_attr, set_node_text,
};
use crate::scanner::{ImageUnit, TextUnit};

// ============================================================================
// 恢复账本
// ============================================================================

/// 单条恢复记录
///
/// 文本记录保存覆盖前的完整原文（未 trim），恢复时逐字节还原。
#[derive(Debug, Clone)]
pub enum RestoreRecord {
    Text {
        /// 被覆盖的文本节点
        node: Handle,
        /// 覆盖前的节点内容
        original: String,
    },
    ImageOverlay {
        /// 注入的包裹元素
        wrapper: Handle,
        /// 原 img 元素
        image: Handle,
        /// img 原有的内联 style（None 表示原本没有）
        original_style: Option<String>,
    },
}

/// 译文落地器
///
/// 所有结构性修改都经由这里进出，恢复账本因此是完备的：
/// 账本清空后文档与翻译前逐字节一致（外部并发修改除外）。
pub struct DomApplier {
    dom: Rc<RcDom>,
    records: Vec<RestoreRecord>,
}

impl DomApplier {
    pub fn new(dom: Rc<RcDom>) -> Self {
        Self {
            dom,
            records: Vec::new(),
        }
    }

    /// 账本中的记录数
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    // ========================================================================
    // 落地
    // ========================================================================

    /// 将文本译文写回节点
    ///
    /// 宿主元素打上原文标记属性；同一宿主下有多个文本节点时
    /// 逐个覆盖，标记以最后落地的为准（恢复走账本，不依赖标记值）。
    /// 返回 false 表示目标已脱离文档或该节点已在账本中。
    pub fn apply_text(&mut self, unit: &TextUnit, translated: &str) -> bool {
        let Some(parent) = parent_node(&unit.node) else {
            tracing::debug!("文本节点已脱离文档，跳过落地");
            return false;
        };
        // 重复判定按节点身份：宿主标记不拦截同宿主的兄弟文本节点
        if self.text_applied(&unit.node) {
            return false;
        }

        let original = node_text(&unit.node).unwrap_or_default();
        set_node_attr(
            &parent,
            constants::MARKER_ORIGINAL_TEXT,
            Some(unit.text.clone()),
        );
        set_node_text(&unit.node, translated);

        self.records.push(RestoreRecord::Text {
            node: unit.node.clone(),
            original,
        });
        true
    }

    /// 节点是否已有文本恢复记录
    fn text_applied(&self, node: &Handle) -> bool {
        self.records.iter().any(|record| {
            matches!(record, RestoreRecord::Text { node: recorded, .. }
                if Rc::ptr_eq(recorded, node))
        })
    }

    /// 在图片上叠加译文覆盖层
    ///
    /// 结构变换：`parent > img` 变为 `parent > wrapper > (img, overlay)`。
    /// img 元素本体保留，属性和内联样式可逆。
    pub fn apply_image(&mut self, unit: &ImageUnit, translated: &str) -> bool {
        let img = &unit.node;
        if get_node_attr(img, constants::MARKER_IMAGE_TRANSLATED).is_some() {
            return false;
        }
        let Some(parent) = parent_node(img) else {
            tracing::debug!(src = %unit.src, "img 已脱离文档，跳过落地");
            return false;
        };

        let width: f32 = get_node_attr(img, "width")
            .and_then(|w| w.trim().parse().ok())
            .unwrap_or(0.0);
        let height: f32 = get_node_attr(img, "height")
            .and_then(|h| h.trim().parse().ok())
            .unwrap_or(0.0);

        let original_style = get_node_attr(img, "style");

        let wrapper = new_element(
            &self.dom,
            "div",
            &[(
                "style",
                &format!(
                    "position: relative; display: inline-block; \
                     width: {width}px; height: {height}px; line-height: 0;"
                ),
            )],
        );
        insert_before(&parent, img, &wrapper);
        remove_child(&parent, img);
        append_child(&wrapper, img);

        set_node_attr(
            img,
            "style",
            Some("width: 100%; height: 100%; object-fit: contain;".to_string()),
        );
        set_node_attr(img, constants::MARKER_IMAGE_TRANSLATED, Some("true".to_string()));

        let overlay = new_element(
            &self.dom,
            "div",
            &[
                ("class", constants::OVERLAY_CLASS),
                (
                    "style",
                    "position: absolute; top: 0; left: 0; right: 0; bottom: 0; \
                     display: flex; align-items: flex-end; \
                     pointer-events: none; z-index: 1000;",
                ),
            ],
        );

        let font_size = (width / 40.0).min(height / 15.0).min(24.0).max(14.0);
        let content = new_element(
            &self.dom,
            "div",
            &[(
                "style",
                &format!(
                    "width: 100%; padding: 8px; background: rgba(0, 0, 0, 0.7); \
                     color: white; white-space: pre-line; pointer-events: none; \
                     font-size: {font_size}px; line-height: 1.4; text-align: left;"
                ),
            )],
        );
        append_child(&content, &new_text(translated));
        append_child(&overlay, &content);
        append_child(&wrapper, &overlay);

        self.records.push(RestoreRecord::ImageOverlay {
            wrapper,
            image: img.clone(),
            original_style,
        });
        true
    }

    // ========================================================================
    // 恢复
    // ========================================================================

    /// 撤销全部译文，回到原文状态
    ///
    /// 幂等：账本逐条消费后清空，重复调用是空操作。
    /// 恢复目标已被外部移除时静默跳过该条。
    pub fn restore(&mut self) {
        let records = std::mem::take(&mut self.records);
        let total = records.len();

        for record in records {
            match record {
                RestoreRecord::Text { node, original } => {
                    set_node_text(&node, &original);
                    if let Some(parent) = parent_node(&node) {
                        set_node_attr(&parent, constants::MARKER_ORIGINAL_TEXT, None);
                    }
                }
                RestoreRecord::ImageOverlay {
                    wrapper,
                    image,
                    original_style,
                } => {
                    unwind_overlay(&wrapper, &image, original_style);
                }
            }
        }

        if total > 0 {
            tracing::debug!(records = total, "原文恢复完成");
        }
    }

    /// 清理隐藏图片上的残留覆盖层
    ///
    /// 图片被页面隐藏（display:none 或尺寸归零）后覆盖层失去意义，
    /// 原地拆除并把该图片退回未翻译状态。
    pub fn sweep_overlays(&mut self) {
        let mut kept = Vec::with_capacity(self.records.len());
        let mut swept = 0usize;

        for record in std::mem::take(&mut self.records) {
            match record {
                RestoreRecord::ImageOverlay {
                    wrapper,
                    image,
                    original_style,
                } if image_hidden(&image) => {
                    unwind_overlay(&wrapper, &image, original_style);
                    swept += 1;
                }
                other => kept.push(other),
            }
        }

        self.records = kept;
        if swept > 0 {
            tracing::debug!(swept, "清理了隐藏图片的覆盖层");
        }
    }
}

/// 拆除覆盖层结构，img 回到原位并还原属性
fn unwind_overlay(wrapper: &Handle, image: &Handle, original_style: Option<String>) {
    if let Some(grandparent) = parent_node(wrapper) {
        remove_child(wrapper, image);
        insert_before(&grandparent, wrapper, image);
        remove_child(&grandparent, wrapper);
    }
    set_node_attr(image, "style", original_style);
    set_node_attr(image, constants::MARKER_IMAGE_TRANSLATED, None);
}

/// 图片是否已被页面隐藏
fn image_hidden(image: &Handle) -> bool {
    if let Some(style) = get_node_attr(image, "style") {
        let squashed: String = style.split_whitespace().collect();
        if squashed.contains("display:none") {
            return true;
        }
    }

    let dimension_zero = |attr: &str| {
        get_node_attr(image, attr)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(|v| v == 0)
            .unwrap_or(false)
    };
    dimension_zero("width") || dimension_zero("height")
}
