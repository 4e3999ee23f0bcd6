//! 翻译单元扫描
//!
//! 遍历文档收集待翻译的文本节点和图片元素。扫描是幂等的：
//! 已翻译的宿主（带标记属性）、覆盖层和宿主排除的子树整棵跳过，
//! 同一棵树重复扫描不会产出已处理过的单元。

use markup5ever_rcdom::{Handle, NodeData};

use crate::config::{constants, EngineConfig};
use crate::dom::{get_node_attr, get_node_name, has_class, parent_node};

// ============================================================================
// 单元类型
// ============================================================================

/// 文本翻译单元
///
/// `text` 是归一化（trim）后的内容，既作为请求载荷也作为缓存指纹来源。
#[derive(Debug, Clone)]
pub struct TextUnit {
    /// 文本节点本体
    pub node: Handle,
    /// 归一化后的文本内容
    pub text: String,
}

/// 图片翻译单元
#[derive(Debug, Clone)]
pub struct ImageUnit {
    /// img 元素本体
    pub node: Handle,
    /// 图片源引用
    pub src: String,
}

/// 一次扫描的产出
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub texts: Vec<TextUnit>,
    pub images: Vec<ImageUnit>,
}

impl ScanOutcome {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.images.is_empty()
    }
}

// ============================================================================
// 扫描
// ============================================================================

/// 扫描整棵文档，收集文本和图片单元
pub fn scan(document: &Handle, cfg: &EngineConfig) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    walk(document, cfg, &mut outcome);

    tracing::debug!(
        texts = outcome.texts.len(),
        images = outcome.images.len(),
        "扫描完成"
    );
    outcome
}

fn walk(node: &Handle, cfg: &EngineConfig, outcome: &mut ScanOutcome) {
    match &node.data {
        NodeData::Element { .. } => {
            if subtree_excluded(node) {
                return;
            }
            if get_node_name(node) == Some("img") {
                if let Some(unit) = qualify_image(node, cfg) {
                    outcome.images.push(unit);
                }
                return;
            }
        }
        NodeData::Text { contents } => {
            let trimmed = contents.borrow().trim().to_string();
            if !trimmed.is_empty() {
                outcome.texts.push(TextUnit {
                    node: node.clone(),
                    text: trimmed,
                });
            }
            return;
        }
        _ => {}
    }

    for child in node.children.borrow().iter() {
        walk(child, cfg, outcome);
    }
}

/// 元素是否导致整棵子树被排除
fn subtree_excluded(node: &Handle) -> bool {
    if let Some(name) = get_node_name(node) {
        if constants::SKIP_ELEMENTS.contains(&name) {
            return true;
        }
    }
    if has_class(node, constants::OVERLAY_CLASS) || has_class(node, constants::IGNORE_CLASS) {
        return true;
    }
    // 已翻译的文本宿主：其下的文本已经是译文
    get_node_attr(node, constants::MARKER_ORIGINAL_TEXT).is_some()
}

/// 判定图片是否参与翻译
///
/// 对应浏览器里的 `img.complete` 加尺寸门槛：要求 src 非空且
/// width/height 属性可解析为数值。尺寸不明的图片不收集，
/// 等它在后续变更里补全属性再进入下一轮。
fn qualify_image(node: &Handle, cfg: &EngineConfig) -> Option<ImageUnit> {
    if get_node_attr(node, constants::MARKER_IMAGE_TRANSLATED).is_some() {
        return None;
    }

    let src = get_node_attr(node, "src").filter(|s| !s.trim().is_empty())?;
    let width: u32 = get_node_attr(node, "width")?.trim().parse().ok()?;
    let height: u32 = get_node_attr(node, "height")?.trim().parse().ok()?;

    if width < cfg.min_image_width || height < cfg.min_image_height {
        return None;
    }

    Some(ImageUnit {
        node: node.clone(),
        src,
    })
}

/// 节点（含祖先链）是否落在被排除的子树里
///
/// 变更观察方用它过滤掉覆盖层内部产生的变更，避免自触发循环。
pub fn node_is_excluded(node: &Handle) -> bool {
    let mut current = Some(node.clone());
    while let Some(handle) = current {
        if matches!(handle.data, NodeData::Element { .. }) && subtree_excluded(&handle) {
            return true;
        }
        current = parent_node(&handle);
    }
    false
}
