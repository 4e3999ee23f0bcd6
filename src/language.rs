//! 源语言推断
//!
//! 按四级回退确定文档源语言：
//! 1. `<html lang>` 属性；
//! 2. `<meta http-equiv="content-language">`；
//! 3. 文档文本采样达标时回退到运行环境语言；
//! 4. 以上都失败返回 None，调用方放弃本轮翻译。
//!
//! 采样只证明"文档有足够文本可判断"，并不做真正的语种识别，
//! 这一行为与原始实现一致。

use markup5ever_rcdom::{Handle, NodeData};

use crate::config::{constants, EngineConfig};
use crate::dom::{get_node_attr, get_node_name};

/// 取语言标签的主子标签并归一为小写
///
/// `"en-US"` 和 `"en_US.UTF-8"` 都取 "en"。
pub fn primary_subtag(tag: &str) -> Option<String> {
    let primary: String = tag
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .flat_map(|c| c.to_lowercase())
        .collect();
    if primary.is_empty() {
        None
    } else {
        Some(primary)
    }
}

/// 推断文档源语言
pub fn detect_source_language(document: &Handle, cfg: &EngineConfig) -> Option<String> {
    if let Some(lang) = html_lang(document) {
        return Some(lang);
    }

    if let Some(lang) = meta_content_language(document) {
        return Some(lang);
    }

    // 声明缺失时看文本量：样本够大才敢回退到环境语言
    let sample = text_sample(document, cfg);
    if sample.len() > cfg.sample_min_chars {
        if let Some(locale) = &cfg.ambient_locale {
            return primary_subtag(locale);
        }
    }

    None
}

fn html_lang(document: &Handle) -> Option<String> {
    let html = find_first(document, "html")?;
    get_node_attr(&html, "lang").and_then(|lang| primary_subtag(&lang))
}

fn meta_content_language(document: &Handle) -> Option<String> {
    let mut metas = Vec::new();
    collect_by_tag(document, "meta", &mut metas);

    for meta in metas {
        let http_equiv = get_node_attr(&meta, "http-equiv").unwrap_or_default();
        if http_equiv.eq_ignore_ascii_case("content-language") {
            if let Some(lang) = get_node_attr(&meta, "content").and_then(|c| primary_subtag(&c)) {
                return Some(lang);
            }
        }
    }
    None
}

/// 采集文本样本
///
/// 取前 N 个长度超过阈值的文本片段，空格连接。跳过元素
/// 与扫描器一致，保证样本来自真正可见的内容。
fn text_sample(document: &Handle, cfg: &EngineConfig) -> String {
    let mut fragments = Vec::new();
    collect_fragments(document, cfg, &mut fragments);
    fragments.join(" ")
}

fn collect_fragments(node: &Handle, cfg: &EngineConfig, fragments: &mut Vec<String>) {
    if fragments.len() >= cfg.sample_fragments {
        return;
    }

    if let Some(name) = get_node_name(node) {
        if constants::SKIP_ELEMENTS.contains(&name) {
            return;
        }
    }

    if let NodeData::Text { contents } = &node.data {
        let trimmed = contents.borrow().trim().to_string();
        if trimmed.len() > cfg.sample_fragment_min_len {
            fragments.push(trimmed);
        }
        return;
    }

    for child in node.children.borrow().iter() {
        collect_fragments(child, cfg, fragments);
    }
}

fn find_first(node: &Handle, tag_name: &str) -> Option<Handle> {
    if get_node_name(node) == Some(tag_name) {
        return Some(node.clone());
    }
    for child in node.children.borrow().iter() {
        if let Some(found) = find_first(child, tag_name) {
            return Some(found);
        }
    }
    None
}

fn collect_by_tag(node: &Handle, tag_name: &str, found: &mut Vec<Handle>) {
    if get_node_name(node) == Some(tag_name) {
        found.push(node.clone());
    }
    for child in node.children.borrow().iter() {
        collect_by_tag(child, tag_name, found);
    }
}
