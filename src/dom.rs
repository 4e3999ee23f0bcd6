//! DOM 基础操作
//!
//! 基于 html5ever / markup5ever_rcdom 的文档访问与改写助手。
//! 涉及结构改写的函数都会同步维护 parent 指针，保证恢复路径可以回溯。

use std::cell::RefCell;
use std::rc::Rc;

use encoding_rs::Encoding;
use html5ever::interface::{Attribute, QualName};
use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::{format_tendril, TendrilSink};
use html5ever::tree_builder::create_element;
use html5ever::{namespace_url, ns, parse_document, LocalName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: &str) -> RcDom {
    let s: String;

    if let Some(encoding) = Encoding::for_label(document_encoding.as_bytes()) {
        let (string, _, _) = encoding.decode(data);
        s = string.to_string();
    } else {
        s = String::from_utf8_lossy(data).to_string();
    }

    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
        .unwrap()
}

/// 将文档序列化为 HTML 字符串
pub fn serialize_to_html(document: &Handle) -> String {
    let mut buf: Vec<u8> = Vec::new();
    if serialize(
        &mut buf,
        &SerializableHandle::from(document.clone()),
        SerializeOpts::default(),
    )
    .is_err()
    {
        return String::new();
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => {
            for attr in attrs.borrow().iter() {
                if &*attr.name.local == attr_name {
                    return Some(attr.value.to_string());
                }
            }
            None
        }
        _ => None,
    }
}

/// 设置节点属性；值为 None 时删除该属性
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<String>) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let attrs_mut = &mut attrs.borrow_mut();
        let mut i = 0;
        let mut found_existing_attr: bool = false;

        while i < attrs_mut.len() {
            if &attrs_mut[i].name.local == attr_name {
                found_existing_attr = true;

                if let Some(attr_value) = attr_value.clone() {
                    attrs_mut[i].value.clear();
                    attrs_mut[i].value.push_slice(attr_value.as_str());
                } else {
                    attrs_mut.remove(i);
                    continue;
                }
            }

            i += 1;
        }

        if !found_existing_attr {
            if let Some(attr_value) = attr_value {
                attrs_mut.push(Attribute {
                    name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                    value: format_tendril!("{}", attr_value),
                });
            }
        }
    }
}

/// 获取元素标签名
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 获取父节点；根节点或已脱离文档的节点返回 None
pub fn parent_node(child: &Handle) -> Option<Handle> {
    let weak = child.parent.take();
    child.parent.set(weak.clone());
    weak.and_then(|w| w.upgrade())
}

/// 元素 class 列表是否包含指定 token
pub fn has_class(node: &Handle, class_name: &str) -> bool {
    get_node_attr(node, "class")
        .map(|value| value.split_whitespace().any(|token| token == class_name))
        .unwrap_or(false)
}

/// 读取文本节点内容
pub fn node_text(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Text { contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

/// 原地覆盖文本节点内容（节点身份保持不变）
pub fn set_node_text(node: &Handle, text: &str) {
    if let NodeData::Text { contents } = &node.data {
        let mut contents = contents.borrow_mut();
        contents.clear();
        contents.push_slice(text);
    }
}

/// 返回元素的第一个文本子节点
pub fn first_text_child(node: &Handle) -> Option<Handle> {
    node.children
        .borrow()
        .iter()
        .find(|child| matches!(child.data, NodeData::Text { .. }))
        .cloned()
}

/// 收集子树中所有指定标签的元素
pub fn find_elements(node: &Handle, tag_name: &str) -> Vec<Handle> {
    let mut found = Vec::new();
    collect_elements(node, tag_name, &mut found);
    found
}

fn collect_elements(node: &Handle, tag_name: &str, found: &mut Vec<Handle>) {
    if get_node_name(node) == Some(tag_name) {
        found.push(node.clone());
    }
    for child in node.children.borrow().iter() {
        collect_elements(child, tag_name, found);
    }
}

/// 创建一个新元素（未挂载）
pub fn new_element(dom: &RcDom, tag_name: &str, attributes: &[(&str, &str)]) -> Handle {
    create_element(
        dom,
        QualName::new(None, ns!(), LocalName::from(tag_name)),
        attributes
            .iter()
            .map(|(name, value)| Attribute {
                name: QualName::new(None, ns!(), LocalName::from(*name)),
                value: format_tendril!("{}", value),
            })
            .collect(),
    )
}

/// 创建一个新文本节点（未挂载）
pub fn new_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(format_tendril!("{}", text)),
    })
}

/// 追加子节点并维护 parent 指针
pub fn append_child(parent: &Handle, child: &Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child.clone());
}

/// 在参考节点之前插入；参考节点不在子列表里时退化为追加
pub fn insert_before(parent: &Handle, reference: &Handle, new_child: &Handle) {
    new_child.parent.set(Some(Rc::downgrade(parent)));
    let mut children = parent.children.borrow_mut();
    match children.iter().position(|c| Rc::ptr_eq(c, reference)) {
        Some(index) => children.insert(index, new_child.clone()),
        None => children.push(new_child.clone()),
    }
}

/// 摘除子节点并清空其 parent 指针
pub fn remove_child(parent: &Handle, child: &Handle) {
    parent
        .children
        .borrow_mut()
        .retain(|c| !Rc::ptr_eq(c, child));
    child.parent.set(None);
}
