//! 翻译结果缓存
//!
//! 按内容寻址的会话级缓存：键由单元类别、内容指纹和目标语言组成，
//! 会话内永不过期。目标语言切换不需要显式清理，键里已经带了语言。

use std::collections::HashMap;

// ============================================================================
// 核心类型
// ============================================================================

/// 翻译单元类别
///
/// 键中的类别判别符保证文本内容和图片内容不可能互相碰撞。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Text,
    Image,
}

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: UnitKind,
    /// 归一化内容的 blake3 指纹
    fingerprint: String,
    target_lang: String,
}

impl CacheKey {
    pub fn new(kind: UnitKind, content: &str, target_lang: &str) -> Self {
        Self {
            kind,
            fingerprint: blake3::hash(content.as_bytes()).to_hex().to_string(),
            target_lang: target_lang.to_string(),
        }
    }

    /// 文本单元的键
    pub fn text(content: &str, target_lang: &str) -> Self {
        Self::new(UnitKind::Text, content, target_lang)
    }

    /// 图片单元的键（content 为可传输的图片内容）
    pub fn image(content: &str, target_lang: &str) -> Self {
        Self::new(UnitKind::Image, content, target_lang)
    }
}

/// 缓存条目
///
/// `translated` 为 None 表示服务方给出了空结果：依然入缓存，
/// 避免对注定无产出的内容反复发起请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub translated: Option<String>,
}

impl CacheEntry {
    pub fn new(translated: Option<String>) -> Self {
        Self { translated }
    }

    /// 由服务方返回值构造：空白结果记为 None
    pub fn from_result(translated: String) -> Self {
        if translated.trim().is_empty() {
            Self { translated: None }
        } else {
            Self {
                translated: Some(translated),
            }
        }
    }
}

/// 缓存统计信息
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

// ============================================================================
// 实现
// ============================================================================

/// 翻译缓存
///
/// 单逻辑线程内使用，无锁；所有修改都在挂起点之间完成。
/// 同键并发写入按后写覆盖处理，键相同的结果应当是确定性的。
#[derive(Debug, Default)]
pub struct TranslationCache {
    entries: HashMap<CacheKey, CacheEntry>,
    stats: CacheStats,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询缓存；命中返回条目副本
    pub fn get(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.stats.total_requests += 1;
        match self.entries.get(key) {
            Some(entry) => {
                self.stats.hits += 1;
                Some(entry.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// 写入缓存（后写覆盖）
    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// 当前条目数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清空缓存（文档切换时由宿主触发）
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 获取统计信息快照
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
