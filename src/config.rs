//! 配置模块
//!
//! 提供引擎配置、会话配置和外部设置源接口。
//! 会话配置是全局可变状态，只能通过引擎的控制入口修改（见 `engine` 模块）。

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::rate::RateConfig;

/// 配置常量
pub mod constants {
    /// 文本请求的分块大小
    pub const TEXT_CHUNK_SIZE: usize = 20;
    /// 图片请求的分块大小
    pub const IMAGE_CHUNK_SIZE: usize = 10;
    /// 分块之间的固定间隔（毫秒），用于平滑请求峰值
    pub const CHUNK_DELAY_MS: u64 = 100;
    /// 变更观察的防抖静默期（毫秒）
    pub const DEBOUNCE_MS: u64 = 2000;
    /// 速率控制器的维护检查周期（毫秒）
    pub const MAINTENANCE_TICK_MS: u64 = 2500;

    /// 参与翻译的图片最小宽度（像素）
    pub const MIN_IMAGE_WIDTH: u32 = 100;
    /// 参与翻译的图片最小高度（像素）
    pub const MIN_IMAGE_HEIGHT: u32 = 30;

    /// 语言采样需要的最小字符总量
    pub const SAMPLE_MIN_CHARS: usize = 100;
    /// 语言采样使用的片段数量上限
    pub const SAMPLE_FRAGMENTS: usize = 10;
    /// 语言采样片段的最小长度
    pub const SAMPLE_FRAGMENT_MIN_LEN: usize = 20;

    /// 滚动窗口内允许的请求容量
    pub const REQUEST_CAPACITY: usize = 2000;
    /// 冷却时长（毫秒）
    pub const COOLDOWN_MS: u64 = 1000;
    /// 计数衰减周期（毫秒）
    pub const DECAY_PERIOD_MS: u64 = 15000;
    /// 每个衰减周期扣减的请求数
    pub const DECAY_AMOUNT: usize = 50;
    /// 冷却到期后计数重置为容量的该比例
    pub const RECOVERY_FRACTION: f32 = 0.2;
    /// 初始退避延迟（毫秒）
    pub const INITIAL_BACKOFF_MS: u64 = 50;
    /// 最大退避延迟（毫秒）
    pub const MAX_BACKOFF_MS: u64 = 200;

    /// 文本宿主元素的原文标记属性
    pub const MARKER_ORIGINAL_TEXT: &str = "data-original-text";
    /// 已翻译图片的标记属性
    pub const MARKER_IMAGE_TRANSLATED: &str = "data-has-translation";
    /// 覆盖层元素的 class
    pub const OVERLAY_CLASS: &str = "translation-overlay";
    /// 宿主页面主动排除翻译的 class
    pub const IGNORE_CLASS: &str = "translation-ignore";

    /// 扫描时整棵跳过的元素标签
    pub const SKIP_ELEMENTS: &[&str] = &["script", "style", "noscript", "meta", "link"];

    /// 设置源中的键名（与扩展存储保持一致）
    pub const SETTING_ENABLED: &str = "isTranslating";
    pub const SETTING_TARGET_LANGUAGE: &str = "selectedLanguage";
    pub const SETTING_IMAGE_FLAG: &str = "alwaysTranslateImages";
    pub const SETTING_AMBIENT_LOCALE: &str = "ambientLocale";
}

// ============================================================================
// 会话配置
// ============================================================================

/// 会话级配置
///
/// 被所有组件按引用读取，只允许引擎的控制入口修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// 翻译是否启用
    pub enabled: bool,
    /// 目标语言代码（如 "en", "zh", "fr"）
    pub target_language: String,
    /// 是否总是翻译图片（即使源语言与目标语言一致）
    pub always_translate_images: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_language: "en".to_string(),
            always_translate_images: false,
        }
    }
}

// ============================================================================
// 引擎配置
// ============================================================================

/// 引擎配置
///
/// 进程生命周期内不变的参数，全部带有与原始实现一致的默认值。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 文本请求分块大小
    pub text_chunk_size: usize,
    /// 图片请求分块大小
    pub image_chunk_size: usize,
    /// 分块之间的固定延迟
    pub chunk_delay: Duration,
    /// 变更防抖静默期
    pub debounce: Duration,
    /// 图片参与翻译的最小宽度
    pub min_image_width: u32,
    /// 图片参与翻译的最小高度
    pub min_image_height: u32,
    /// 语言采样的最小字符总量
    pub sample_min_chars: usize,
    /// 语言采样的片段数量上限
    pub sample_fragments: usize,
    /// 语言采样片段的最小长度
    pub sample_fragment_min_len: usize,
    /// 速率控制配置
    pub rate: RateConfig,
    /// 运行环境的语言（对应浏览器的 navigator.language）
    pub ambient_locale: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            text_chunk_size: constants::TEXT_CHUNK_SIZE,
            image_chunk_size: constants::IMAGE_CHUNK_SIZE,
            chunk_delay: Duration::from_millis(constants::CHUNK_DELAY_MS),
            debounce: Duration::from_millis(constants::DEBOUNCE_MS),
            min_image_width: constants::MIN_IMAGE_WIDTH,
            min_image_height: constants::MIN_IMAGE_HEIGHT,
            sample_min_chars: constants::SAMPLE_MIN_CHARS,
            sample_fragments: constants::SAMPLE_FRAGMENTS,
            sample_fragment_min_len: constants::SAMPLE_FRAGMENT_MIN_LEN,
            rate: RateConfig::default(),
            ambient_locale: ambient_locale_from_env(),
        }
    }
}

impl EngineConfig {
    /// 用设置源中的环境语言覆盖环境变量推断
    pub fn with_settings(mut self, store: &dyn SettingsStore) -> Self {
        if let Some(locale) = store
            .get(constants::SETTING_AMBIENT_LOCALE)
            .and_then(|v| v.as_str().map(str::to_string))
        {
            self.ambient_locale = Some(locale);
        }
        self
    }
}

/// 从环境变量推断运行环境语言
///
/// `LANG=en_US.UTF-8` 取主子标签 "en"。取不到时返回 None，
/// 此时采样回退无法给出结论，相应的翻译轮次会被放弃。
pub fn ambient_locale_from_env() -> Option<String> {
    let raw = std::env::var("LANG").ok()?;
    let primary: String = raw
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

// ============================================================================
// 外部设置源
// ============================================================================

/// 只读的键值设置源
///
/// 引擎启动时查询一次，用于恢复上一次会话的开关状态。
pub trait SettingsStore {
    /// 读取一个设置值
    fn get(&self, key: &str) -> Option<Value>;
}

/// 内存设置源
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    values: HashMap<String, Value>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: Value) -> &mut Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }
}

/// 从设置源装载初始会话配置
///
/// 缺失或类型不符的键一律落到默认值，设置源的任何内容都不会让启动失败。
pub fn load_session(store: &dyn SettingsStore) -> SessionConfig {
    let defaults = SessionConfig::default();

    SessionConfig {
        enabled: store
            .get(constants::SETTING_ENABLED)
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.enabled),
        target_language: store
            .get(constants::SETTING_TARGET_LANGUAGE)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or(defaults.target_language),
        always_translate_images: store
            .get(constants::SETTING_IMAGE_FLAG)
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.always_translate_images),
    }
}
