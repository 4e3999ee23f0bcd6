//! 外部协作方接口
//!
//! 真正执行翻译/图片文字识别的网络调用不属于本引擎，
//! 以能力接口的形式注入。引擎对它的唯一要求是错误携带
//! 结构化的类别字段，用以区分限流和其他失败。

use async_trait::async_trait;
use base64::{prelude::BASE64_STANDARD, Engine as _};
use thiserror::Error;
use url::Url;

// ============================================================================
// 错误类型
// ============================================================================

/// 服务错误类别
///
/// 限流类错误是唯一会触发冷却的信号。这里用结构化字段取代
/// 对错误文案做 "403" 子串匹配的做法，语义保持一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorClass {
    /// 被服务端限流（HTTP 403/429 一类）
    Throttled,
    /// 其他失败（网络、超时、响应不合法等）
    Other,
}

/// 翻译服务错误
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ProviderError {
    /// 错误类别
    pub class: ProviderErrorClass,
    /// 诊断信息
    pub message: String,
}

impl ProviderError {
    /// 构造限流错误
    pub fn throttled(message: impl Into<String>) -> Self {
        Self {
            class: ProviderErrorClass::Throttled,
            message: message.into(),
        }
    }

    /// 构造一般失败
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            class: ProviderErrorClass::Other,
            message: message.into(),
        }
    }

    /// 是否为限流类错误
    pub fn is_throttled(&self) -> bool {
        self.class == ProviderErrorClass::Throttled
    }
}

// ============================================================================
// 能力接口
// ============================================================================

/// 翻译服务能力
///
/// 单线程协作式调度下 Future 无需跨线程，接口按 `?Send` 声明。
#[async_trait(?Send)]
pub trait TranslationProvider {
    /// 将一段文本翻译到目标语言
    async fn translate_text(&self, text: &str, target_lang: &str)
        -> Result<String, ProviderError>;

    /// 提取图片中的文字并翻译到目标语言
    ///
    /// `image_content` 是可传输的图片内容：URL 或 data URL。
    /// 图片不含文字或已是目标语言时返回空字符串。
    async fn translate_image(
        &self,
        image_content: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError>;
}

/// 图片物化能力
///
/// 当图片资源不是可直接传输的形式（如 `blob:` 本地引用）时，
/// 由该协作方取出字节并编码为 data URL。
#[async_trait(?Send)]
pub trait ImageFetcher {
    /// 将图片源物化为可传输的编码形式
    async fn materialize(&self, src: &str) -> Result<String, ProviderError>;
}

/// 判断图片源是否可以不经物化直接传给服务方
pub fn is_transmissible(src: &str) -> bool {
    match Url::parse(src) {
        Ok(url) => matches!(url.scheme(), "http" | "https" | "data"),
        // 相对路径按可传输处理，由服务方解析
        Err(_) => !src.starts_with("blob:"),
    }
}

/// 直通物化器
///
/// 只会放行本身可传输的源；遇到 `blob:` 引用时报错，
/// 因为真正的字节只有宿主环境才拿得到。
#[derive(Debug, Clone, Default)]
pub struct PassthroughFetcher;

#[async_trait(?Send)]
impl ImageFetcher for PassthroughFetcher {
    async fn materialize(&self, src: &str) -> Result<String, ProviderError> {
        if is_transmissible(src) {
            Ok(src.to_string())
        } else {
            Err(ProviderError::other(format!(
                "无法物化本地引用资源: {src}"
            )))
        }
    }
}

/// 将原始图片字节编码为 data URL
///
/// 供宿主实现 `ImageFetcher` 时复用。
pub fn encode_image_bytes(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, BASE64_STANDARD.encode(bytes))
}
