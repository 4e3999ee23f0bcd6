// 集成测试公共模块
//
// 提供可编程的翻译服务替身和 HTML 测试夹具

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use markup5ever_rcdom::RcDom;

use lingodom::dom::{find_elements, first_text_child, html_to_dom, node_text};
use lingodom::provider::{ProviderError, TranslationProvider};
use lingodom::{EngineConfig, PassthroughFetcher, TranslationEngine};

// ============================================================================
// 翻译服务替身
// ============================================================================

/// 可编程的翻译服务替身
///
/// 默认回显 `[lang] text`；可配置延迟、限流阈值和空产出。
pub struct MockProvider {
    calls: RefCell<Vec<String>>,
    throttle_after: Cell<Option<u32>>,
    latency: Cell<Duration>,
    empty_results: Cell<bool>,
}

impl MockProvider {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            calls: RefCell::new(Vec::new()),
            throttle_after: Cell::new(None),
            latency: Cell::new(Duration::ZERO),
            empty_results: Cell::new(false),
        })
    }

    /// 前 n 次调用成功，之后全部返回限流错误
    pub fn throttle_after(&self, n: u32) {
        self.throttle_after.set(Some(n));
    }

    /// 每次调用前模拟网络延迟
    pub fn with_latency(&self, latency: Duration) {
        self.latency.set(latency);
    }

    /// 所有调用返回空字符串（无可翻译内容的场景）
    pub fn with_empty_results(&self) {
        self.empty_results.set(true);
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    async fn respond(&self, payload: &str, target_lang: &str) -> Result<String, ProviderError> {
        let latency = self.latency.get();
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }

        let call_index = {
            let mut calls = self.calls.borrow_mut();
            calls.push(payload.to_string());
            calls.len() as u32
        };

        if let Some(limit) = self.throttle_after.get() {
            if call_index > limit {
                return Err(ProviderError::throttled("429 Too Many Requests"));
            }
        }

        if self.empty_results.get() {
            return Ok(String::new());
        }
        Ok(format!("[{target_lang}] {payload}"))
    }
}

#[async_trait(?Send)]
impl TranslationProvider for MockProvider {
    async fn translate_text(
        &self,
        text: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        self.respond(text, target_lang).await
    }

    async fn translate_image(
        &self,
        image_content: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        self.respond(image_content, target_lang).await
    }
}

// ============================================================================
// HTML 夹具
// ============================================================================

/// 带文本和图片的典型英文页面
pub fn simple_english_page() -> &'static str {
    "<html lang=\"en\"><head><title>Test Page</title></head><body>\
     <h1>Welcome to the test page</h1>\
     <p>This is the first paragraph.</p>\
     <p>Another paragraph with content.</p>\
     <img src=\"https://example.com/banner.png\" width=\"400\" height=\"120\">\
     <script>var ignored = true;</script>\
     </body></html>"
}

pub fn parse(html: &str) -> Rc<RcDom> {
    Rc::new(html_to_dom(html.as_bytes(), "utf-8"))
}

/// 用给定页面和服务替身搭一个引擎
pub fn build_engine(html: &str, provider: Rc<MockProvider>) -> (Rc<RcDom>, TranslationEngine) {
    let dom = parse(html);
    let cfg = EngineConfig {
        ambient_locale: Some("en".to_string()),
        ..EngineConfig::default()
    };
    let engine = TranslationEngine::new(dom.clone(), cfg, provider, Rc::new(PassthroughFetcher));
    (dom, engine)
}

/// 收集文档中所有段落的当前文本
pub fn paragraph_texts(dom: &RcDom) -> Vec<String> {
    find_elements(&dom.document, "p")
        .iter()
        .filter_map(first_text_child)
        .filter_map(|t| node_text(&t))
        .map(|t| t.trim().to_string())
        .collect()
}
