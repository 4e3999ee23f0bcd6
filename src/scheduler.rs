//! 批量请求调度
//!
//! 把扫描产出的单元切块后并发解析：块内并发、块间串行，
//! 块之间加固定间隔与退避延迟，平滑请求峰值。
//! 单元解析失败只影响自身，失败的单元不进缓存，下一轮自然重试。

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::join_all;
use tokio::time::{sleep, Instant};

use crate::cache::{CacheEntry, CacheKey, TranslationCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::provider::{is_transmissible, ImageFetcher, TranslationProvider};
use crate::rate::{Admission, RateController};
use crate::scanner::{ImageUnit, TextUnit};

/// 调度器共享的协作方与状态
///
/// 全部经 `Rc` 共享，单逻辑线程内使用。`RefCell` 借用在每次
/// 状态访问内部开合，从不跨越挂起点。
pub struct SchedulerContext {
    pub provider: Rc<dyn TranslationProvider>,
    pub fetcher: Rc<dyn ImageFetcher>,
    pub cache: Rc<RefCell<TranslationCache>>,
    pub rate: Rc<RefCell<RateController>>,
}

// ============================================================================
// 文本批量
// ============================================================================

/// 批量解析文本单元
///
/// 相同内容的单元去重后只请求一次，结果回填到每个单元。
/// 返回与输入同序的结果：`None` 表示本单元无译文
/// （缓存的空产出、速率拒绝或请求失败）。
pub async fn translate_texts(
    units: &[TextUnit],
    target_lang: &str,
    ctx: &SchedulerContext,
    cfg: &EngineConfig,
) -> Vec<Option<String>> {
    let (payloads, index_of) = dedupe(units.iter().map(|u| u.text.as_str()));

    let mut distinct = Vec::with_capacity(payloads.len());
    for (i, chunk) in payloads.chunks(cfg.text_chunk_size.max(1)).enumerate() {
        if i > 0 {
            pace(ctx, cfg).await;
        }
        let chunk_results = join_all(
            chunk
                .iter()
                .map(|text| resolve_text(text, target_lang, ctx)),
        )
        .await;
        distinct.extend(chunk_results);
    }

    units
        .iter()
        .map(|u| distinct[index_of[u.text.as_str()]].clone())
        .collect()
}

async fn resolve_text(text: &str, target_lang: &str, ctx: &SchedulerContext) -> Option<String> {
    let key = CacheKey::text(text, target_lang);
    if let Some(entry) = ctx.cache.borrow_mut().get(&key) {
        return entry.translated;
    }

    match request_text(text, target_lang, ctx).await {
        Ok(entry) => {
            ctx.cache.borrow_mut().put(key, entry.clone());
            entry.translated
        }
        Err(e @ EngineError::RateLimited) => {
            tracing::debug!(error = %e, "文本单元跳过");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "文本翻译请求失败");
            None
        }
    }
}

/// 经速率控制向服务方发起一次文本请求
async fn request_text(
    text: &str,
    target_lang: &str,
    ctx: &SchedulerContext,
) -> EngineResult<CacheEntry> {
    if ctx.rate.borrow_mut().try_admit(Instant::now()) == Admission::Denied {
        return Err(EngineError::RateLimited);
    }

    match ctx.provider.translate_text(text, target_lang).await {
        Ok(translated) => Ok(CacheEntry::from_result(translated)),
        Err(e) => {
            if e.is_throttled() {
                ctx.rate.borrow_mut().on_throttled(Instant::now());
            } else {
                ctx.rate.borrow_mut().release();
            }
            Err(e.into())
        }
    }
}

/// 按身份键去重，保持首次出现的顺序
fn dedupe<'a>(
    payloads: impl Iterator<Item = &'a str>,
) -> (Vec<&'a str>, std::collections::HashMap<&'a str, usize>) {
    let mut order = Vec::new();
    let mut index_of = std::collections::HashMap::new();
    for payload in payloads {
        index_of.entry(payload).or_insert_with(|| {
            order.push(payload);
            order.len() - 1
        });
    }
    (order, index_of)
}

// ============================================================================
// 图片批量
// ============================================================================

/// 批量解析图片单元
///
/// 去重键是图片源引用，同源图片只请求一次。
pub async fn translate_images(
    units: &[ImageUnit],
    target_lang: &str,
    ctx: &SchedulerContext,
    cfg: &EngineConfig,
) -> Vec<Option<String>> {
    let (sources, index_of) = dedupe(units.iter().map(|u| u.src.as_str()));

    let mut distinct = Vec::with_capacity(sources.len());
    for (i, chunk) in sources.chunks(cfg.image_chunk_size.max(1)).enumerate() {
        if i > 0 {
            pace(ctx, cfg).await;
        }
        let chunk_results =
            join_all(chunk.iter().map(|src| resolve_image(src, target_lang, ctx))).await;
        distinct.extend(chunk_results);
    }

    units
        .iter()
        .map(|u| distinct[index_of[u.src.as_str()]].clone())
        .collect()
}

async fn resolve_image(src: &str, target_lang: &str, ctx: &SchedulerContext) -> Option<String> {
    // 本地引用先物化为可传输形式，物化失败只丢弃该单元
    let content = if is_transmissible(src) {
        src.to_string()
    } else {
        match ctx.fetcher.materialize(src).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(src = %src, error = %e, "图片物化失败");
                return None;
            }
        }
    };

    let key = CacheKey::image(&content, target_lang);
    if let Some(entry) = ctx.cache.borrow_mut().get(&key) {
        return entry.translated;
    }

    match request_image(&content, target_lang, ctx).await {
        Ok(entry) => {
            ctx.cache.borrow_mut().put(key, entry.clone());
            entry.translated
        }
        Err(e @ EngineError::RateLimited) => {
            tracing::debug!(error = %e, "图片单元跳过");
            None
        }
        Err(e) => {
            tracing::warn!(src = %src, error = %e, "图片翻译请求失败");
            None
        }
    }
}

/// 经速率控制向服务方发起一次图片请求
async fn request_image(
    content: &str,
    target_lang: &str,
    ctx: &SchedulerContext,
) -> EngineResult<CacheEntry> {
    if ctx.rate.borrow_mut().try_admit(Instant::now()) == Admission::Denied {
        return Err(EngineError::RateLimited);
    }

    match ctx.provider.translate_image(content, target_lang).await {
        Ok(translated) => Ok(CacheEntry::from_result(translated)),
        Err(e) => {
            if e.is_throttled() {
                ctx.rate.borrow_mut().on_throttled(Instant::now());
            } else {
                ctx.rate.borrow_mut().release();
            }
            Err(e.into())
        }
    }
}

/// 块间间隔：固定延迟加当前退避
async fn pace(ctx: &SchedulerContext, cfg: &EngineConfig) {
    let backoff = ctx.rate.borrow().backoff_delay();
    sleep(cfg.chunk_delay + backoff).await;
}
