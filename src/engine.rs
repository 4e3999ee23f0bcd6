//! 翻译引擎
//!
//! 串起扫描、语言推断、调度、落地和变更观察的编排核心，
//! 并向宿主暴露唯一的控制入口。引擎运行在单逻辑线程上
//! （DOM 句柄不跨线程），内部状态经 `Rc<RefCell<_>>` 共享，
//! 借用从不跨越挂起点。
//!
//! 并发模型：
//! - 翻译轮次单飞，轮次进行中的触发合并为一次补跑；
//! - 每个会话突变递增世代号，迟到的翻译结果按世代丢弃；
//! - 控制命令永不失败，内部错误记日志后吞掉。

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::applier::DomApplier;
use crate::cache::{CacheStats, TranslationCache};
use crate::config::{constants, EngineConfig, SessionConfig, SettingsStore};
use crate::dom::node_text;
use crate::error::{EngineError, EngineResult};
use crate::language::detect_source_language;
use crate::provider::{ImageFetcher, TranslationProvider};
use crate::rate::{RateController, RateState};
use crate::scanner::scan;
use crate::scheduler::{translate_images, translate_texts, SchedulerContext};
use crate::watcher::{ChangeWatcher, MutationBatch};
use markup5ever_rcdom::RcDom;

// ============================================================================
// 控制命令
// ============================================================================

/// 宿主下发的控制命令
///
/// 线格式与扩展消息保持一致：`type` 判别符加 camelCase 字段。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlCommand {
    /// 开启翻译并设定会话参数
    #[serde(rename_all = "camelCase")]
    Enable {
        target_language: String,
        #[serde(default)]
        always_translate_images: bool,
    },
    /// 关闭翻译并恢复原文
    Disable,
    /// 切换目标语言（列表首项生效）
    SetLanguages { languages: Vec<String> },
    /// 更新图片翻译开关
    #[serde(rename_all = "camelCase")]
    SetSettings { always_translate_images: bool },
}

// ============================================================================
// 统计
// ============================================================================

/// 引擎运行统计
#[derive(Debug, Default)]
pub struct EngineStats {
    texts_applied: AtomicU64,
    images_applied: AtomicU64,
    passes_completed: AtomicU64,
    passes_abandoned: AtomicU64,
}

/// 统计快照
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStatsSnapshot {
    pub texts_applied: u64,
    pub images_applied: u64,
    pub passes_completed: u64,
    pub passes_abandoned: u64,
}

impl EngineStats {
    fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            texts_applied: self.texts_applied.load(Ordering::Relaxed),
            images_applied: self.images_applied.load(Ordering::Relaxed),
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_abandoned: self.passes_abandoned.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// 引擎本体
// ============================================================================

/// 会话可变状态
#[derive(Debug)]
struct EngineShared {
    session: SessionConfig,
    /// 会话世代号，每次会话突变递增；迟到结果按此丢弃
    generation: u64,
    /// 翻译轮次单飞标志
    pass_active: bool,
    /// 轮次进行中收到的触发，合并为结束后的一次补跑
    pending_repass: bool,
}

/// 翻译引擎
///
/// 句柄语义：克隆共享同一份内部状态，可以在任务间自由传递
/// （同一线程内）。
#[derive(Clone)]
pub struct TranslationEngine {
    dom: Rc<RcDom>,
    cfg: Rc<EngineConfig>,
    ctx: Rc<SchedulerContext>,
    shared: Rc<RefCell<EngineShared>>,
    applier: Rc<RefCell<DomApplier>>,
    watcher: Rc<RefCell<ChangeWatcher>>,
    stats: Rc<EngineStats>,
}

impl TranslationEngine {
    pub fn new(
        dom: Rc<RcDom>,
        cfg: EngineConfig,
        provider: Rc<dyn TranslationProvider>,
        fetcher: Rc<dyn ImageFetcher>,
    ) -> Self {
        let watcher = ChangeWatcher::new(cfg.debounce);
        let ctx = SchedulerContext {
            provider,
            fetcher,
            cache: Rc::new(RefCell::new(TranslationCache::new())),
            rate: Rc::new(RefCell::new(RateController::new(cfg.rate.clone()))),
        };

        Self {
            applier: Rc::new(RefCell::new(DomApplier::new(dom.clone()))),
            dom,
            cfg: Rc::new(cfg),
            ctx: Rc::new(ctx),
            shared: Rc::new(RefCell::new(EngineShared {
                session: SessionConfig::default(),
                generation: 0,
                pass_active: false,
                pending_repass: false,
            })),
            watcher: Rc::new(RefCell::new(watcher)),
            stats: Rc::new(EngineStats::default()),
        }
    }

    /// 从设置源恢复上一次会话的开关状态
    pub fn restore_session(&self, store: &dyn SettingsStore) {
        let session = crate::config::load_session(store);
        tracing::info!(
            enabled = session.enabled,
            target = %session.target_language,
            "会话状态已从设置源装载"
        );
        self.shared.borrow_mut().session = session;
    }

    /// 当前会话配置
    pub fn session(&self) -> SessionConfig {
        self.shared.borrow().session.clone()
    }

    /// 运行统计快照
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// 缓存统计快照
    pub fn cache_stats(&self) -> CacheStats {
        self.ctx.cache.borrow().stats()
    }

    /// 速率控制器状态快照
    pub fn rate_state(&self) -> RateState {
        self.ctx.rate.borrow().state()
    }

    // ========================================================================
    // 控制入口
    // ========================================================================

    /// 处理一条控制命令
    ///
    /// 永不返回错误：非法命令记日志后忽略，翻译失败按单元粒度吞掉。
    pub async fn handle_command(&self, command: ControlCommand) {
        tracing::debug!(?command, "处理控制命令");

        match command {
            ControlCommand::Enable {
                target_language,
                always_translate_images,
            } => {
                let was_enabled = {
                    let mut shared = self.shared.borrow_mut();
                    let was = shared.session.enabled;
                    shared.session.enabled = true;
                    shared.session.target_language = target_language;
                    shared.session.always_translate_images = always_translate_images;
                    shared.generation += 1;
                    was
                };
                // 重复开启视作参数变更：先回到原文再按新参数翻译
                if was_enabled {
                    self.applier.borrow_mut().restore();
                }
                self.translate_now().await;
            }

            ControlCommand::Disable => {
                {
                    let mut shared = self.shared.borrow_mut();
                    shared.session.enabled = false;
                    shared.generation += 1;
                    shared.pending_repass = false;
                }
                self.applier.borrow_mut().restore();
            }

            ControlCommand::SetLanguages { languages } => {
                let Some(target) = languages.into_iter().next() else {
                    tracing::warn!("语言列表为空，命令忽略");
                    return;
                };
                let enabled = {
                    let mut shared = self.shared.borrow_mut();
                    if shared.session.enabled {
                        shared.session.target_language = target;
                        shared.generation += 1;
                    }
                    shared.session.enabled
                };
                if enabled {
                    self.applier.borrow_mut().restore();
                    self.translate_now().await;
                }
            }

            ControlCommand::SetSettings {
                always_translate_images,
            } => {
                let enabled = {
                    let mut shared = self.shared.borrow_mut();
                    shared.session.always_translate_images = always_translate_images;
                    shared.session.enabled
                };
                // 已落地的译文保持不动，只为可能新增的范围补一轮
                if enabled {
                    self.translate_now().await;
                }
            }
        }
    }

    // ========================================================================
    // 翻译轮次
    // ========================================================================

    /// 触发一轮翻译
    ///
    /// 单飞：已有轮次进行中时只登记补跑标志，由当前轮次结束后消化。
    pub async fn translate_now(&self) {
        {
            let mut shared = self.shared.borrow_mut();
            if !shared.session.enabled {
                return;
            }
            if shared.pass_active {
                shared.pending_repass = true;
                return;
            }
            shared.pass_active = true;
        }

        loop {
            let generation = self.shared.borrow().generation;
            if let Err(e) = self.run_pass(generation).await {
                if e.aborts_pass() {
                    self.stats.passes_abandoned.fetch_add(1, Ordering::Relaxed);
                }
                tracing::debug!(error = %e, "翻译轮次放弃");
            }

            let repass = {
                let mut shared = self.shared.borrow_mut();
                let again = shared.pending_repass && shared.session.enabled;
                shared.pending_repass = false;
                if !again {
                    shared.pass_active = false;
                }
                again
            };
            if !repass {
                break;
            }
        }
    }

    /// 执行一轮翻译
    async fn run_pass(&self, generation: u64) -> EngineResult<()> {
        self.ctx.rate.borrow_mut().maintain(Instant::now());

        let (target, always_images) = {
            let shared = self.shared.borrow();
            (
                shared.session.target_language.clone(),
                shared.session.always_translate_images,
            )
        };

        let source = detect_source_language(&self.dom.document, &self.cfg)
            .ok_or(EngineError::InsufficientLanguageSignal)?;

        let do_texts = source != target;
        let do_images = always_images || do_texts;
        if !do_texts && !do_images {
            return Ok(());
        }

        let outcome = scan(&self.dom.document, &self.cfg);
        tracing::debug!(
            source = %source,
            target = %target,
            texts = outcome.texts.len(),
            images = outcome.images.len(),
            "翻译轮次开始"
        );

        if do_texts && !outcome.texts.is_empty() {
            let results = translate_texts(&outcome.texts, &target, &self.ctx, &self.cfg).await;
            if self.stale(generation) {
                tracing::debug!("会话世代已变，文本结果丢弃");
                return Ok(());
            }

            let mut applier = self.applier.borrow_mut();
            for (unit, result) in outcome.texts.iter().zip(results) {
                let Some(translated) = result else { continue };
                // 扫描之后内容又变了的节点留给下一轮
                let unchanged = node_text(&unit.node)
                    .map(|t| t.trim() == unit.text)
                    .unwrap_or(false);
                if unchanged && applier.apply_text(unit, &translated) {
                    self.stats.texts_applied.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if do_images && !outcome.images.is_empty() {
            let results = translate_images(&outcome.images, &target, &self.ctx, &self.cfg).await;
            if self.stale(generation) {
                tracing::debug!("会话世代已变，图片结果丢弃");
                return Ok(());
            }

            let mut applier = self.applier.borrow_mut();
            for (unit, result) in outcome.images.iter().zip(results) {
                let Some(translated) = result else { continue };
                if applier.apply_image(unit, &translated) {
                    self.stats.images_applied.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.stats.passes_completed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stale(&self, generation: u64) -> bool {
        self.shared.borrow().generation != generation
    }

    // ========================================================================
    // 事件循环
    // ========================================================================

    /// 引擎事件循环
    ///
    /// 消费控制命令与变更批次，直到控制通道关闭。
    /// 启动时若会话已启用（来自设置源）立即补一轮翻译。
    pub async fn run(
        &self,
        mut control_rx: mpsc::Receiver<ControlCommand>,
        mut mutation_rx: mpsc::Receiver<MutationBatch>,
    ) {
        self.translate_now().await;

        let mut maintenance =
            tokio::time::interval(Duration::from_millis(constants::MAINTENANCE_TICK_MS));
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut mutations_open = true;

        loop {
            let watch_deadline = self.watcher.borrow().deadline();

            tokio::select! {
                command = control_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }

                batch = mutation_rx.recv(), if mutations_open => {
                    match batch {
                        Some(batch) => self.on_mutations(&batch),
                        None => mutations_open = false,
                    }
                }

                _ = sleep_until(watch_deadline.unwrap_or_else(Instant::now)),
                        if watch_deadline.is_some() => {
                    if self.watcher.borrow_mut().take_pending() {
                        tracing::debug!("防抖静默期结束，触发补充翻译");
                        self.translate_now().await;
                    }
                }

                _ = maintenance.tick() => {
                    self.ctx.rate.borrow_mut().maintain(Instant::now());
                    self.applier.borrow_mut().sweep_overlays();
                }
            }
        }

        tracing::debug!("控制通道关闭，事件循环退出");
    }

    /// 处理一个变更批次
    fn on_mutations(&self, batch: &MutationBatch) {
        let enabled = self.shared.borrow().session.enabled;
        if !enabled {
            return;
        }
        self.watcher.borrow_mut().observe(batch, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{find_elements, first_text_child, get_node_attr, html_to_dom};
    use crate::provider::{PassthroughFetcher, ProviderError};
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait(?Send)]
    impl TranslationProvider for EchoProvider {
        async fn translate_text(
            &self,
            text: &str,
            target_lang: &str,
        ) -> Result<String, ProviderError> {
            Ok(format!("[{target_lang}] {text}"))
        }

        async fn translate_image(
            &self,
            _image_content: &str,
            target_lang: &str,
        ) -> Result<String, ProviderError> {
            Ok(format!("[{target_lang}] image text"))
        }
    }

    fn engine_for(html: &str) -> (Rc<RcDom>, TranslationEngine) {
        let dom = Rc::new(html_to_dom(html.as_bytes(), "utf-8"));
        let cfg = EngineConfig {
            ambient_locale: Some("en".to_string()),
            ..EngineConfig::default()
        };
        let engine = TranslationEngine::new(
            dom.clone(),
            cfg,
            Rc::new(EchoProvider),
            Rc::new(PassthroughFetcher),
        );
        (dom, engine)
    }

    #[tokio::test]
    async fn test_enable_translates_and_disable_restores() {
        let (dom, engine) = engine_for("<html lang=\"en\"><body><p>Hello</p></body></html>");

        engine
            .handle_command(ControlCommand::Enable {
                target_language: "fr".to_string(),
                always_translate_images: false,
            })
            .await;

        let p = find_elements(&dom.document, "p").remove(0);
        assert_eq!(
            node_text(&first_text_child(&p).unwrap()),
            Some("[fr] Hello".to_string())
        );
        assert_eq!(engine.stats().texts_applied, 1);

        engine.handle_command(ControlCommand::Disable).await;
        assert_eq!(
            node_text(&first_text_child(&p).unwrap()),
            Some("Hello".to_string())
        );
        assert!(get_node_attr(&p, constants::MARKER_ORIGINAL_TEXT).is_none());
    }

    #[tokio::test]
    async fn test_same_language_skips_text() {
        let (dom, engine) = engine_for("<html lang=\"fr\"><body><p>Bonjour</p></body></html>");

        engine
            .handle_command(ControlCommand::Enable {
                target_language: "fr".to_string(),
                always_translate_images: false,
            })
            .await;

        let p = find_elements(&dom.document, "p").remove(0);
        assert_eq!(
            node_text(&first_text_child(&p).unwrap()),
            Some("Bonjour".to_string())
        );
        assert_eq!(engine.stats().texts_applied, 0);
    }

    #[tokio::test]
    async fn test_image_flag_translates_images_despite_same_language() {
        let (dom, engine) = engine_for(
            "<html lang=\"fr\"><body>\
             <img src=\"https://a.com/a.png\" width=\"200\" height=\"100\">\
             </body></html>",
        );

        engine
            .handle_command(ControlCommand::Enable {
                target_language: "fr".to_string(),
                always_translate_images: true,
            })
            .await;

        let img = find_elements(&dom.document, "img").remove(0);
        assert!(get_node_attr(&img, constants::MARKER_IMAGE_TRANSLATED).is_some());
        assert_eq!(engine.stats().images_applied, 1);
    }

    #[tokio::test]
    async fn test_missing_language_signal_abandons_pass() {
        let dom = Rc::new(html_to_dom(b"<html><body><p>hi</p></body></html>", "utf-8"));
        let cfg = EngineConfig {
            ambient_locale: None,
            ..EngineConfig::default()
        };
        let engine = TranslationEngine::new(
            dom.clone(),
            cfg,
            Rc::new(EchoProvider),
            Rc::new(PassthroughFetcher),
        );

        engine
            .handle_command(ControlCommand::Enable {
                target_language: "fr".to_string(),
                always_translate_images: false,
            })
            .await;

        assert_eq!(engine.stats().passes_abandoned, 1);
        assert_eq!(engine.stats().texts_applied, 0);
    }

    #[tokio::test]
    async fn test_set_languages_retranslates() {
        let (dom, engine) = engine_for("<html lang=\"en\"><body><p>Hello</p></body></html>");

        engine
            .handle_command(ControlCommand::Enable {
                target_language: "fr".to_string(),
                always_translate_images: false,
            })
            .await;
        engine
            .handle_command(ControlCommand::SetLanguages {
                languages: vec!["de".to_string()],
            })
            .await;

        let p = find_elements(&dom.document, "p").remove(0);
        assert_eq!(
            node_text(&first_text_child(&p).unwrap()),
            Some("[de] Hello".to_string())
        );
        // 宿主标记的原文是语言无关的
        assert_eq!(
            get_node_attr(&p, constants::MARKER_ORIGINAL_TEXT),
            Some("Hello".to_string())
        );
    }

    #[tokio::test]
    async fn test_set_languages_ignored_when_disabled() {
        let (dom, engine) = engine_for("<html lang=\"en\"><body><p>Hello</p></body></html>");

        engine
            .handle_command(ControlCommand::SetLanguages {
                languages: vec!["de".to_string()],
            })
            .await;

        let p = find_elements(&dom.document, "p").remove(0);
        assert_eq!(
            node_text(&first_text_child(&p).unwrap()),
            Some("Hello".to_string())
        );
        assert_eq!(engine.session().target_language, "en");
    }

    #[test]
    fn test_command_wire_format() {
        let enable: ControlCommand = serde_json::from_str(
            r#"{"type":"enable","targetLanguage":"fr","alwaysTranslateImages":true}"#,
        )
        .unwrap();
        assert_eq!(
            enable,
            ControlCommand::Enable {
                target_language: "fr".to_string(),
                always_translate_images: true,
            }
        );

        let set: ControlCommand =
            serde_json::from_str(r#"{"type":"setLanguages","languages":["de","fr"]}"#).unwrap();
        assert_eq!(
            set,
            ControlCommand::SetLanguages {
                languages: vec!["de".to_string(), "fr".to_string()],
            }
        );

        let disable = serde_json::to_string(&ControlCommand::Disable).unwrap();
        assert_eq!(disable, r#"{"type":"disable"}"#);
    }
}
