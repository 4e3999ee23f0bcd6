//! # LingoDom
//!
//! 增量式的活文档翻译编排引擎：对一棵活的 DOM 做原地翻译，
//! 跟随文档后续变更补充翻译，并保证任何时刻都能一次性恢复原文。
//!
//! ## 模块组织
//!
//! - `engine` - 编排核心与控制入口
//! - `scanner` - 翻译单元扫描
//! - `language` - 源语言推断
//! - `scheduler` - 批量请求调度
//! - `applier` - 译文落地与恢复
//! - `watcher` - 文档变更观察与防抖
//! - `cache` / `rate` - 会话缓存与速率控制
//! - `provider` - 外部翻译服务接口
//! - `dom` - DOM 访问与改写助手

pub mod applier;
pub mod cache;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod language;
pub mod provider;
pub mod rate;
pub mod scanner;
pub mod scheduler;
pub mod watcher;

// 常用类型的顶层再导出
pub use cache::{CacheEntry, CacheKey, TranslationCache, UnitKind};
pub use config::{EngineConfig, MemorySettings, SessionConfig, SettingsStore};
pub use engine::{ControlCommand, EngineStatsSnapshot, TranslationEngine};
pub use error::{EngineError, EngineResult};
pub use provider::{
    ImageFetcher, PassthroughFetcher, ProviderError, ProviderErrorClass, TranslationProvider,
};
pub use rate::{Admission, RateConfig, RateController};
pub use scanner::{ImageUnit, ScanOutcome, TextUnit};
pub use watcher::{ChangeWatcher, Mutation, MutationBatch};
