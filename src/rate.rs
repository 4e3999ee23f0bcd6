//! 请求速率控制
//!
//! 约束出站请求总量，并在服务方限流时平滑降级。状态机只有两个状态：
//! `Normal` 和 `Cooldown`。冷却总是有时限的，并且计数衰减可以让
//! 控制器提前恢复，引擎永远不会被永久卡死。
//!
//! 时间统一从调用方传入（`tokio::time::Instant`），衰减在 `maintain`
//! 里按流逝周期惰性补算，不依赖后台任务，测试可以用暂停时钟驱动。

use std::time::Duration;

use tokio::time::Instant;

use crate::config::constants;

// ============================================================================
// 配置与状态
// ============================================================================

/// 速率控制配置
#[derive(Debug, Clone)]
pub struct RateConfig {
    /// 滚动窗口内的请求容量
    pub capacity: usize,
    /// 冷却时长
    pub cooldown: Duration,
    /// 计数衰减周期
    pub decay_period: Duration,
    /// 每个衰减周期扣减的请求数
    pub decay_amount: usize,
    /// 冷却到期后计数重置为容量的该比例
    pub recovery_fraction: f32,
    /// 初始退避延迟
    pub initial_backoff: Duration,
    /// 最大退避延迟
    pub max_backoff: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            capacity: constants::REQUEST_CAPACITY,
            cooldown: Duration::from_millis(constants::COOLDOWN_MS),
            decay_period: Duration::from_millis(constants::DECAY_PERIOD_MS),
            decay_amount: constants::DECAY_AMOUNT,
            recovery_fraction: constants::RECOVERY_FRACTION,
            initial_backoff: Duration::from_millis(constants::INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(constants::MAX_BACKOFF_MS),
        }
    }
}

/// 准入判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied,
}

/// 控制器状态快照
#[derive(Debug, Clone, Copy)]
pub struct RateState {
    pub request_count: usize,
    pub cooldown_active: bool,
    pub cooldown_until: Option<Instant>,
    pub backoff_delay: Duration,
}

// ============================================================================
// 控制器
// ============================================================================

/// 速率控制器
///
/// 单逻辑线程内使用；每次状态修改都是挂起点之间的一次完整读改写。
#[derive(Debug)]
pub struct RateController {
    cfg: RateConfig,
    count: usize,
    cooldown_until: Option<Instant>,
    backoff: Duration,
    last_decay: Instant,
}

impl RateController {
    pub fn new(cfg: RateConfig) -> Self {
        let backoff = cfg.initial_backoff;
        Self {
            cfg,
            count: 0,
            cooldown_until: None,
            backoff,
            last_decay: Instant::now(),
        }
    }

    /// 周期性维护：补算衰减并检查冷却退出条件
    ///
    /// 退出冷却有两条路径：
    /// 1. 衰减后的计数降到容量一半以下，提前恢复；
    /// 2. 冷却到期，计数重置为容量的恢复比例（默认 20%）。
    /// 两条路径都会把退避延迟重置为初始值。
    pub fn maintain(&mut self, now: Instant) {
        let mut decayed = false;
        while now.duration_since(self.last_decay) >= self.cfg.decay_period {
            self.count = self.count.saturating_sub(self.cfg.decay_amount);
            self.last_decay += self.cfg.decay_period;
            decayed = true;
        }

        // 提前恢复只在衰减实际发生的节拍上检查，和计数扣减绑定
        if let Some(until) = self.cooldown_until {
            if decayed && self.count < self.cfg.capacity / 2 {
                tracing::debug!(count = self.count, "计数衰减达标，提前退出冷却");
                self.cooldown_until = None;
                self.backoff = self.cfg.initial_backoff;
            } else if now >= until {
                self.count =
                    (self.cfg.capacity as f32 * self.cfg.recovery_fraction) as usize;
                tracing::debug!(count = self.count, "冷却到期，计数回落后恢复");
                self.cooldown_until = None;
                self.backoff = self.cfg.initial_backoff;
            }
        }
    }

    /// 准入判定
    ///
    /// 只看计数是否到达容量；冷却本身不拒绝单个请求，它的作用
    /// 是抬高退避延迟并延迟计数恢复。获准的请求立即占用一个
    /// 计数槽；调用方在失败时负责用 `release` 或 `on_throttled` 归还。
    pub fn try_admit(&mut self, now: Instant) -> Admission {
        self.maintain(now);

        if self.count >= self.cfg.capacity {
            return Admission::Denied;
        }

        self.count += 1;
        Admission::Allowed
    }

    /// 归还一个计数槽（非限流失败时调用，不改变状态机状态）
    pub fn release(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    /// 观察到限流错误：归还计数槽并进入冷却
    ///
    /// 进入冷却不重置计数，退避延迟翻倍（有上限）。
    pub fn on_throttled(&mut self, now: Instant) {
        self.release();
        self.cooldown_until = Some(now + self.cfg.cooldown);
        self.backoff = (self.backoff * 2).min(self.cfg.max_backoff);
        tracing::warn!(
            cooldown_ms = self.cfg.cooldown.as_millis() as u64,
            backoff_ms = self.backoff.as_millis() as u64,
            "检测到限流，进入冷却"
        );
    }

    /// 当前退避延迟（调度器用来拉长分块间隔）
    pub fn backoff_delay(&self) -> Duration {
        self.backoff
    }

    /// 是否处于冷却状态
    pub fn in_cooldown(&self) -> bool {
        self.cooldown_until.is_some()
    }

    /// 窗口内的当前计数
    pub fn count(&self) -> usize {
        self.count
    }

    /// 状态快照
    pub fn state(&self) -> RateState {
        RateState {
            request_count: self.count,
            cooldown_active: self.cooldown_until.is_some(),
            cooldown_until: self.cooldown_until,
            backoff_delay: self.backoff,
        }
    }
}
