//! 缓存的传感器读数
//!
//! 展示层以自己的节奏读状态，移动循环以自己的节奏写状态。
//! 每个读数是 (值, 时间戳) 对，整体原子替换（ArcSwap 单指针
//! 交换），读方拿到的值和时间戳永远配套。
//!
//! 带最大年龄的读取要么命中缓存（年龄 ≤ 要求），要么触发一次
//! 现场查询并更新缓存。其他线程读到略旧的值是设计允许的，
//! 年龄参数就是那条边界。

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winch_protocol::{CableOut, StatusSample, UnitConverter};

/// 带时间戳的读数
#[derive(Debug, Clone, Copy)]
pub struct Stamped<T> {
    pub value: T,
    pub at: Instant,
}

/// 单个缓存读数槽
pub struct CachedReading<T> {
    slot: ArcSwapOption<Stamped<T>>,
}

impl<T: Clone> CachedReading<T> {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
        }
    }

    /// 原子写入新值（值与时间戳一起替换）
    pub fn store(&self, value: T) {
        self.slot.store(Some(Arc::new(Stamped {
            value,
            at: Instant::now(),
        })));
    }

    /// 仅缓存命中：年龄 ≤ `max_age` 时返回值
    pub fn get(&self, max_age: Duration) -> Option<T> {
        self.slot
            .load()
            .as_ref()
            .filter(|stamped| stamped.at.elapsed() <= max_age)
            .map(|stamped| stamped.value.clone())
    }

    /// 缓存命中或现场查询
    ///
    /// 未命中时运行 `fetch`，成功后写回缓存再返回。
    pub fn get_or_fetch<E>(
        &self,
        max_age: Duration,
        fetch: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        if let Some(value) = self.get(max_age) {
            return Ok(value);
        }
        let value = fetch()?;
        self.store(value.clone());
        Ok(value)
    }

    /// 最近一次读数（不限年龄）
    pub fn latest(&self) -> Option<Stamped<T>> {
        self.slot.load().as_deref().cloned()
    }
}

impl<T: Clone> Default for CachedReading<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 控制器的缓存读数集
///
/// 移动循环每个周期用批量采样整体刷新；展示层只读。
#[derive(Default)]
pub struct Monitor {
    /// 缆长（米 + 筒转数）
    pub cable: CachedReading<CableOut>,
    /// 电机电流
    pub current: CachedReading<f64>,
    /// 电机力矩
    pub torque: CachedReading<f64>,
    /// 缆速（m/s，由瞬时速度换算）
    pub velocity: CachedReading<f64>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用一次批量状态采样刷新全部读数
    pub fn update_from_sample(&self, sample: &StatusSample, converter: &UnitConverter) {
        self.cable.store(converter.cable_out(sample.position));
        self.current.store(sample.current);
        self.torque.store(sample.torque);
        self.velocity
            .store(converter.instantaneous_velocity_mps(sample.velocity));
    }
}
