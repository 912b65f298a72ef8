//! 异步操作监督者
//!
//! 任何长操作都有两种调用方式：
//!
//! - **阻塞**：在调用方线程上执行。嵌套的阻塞调用沿用最外层的
//!   动作标签，而不是层层覆盖 —— 展示层看到的是"顶层动作"。
//! - **后台**：恰好一个后台线程。已有操作在跑时再启动直接返回
//!   [`StartError::Busy`]，不排队、不抢占、不碰正在跑的操作。
//!
//! 后台线程无论怎么退出（成功、取消、意外失败），动作标签、
//! 线程句柄和取消槽都会在任务锁下复位，保证后续操作不会被
//! 误判为已取消。

use crate::cancel::{AbortSignal, AbortSlot};
use crate::OperationError;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 启动失败（返回而非抛出：忙不是错误路径，是正常的拒绝）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// 已有操作在运行
    #[error("Operation already running: {0}")]
    Busy(&'static str),
}

/// 完成回调
pub type JobCallback<R> = Box<dyn FnOnce(Result<R, OperationError>) + Send>;

struct JobSlot {
    /// 后台操作线程（至多一个）
    thread: Option<thread::JoinHandle<()>>,
    /// 当前动作标签（阻塞与后台操作共用，供展示层读取）
    action: Option<&'static str>,
}

struct SupervisorInner {
    jobs: Mutex<JobSlot>,
    abort: AbortSlot,
}

/// 任务退出时的复位守卫
///
/// 后台线程无论以哪条路径退出（包括 panic 展开），都要把槽位
/// 清干净。
struct JobResetGuard {
    inner: Arc<SupervisorInner>,
}

impl Drop for JobResetGuard {
    fn drop(&mut self) {
        let mut jobs = self.inner.jobs.lock();
        jobs.thread = None;
        jobs.action = None;
        self.inner.abort.clear();
    }
}

/// 异步操作监督者
///
/// Clone 轻量（Arc 指针），后台线程与前台共享同一份状态。
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                jobs: Mutex::new(JobSlot {
                    thread: None,
                    action: None,
                }),
                abort: AbortSlot::new(),
            }),
        }
    }

    /// 当前动作标签（无操作时为 `None`）
    pub fn current_action(&self) -> Option<&'static str> {
        self.inner.jobs.lock().action
    }

    /// 是否有后台操作在运行
    pub fn is_busy(&self) -> bool {
        self.inner.jobs.lock().thread.is_some()
    }

    /// 取消轮询点：长操作每个周期至少调用一次
    pub fn poll(&self) -> Result<(), OperationError> {
        self.inner.abort.poll()
    }

    /// 发出取消信号
    ///
    /// 只在有操作运行时才放信号 —— 没人听的信号会留在槽里
    /// 误伤下一个操作。返回是否真的放入了信号。
    pub fn raise_abort(&self, signal: AbortSignal) -> bool {
        let jobs = self.inner.jobs.lock();
        if jobs.action.is_some() {
            info!(
                "raising abort (cleanup={}) against action {:?}",
                signal.cleanup, jobs.action
            );
            self.inner.abort.raise(signal);
            true
        } else {
            debug!("abort requested but no operation is running");
            false
        }
    }

    /// 阻塞执行
    ///
    /// 嵌套调用时动作标签保持最外层的；只有最外层调用负责清理
    /// 标签和遗留的取消信号。
    pub fn run_blocking<R>(
        &self,
        label: &'static str,
        op: impl FnOnce() -> Result<R, OperationError>,
    ) -> Result<R, OperationError> {
        let top_level = {
            let mut jobs = self.inner.jobs.lock();
            if jobs.action.is_none() {
                jobs.action = Some(label);
                true
            } else {
                false
            }
        };

        let result = op();

        if top_level {
            let mut jobs = self.inner.jobs.lock();
            jobs.action = None;
            // 操作结束后才到达的信号没有接收者，丢弃
            self.inner.abort.clear();
        }
        result
    }

    /// 后台执行
    ///
    /// # 参数
    /// - `label`: 动作标签（展示层可见）
    /// - `op`: 操作闭包
    /// - `on_abort`: 操作因取消退出时的收尾动作（通常是停电机）
    /// - `callback`: 完成回调，拿到操作结果
    ///
    /// # 错误
    /// - [`StartError::Busy`]: 已有后台操作。不会生成新线程，
    ///   也不影响正在运行的操作。
    pub fn spawn<R>(
        &self,
        label: &'static str,
        op: impl FnOnce() -> Result<R, OperationError> + Send + 'static,
        on_abort: impl FnOnce(AbortSignal) + Send + 'static,
        callback: Option<JobCallback<R>>,
    ) -> Result<(), StartError>
    where
        R: Send + 'static,
    {
        let mut jobs = self.inner.jobs.lock();
        if jobs.thread.is_some() {
            let running = jobs.action.unwrap_or("<unnamed>");
            warn!("refusing to start {label:?}: {running:?} already running");
            return Err(StartError::Busy(running));
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::spawn(move || {
            let _reset = JobResetGuard {
                inner: Arc::clone(&inner),
            };
            inner.jobs.lock().action = Some(label);

            let result = op();
            if let Err(OperationError::Aborted(signal)) = &result {
                info!("background action {label:?} aborted (cleanup={})", signal.cleanup);
                on_abort(*signal);
            }
            if let Some(callback) = callback {
                callback(result);
            }
        });
        jobs.thread = Some(handle);
        Ok(())
    }

    /// 后台执行并返回结果接收端
    ///
    /// [`Supervisor::spawn`] 的便捷封装：完成结果通过容量为 1 的
    /// 通道送出，调用方可阻塞等待或轮询。
    pub fn spawn_watched<R>(
        &self,
        label: &'static str,
        op: impl FnOnce() -> Result<R, OperationError> + Send + 'static,
        on_abort: impl FnOnce(AbortSignal) + Send + 'static,
    ) -> Result<Receiver<Result<R, OperationError>>, StartError>
    where
        R: Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.spawn(
            label,
            op,
            on_abort,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        )?;
        Ok(rx)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
