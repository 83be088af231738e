//! 扫描入口与回调对象
//!
//! `CallbackBundle` 拥有调用方的回调、其导入缓冲区以及本次扫描的第一个回调错误。
//! 扫描期间它以令牌登记在注册表中，扫描返回前注销；
//! 缓冲区则一直保留到 `close()` 或析构，因为引擎可能在事件之后仍读取它们。
use std::os::raw::c_void;

use tracing::{debug, info, warn};

use crate::abi::Engine;
use crate::buffers::BufferTracker;
use crate::callback::{Capabilities, ScanCallback};
use crate::dispatch::{handle_event, scan_callback};
use crate::error::{BridgeError, BridgeResult};
use crate::options::{DispatchStats, ScanOptions};
use crate::recorder::{MatchRecord, MatchRecorder};
use crate::registry;

/// 单次扫描的结果摘要
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// 是否有回调要求中止
    pub aborted: bool,
    pub stats: DispatchStats,
}

/// 回调对象：调用方回调 + 能力位集 + 导入缓冲区
pub struct CallbackBundle<C> {
    pub(crate) callback: C,
    pub(crate) capabilities: Capabilities,
    pub(crate) buffers: BufferTracker,
    pub(crate) options: ScanOptions,
    pub(crate) stats: DispatchStats,
    pub(crate) aborted: bool,
    error: Option<BridgeError>,
}

impl<C: ScanCallback> CallbackBundle<C> {
    pub fn new(callback: C) -> Self {
        Self::with_options(callback, ScanOptions::default())
    }

    /// 能力在此处探测一次，之后每个事件只查位集
    pub fn with_options(mut callback: C, options: ScanOptions) -> Self {
        let capabilities = Capabilities::probe(&mut callback);
        if capabilities.is_empty() {
            warn!("scan callback implements no capabilities; every event will be skipped");
        }
        Self {
            callback,
            capabilities,
            buffers: BufferTracker::new(),
            options,
            stats: DispatchStats::default(),
            aborted: false,
            error: None,
        }
    }

    /// 用 `engine` 执行一次扫描，事件分发给本回调对象
    ///
    /// 回调返回的第一个错误会在扫描结束后以 `BridgeError::Callback` 交还；
    /// 其次是引擎自身的失败状态。已关闭的回调对象不能再扫描。
    ///
    /// 引擎可能在别的线程上投递事件，所以回调必须是 `Send`：
    ///
    /// ```compile_fail
    /// use std::rc::Rc;
    /// use scanhook_core::{CallbackBundle, Engine, ScanCallback};
    ///
    /// struct Local(Rc<u32>);
    /// impl ScanCallback for Local {}
    ///
    /// fn run<E: Engine>(engine: &mut E) {
    ///     let mut bundle = CallbackBundle::new(Local(Rc::new(0)));
    ///     let _ = bundle.scan(engine);
    /// }
    /// ```
    pub fn scan<E: Engine + ?Sized>(&mut self, engine: &mut E) -> BridgeResult<ScanSummary>
    where
        C: Send,
    {
        if self.buffers.is_sealed() {
            return Err(BridgeError::Sealed);
        }
        self.error = None;
        self.aborted = false;
        self.stats = DispatchStats::default();

        let target = self as *mut Self as *mut c_void;
        // SAFETY: 登记只存活到 engine.scan 返回；期间 self 被本方法独占借用，
        // 不会被其他代码访问，事件处理器是唯一的使用者
        let registration = unsafe { registry::register(target, handle_event::<C>) };
        let status = engine.scan(scan_callback, registration.token().as_user_data());
        drop(registration);

        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if status != 0 {
            return Err(BridgeError::Engine { code: status });
        }
        debug!(delivered = self.stats.delivered(), skipped = self.stats.skipped, aborted = self.aborted, "scan finished");
        Ok(ScanSummary { aborted: self.aborted, stats: self.stats.clone() })
    }
}

impl<C> CallbackBundle<C> {
    pub(crate) fn record_error(&mut self, err: BridgeError) {
        if self.error.is_none() {
            self.error = Some(err);
        } else {
            warn!(error = %err, "additional scan callback error discarded");
        }
    }

    pub fn callback(&self) -> &C {
        &self.callback
    }

    pub fn callback_mut(&mut self) -> &mut C {
        &mut self.callback
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// 仍被持有的导入缓冲区数量
    pub fn pending_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// 显式释放全部导入缓冲区；可重复调用，返回本次释放的数量
    pub fn close(&self) -> usize {
        self.buffers.release_all()
    }

    pub fn is_closed(&self) -> bool {
        self.buffers.is_sealed()
    }

    /// 取回调用方回调；导入缓冲区随之释放
    pub fn into_inner(self) -> C {
        self.callback
    }
}

/// 简单路径：记录全部命中规则
pub fn scan_matches<E: Engine + ?Sized>(engine: &mut E) -> BridgeResult<Vec<MatchRecord>> {
    let mut bundle = CallbackBundle::new(MatchRecorder::new());
    bundle.scan(engine)?;
    let records = bundle.into_inner().into_records();
    info!(matches = records.len(), "collected rule matches");
    Ok(records)
}
