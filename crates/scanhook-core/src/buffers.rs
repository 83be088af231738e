//! 导入缓冲区生命周期管理
//!
//! 模块导入的载荷被复制到 `calloc` 分配的原生内存后交给引擎。引擎可能在本次事件之后
//! 继续读取该指针，因此缓冲区不能随事件释放，而是挂在所属回调对象上，
//! 在回调对象关闭或析构时统一释放。释放后追踪器被封存，不再接受新的缓冲区。
use std::os::raw::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

/// 进程内存活的导入缓冲区数量（诊断用）
static LIVE_BUFFERS: AtomicUsize = AtomicUsize::new(0);

/// 当前尚未释放的导入缓冲区总数
pub fn live_import_buffers() -> usize {
    LIVE_BUFFERS.load(Ordering::SeqCst)
}

/// 一块原生分配的载荷缓冲区；析构即释放，所有权保证恰好释放一次
#[derive(Debug)]
pub(crate) struct PendingBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// 缓冲区只是一段独占的原生内存，不依赖线程局部状态
unsafe impl Send for PendingBuffer {}

impl PendingBuffer {
    /// 分配并逐字节复制载荷；空载荷或分配失败返回 None
    pub(crate) fn copy_from(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() { return None; }
        // SAFETY: calloc 的结果在使用前做空指针检查
        let raw = unsafe { libc::calloc(1, bytes.len()) } as *mut u8;
        let ptr = NonNull::new(raw)?;
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
        LIVE_BUFFERS.fetch_add(1, Ordering::SeqCst);
        Some(Self { ptr, len: bytes.len() })
    }

    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr() as *mut c_void
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for PendingBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr 来自 calloc，且 PendingBuffer 不可复制
        unsafe { libc::free(self.ptr.as_ptr() as *mut c_void) };
        LIVE_BUFFERS.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    buffers: Vec<PendingBuffer>,
    sealed: bool,
}

/// 按回调对象追踪的缓冲区集合（线程安全）
#[derive(Debug, Default)]
pub(crate) struct BufferTracker {
    state: Mutex<TrackerState>,
}

impl BufferTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // 状态只有 Vec 与标志位，中毒后仍然一致
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 记录一块缓冲区；已封存时拒绝并立即释放该缓冲区
    pub(crate) fn track(&self, buf: PendingBuffer) -> BridgeResult<()> {
        let mut state = self.lock();
        if state.sealed {
            return Err(BridgeError::Sealed);
        }
        state.buffers.push(buf);
        Ok(())
    }

    /// 释放全部缓冲区并封存；可重复调用，返回本次释放的数量
    pub(crate) fn release_all(&self) -> usize {
        let drained = {
            let mut state = self.lock();
            state.sealed = true;
            std::mem::take(&mut state.buffers)
        };
        let n = drained.len();
        if n > 0 {
            debug!(buffers = n, "releasing import buffers");
        }
        drop(drained);
        n
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().buffers.len()
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.lock().sealed
    }
}

impl Drop for BufferTracker {
    fn drop(&mut self) {
        self.release_all();
    }
}
