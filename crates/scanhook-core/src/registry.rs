//! 回调注册表：令牌 -> 回调对象
//!
//! 引擎的回调签名只能透传一个指针大小的 `user_data`，这里用进程级的令牌表
//! 在每次事件时找回完整的回调对象。令牌非零、进程内唯一、不复用，
//! 因而过期令牌只会查找失败，不会被解引用。多个线程上的并发扫描共享此表。
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard};

use tracing::debug;

use crate::abi::RawScanContext;
use crate::error::{BridgeError, BridgeResult};

/// 类型擦除后的事件处理函数：(回调对象, 上下文, 消息码, 事件数据) -> 判定码
pub(crate) type EventHandler =
    unsafe fn(target: *mut c_void, ctx: *mut RawScanContext, message: c_int, data: *mut c_void) -> c_int;

/// 关联令牌（可无损放入引擎的 `user_data` 槽位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    pub(crate) fn as_user_data(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }

    pub(crate) fn from_user_data(p: *mut c_void) -> Option<Self> {
        NonZeroUsize::new(p as usize).map(Token)
    }

    pub(crate) fn get(self) -> usize {
        self.0.get()
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Entry {
    pub(crate) target: *mut c_void,
    pub(crate) handler: EventHandler,
}

// target 只在注册方的扫描调用返回前被解引用，其回调类型为 Send；表本身只搬运指针值
unsafe impl Send for Entry {}

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);
static REGISTRY: LazyLock<Mutex<HashMap<Token, Entry>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

fn table() -> MutexGuard<'static, HashMap<Token, Entry>> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// 注册回调对象，返回在作用域结束时自动释放的登记
///
/// # Safety
/// 在返回的 `Registration` 存活期间，`target` 必须保持有效且可被 `handler` 独占访问
pub(crate) unsafe fn register(target: *mut c_void, handler: EventHandler) -> Registration {
    let id = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    // 计数器从 1 开始且不回绕到 0（usize 耗尽前进程早已结束）
    let token = Token(NonZeroUsize::new(id).unwrap_or(NonZeroUsize::MIN));
    table().insert(token, Entry { target, handler });
    debug!(token = token.get(), "registered scan callback");
    Registration { token }
}

/// 由令牌找回回调对象
pub(crate) fn resolve(user_data: *mut c_void) -> BridgeResult<Entry> {
    let token = Token::from_user_data(user_data).ok_or(BridgeError::Unroutable { token: 0 })?;
    table()
        .get(&token)
        .copied()
        .ok_or(BridgeError::Unroutable { token: token.get() })
}

/// 释放令牌；未知令牌忽略
pub(crate) fn release(token: Token) {
    if table().remove(&token).is_some() {
        debug!(token = token.get(), "released scan callback");
    }
}

/// 当前登记的回调数量（诊断用）
pub fn live_registrations() -> usize {
    table().len()
}

/// 令牌登记；析构时释放
#[derive(Debug)]
pub(crate) struct Registration {
    token: Token,
}

impl Registration {
    pub(crate) fn token(&self) -> Token {
        self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        release(self.token);
    }
}
