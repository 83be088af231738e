//! 事件分发
//!
//! 引擎每发出一个事件，`scan_callback` 先经注册表找回回调对象，
//! 再按消息码确定事件类型、检查对应能力、调用能力方法，
//! 最后把 (中止, 错误) 结果映射回引擎的判定码：
//! 有错误 ⇒ ERROR；否则中止 ⇒ ABORT；否则 ⇒ CONTINUE。五类事件一致。
//! 回调对象不具备某能力时该事件被静默跳过，判定为 CONTINUE。
use std::fmt;
use std::os::raw::{c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::Result;
use tracing::{debug, warn};

use crate::abi::{
    cstr_lossy, RawModuleImport, RawObject, RawRule, RawScanContext, CALLBACK_ABORT, CALLBACK_CONTINUE,
    CALLBACK_ERROR, CALLBACK_MSG_IMPORT_MODULE, CALLBACK_MSG_MODULE_IMPORTED, CALLBACK_MSG_RULE_MATCHING,
    CALLBACK_MSG_RULE_NOT_MATCHING, CALLBACK_MSG_SCAN_FINISHED,
};
use crate::buffers::PendingBuffer;
use crate::callback::{Capabilities, Control, ScanCallback};
use crate::error::{BridgeError, BridgeResult};
use crate::handles::{Object, Rule, ScanContext};
use crate::registry;
use crate::scan::CallbackBundle;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RuleMatching,
    RuleNotMatching,
    ScanFinished,
    ImportModule,
    ModuleImported,
}

impl EventKind {
    pub fn from_code(code: c_int) -> Option<Self> {
        match code {
            CALLBACK_MSG_RULE_MATCHING => Some(EventKind::RuleMatching),
            CALLBACK_MSG_RULE_NOT_MATCHING => Some(EventKind::RuleNotMatching),
            CALLBACK_MSG_SCAN_FINISHED => Some(EventKind::ScanFinished),
            CALLBACK_MSG_IMPORT_MODULE => Some(EventKind::ImportModule),
            CALLBACK_MSG_MODULE_IMPORTED => Some(EventKind::ModuleImported),
            _ => None,
        }
    }

    pub fn code(self) -> c_int {
        match self {
            EventKind::RuleMatching => CALLBACK_MSG_RULE_MATCHING,
            EventKind::RuleNotMatching => CALLBACK_MSG_RULE_NOT_MATCHING,
            EventKind::ScanFinished => CALLBACK_MSG_SCAN_FINISHED,
            EventKind::ImportModule => CALLBACK_MSG_IMPORT_MODULE,
            EventKind::ModuleImported => CALLBACK_MSG_MODULE_IMPORTED,
        }
    }

    /// 处理该事件所需的能力
    pub fn capability(self) -> Capabilities {
        match self {
            EventKind::RuleMatching => Capabilities::RULE_MATCHING,
            EventKind::RuleNotMatching => Capabilities::RULE_NOT_MATCHING,
            EventKind::ScanFinished => Capabilities::SCAN_FINISHED,
            EventKind::ImportModule => Capabilities::MODULE_IMPORT,
            EventKind::ModuleImported => Capabilities::MODULE_IMPORTED,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::RuleMatching => "rule-matching",
            EventKind::RuleNotMatching => "rule-not-matching",
            EventKind::ScanFinished => "scan-finished",
            EventKind::ImportModule => "import-module",
            EventKind::ModuleImported => "module-imported",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 交还给引擎的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Abort,
    Error,
}

impl Verdict {
    pub fn code(self) -> c_int {
        match self {
            Verdict::Continue => CALLBACK_CONTINUE,
            Verdict::Abort => CALLBACK_ABORT,
            Verdict::Error => CALLBACK_ERROR,
        }
    }

    pub fn from_code(code: c_int) -> Option<Self> {
        match code {
            CALLBACK_CONTINUE => Some(Verdict::Continue),
            CALLBACK_ABORT => Some(Verdict::Abort),
            CALLBACK_ERROR => Some(Verdict::Error),
            _ => None,
        }
    }

    /// 错误优先于中止
    pub fn from_outcome<E>(outcome: &Result<Control, E>) -> Self {
        match outcome {
            Err(_) => Verdict::Error,
            Ok(Control::Abort) => Verdict::Abort,
            Ok(Control::Continue) => Verdict::Continue,
        }
    }
}

/// 交给引擎的回调入口
///
/// # Safety
/// 只应由引擎按 [`crate::abi::ScanCallbackFn`] 的约定调用
pub unsafe extern "C" fn scan_callback(
    ctx: *mut RawScanContext,
    message: c_int,
    message_data: *mut c_void,
    user_data: *mut c_void,
) -> c_int {
    let entry = match registry::resolve(user_data) {
        Ok(entry) => entry,
        Err(err) => {
            // 找不到回调对象：无法交给任何调用方，只能以通用错误告知引擎
            warn!(message, error = %err, "dropping unroutable scan event");
            return CALLBACK_ERROR;
        }
    };
    (entry.handler)(entry.target, ctx, message, message_data)
}

/// 单个回调对象类型的事件处理（注册时以函数指针存入注册表）
///
/// # Safety
/// `target` 必须是正在扫描中的 `CallbackBundle<C>`，且此刻没有其他引用
pub(crate) unsafe fn handle_event<C: ScanCallback>(
    target: *mut c_void,
    ctx: *mut RawScanContext,
    message: c_int,
    data: *mut c_void,
) -> c_int {
    let bundle = &mut *(target as *mut CallbackBundle<C>);

    let Some(kind) = EventKind::from_code(message) else {
        debug!(message, "ignoring unknown scan event");
        bundle.stats.unknown += 1;
        return CALLBACK_CONTINUE;
    };
    if !bundle.capabilities.contains(kind.capability()) {
        bundle.stats.skipped += 1;
        return CALLBACK_CONTINUE;
    }

    let ctx = ScanContext::from_raw(ctx);
    let delivered = catch_unwind(AssertUnwindSafe(|| deliver(bundle, kind, &ctx, data)));
    let verdict = match delivered {
        Ok(outcome) => {
            let verdict = Verdict::from_outcome(&outcome);
            if let Err(err) = outcome {
                bundle.record_error(err);
            }
            verdict
        }
        Err(_) => {
            bundle.record_error(BridgeError::Panicked { event: kind });
            Verdict::Error
        }
    };
    if verdict == Verdict::Abort {
        bundle.aborted = true;
    }
    debug!(event = %kind, ?verdict, "dispatched scan event");
    verdict.code()
}

/// 调用与事件类型对应的能力方法
///
/// 事件数据缺失是桥接层错误；能力方法返回的任何错误一律作为回调错误。
/// 只有成功构造出事件句柄的事件才计入统计。
unsafe fn deliver<C: ScanCallback>(
    bundle: &mut CallbackBundle<C>,
    kind: EventKind,
    ctx: &ScanContext<'_>,
    data: *mut c_void,
) -> BridgeResult<Control> {
    let missing = || BridgeError::MissingEventData { event: kind };
    let outcome = match kind {
        EventKind::RuleMatching | EventKind::RuleNotMatching => {
            let rule = Rule::from_raw(data as *const RawRule).ok_or_else(missing)?;
            bundle.stats.count(kind);
            let cap = if kind == EventKind::RuleMatching {
                bundle.callback.as_rule_matching().map(|c| c.rule_matching(ctx, &rule))
            } else {
                bundle.callback.as_rule_not_matching().map(|c| c.rule_not_matching(ctx, &rule))
            };
            cap.unwrap_or(Ok(Control::Continue))
        }
        EventKind::ScanFinished => {
            bundle.stats.count(kind);
            match bundle.callback.as_scan_finished() {
                Some(c) => c.scan_finished(ctx),
                None => Ok(Control::Continue),
            }
        }
        EventKind::ImportModule => {
            let import = (data as *mut RawModuleImport).as_mut().ok_or_else(missing)?;
            bundle.stats.count(kind);
            let module = cstr_lossy(import.module_name);
            let Some(c) = bundle.callback.as_module_import() else { return Ok(Control::Continue) };
            c.import_module(ctx, &module).map(|reply| {
                inject_module_data(bundle, import, &module, &reply.data);
                reply.control
            })
        }
        EventKind::ModuleImported => {
            let object = Object::from_raw(data as *const RawObject).ok_or_else(missing)?;
            bundle.stats.count(kind);
            match bundle.callback.as_module_imported() {
                Some(c) => c.module_imported(ctx, &object),
                None => Ok(Control::Continue),
            }
        }
    };
    outcome.map_err(BridgeError::Callback)
}

/// 把载荷复制到原生缓冲区、写回引擎的导入请求，并挂到回调对象上
///
/// 任何一步失败都只是不满足该导入请求，不影响回调自身的判定。
fn inject_module_data<C>(bundle: &mut CallbackBundle<C>, import: &mut RawModuleImport, module: &str, data: &[u8]) {
    if data.is_empty() { return; }
    if let Some(limit) = bundle.options.max_module_data {
        if data.len() > limit {
            warn!(module, size = data.len(), limit, "module data exceeds limit; import left unsatisfied");
            return;
        }
    }
    let Some(buf) = PendingBuffer::copy_from(data) else {
        warn!(module, size = data.len(), "failed to allocate module data; import left unsatisfied");
        return;
    };
    let (ptr, len) = (buf.as_ptr(), buf.len());
    if let Err(err) = bundle.buffers.track(buf) {
        warn!(module, error = %err, "import buffer rejected; import left unsatisfied");
        return;
    }
    import.module_data = ptr;
    import.module_data_size = len;
    bundle.stats.import_buffers += 1;
    bundle.stats.import_bytes += len;
    debug!(module, size = len, "injected module data");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_mapping_prefers_error() {
        assert_eq!(Verdict::from_outcome(&Ok::<_, BridgeError>(Control::Continue)), Verdict::Continue);
        assert_eq!(Verdict::from_outcome(&Ok::<_, BridgeError>(Control::Abort)), Verdict::Abort);
        assert_eq!(Verdict::from_outcome(&Err::<Control, _>(anyhow::anyhow!("boom"))), Verdict::Error);
    }

    #[test]
    fn verdict_codes_round_trip() {
        for v in [Verdict::Continue, Verdict::Abort, Verdict::Error] {
            assert_eq!(Verdict::from_code(v.code()), Some(v));
        }
        assert_eq!(Verdict::from_code(77), None);
    }

    #[test]
    fn event_codes_round_trip() {
        for k in [
            EventKind::RuleMatching,
            EventKind::RuleNotMatching,
            EventKind::ScanFinished,
            EventKind::ImportModule,
            EventKind::ModuleImported,
        ] {
            assert_eq!(EventKind::from_code(k.code()), Some(k));
        }
        assert_eq!(EventKind::from_code(0), None);
        assert_eq!(EventKind::from_code(6), None);
        assert_eq!(EventKind::ImportModule.to_string(), "import-module");
    }

    #[test]
    fn unroutable_event_returns_error_verdict() {
        let code = unsafe {
            scan_callback(std::ptr::null_mut(), CALLBACK_MSG_SCAN_FINISHED, std::ptr::null_mut(), usize::MAX as *mut c_void)
        };
        assert_eq!(code, CALLBACK_ERROR);
        let code = unsafe {
            scan_callback(std::ptr::null_mut(), CALLBACK_MSG_SCAN_FINISHED, std::ptr::null_mut(), std::ptr::null_mut())
        };
        assert_eq!(code, CALLBACK_ERROR);
    }

    #[test]
    fn event_without_data_is_not_counted() {
        use crate::recorder::MatchRecorder;

        let mut bundle = CallbackBundle::new(MatchRecorder::new());
        let target = &mut bundle as *mut CallbackBundle<MatchRecorder> as *mut c_void;
        let code = unsafe {
            handle_event::<MatchRecorder>(target, std::ptr::null_mut(), CALLBACK_MSG_RULE_MATCHING, std::ptr::null_mut())
        };
        assert_eq!(code, CALLBACK_ERROR);
        assert_eq!(bundle.stats.rules_matching, 0);
        assert_eq!(bundle.stats.delivered(), 0);
        assert!(bundle.callback().records().is_empty());
    }
}
