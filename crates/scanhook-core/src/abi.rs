//! 引擎侧 C ABI：回调签名、消息/判定常量与事件数据布局
//!
//! 引擎只通过一个 C 风格回调与桥接层交互，事件数据以裸指针传入。
//! 这里的结构体与引擎头文件逐字段对应（`#[repr(C)]`），桥接层只读取，
//! 唯一的写回点是 `RawModuleImport` 的 (module_data, module_data_size)。
use std::os::raw::{c_char, c_int, c_void};

/// 判定码：继续扫描
pub const CALLBACK_CONTINUE: c_int = 0;
/// 判定码：中止扫描（非错误）
pub const CALLBACK_ABORT: c_int = 1;
/// 判定码：回调出错，引擎应终止扫描并报告错误
pub const CALLBACK_ERROR: c_int = 2;

pub const CALLBACK_MSG_RULE_MATCHING: c_int = 1;
pub const CALLBACK_MSG_RULE_NOT_MATCHING: c_int = 2;
pub const CALLBACK_MSG_SCAN_FINISHED: c_int = 3;
pub const CALLBACK_MSG_IMPORT_MODULE: c_int = 4;
pub const CALLBACK_MSG_MODULE_IMPORTED: c_int = 5;

/// 元数据类型码（整数统一为 64 位有符号）
pub const META_TYPE_INTEGER: c_int = 1;
pub const META_TYPE_STRING: c_int = 2;
pub const META_TYPE_BOOLEAN: c_int = 3;

/// 单条元数据
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMeta {
    pub identifier: *const c_char,
    pub kind: c_int,
    /// 整数值；布尔类型时非零即真
    pub integer: i64,
    /// 字符串值（仅 META_TYPE_STRING 有效）
    pub string: *const c_char,
}

/// 规则中声明的字符串；`index` 指向扫描上下文的命中表
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawString {
    pub identifier: *const c_char,
    pub index: usize,
}

/// 规则（引擎内部表示的视图）
#[repr(C)]
#[derive(Debug)]
pub struct RawRule {
    pub identifier: *const c_char,
    pub ns: *const c_char,
    pub tags: *const *const c_char,
    pub tags_len: usize,
    pub metas: *const RawMeta,
    pub metas_len: usize,
    pub strings: *const RawString,
    pub strings_len: usize,
}

/// 单次字符串命中
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMatch {
    pub base: i64,
    pub offset: i64,
    pub match_length: i32,
    /// 命中数据（可能被引擎截断，长度以 data_length 为准）
    pub data: *const u8,
    pub data_length: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMatchList {
    pub matches: *const RawMatch,
    pub len: usize,
}

/// 扫描上下文：按字符串索引组织的命中表
#[repr(C)]
#[derive(Debug)]
pub struct RawScanContext {
    pub matches: *const RawMatchList,
    pub matches_len: usize,
}

/// 模块导入后的数据树根对象
#[repr(C)]
#[derive(Debug)]
pub struct RawObject {
    pub identifier: *const c_char,
    pub object_type: i8,
}

/// 模块导入请求；调用方应答的数据经由此结构写回引擎
#[repr(C)]
#[derive(Debug)]
pub struct RawModuleImport {
    pub module_name: *const c_char,
    pub module_data: *mut c_void,
    pub module_data_size: usize,
}

/// 引擎回调签名：(上下文, 消息码, 事件数据, 关联令牌) -> 判定码
pub type ScanCallbackFn = unsafe extern "C" fn(
    ctx: *mut RawScanContext,
    message: c_int,
    message_data: *mut c_void,
    user_data: *mut c_void,
) -> c_int;

/// 单遍扫描引擎
///
/// 引擎在 `scan` 内同步、顺序地对每个事件调用 `callback`，并原样传回 `user_data`。
/// 返回 0 表示成功，其他值为引擎自定义的失败状态。
///
/// # Safety
/// 实现方必须保证：传给回调的上下文与事件数据指针在该次回调期间有效，
/// 且布局符合本模块定义；事件之间不得并发回调；所有回调都发生在 `scan` 返回之前。
///
/// 回调可以在其他线程上执行（例如引擎自己的工作线程），
/// 因此 [`crate::CallbackBundle::scan`] 要求调用方回调为 `Send`。
pub unsafe trait Engine {
    fn scan(&mut self, callback: ScanCallbackFn, user_data: *mut c_void) -> c_int;
}

/// 读取以 NUL 结尾的 C 字符串（有损 UTF-8）；空指针返回空串
///
/// # Safety
/// `p` 为空或指向有效的 C 字符串
pub(crate) unsafe fn cstr_lossy(p: *const c_char) -> String {
    if p.is_null() { return String::new(); }
    std::ffi::CStr::from_ptr(p).to_string_lossy().into_owned()
}

/// 将 (指针, 长度) 视为切片；空指针或零长度得到空切片
///
/// # Safety
/// 非空时 `p` 必须指向 `len` 个有效元素，且在 `'a` 内不被修改
pub(crate) unsafe fn slice_or_empty<'a, T>(p: *const T, len: usize) -> &'a [T] {
    if p.is_null() || len == 0 { return &[]; }
    std::slice::from_raw_parts(p, len)
}
