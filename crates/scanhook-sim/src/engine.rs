//! 脚本驱动的模拟引擎
//!
//! 不做任何匹配：按脚本顺序构造 C 布局的事件数据，经回调逐个发出，
//! 遇到非 CONTINUE 判定即停止。导入请求得到的数据在事件之后、以及扫描末尾
//! 各读取一次，用于模拟引擎在整个扫描期间持有该指针。
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use anyhow::Result;
use scanhook_core::abi::{
    RawMatch, RawMatchList, RawMeta, RawModuleImport, RawObject, RawRule, RawScanContext, RawString,
    ScanCallbackFn, META_TYPE_BOOLEAN, META_TYPE_INTEGER, META_TYPE_STRING,
};
use scanhook_core::{Engine, EventKind, MetaValue, Verdict};
use tracing::debug;

use crate::script::{EventSpec, Script};

/// 扫描成功（包括被回调中止）
pub const STATUS_SUCCESS: c_int = 0;
/// 回调返回 ERROR 或非法判定码
pub const STATUS_CALLBACK_ERROR: c_int = 30;

/// 单个已发出事件及其判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub code: c_int,
    /// 非法判定码为 None
    pub verdict: Option<Verdict>,
}

/// 回调注入的模块数据（引擎侧读到的内容）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedData {
    pub module: String,
    pub data: Vec<u8>,
}

/// 扫描期间持有的导入指针
struct Retained {
    ptr: *const u8,
    len: usize,
    copy: Vec<u8>,
}

pub struct ScriptedEngine {
    script: Script,
    emissions: Vec<Emission>,
    imports: Vec<ImportedData>,
    retained_intact: bool,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Result<Self> {
        script.validate()?;
        Ok(Self { script, emissions: Vec::new(), imports: Vec::new(), retained_intact: true })
    }

    /// 最近一次扫描发出的事件（按顺序）
    pub fn emissions(&self) -> &[Emission] {
        &self.emissions
    }

    pub fn verdicts(&self) -> Vec<Option<Verdict>> {
        self.emissions.iter().map(|e| e.verdict).collect()
    }

    /// 最近一次扫描中引擎收到的模块数据
    pub fn imports(&self) -> &[ImportedData] {
        &self.imports
    }

    /// 扫描末尾重读导入指针时，内容是否与事件刚结束时一致
    pub fn retained_intact(&self) -> bool {
        self.retained_intact
    }
}

unsafe impl Engine for ScriptedEngine {
    fn scan(&mut self, callback: ScanCallbackFn, user_data: *mut c_void) -> c_int {
        self.emissions.clear();
        self.imports.clear();
        let mut retained: Vec<Retained> = Vec::new();
        let mut status = STATUS_SUCCESS;

        for spec in &self.script.events {
            let code = spec.kind.code();
            let raw = unsafe { emit(spec, callback, user_data, &mut retained, &mut self.imports) };
            let verdict = Verdict::from_code(raw);
            debug!(code, ?verdict, "scripted event emitted");
            self.emissions.push(Emission { code, verdict });
            match verdict {
                Some(Verdict::Continue) => continue,
                Some(Verdict::Abort) => break,
                Some(Verdict::Error) | None => {
                    status = STATUS_CALLBACK_ERROR;
                    break;
                }
            }
        }

        // 扫描结束前再读一次：桥接层必须保证缓冲区仍然有效
        self.retained_intact = retained.iter().all(|r| {
            let now = unsafe { std::slice::from_raw_parts(r.ptr, r.len) };
            now == r.copy.as_slice()
        });
        status
    }
}

/// 构造单个事件的数据并调用回调，返回原始判定码
///
/// # Safety
/// `callback` 与 `user_data` 来自桥接层
unsafe fn emit(
    spec: &EventSpec,
    callback: ScanCallbackFn,
    user_data: *mut c_void,
    retained: &mut Vec<Retained>,
    imports: &mut Vec<ImportedData>,
) -> c_int {
    let code = spec.kind.code();
    let mut empty_ctx = RawScanContext { matches: ptr::null(), matches_len: 0 };
    match spec.kind.named() {
        Some(EventKind::RuleMatching | EventKind::RuleNotMatching) => {
            let mut owned = OwnedRule::build(spec);
            let data = &mut owned.rule as *mut RawRule as *mut c_void;
            callback(&mut owned.ctx, code, data, user_data)
        }
        Some(EventKind::ScanFinished) => callback(&mut empty_ctx, code, ptr::null_mut(), user_data),
        Some(EventKind::ImportModule) => {
            let name = cstring(&spec.module);
            let mut import = RawModuleImport { module_name: name.as_ptr(), module_data: ptr::null_mut(), module_data_size: 0 };
            let verdict = callback(&mut empty_ctx, code, &mut import as *mut RawModuleImport as *mut c_void, user_data);
            if !import.module_data.is_null() && import.module_data_size > 0 {
                let ptr = import.module_data as *const u8;
                let copy = std::slice::from_raw_parts(ptr, import.module_data_size).to_vec();
                imports.push(ImportedData { module: spec.module.clone(), data: copy.clone() });
                retained.push(Retained { ptr, len: import.module_data_size, copy });
            }
            verdict
        }
        Some(EventKind::ModuleImported) => {
            let name = cstring(&spec.module);
            let mut object = RawObject { identifier: name.as_ptr(), object_type: spec.object_type.unwrap_or(3) };
            callback(&mut empty_ctx, code, &mut object as *mut RawObject as *mut c_void, user_data)
        }
        None => callback(&mut empty_ctx, code, ptr::null_mut(), user_data),
    }
}

/// 脚本已校验不含 NUL；此处兜底为空串
fn cstring(s: &str) -> CString {
    CString::new(s).unwrap_or_default()
}

/// 持有 C 字符串，返回稳定指针
#[derive(Default)]
struct CStrings(Vec<CString>);

impl CStrings {
    fn intern(&mut self, s: &str) -> *const c_char {
        let c = cstring(s);
        // CString 的堆内存不随 Vec 扩容移动
        let p = c.as_ptr();
        self.0.push(c);
        p
    }
}

/// 规则事件的完整 C 布局数据；所有指针都指向本结构持有的堆内存
struct OwnedRule {
    _strings: CStrings,
    _tags: Vec<*const c_char>,
    _metas: Vec<RawMeta>,
    _decls: Vec<RawString>,
    _data: Vec<Vec<u8>>,
    _matches: Vec<Vec<RawMatch>>,
    _lists: Vec<RawMatchList>,
    rule: RawRule,
    ctx: RawScanContext,
}

impl OwnedRule {
    fn build(spec: &EventSpec) -> Self {
        let mut strings = CStrings::default();
        let identifier = strings.intern(&spec.rule);
        let ns = strings.intern(&spec.namespace);
        let tags: Vec<*const c_char> = spec.tags.iter().map(|t| strings.intern(t)).collect();

        let metas: Vec<RawMeta> = spec
            .meta
            .iter()
            .map(|(k, v)| {
                let identifier = strings.intern(k);
                match v {
                    MetaValue::Integer(i) => RawMeta { identifier, kind: META_TYPE_INTEGER, integer: *i, string: ptr::null() },
                    MetaValue::Boolean(b) => RawMeta { identifier, kind: META_TYPE_BOOLEAN, integer: i64::from(*b), string: ptr::null() },
                    MetaValue::String(s) => RawMeta { identifier, kind: META_TYPE_STRING, integer: 0, string: strings.intern(s) },
                }
            })
            .collect();

        // 每个声明的字符串占命中表的一个槽位
        let decls: Vec<RawString> = spec
            .strings
            .iter()
            .enumerate()
            .map(|(index, s)| RawString { identifier: strings.intern(&s.name), index })
            .collect();
        let data: Vec<Vec<u8>> = spec
            .strings
            .iter()
            .flat_map(|s| s.matches.iter().map(|m| m.data.as_bytes().to_vec()))
            .collect();

        let mut matches: Vec<Vec<RawMatch>> = Vec::with_capacity(spec.strings.len());
        let mut next = 0usize;
        for s in &spec.strings {
            let mut list = Vec::with_capacity(s.matches.len());
            for m in &s.matches {
                let bytes = &data[next];
                next += 1;
                let data_length = bytes.len() as i32;
                list.push(RawMatch {
                    base: m.base,
                    offset: m.offset,
                    match_length: m.length.unwrap_or(data_length),
                    data: bytes.as_ptr(),
                    data_length,
                });
            }
            matches.push(list);
        }
        let lists: Vec<RawMatchList> = matches.iter().map(|l| RawMatchList { matches: l.as_ptr(), len: l.len() }).collect();

        let rule = RawRule {
            identifier,
            ns,
            tags: tags.as_ptr(),
            tags_len: tags.len(),
            metas: metas.as_ptr(),
            metas_len: metas.len(),
            strings: decls.as_ptr(),
            strings_len: decls.len(),
        };
        let ctx = RawScanContext { matches: lists.as_ptr(), matches_len: lists.len() };

        Self {
            _strings: strings,
            _tags: tags,
            _metas: metas,
            _decls: decls,
            _data: data,
            _matches: matches,
            _lists: lists,
            rule,
            ctx,
        }
    }
}
