//! 事件期句柄：ScanContext / Rule / Object
//!
//! 三者都是引擎内部数据的借用视图，生命周期绑定在单次回调上；
//! 不实现 Clone/Copy，能力方法以匿名生命周期的引用接收，因而无法被保存到回调之外。
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::abi::{
    cstr_lossy, slice_or_empty, RawMatch, RawMeta, RawObject, RawRule, RawScanContext,
    META_TYPE_BOOLEAN, META_TYPE_INTEGER, META_TYPE_STRING,
};

/// 当前扫描状态的句柄（仅在本次事件回调内有效）
pub struct ScanContext<'a> {
    raw: *mut RawScanContext,
    _event: PhantomData<&'a mut RawScanContext>,
}

impl<'a> ScanContext<'a> {
    /// # Safety
    /// `raw` 为空或在 `'a` 内指向有效的扫描上下文
    pub(crate) unsafe fn from_raw(raw: *mut RawScanContext) -> Self {
        Self { raw, _event: PhantomData }
    }

    /// 指定字符串索引的命中列表
    fn matches_for(&self, index: usize) -> &[RawMatch] {
        if self.raw.is_null() { return &[]; }
        // SAFETY: from_raw 的约定保证上下文及其命中表在事件期内有效
        unsafe {
            let ctx = &*self.raw;
            let lists = slice_or_empty(ctx.matches, ctx.matches_len);
            match lists.get(index) {
                Some(list) => slice_or_empty(list.matches, list.len),
                None => &[],
            }
        }
    }
}

/// 元数据取值，保持引擎的原生宽度（64 位有符号整数）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl MetaValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self { MetaValue::Integer(i) => Some(*i), _ => None }
    }

    /// 便捷收窄：超出 i32 范围时返回 None，不做截断
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|i| i32::try_from(i).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { MetaValue::Boolean(b) => Some(*b), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { MetaValue::String(s) => Some(s), _ => None }
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self { MetaValue::Integer(v) }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self { MetaValue::Boolean(v) }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self { MetaValue::String(v.to_string()) }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self { MetaValue::String(v) }
}

/// 单次字符串命中的拥有型快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchString {
    pub name: String,
    pub base: u64,
    pub offset: u64,
    pub data: Vec<u8>,
}

/// 规则句柄（命中 / 未命中事件）
pub struct Rule<'a> {
    raw: &'a RawRule,
}

impl<'a> Rule<'a> {
    /// # Safety
    /// `raw` 为空或在 `'a` 内指向有效的规则
    pub(crate) unsafe fn from_raw(raw: *const RawRule) -> Option<Self> {
        raw.as_ref().map(|raw| Self { raw })
    }

    pub fn identifier(&self) -> String {
        // SAFETY: 规则字段由引擎保证在事件期内有效
        unsafe { cstr_lossy(self.raw.identifier) }
    }

    pub fn namespace(&self) -> String {
        unsafe { cstr_lossy(self.raw.ns) }
    }

    /// 标签（保持引擎给出的顺序）
    pub fn tags(&self) -> Vec<String> {
        unsafe {
            slice_or_empty(self.raw.tags, self.raw.tags_len)
                .iter()
                .map(|&t| cstr_lossy(t))
                .collect()
        }
    }

    /// 元数据（保持声明顺序）；未知类型码的条目被跳过
    pub fn metas(&self) -> Vec<(String, MetaValue)> {
        let raw = unsafe { slice_or_empty(self.raw.metas, self.raw.metas_len) };
        raw.iter().filter_map(decode_meta).collect()
    }

    /// 按名称取元数据；重名时取最后一条
    pub fn meta(&self, name: &str) -> Option<MetaValue> {
        self.metas().into_iter().rev().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// 命中字符串明细（按需从扫描上下文计算，有开销）
    pub fn match_strings(&self, ctx: &ScanContext<'_>) -> Vec<MatchString> {
        let strings = unsafe { slice_or_empty(self.raw.strings, self.raw.strings_len) };
        let mut out = Vec::new();
        for s in strings {
            let name = unsafe { cstr_lossy(s.identifier) };
            for m in ctx.matches_for(s.index) {
                let len = usize::try_from(m.data_length).unwrap_or(0);
                let data = unsafe { slice_or_empty(m.data, len) }.to_vec();
                out.push(MatchString { name: name.clone(), base: m.base as u64, offset: m.offset as u64, data });
            }
        }
        out
    }
}

fn decode_meta(m: &RawMeta) -> Option<(String, MetaValue)> {
    // SAFETY: 元数据指针随规则一起在事件期内有效
    let name = unsafe { cstr_lossy(m.identifier) };
    let value = match m.kind {
        META_TYPE_INTEGER => MetaValue::Integer(m.integer),
        META_TYPE_BOOLEAN => MetaValue::Boolean(m.integer != 0),
        META_TYPE_STRING => MetaValue::String(unsafe { cstr_lossy(m.string) }),
        other => {
            tracing::debug!(meta = %name, kind = other, "skipping meta with unknown type");
            return None;
        }
    };
    Some((name, value))
}

/// 模块数据树中的对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Integer,
    String,
    Structure,
    Array,
    Function,
    Dictionary,
    Float,
    Unknown(i8),
}

impl From<i8> for ObjectType {
    fn from(code: i8) -> Self {
        match code {
            1 => ObjectType::Integer,
            2 => ObjectType::String,
            3 => ObjectType::Structure,
            4 => ObjectType::Array,
            5 => ObjectType::Function,
            6 => ObjectType::Dictionary,
            7 => ObjectType::Float,
            other => ObjectType::Unknown(other),
        }
    }
}

/// 已导入模块的数据树句柄（仅在“模块已导入”事件内有效）
pub struct Object<'a> {
    raw: &'a RawObject,
}

impl<'a> Object<'a> {
    /// # Safety
    /// `raw` 为空或在 `'a` 内指向有效的对象
    pub(crate) unsafe fn from_raw(raw: *const RawObject) -> Option<Self> {
        raw.as_ref().map(|raw| Self { raw })
    }

    pub fn identifier(&self) -> String {
        unsafe { cstr_lossy(self.raw.identifier) }
    }

    pub fn object_type(&self) -> ObjectType {
        ObjectType::from(self.raw.object_type)
    }
}
