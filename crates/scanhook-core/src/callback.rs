//! 回调能力集合
//!
//! 调用方的回调对象（bundle）可以独立实现五种能力中的任意子集。
//! 能力通过 `ScanCallback` 的 `as_*` 访问器暴露，注册时探测一次得到 `Capabilities`，
//! 分发时只查位集，不再逐事件做类型判断。
//!
//! 能力方法应尽快返回：引擎没有超时机制，慢回调会拖住整个扫描，这由调用方负责。
use anyhow::Result;

use crate::handles::{Object, Rule, ScanContext};

/// 回调对扫描流程的决定（错误通过 `Err` 表达）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Control {
    #[default]
    Continue,
    Abort,
}

impl Control {
    pub fn abort_if(cond: bool) -> Self {
        if cond { Control::Abort } else { Control::Continue }
    }
}

/// 模块导入请求的应答：载荷 + 流程决定
///
/// 空载荷表示不满足该导入请求，但 `control` 仍然生效。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleReply {
    pub data: Vec<u8>,
    pub control: Control,
}

impl ModuleReply {
    pub fn with_data(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into(), control: Control::Continue }
    }

    /// 不提供数据，继续扫描
    pub fn unsatisfied() -> Self {
        Self::default()
    }

    pub fn control(mut self, control: Control) -> Self {
        self.control = control;
        self
    }
}

/// 规则命中
pub trait RuleMatching {
    fn rule_matching(&mut self, ctx: &ScanContext<'_>, rule: &Rule<'_>) -> Result<Control>;
}

/// 规则未命中
pub trait RuleNotMatching {
    fn rule_not_matching(&mut self, ctx: &ScanContext<'_>, rule: &Rule<'_>) -> Result<Control>;
}

/// 扫描结束
pub trait ScanFinished {
    fn scan_finished(&mut self, ctx: &ScanContext<'_>) -> Result<Control>;
}

/// 为模块提供导入数据
pub trait ModuleImport {
    fn import_module(&mut self, ctx: &ScanContext<'_>, module: &str) -> Result<ModuleReply>;
}

/// 模块导入完成，可用于释放 `ModuleImport` 期间占用的资源
pub trait ModuleImported {
    fn module_imported(&mut self, ctx: &ScanContext<'_>, object: &Object<'_>) -> Result<Control>;
}

/// 回调对象：按需覆盖访问器来声明自己具备的能力
pub trait ScanCallback {
    fn as_rule_matching(&mut self) -> Option<&mut dyn RuleMatching> { None }
    fn as_rule_not_matching(&mut self) -> Option<&mut dyn RuleNotMatching> { None }
    fn as_scan_finished(&mut self) -> Option<&mut dyn ScanFinished> { None }
    fn as_module_import(&mut self) -> Option<&mut dyn ModuleImport> { None }
    fn as_module_imported(&mut self) -> Option<&mut dyn ModuleImported> { None }
}

impl<T: ScanCallback + ?Sized> ScanCallback for Box<T> {
    fn as_rule_matching(&mut self) -> Option<&mut dyn RuleMatching> { (**self).as_rule_matching() }
    fn as_rule_not_matching(&mut self) -> Option<&mut dyn RuleNotMatching> { (**self).as_rule_not_matching() }
    fn as_scan_finished(&mut self) -> Option<&mut dyn ScanFinished> { (**self).as_scan_finished() }
    fn as_module_import(&mut self) -> Option<&mut dyn ModuleImport> { (**self).as_module_import() }
    fn as_module_imported(&mut self) -> Option<&mut dyn ModuleImported> { (**self).as_module_imported() }
}

/// 能力位集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const RULE_MATCHING: Self = Self(1 << 0);
    pub const RULE_NOT_MATCHING: Self = Self(1 << 1);
    pub const SCAN_FINISHED: Self = Self(1 << 2);
    pub const MODULE_IMPORT: Self = Self(1 << 3);
    pub const MODULE_IMPORTED: Self = Self(1 << 4);

    /// 探测回调对象实现了哪些能力
    pub fn probe<C: ScanCallback + ?Sized>(callback: &mut C) -> Self {
        let mut caps = Self::NONE;
        if callback.as_rule_matching().is_some() { caps = caps | Self::RULE_MATCHING; }
        if callback.as_rule_not_matching().is_some() { caps = caps | Self::RULE_NOT_MATCHING; }
        if callback.as_scan_finished().is_some() { caps = caps | Self::SCAN_FINISHED; }
        if callback.as_module_import().is_some() { caps = caps | Self::MODULE_IMPORT; }
        if callback.as_module_imported().is_some() { caps = caps | Self::MODULE_IMPORTED; }
        caps
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}
