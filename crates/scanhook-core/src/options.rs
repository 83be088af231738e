//! 扫描选项与分发统计
use crate::dispatch::EventKind;

/// 扫描选项
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 单个模块导入载荷的上限（字节）；超过则不满足该导入请求。None 表示不限
    pub max_module_data: Option<usize>,
}

impl ScanOptions {
    pub fn with_max_module_data(mut self, limit: usize) -> Self {
        self.max_module_data = Some(limit);
        self
    }
}

/// 单次扫描的分发统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub rules_matching: usize,
    pub rules_not_matching: usize,
    pub scans_finished: usize,
    pub imports_requested: usize,
    pub modules_imported: usize,
    /// 回调对象不具备对应能力而跳过的事件
    pub skipped: usize,
    /// 未识别的消息码
    pub unknown: usize,
    /// 本次扫描新分配的导入缓冲区数量与字节数
    pub import_buffers: usize,
    pub import_bytes: usize,
}

impl DispatchStats {
    pub(crate) fn count(&mut self, kind: EventKind) {
        match kind {
            EventKind::RuleMatching => self.rules_matching += 1,
            EventKind::RuleNotMatching => self.rules_not_matching += 1,
            EventKind::ScanFinished => self.scans_finished += 1,
            EventKind::ImportModule => self.imports_requested += 1,
            EventKind::ModuleImported => self.modules_imported += 1,
        }
    }

    /// 实际交给回调处理的事件总数
    pub fn delivered(&self) -> usize {
        self.rules_matching + self.rules_not_matching + self.scans_finished + self.imports_requested + self.modules_imported
    }
}
