//! 命中记录器：默认的简单回调
use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use crate::callback::{Control, RuleMatching, ScanCallback};
use crate::handles::{MatchString, MetaValue, Rule, ScanContext};

/// 单条命中规则的拥有型快照，扫描结束后仍可长期保存
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    pub rule: String,
    pub namespace: String,
    pub tags: Vec<String>,
    /// 整数保持引擎原生的 64 位宽度
    pub meta: BTreeMap<String, MetaValue>,
    pub strings: Vec<MatchString>,
}

impl MatchRecord {
    /// 从规则句柄生成快照
    pub fn capture(ctx: &ScanContext<'_>, rule: &Rule<'_>) -> Self {
        Self {
            rule: rule.identifier(),
            namespace: rule.namespace(),
            tags: rule.tags(),
            meta: rule.metas().into_iter().collect(),
            strings: rule.match_strings(ctx),
        }
    }
}

/// 只实现“规则命中”能力，按引擎报告顺序累积命中记录；从不主动中止扫描
#[derive(Debug, Default, Clone)]
pub struct MatchRecorder {
    records: Vec<MatchRecord>,
}

impl MatchRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MatchRecord> {
        self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl RuleMatching for MatchRecorder {
    fn rule_matching(&mut self, ctx: &ScanContext<'_>, rule: &Rule<'_>) -> Result<Control> {
        self.records.push(MatchRecord::capture(ctx, rule));
        Ok(Control::Continue)
    }
}

impl ScanCallback for MatchRecorder {
    fn as_rule_matching(&mut self) -> Option<&mut dyn RuleMatching> { Some(self) }
}

/// 将命中记录以 JSON 数组流式写入 `out`（保持记录顺序）
pub fn write_json(records: &[MatchRecord], out: &mut dyn Write) -> Result<()> {
    write!(out, "[")?;
    let mut first = true;
    for r in records {
        if !first { write!(out, ",")?; } else { first = false; }
        serde_json::to_writer(&mut *out, r)?;
    }
    write!(out, "]")?;
    Ok(())
}
