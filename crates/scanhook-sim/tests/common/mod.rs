#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use scanhook_core::{
    Control, EventKind, ModuleImport, ModuleImported, ModuleReply, Object, Rule, RuleMatching, RuleNotMatching,
    ScanCallback, ScanContext, ScanFinished,
};

/// 支持 RUST_LOG 控制测试日志
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder().with_env_filter(env_filter).with_test_writer().finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 实现全部五种能力，按顺序记录每次调用
#[derive(Default)]
pub struct Journal {
    pub calls: Vec<(EventKind, String)>,
    pub fail_on: Option<EventKind>,
    pub abort_on: Option<EventKind>,
    pub module_data: HashMap<String, Vec<u8>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(kind: EventKind) -> Self {
        Self { fail_on: Some(kind), ..Self::default() }
    }

    pub fn aborting_on(kind: EventKind) -> Self {
        Self { abort_on: Some(kind), ..Self::default() }
    }

    pub fn serving(module: &str, data: &[u8]) -> Self {
        let mut j = Self::default();
        j.module_data.insert(module.to_string(), data.to_vec());
        j
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.calls.iter().map(|(k, _)| *k).collect()
    }

    fn reply(&mut self, kind: EventKind, subject: String) -> Result<Control> {
        self.calls.push((kind, subject.clone()));
        if self.fail_on == Some(kind) {
            return Err(anyhow!("{kind} failed for {subject:?}"));
        }
        Ok(Control::abort_if(self.abort_on == Some(kind)))
    }
}

impl RuleMatching for Journal {
    fn rule_matching(&mut self, _ctx: &ScanContext<'_>, rule: &Rule<'_>) -> Result<Control> {
        self.reply(EventKind::RuleMatching, rule.identifier())
    }
}

impl RuleNotMatching for Journal {
    fn rule_not_matching(&mut self, _ctx: &ScanContext<'_>, rule: &Rule<'_>) -> Result<Control> {
        self.reply(EventKind::RuleNotMatching, rule.identifier())
    }
}

impl ScanFinished for Journal {
    fn scan_finished(&mut self, _ctx: &ScanContext<'_>) -> Result<Control> {
        self.reply(EventKind::ScanFinished, String::new())
    }
}

impl ModuleImport for Journal {
    fn import_module(&mut self, _ctx: &ScanContext<'_>, module: &str) -> Result<ModuleReply> {
        let control = self.reply(EventKind::ImportModule, module.to_string())?;
        let data = self.module_data.get(module).cloned().unwrap_or_default();
        Ok(ModuleReply::with_data(data).control(control))
    }
}

impl ModuleImported for Journal {
    fn module_imported(&mut self, _ctx: &ScanContext<'_>, object: &Object<'_>) -> Result<Control> {
        self.reply(EventKind::ModuleImported, object.identifier())
    }
}

impl ScanCallback for Journal {
    fn as_rule_matching(&mut self) -> Option<&mut dyn RuleMatching> { Some(self) }
    fn as_rule_not_matching(&mut self) -> Option<&mut dyn RuleNotMatching> { Some(self) }
    fn as_scan_finished(&mut self) -> Option<&mut dyn ScanFinished> { Some(self) }
    fn as_module_import(&mut self) -> Option<&mut dyn ModuleImport> { Some(self) }
    fn as_module_imported(&mut self) -> Option<&mut dyn ModuleImported> { Some(self) }
}
