//! 扫描脚本（TOML）：按顺序列出引擎要发出的事件及其数据
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Result};
use scanhook_core::{EventKind, MetaValue};
use serde::Deserialize;

/// 事件类型：已知名称或任意消息码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum KindSpec {
    Named(NamedKind),
    Raw(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamedKind {
    RuleMatching,
    RuleNotMatching,
    ScanFinished,
    ImportModule,
    ModuleImported,
}

impl From<NamedKind> for EventKind {
    fn from(k: NamedKind) -> Self {
        match k {
            NamedKind::RuleMatching => EventKind::RuleMatching,
            NamedKind::RuleNotMatching => EventKind::RuleNotMatching,
            NamedKind::ScanFinished => EventKind::ScanFinished,
            NamedKind::ImportModule => EventKind::ImportModule,
            NamedKind::ModuleImported => EventKind::ModuleImported,
        }
    }
}

impl KindSpec {
    pub fn code(self) -> i32 {
        match self {
            KindSpec::Named(k) => EventKind::from(k).code(),
            KindSpec::Raw(c) => c,
        }
    }

    /// 只有具名事件才携带事件数据；Raw 码以空数据发出
    pub fn named(self) -> Option<EventKind> {
        match self {
            KindSpec::Named(k) => Some(k.into()),
            KindSpec::Raw(_) => None,
        }
    }
}

/// 单次字符串命中
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MatchSpec {
    #[serde(default)]
    pub base: i64,
    pub offset: i64,
    #[serde(default)]
    pub data: String,
    /// 命中长度；缺省为 data 长度（可大于 data 以模拟截断）
    #[serde(default)]
    pub length: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StringSpec {
    pub name: String,
    #[serde(default)]
    pub matches: Vec<MatchSpec>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// 单个事件
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventSpec {
    pub kind: KindSpec,
    #[serde(default)]
    pub rule: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: BTreeMap<String, MetaValue>,
    #[serde(default)]
    pub strings: Vec<StringSpec>,
    /// 导入请求 / 已导入事件的模块名
    #[serde(default)]
    pub module: String,
    /// 已导入事件的对象类型码（缺省为 structure）
    #[serde(default)]
    pub object_type: Option<i8>,
}

impl EventSpec {
    fn with_kind(kind: KindSpec) -> Self {
        Self {
            kind,
            rule: String::new(),
            namespace: default_namespace(),
            tags: Vec::new(),
            meta: BTreeMap::new(),
            strings: Vec::new(),
            module: String::new(),
            object_type: None,
        }
    }

    pub fn rule_matching(rule: &str) -> Self {
        Self { rule: rule.to_string(), ..Self::with_kind(KindSpec::Named(NamedKind::RuleMatching)) }
    }

    pub fn rule_not_matching(rule: &str) -> Self {
        Self { rule: rule.to_string(), ..Self::with_kind(KindSpec::Named(NamedKind::RuleNotMatching)) }
    }

    pub fn scan_finished() -> Self {
        Self::with_kind(KindSpec::Named(NamedKind::ScanFinished))
    }

    pub fn import_module(module: &str) -> Self {
        Self { module: module.to_string(), ..Self::with_kind(KindSpec::Named(NamedKind::ImportModule)) }
    }

    pub fn module_imported(module: &str) -> Self {
        Self { module: module.to_string(), ..Self::with_kind(KindSpec::Named(NamedKind::ModuleImported)) }
    }

    /// 任意消息码，不携带事件数据
    pub fn raw(code: i32) -> Self {
        Self::with_kind(KindSpec::Raw(code))
    }

    pub fn namespace(mut self, ns: &str) -> Self {
        self.namespace = ns.to_string();
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    /// 为字符串 `name` 追加一次命中
    pub fn string_match(mut self, name: &str, offset: i64, data: &str) -> Self {
        let m = MatchSpec { base: 0, offset, data: data.to_string(), length: None };
        match self.strings.iter_mut().find(|s| s.name == name) {
            Some(s) => s.matches.push(m),
            None => self.strings.push(StringSpec { name: name.to_string(), matches: vec![m] }),
        }
        self
    }

    fn strings_in(&self) -> Vec<&str> {
        let mut v = vec![self.rule.as_str(), self.namespace.as_str(), self.module.as_str()];
        v.extend(self.tags.iter().map(|s| s.as_str()));
        for (k, val) in &self.meta {
            v.push(k);
            if let MetaValue::String(s) = val { v.push(s); }
        }
        v.extend(self.strings.iter().map(|s| s.name.as_str()));
        v
    }
}

/// 扫描脚本
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Script {
    #[serde(default, rename = "event")]
    pub events: Vec<EventSpec>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, event: EventSpec) -> Self {
        self.events.push(event);
        self
    }

    /// 从 TOML 文本解析并校验
    pub fn from_toml(txt: &str) -> Result<Self> {
        let script: Script = toml::from_str(txt)?;
        script.validate()?;
        Ok(script)
    }

    /// 校验：规则事件需有规则名、模块事件需有模块名、所有文本不得含 NUL
    pub fn validate(&self) -> Result<()> {
        for (i, e) in self.events.iter().enumerate() {
            match e.kind.named() {
                Some(EventKind::RuleMatching | EventKind::RuleNotMatching) if e.rule.is_empty() => {
                    bail!("event #{i}: rule event without `rule`")
                }
                Some(EventKind::ImportModule | EventKind::ModuleImported) if e.module.is_empty() => {
                    bail!("event #{i}: module event without `module`")
                }
                _ => {}
            }
            if let Some(s) = e.strings_in().into_iter().find(|s| s.contains('\0')) {
                bail!("event #{i}: text contains NUL byte: {s:?}");
            }
        }
        Ok(())
    }
}

/// 从 TOML 文件加载扫描脚本
pub fn load_script(path: &Path) -> Result<Script> {
    let txt = std::fs::read_to_string(path)?;
    Script::from_toml(&txt)
}
