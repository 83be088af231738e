//! 扫描事件分发桥
//!
//! 位于单遍内容扫描引擎与调用方回调逻辑之间：
//! - 把引擎发出的五类事件翻译为对回调对象可选能力的调用；
//! - 把调用方的决定（继续 / 中止 / 错误）翻译回引擎期望的判定码；
//! - 管理模块导入载荷的原生缓冲区，保证其在回调对象关闭或析构时恰好释放一次。
//!
//! 引擎本身（规则匹配、模块结构）不在此库范围内，只通过 `abi` 中的 C 布局交互。

pub mod abi;
mod buffers;
mod callback;
mod dispatch;
mod error;
mod handles;
mod options;
mod recorder;
mod registry;
mod scan;

pub use abi::Engine;
pub use buffers::live_import_buffers;
pub use callback::{
    Capabilities, Control, ModuleImport, ModuleImported, ModuleReply, RuleMatching, RuleNotMatching, ScanCallback,
    ScanFinished,
};
pub use dispatch::{scan_callback, EventKind, Verdict};
pub use error::{BridgeError, BridgeResult};
pub use handles::{MatchString, MetaValue, Object, ObjectType, Rule, ScanContext};
pub use options::{DispatchStats, ScanOptions};
pub use recorder::{write_json, MatchRecord, MatchRecorder};
pub use registry::live_registrations;
pub use scan::{scan_matches, CallbackBundle, ScanSummary};
