//! 脚本驱动的模拟扫描引擎
//!
//! 通过与原生引擎完全相同的 C 回调 ABI 驱动 `scanhook-core`，
//! 事件序列来自 TOML 脚本或代码构造，不包含任何规则匹配逻辑。

mod engine;
mod script;

pub use engine::{Emission, ImportedData, ScriptedEngine, STATUS_CALLBACK_ERROR, STATUS_SUCCESS};
pub use script::{load_script, EventSpec, KindSpec, MatchSpec, NamedKind, Script, StringSpec};
