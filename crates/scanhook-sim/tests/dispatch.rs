mod common;

use anyhow::Result;
use common::{init_tracing, Journal};
use scanhook_core::{
    BridgeError, CallbackBundle, Capabilities, Control, EventKind, MatchRecorder, Rule, RuleNotMatching,
    ScanCallback, ScanContext, ScanFinished, Verdict,
};
use scanhook_sim::{EventSpec, Script, ScriptedEngine, STATUS_SUCCESS};

fn mixed_script() -> Script {
    Script::new()
        .push(EventSpec::import_module("pe"))
        .push(EventSpec::module_imported("pe"))
        .push(EventSpec::rule_matching("r1"))
        .push(EventSpec::rule_not_matching("r2"))
        .push(EventSpec::rule_matching("r3"))
        .push(EventSpec::scan_finished())
}

#[test]
fn full_bundle_sees_every_event_in_order() {
    init_tracing();
    let mut engine = ScriptedEngine::new(mixed_script()).unwrap();
    let mut bundle = CallbackBundle::new(Journal::new());
    let summary = bundle.scan(&mut engine).unwrap();

    assert_eq!(
        bundle.callback().calls,
        vec![
            (EventKind::ImportModule, "pe".to_string()),
            (EventKind::ModuleImported, "pe".to_string()),
            (EventKind::RuleMatching, "r1".to_string()),
            (EventKind::RuleNotMatching, "r2".to_string()),
            (EventKind::RuleMatching, "r3".to_string()),
            (EventKind::ScanFinished, String::new()),
        ]
    );
    assert!(engine.verdicts().iter().all(|v| *v == Some(Verdict::Continue)));
    assert!(!summary.aborted);
    assert_eq!(summary.stats.rules_matching, 2);
    assert_eq!(summary.stats.delivered(), 6);
    assert_eq!(summary.stats.skipped, 0);
}

#[test]
fn missing_capabilities_are_skipped_with_continue() {
    init_tracing();
    let mut engine = ScriptedEngine::new(mixed_script()).unwrap();
    let mut bundle = CallbackBundle::new(MatchRecorder::new());
    let summary = bundle.scan(&mut engine).unwrap();

    assert_eq!(engine.emissions().len(), 6);
    assert!(engine.verdicts().iter().all(|v| *v == Some(Verdict::Continue)));
    assert_eq!(summary.stats.rules_matching, 2);
    assert_eq!(summary.stats.skipped, 4);
    let rules: Vec<&str> = bundle.callback().records().iter().map(|r| r.rule.as_str()).collect();
    assert_eq!(rules, vec!["r1", "r3"]);
}

struct NotMatchedOnly(Vec<String>);

impl RuleNotMatching for NotMatchedOnly {
    fn rule_not_matching(&mut self, _ctx: &ScanContext<'_>, rule: &Rule<'_>) -> Result<Control> {
        self.0.push(rule.identifier());
        Ok(Control::Continue)
    }
}

impl ScanCallback for NotMatchedOnly {
    fn as_rule_not_matching(&mut self) -> Option<&mut dyn RuleNotMatching> { Some(self) }
}

#[test]
fn single_capability_bundle_is_invoked_only_for_its_kind() {
    let mut engine = ScriptedEngine::new(mixed_script()).unwrap();
    let mut bundle = CallbackBundle::new(NotMatchedOnly(Vec::new()));
    assert_eq!(bundle.capabilities(), Capabilities::RULE_NOT_MATCHING);
    bundle.scan(&mut engine).unwrap();
    assert_eq!(bundle.callback().0, vec!["r2".to_string()]);
}

#[test]
fn error_verdict_for_every_event_kind() {
    init_tracing();
    for kind in [
        EventKind::ImportModule,
        EventKind::ModuleImported,
        EventKind::RuleMatching,
        EventKind::RuleNotMatching,
        EventKind::ScanFinished,
    ] {
        let mut engine = ScriptedEngine::new(mixed_script()).unwrap();
        let mut bundle = CallbackBundle::new(Journal::failing_on(kind));
        let res = bundle.scan(&mut engine);

        let last = engine.emissions().last().unwrap();
        assert_eq!(last.code, kind.code(), "engine should stop at the failing {kind}");
        assert_eq!(last.verdict, Some(Verdict::Error));
        match res {
            Err(BridgeError::Callback(err)) => assert!(err.to_string().starts_with(kind.name())),
            other => panic!("{kind}: unexpected result {other:?}"),
        }
    }
}

#[test]
fn abort_verdict_stops_the_scan_without_error() {
    let mut engine = ScriptedEngine::new(mixed_script()).unwrap();
    let mut bundle = CallbackBundle::new(Journal::aborting_on(EventKind::RuleNotMatching));
    let summary = bundle.scan(&mut engine).unwrap();

    assert!(summary.aborted);
    assert_eq!(engine.emissions().len(), 4);
    assert_eq!(engine.verdicts().last(), Some(&Some(Verdict::Abort)));
    assert_eq!(bundle.callback().kinds().last(), Some(&EventKind::RuleNotMatching));
}

#[test]
fn first_error_wins_and_scan_can_be_rerun() {
    let script = Script::new().push(EventSpec::rule_matching("a")).push(EventSpec::scan_finished());
    let mut engine = ScriptedEngine::new(script).unwrap();
    let mut bundle = CallbackBundle::new(Journal::failing_on(EventKind::RuleMatching));
    assert!(bundle.scan(&mut engine).is_err());

    // 同一回调对象换成不出错的配置后再次扫描，上次的错误不应残留
    bundle.callback_mut().fail_on = None;
    let summary = bundle.scan(&mut engine).unwrap();
    assert_eq!(summary.stats.delivered(), 2);
    assert_eq!(engine.emissions().len(), 2);
}

#[test]
fn unknown_event_codes_continue() {
    let script = Script::new()
        .push(EventSpec::raw(6))
        .push(EventSpec::rule_matching("a"))
        .push(EventSpec::raw(-1))
        .push(EventSpec::scan_finished());
    let mut engine = ScriptedEngine::new(script).unwrap();
    let mut bundle = CallbackBundle::new(Journal::new());
    let summary = bundle.scan(&mut engine).unwrap();

    assert_eq!(summary.stats.unknown, 2);
    assert_eq!(bundle.callback().kinds(), vec![EventKind::RuleMatching, EventKind::ScanFinished]);
    assert!(engine.verdicts().iter().all(|v| *v == Some(Verdict::Continue)));
}

#[test]
fn known_event_without_data_is_an_error() {
    // 规则事件的消息码但不附带规则数据
    let script = Script::new().push(EventSpec::raw(EventKind::RuleMatching.code()));
    let mut engine = ScriptedEngine::new(script).unwrap();
    let mut bundle = CallbackBundle::new(Journal::new());
    let res = bundle.scan(&mut engine);

    assert_eq!(engine.verdicts(), vec![Some(Verdict::Error)]);
    assert!(matches!(res, Err(BridgeError::MissingEventData { event: EventKind::RuleMatching })));
    assert!(bundle.callback().calls.is_empty());
}

#[test]
fn stale_token_fails_the_engine_scan() {
    let mut engine = ScriptedEngine::new(mixed_script()).unwrap();
    let mut bundle = CallbackBundle::new(Journal::new());
    bundle.scan(&mut engine).unwrap();
    // 直接以原始 ABI 再跑一次：无效令牌下每个事件都是 ERROR，引擎在首个事件停止
    let status = scanhook_core::Engine::scan(&mut engine, scanhook_core::scan_callback, std::ptr::null_mut());
    assert_ne!(status, STATUS_SUCCESS);
    assert_eq!(engine.verdicts(), vec![Some(Verdict::Error)]);
}

/// 在能力方法里嵌套扫描一个已关闭的回调对象，并把其错误向上传播
struct NestedScan;

impl ScanFinished for NestedScan {
    fn scan_finished(&mut self, _ctx: &ScanContext<'_>) -> Result<Control> {
        let mut inner = CallbackBundle::new(MatchRecorder::new());
        inner.close();
        let mut engine = ScriptedEngine::new(Script::new())?;
        inner.scan(&mut engine)?;
        Ok(Control::Continue)
    }
}

impl ScanCallback for NestedScan {
    fn as_scan_finished(&mut self) -> Option<&mut dyn ScanFinished> { Some(self) }
}

#[test]
fn bridge_errors_raised_by_callbacks_stay_callback_errors() {
    let mut engine = ScriptedEngine::new(mixed_script()).unwrap();
    let mut bundle = CallbackBundle::new(NestedScan);
    let res = bundle.scan(&mut engine);

    assert_eq!(engine.verdicts().last(), Some(&Some(Verdict::Error)));
    match res {
        Err(BridgeError::Callback(err)) => {
            assert!(matches!(err.downcast_ref::<BridgeError>(), Some(BridgeError::Sealed)))
        }
        other => panic!("unexpected result {other:?}"),
    }
}
