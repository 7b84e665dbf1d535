use pyflow::config::Config;
use pyflow::runtime::journal::ExecutionJournal;
use pyflow::{
    Argument, BoundArgs, Closure, HandlerTable, Parameter, PyflowError, Session, Signature,
    StubState,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

fn add(args: &BoundArgs) -> anyhow::Result<Value> {
    Ok(json!(args.i64("x")? + args.i64("y")?))
}

fn increment(args: &BoundArgs) -> anyhow::Result<Value> {
    Ok(json!(args.i64("x")? + 1))
}

fn explode(_args: &BoundArgs) -> anyhow::Result<Value> {
    Err(anyhow::anyhow!("domain error: refusing to compute"))
}

fn handlers() -> HandlerTable {
    HandlerTable::new()
        .with("add", add)
        .with("increment", increment)
        .with("explode", explode)
}

async fn session(root: &std::path::Path) -> Session {
    let session = Session::open(Config::with_root(root), handlers()).await.unwrap();
    session
        .register("add", "fn add(x, y) { x + y }", Signature::positional(["x", "y"]), Closure::native("add"))
        .await
        .unwrap();
    session
        .register("increment", "fn increment(x) { x + 1 }", Signature::positional(["x"]), Closure::native("increment"))
        .await
        .unwrap();
    session
        .register("explode", "fn explode(x) { Err(..) }", Signature::positional(["x"]), Closure::native("explode"))
        .await
        .unwrap();
    session
}

fn no_kwargs() -> BTreeMap<String, Argument> {
    BTreeMap::new()
}

#[tokio::test]
async fn test_add_then_increment() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut session = session(tmp.path()).await;

    let p1 = session.defer("add", vec![json!(2).into(), json!(3).into()], no_kwargs()).await.unwrap();
    let p2 = session.defer("increment", vec![p1.clone().into()], no_kwargs()).await.unwrap();
    assert_eq!(session.queue().len(), 2);

    let summary = session.run_all().await.unwrap();
    assert!(summary.is_success(), "{:?}", summary);
    assert!(session.queue().is_empty());

    assert_eq!(session.resolve(&p1).await.unwrap(), json!(5));
    assert_eq!(session.resolve(&p2).await.unwrap(), json!(6));

    // Same value as calling the function directly with the resolved argument
    let direct = session.materialize("increment").await.unwrap();
    assert_eq!(direct.invoke(vec![json!(5)], BTreeMap::new()).unwrap(), json!(6));

    let output = tmp
        .path()
        .join("functions/increment")
        .join(p2.execution_id.as_str())
        .join("output.json");
    assert!(output.exists(), "missing {}", output.display());
}

static SIDE_EFFECTS: AtomicUsize = AtomicUsize::new(0);

fn counted(args: &BoundArgs) -> anyhow::Result<Value> {
    SIDE_EFFECTS.fetch_add(1, Ordering::SeqCst);
    Ok(args.get("x").cloned().unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_defer_has_no_side_effects_until_run() {
    let tmp = tempfile::TempDir::new().unwrap();
    let handlers = HandlerTable::new().with("counted", counted);
    let mut session = Session::open(Config::with_root(tmp.path()), handlers).await.unwrap();
    session
        .register("counted", "counted", Signature::positional(["x"]), Closure::native("counted"))
        .await
        .unwrap();

    let g = session.defer("counted", vec![json!(1).into()], no_kwargs()).await.unwrap();
    let f = session.defer("counted", vec![g.into()], no_kwargs()).await.unwrap();

    assert_eq!(SIDE_EFFECTS.load(Ordering::SeqCst), 0);
    assert!(!tmp.path().join("journal.db").exists());
    let entries: Vec<_> = std::fs::read_dir(tmp.path().join("functions/counted"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("meta.json")]);

    let summary = session.run_all().await.unwrap();
    assert!(summary.is_success());
    assert_eq!(SIDE_EFFECTS.load(Ordering::SeqCst), 2);
    assert_eq!(session.resolve(&f).await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_failure_does_not_stop_unrelated_stubs() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut session = session(tmp.path()).await;

    let bad = session.defer("explode", vec![json!(1).into()], no_kwargs()).await.unwrap();
    let good = session.defer("add", vec![json!(1).into(), json!(1).into()], no_kwargs()).await.unwrap();

    let summary = session.run_all().await.unwrap();
    assert!(!summary.is_success());
    assert!(!summary.aborted());

    let failed = summary.get(&bad.execution_id).unwrap();
    match &failed.state {
        StubState::Failed(PyflowError::ExecutionFailed { function, execution_id, source }) => {
            assert_eq!(function, "explode");
            assert_eq!(execution_id, bad.execution_id.as_str());
            assert!(source.to_string().contains("domain error"));
        }
        other => panic!("unexpected state: {:?}", other),
    }
    assert!(matches!(summary.get(&good.execution_id).unwrap().state, StubState::Succeeded));
    assert_eq!(session.resolve(&good).await.unwrap(), json!(2));

    // The failed stub never produced output
    assert!(matches!(session.resolve(&bad).await, Err(PyflowError::NotReady { .. })));

    let err = summary.into_result().unwrap_err();
    assert!(matches!(err, PyflowError::ExecutionFailed { .. }));
}

#[tokio::test]
async fn test_dependents_of_a_failed_stub_are_not_run() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut session = session(tmp.path()).await;

    let bad = session.defer("explode", vec![json!(1).into()], no_kwargs()).await.unwrap();
    let child = session.defer("increment", vec![bad.clone().into()], no_kwargs()).await.unwrap();
    let grandchild = session.defer("increment", vec![child.clone().into()], no_kwargs()).await.unwrap();
    let unrelated = session.defer("increment", vec![json!(41).into()], no_kwargs()).await.unwrap();

    let summary = session.run_all().await.unwrap();

    for placeholder in [&child, &grandchild] {
        match &summary.get(&placeholder.execution_id).unwrap().state {
            StubState::Failed(PyflowError::UpstreamFailed { upstream, .. }) => {
                assert_eq!(upstream, bad.execution_id.as_str());
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }
    assert_eq!(summary.failed().count(), 3);
    assert_eq!(session.resolve(&unrelated).await.unwrap(), json!(42));
}

#[tokio::test]
async fn test_fail_fast_leaves_remaining_stubs_pending() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = Config::with_root(tmp.path());
    config.runner.fail_fast = true;
    let mut session = Session::open(config, handlers()).await.unwrap();
    session
        .register("explode", "explode", Signature::positional(["x"]), Closure::native("explode"))
        .await
        .unwrap();
    session
        .register("increment", "increment", Signature::positional(["x"]), Closure::native("increment"))
        .await
        .unwrap();

    session.defer("explode", vec![json!(0).into()], no_kwargs()).await.unwrap();
    let later = session.defer("increment", vec![json!(1).into()], no_kwargs()).await.unwrap();

    let summary = session.run_all().await.unwrap();
    assert!(summary.aborted());
    assert_eq!(summary.failed().count(), 1);
    assert_eq!(summary.pending().count(), 1);
    assert!(matches!(session.resolve(&later).await, Err(PyflowError::NotReady { .. })));
}

#[tokio::test]
async fn test_defer_validates_name_and_signature() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut session = session(tmp.path()).await;

    let unknown = session.defer("nope", vec![], no_kwargs()).await;
    assert!(matches!(unknown, Err(PyflowError::NotFound(name)) if name == "nope"));

    let arity = session.defer("add", vec![json!(1).into()], no_kwargs()).await;
    assert!(matches!(arity, Err(PyflowError::SignatureMismatch { .. })));

    assert!(session.queue().is_empty());
}

#[tokio::test]
async fn test_resolve_before_run_is_not_ready() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut session = session(tmp.path()).await;

    let p = session.defer("add", vec![json!(1).into(), json!(2).into()], no_kwargs()).await.unwrap();
    assert!(matches!(session.resolve(&p).await, Err(PyflowError::NotReady { .. })));
}

#[tokio::test]
async fn test_reregistration_changes_what_runs() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut session = session(tmp.path()).await;

    let before = session.lookup("increment").await.unwrap();
    session
        .register("increment", "fn increment(x, y) { x + y }", Signature::positional(["x", "y"]), Closure::native("add"))
        .await
        .unwrap();
    let after = session.lookup("increment").await.unwrap();
    assert_ne!(before.source_hash, after.source_hash);
    assert_eq!(after.parameter_names(), vec!["x", "y"]);

    let p = session
        .defer("increment", vec![json!(10).into(), json!(5).into()], no_kwargs())
        .await
        .unwrap();
    session.run_all().await.unwrap();
    assert_eq!(session.resolve(&p).await.unwrap(), json!(15));
}

#[tokio::test]
async fn test_signature_change_after_defer_is_a_binding_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut session = session(tmp.path()).await;

    let p = session.defer("increment", vec![json!(1).into()], no_kwargs()).await.unwrap();
    session
        .register("increment", "fn increment(x, y) { x + y }", Signature::positional(["x", "y"]), Closure::native("add"))
        .await
        .unwrap();

    let summary = session.run_all().await.unwrap();
    let stub = &summary.stubs()[0];
    match &stub.state {
        StubState::Failed(PyflowError::SignatureMismatch { function, reason }) => {
            assert_eq!(function, "increment");
            assert!(reason.contains("missing required argument `y`"), "{}", reason);
        }
        other => panic!("expected a signature mismatch, got {:?}", other),
    }
    assert!(matches!(session.resolve(&p).await, Err(PyflowError::NotReady { .. })));
}

#[tokio::test]
async fn test_keyword_placeholders_and_defaults() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut session = Session::open(Config::with_root(tmp.path()), handlers()).await.unwrap();
    session
        .register("add", "add", Signature::positional(["x", "y"]), Closure::native("add"))
        .await
        .unwrap();
    let scale = "return function(x, factor) return x * factor end";
    session
        .register(
            "scale",
            scale,
            Signature::new(vec![Parameter::positional("x"), Parameter::keyword("factor", json!(2))]),
            Closure::lua(scale),
        )
        .await
        .unwrap();

    let sum = session.defer("add", vec![json!(4).into(), json!(6).into()], no_kwargs()).await.unwrap();
    let doubled = session
        .defer("scale", vec![], BTreeMap::from([("x".to_string(), Argument::from(&sum))]))
        .await
        .unwrap();
    let tripled = session
        .defer(
            "scale",
            vec![sum.clone().into()],
            BTreeMap::from([("factor".to_string(), Argument::literal(3))]),
        )
        .await
        .unwrap();

    assert!(session.run_all().await.unwrap().is_success());
    assert_eq!(session.resolve(&doubled).await.unwrap(), json!(20));
    assert_eq!(session.resolve(&tripled).await.unwrap(), json!(30));
}

#[tokio::test]
async fn test_placeholders_survive_across_sessions() {
    let tmp = tempfile::TempDir::new().unwrap();

    let first_output = {
        let mut first = Session::open(Config::with_root(tmp.path()), HandlerTable::new()).await.unwrap();
        let chunk = "return function(words) local out = {} for i, w in ipairs(words) do out[i] = string.upper(w) end return out end";
        first
            .register("shout", chunk, Signature::positional(["words"]), Closure::lua(chunk))
            .await
            .unwrap();
        let p = first.defer("shout", vec![json!(["a", "b"]).into()], no_kwargs()).await.unwrap();
        first.run_all().await.unwrap();
        p
    };

    // A fresh session with no native handlers sees the Lua registration on disk
    let mut second = Session::open(Config::with_root(tmp.path()), HandlerTable::new()).await.unwrap();
    assert_eq!(second.registry().list().len(), 1);
    let again = second.defer("shout", vec![first_output.clone().into()], no_kwargs()).await;
    // Runs "shout" on ["A", "B"]: uppercase is idempotent
    let again = again.unwrap();
    assert!(second.run_all().await.unwrap().is_success());
    assert_eq!(second.resolve(&again).await.unwrap(), json!(["A", "B"]));
}

#[tokio::test]
async fn test_journal_records_terminal_states() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut session = session(tmp.path()).await;

    let ok = session.defer("add", vec![json!(1).into(), json!(2).into()], no_kwargs()).await.unwrap();
    let bad = session.defer("explode", vec![json!(1).into()], no_kwargs()).await.unwrap();
    session.run_all().await.unwrap();

    let journal = ExecutionJournal::open(&tmp.path().join("journal.db")).await.unwrap();
    let ok_entry = journal.get(ok.execution_id.as_str()).await.unwrap().unwrap();
    assert_eq!(ok_entry.state, "succeeded");
    assert!(ok_entry.error.is_none());

    let bad_entry = journal.get(bad.execution_id.as_str()).await.unwrap().unwrap();
    assert_eq!(bad_entry.state, "failed");
    assert!(bad_entry.error.unwrap().contains("domain error"));
}

#[tokio::test]
async fn test_unlinked_native_handler_fails_the_stub() {
    let tmp = tempfile::TempDir::new().unwrap();
    // Register with handlers, then run from a session that does not link them
    session(tmp.path()).await;

    let mut bare = Session::open(Config::with_root(tmp.path()), HandlerTable::new()).await.unwrap();
    let p = bare.defer("increment", vec![json!(1).into()], no_kwargs()).await.unwrap();
    let summary = bare.run_all().await.unwrap();

    let stub = summary.get(&p.execution_id).unwrap();
    assert!(matches!(stub.state, StubState::Failed(PyflowError::Deserialization { .. })));
}
