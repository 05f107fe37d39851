//! Factory, automock, autospy and redirect mocks

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{MapLoader, MemoryHost, Scripted, builder, import, runner};
use mink_mocker::{JsArray, JsError, JsFunction, JsObject, Value};
use mink_runner::{AutomockStrategy, MockDirective, ModuleState, RunnerConfig, RunnerError};

const API_SOURCE: &str = "export function fetchUser(id) { return { id } }\nexport const VERSION = 2;\n";

/// `/src/main.js` re-exports everything `/src/api.js` yields
fn project() -> (MemoryHost, Scripted) {
    let host = MemoryHost::default();
    host.file("/src/main.js", "main").file("/src/api.js", API_SOURCE);
    let evaluator = Scripted::default();
    evaluator
        .module("/src/api.js", |_, exports| async move {
            exports.set(
                "fetchUser",
                Value::from(JsFunction::native("fetchUser", |_, args| {
                    Ok(args.first().cloned().unwrap_or(Value::Undefined))
                })),
            );
            exports.set("VERSION", Value::from(2));
            Ok(())
        })
        .module("/src/main.js", |ctx, _| async move {
            let api = import(&ctx, "./api").await?;
            ctx.export_all(&Value::Object(api));
            Ok(())
        });
    (host, evaluator)
}

fn call(ns: &JsObject, key: &str, args: &[Value]) -> Value {
    ns.call_method(key, args).unwrap()
}

#[tokio::test]
async fn test_factory_replaces_module_and_runs_once() {
    let (host, evaluator) = project();
    host.file("/src/other.js", "other");
    evaluator.module("/src/other.js", |ctx, exports| async move {
        let api = import(&ctx, "./api").await?;
        exports.set("api", Value::Object(api));
        Ok(())
    });
    let runner = runner(&host, &evaluator);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    runner
        .mock(
            "/src/api.js",
            None,
            MockDirective::factory(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    let fake = JsFunction::native("fetchUser", |_, _| Ok(Value::from("fake")));
                    Ok(Value::Object(JsObject::from_entries([("fetchUser", Value::from(fake))])))
                }
            }),
        )
        .await
        .unwrap();

    let main = runner.execute_id("/src/main.js").await.unwrap();
    let other = runner.execute_id("/src/other.js").await.unwrap();

    assert_eq!(call(&main, "fetchUser", &[Value::from(1)]), Value::from("fake"));
    assert!(other.get(&"api".into()).get("fetchUser").same_value(&main.get(&"fetchUser".into())));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(evaluator.runs("/src/api.js"), 0);
    assert!(runner.cache().contains("mock:/src/api.js"));
}

#[tokio::test]
async fn test_factory_can_import_the_original() {
    let (host, evaluator) = project();
    let runner = runner(&host, &evaluator);

    runner
        .mock(
            "/src/api.js",
            None,
            MockDirective::factory(|ctx| async move {
                let original = ctx.import_original().await?;
                let partial = JsObject::new();
                partial.set("fetchUser", original.get(&"fetchUser".into()));
                partial.set("VERSION", Value::from(3));
                Ok(Value::Object(partial))
            }),
        )
        .await
        .unwrap();

    let main = runner.execute_id("/src/main.js").await.unwrap();
    assert_eq!(call(&main, "fetchUser", &[Value::from(7)]), Value::from(7));
    assert_eq!(main.get(&"VERSION".into()), Value::from(3));
    assert_eq!(evaluator.runs("/src/api.js"), 1);
}

#[tokio::test]
async fn test_factory_must_return_an_object() {
    let cases: Vec<(Value, &str)> = vec![
        (Value::from(1), "number"),
        (Value::Array(JsArray::new(vec![])), "array"),
        (Value::from(JsFunction::native("f", |_, _| Ok(Value::Undefined))), "function"),
        (Value::Null, "null"),
    ];

    for (value, kind) in cases {
        let (host, evaluator) = project();
        let runner = runner(&host, &evaluator);
        runner
            .mock(
                "/src/api.js",
                None,
                MockDirective::factory(move |_| {
                    let value = value.clone();
                    async move { Ok(value) }
                }),
            )
            .await
            .unwrap();

        let err = runner.execute_id("/src/main.js").await.unwrap_err();
        assert!(
            matches!(&err, RunnerError::NonObjectFactory { id, kind: got } if id == "/src/api.js" && got == kind),
            "unexpected error for {kind}: {err}"
        );
        assert!(err.to_string().contains("\"default\" key"));
    }
}

#[tokio::test]
async fn test_throwing_factory_is_wrapped() {
    let (host, evaluator) = project();
    let runner = runner(&host, &evaluator);
    runner
        .mock(
            "/src/api.js",
            None,
            MockDirective::factory(|_| async { Err(JsError::throw("factory blew up")) }),
        )
        .await
        .unwrap();

    let err = runner.execute_id("/src/main.js").await.unwrap_err();
    match err {
        RunnerError::MockFactory { id, message } => {
            assert_eq!(id, "/src/api.js");
            assert!(message.contains("factory blew up"));
        }
        other => panic!("unexpected error: {other}"),
    }
    let record = runner.cache().get("mock:/src/api.js").unwrap();
    assert_eq!(record.state, ModuleState::Errored);
}

#[tokio::test]
async fn test_factory_importing_itself_is_circular() {
    let (host, evaluator) = project();
    let runner = runner(&host, &evaluator);
    runner
        .mock(
            "/src/api.js",
            None,
            MockDirective::factory(|ctx| async move {
                let me = ctx.import("/src/api.js").await?;
                Ok(Value::Object(me))
            }),
        )
        .await
        .unwrap();

    let err = runner.execute_id("/src/main.js").await.unwrap_err();
    match &err {
        RunnerError::CircularDependency { chain } => {
            assert_eq!(chain, &vec!["mock:/src/api.js".to_string(), "mock:/src/api.js".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().ends_with("mock:/src/api.js ==> mock:/src/api.js"));
}

#[tokio::test]
async fn test_automock_transforms_the_module() {
    let (host, evaluator) = project();
    let runner = runner(&host, &evaluator);
    runner.mock("./api", Some("/src/main.js"), MockDirective::Automock).await.unwrap();

    let main = runner.execute_id("/src/main.js").await.unwrap();

    assert_eq!(call(&main, "fetchUser", &[Value::from(1)]), Value::Undefined);
    assert_eq!(main.get(&"VERSION".into()), Value::from(2));
    let mock = main.get(&"fetchUser".into());
    let log = mock.mock().expect("fetchUser is a mock");
    assert_eq!(log.call_count(), 1);

    let code = evaluator.code("/src/api.js").unwrap();
    assert!(code.contains("globalThis[\"__mink_mocker__\"].mockObject(__mink_current_es_module__, \"automock\")"));
    assert!(code.contains("__mink_mocked_0__ as fetchUser"));
    assert!(runner.cache().contains("mock:/src/api.js"));
    assert!(runner.cache().exports("/src/api.js").is_none());
}

#[tokio::test]
async fn test_autospy_calls_through() {
    let (host, evaluator) = project();
    let runner = runner(&host, &evaluator);
    runner.mock("/src/api.js", None, MockDirective::Autospy).await.unwrap();

    let main = runner.execute_id("/src/main.js").await.unwrap();

    assert_eq!(call(&main, "fetchUser", &[Value::from(5)]), Value::from(5));
    let spy = main.get(&"fetchUser".into());
    assert_eq!(spy.mock().unwrap().calls(), vec![vec![Value::from(5)]]);
    assert!(evaluator.code("/src/api.js").unwrap().contains("\"autospy\")"));
}

#[tokio::test]
async fn test_evaluate_strategy_mocks_real_exports() {
    let (host, evaluator) = project();
    let runner = builder(&host, &evaluator)
        .config(RunnerConfig {
            root: "/project".into(),
            automock_strategy: AutomockStrategy::Evaluate,
            ..Default::default()
        })
        .build()
        .unwrap();
    runner.mock("/src/api.js", None, MockDirective::Automock).await.unwrap();

    let main = runner.execute_id("/src/main.js").await.unwrap();

    assert_eq!(call(&main, "fetchUser", &[Value::from(1)]), Value::Undefined);
    assert_eq!(evaluator.code("/src/api.js").unwrap(), API_SOURCE);
    assert!(runner.cache().exports("/src/api.js").is_some());
    assert!(runner.cache().contains("mock:/src/api.js"));
}

#[tokio::test]
async fn test_redirect_serves_another_module() {
    let (host, evaluator) = project();
    host.file("/src/__mocks__/api.js", "manual mock");
    evaluator.module("/src/__mocks__/api.js", |_, exports| async move {
        exports.set("fetchUser", Value::from(JsFunction::native("fetchUser", |_, _| Ok(Value::from("manual")))));
        Ok(())
    });
    let runner = runner(&host, &evaluator);
    runner
        .mock(
            "/src/api.js",
            None,
            MockDirective::Redirect("/src/__mocks__/api.js".into()),
        )
        .await
        .unwrap();

    let main = runner.execute_id("/src/main.js").await.unwrap();
    assert_eq!(call(&main, "fetchUser", &[]), Value::from("manual"));
    assert_eq!(evaluator.runs("/src/api.js"), 0);
}

#[tokio::test]
async fn test_virtual_mocks_resolve() {
    let host = MemoryHost::default();
    host.file("/src/main.js", "main");
    let evaluator = Scripted::default();
    evaluator.module("/src/main.js", |ctx, exports| async move {
        let virtual_ns = import(&ctx, "virtual:flags").await?;
        exports.set("flag", virtual_ns.get(&"enabled".into()));
        Ok(())
    });
    let runner = runner(&host, &evaluator);

    let path = runner
        .mock(
            "virtual:flags",
            None,
            MockDirective::factory(|_| async {
                Ok(Value::Object(JsObject::from_entries([("enabled", true)])))
            }),
        )
        .await
        .unwrap();
    assert_eq!(path, "virtual:flags");

    let main = runner.execute_id("/src/main.js").await.unwrap();
    assert_eq!(main.get(&"flag".into()), Value::from(true));
}

#[tokio::test]
async fn test_unmock_restores_the_real_module() {
    let (host, evaluator) = project();
    let runner = runner(&host, &evaluator);
    runner.mock("/src/api.js", None, MockDirective::Automock).await.unwrap();
    runner.execute_id("/src/main.js").await.unwrap();

    assert!(runner.unmock("/src/api.js", None).await.unwrap());
    runner.invalidate_dep_tree(["/src/main.js"]);

    let main = runner.execute_id("/src/main.js").await.unwrap();
    assert_eq!(call(&main, "fetchUser", &[Value::from(9)]), Value::from(9));
    assert!(main.get(&"fetchUser".into()).mock().is_none());
    assert!(runner.mocks().is_empty());
}

#[tokio::test]
async fn test_automocked_builtin() {
    let host = MemoryHost::default();
    host.file("/src/main.js", "main");
    let read = JsFunction::native("readFileSync", |_, _| Ok(Value::from("contents")));
    let loader = MapLoader::default();
    loader.module(
        "node:fs",
        Value::Object(JsObject::from_entries([("readFileSync", Value::from(read))])),
    );
    let evaluator = Scripted::default();
    evaluator.module("/src/main.js", |ctx, exports| async move {
        let fs = import(&ctx, "node:fs").await?;
        exports.set("fs", Value::Object(fs));
        Ok(())
    });
    let runner = builder(&host, &evaluator).external_loader(loader).build().unwrap();
    let path = runner.mock("node:fs", None, MockDirective::Automock).await.unwrap();
    assert_eq!(path, "fs");

    let main = runner.execute_id("/src/main.js").await.unwrap();
    let fs = main.get(&"fs".into());
    let Value::Object(fs) = fs else {
        panic!("expected a namespace object");
    };
    assert_eq!(call(&fs, "readFileSync", &[]), Value::Undefined);
}

#[tokio::test]
async fn test_reset_all_keeps_module_mocks_installed() {
    let (host, evaluator) = project();
    let runner = runner(&host, &evaluator);
    runner.mock("/src/api.js", None, MockDirective::Autospy).await.unwrap();
    let main = runner.execute_id("/src/main.js").await.unwrap();

    call(&main, "fetchUser", &[Value::from(1)]);
    runner.mocker().clear_all();
    let spy = main.get(&"fetchUser".into());
    assert_eq!(spy.mock().unwrap().call_count(), 0);

    runner.mocker().reset_all();
    assert_eq!(call(&main, "fetchUser", &[Value::from(2)]), Value::from(2));
    assert!(main.get(&"fetchUser".into()).mock().is_some());
}
