//! Module evaluation, caching and cycle handling

mod common;

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{MapLoader, MemoryHost, Scripted, builder, import, runner};
use futures_util::future::join_all;
use mink_mocker::{JsError, JsFunction, JsObject, Value};
use mink_runner::{ModuleState, RunnerConfig, RunnerError};
use parking_lot::Mutex;

#[tokio::test]
async fn test_module_evaluates_once_and_is_cached() {
    let host = MemoryHost::default();
    host.file("/src/a.js", "a");
    let evaluator = Scripted::default();
    evaluator.module("/src/a.js", |_, exports| async move {
        exports.set("x", Value::from(1));
        Ok(())
    });
    let runner = runner(&host, &evaluator);

    let first = runner.execute_id("/src/a.js").await.unwrap();
    let second = runner.execute_id("/src/a.js?v=abc123").await.unwrap();

    assert!(first.ptr_eq(&second));
    assert!(first.is_module());
    assert_eq!(first.get(&"x".into()), Value::from(1));
    assert_eq!(evaluator.runs("/src/a.js"), 1);
    assert_eq!(host.fetches("/src/a.js"), 1);
    assert_eq!(
        runner.cache().get("/src/a.js").unwrap().state,
        ModuleState::Resolved
    );
}

#[tokio::test]
async fn test_nested_imports_record_edges() {
    let host = MemoryHost::default();
    host.file("/src/main.js", "main").file("/src/dep.js", "dep");
    let evaluator = Scripted::default();
    evaluator
        .module("/src/dep.js", |_, exports| async move {
            exports.set("value", Value::from(21));
            Ok(())
        })
        .module("/src/main.js", |ctx, exports| async move {
            let dep = import(&ctx, "./dep").await?;
            let value = dep.get(&"value".into()).as_number().unwrap_or_default();
            exports.set("doubled", Value::number(value * 2.0));
            Ok(())
        });
    let runner = runner(&host, &evaluator);

    let main = runner.execute_id("/src/main.js").await.unwrap();
    assert_eq!(main.get(&"doubled".into()), Value::from(42));

    let main_record = runner.cache().get("/src/main.js").unwrap();
    assert!(main_record.imports.contains("/src/dep.js"));
    let dep_record = runner.cache().get("/src/dep.js").unwrap();
    assert!(dep_record.importers.contains("/src/main.js"));
}

#[tokio::test]
async fn test_circular_imports_see_live_exports() {
    let host = MemoryHost::default();
    host.file("/src/a.js", "a").file("/src/b.js", "b");
    let evaluator = Scripted::default();
    evaluator
        .module("/src/a.js", |ctx, exports| async move {
            exports.set("early", Value::from(1));
            let b = import(&ctx, "./b").await?;
            exports.set("late", Value::from(2));
            exports.set("seenByB", b.get(&"seen".into()));
            Ok(())
        })
        .module("/src/b.js", |ctx, exports| async move {
            let a = import(&ctx, "./a").await?;
            exports.set("seen", a.get(&"early".into()));
            let reader = a.clone();
            exports.set(
                "readLate",
                Value::from(JsFunction::native("readLate", move |_, _| {
                    Ok(reader.get(&"late".into()))
                })),
            );
            Ok(())
        });
    let runner = runner(&host, &evaluator);

    let a = runner.execute_id("/src/a.js").await.unwrap();
    let b = runner.execute_id("/src/b.js").await.unwrap();

    assert_eq!(a.get(&"seenByB".into()), Value::from(1));
    assert_eq!(b.call_method("readLate", &[]).unwrap(), Value::from(2));
    assert_eq!(evaluator.runs("/src/a.js"), 1);
    assert_eq!(evaluator.runs("/src/b.js"), 1);
}

#[tokio::test]
async fn test_reexport_through_cycle_stays_live() {
    let host = MemoryHost::default();
    host.file("/src/a.js", "a").file("/src/b.js", "b");
    let evaluator = Scripted::default();
    evaluator
        .module("/src/a.js", |ctx, exports| async move {
            exports.set("x", Value::from(1));
            import(&ctx, "./b").await?;
            exports.set("x", Value::from(2));
            Ok(())
        })
        .module("/src/b.js", |ctx, exports| async move {
            let a = import(&ctx, "./a").await?;
            ctx.export_all(&Value::Object(a));
            exports.set("seenDuringLoad", exports.get(&"x".into()));
            Ok(())
        });
    let runner = runner(&host, &evaluator);

    runner.execute_id("/src/a.js").await.unwrap();
    let b = runner.cache().exports("/src/b.js").unwrap();

    assert_eq!(b.get(&"seenDuringLoad".into()), Value::from(1));
    assert_eq!(b.get(&"x".into()), Value::from(2));
}

#[tokio::test]
async fn test_self_import_returns_in_progress_exports() {
    let host = MemoryHost::default();
    host.file("/src/self.js", "self");
    let evaluator = Scripted::default();
    evaluator.module("/src/self.js", |ctx, exports| async move {
        exports.set("before", Value::from(true));
        let me = import(&ctx, "/src/self.js").await?;
        exports.set("same", Value::from(me.ptr_eq(&exports)));
        Ok(())
    });
    let runner = runner(&host, &evaluator);

    let ns = runner.execute_id("/src/self.js").await.unwrap();
    assert_eq!(ns.get(&"same".into()), Value::from(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_evaluation() {
    let host = MemoryHost::default();
    host.file("/src/slow.js", "slow");
    let evaluator = Scripted::default();
    evaluator.module("/src/slow.js", |_, exports| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        exports.set("done", Value::from(true));
        Ok(())
    });
    let runner = runner(&host, &evaluator);

    let requests = (0..8).map(|_| {
        let runner = runner.clone();
        tokio::spawn(async move { runner.execute_id("/src/slow.js").await })
    });
    let results: Vec<JsObject> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert!(results.iter().all(|ns| ns.ptr_eq(&results[0])));
    assert_eq!(evaluator.runs("/src/slow.js"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_roots_in_a_cycle() {
    let host = MemoryHost::default();
    host.file("/src/a.js", "a").file("/src/b.js", "b");
    let evaluator = Scripted::default();
    evaluator
        .module("/src/a.js", |ctx, exports| async move {
            exports.set("name", Value::from("a"));
            tokio::time::sleep(Duration::from_millis(10)).await;
            let b = import(&ctx, "./b").await?;
            exports.set("peer", Value::Object(b));
            Ok(())
        })
        .module("/src/b.js", |ctx, exports| async move {
            exports.set("name", Value::from("b"));
            tokio::time::sleep(Duration::from_millis(10)).await;
            let a = import(&ctx, "./a").await?;
            exports.set("peer", Value::Object(a));
            Ok(())
        });
    let runner = runner(&host, &evaluator);

    let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(runner.execute_id("/src/a.js"), runner.execute_id("/src/b.js"))
    })
    .await
    .expect("cycle between concurrent roots must not deadlock");

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.get(&"peer".into()).get("name"), Value::from("b"));
    assert_eq!(b.get(&"peer".into()).get("name"), Value::from("a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_roots_in_a_three_module_cycle() {
    let host = MemoryHost::default();
    let evaluator = Scripted::default();
    for (name, next) in [("a", "./b"), ("b", "./c"), ("c", "./a")] {
        let path = format!("/src/{}.js", name);
        host.file(&path, name);
        evaluator.module(&path, move |ctx, exports| async move {
            exports.set("name", Value::from(name));
            tokio::time::sleep(Duration::from_millis(20)).await;
            let peer = import(&ctx, next).await?;
            exports.set("peer", Value::Object(peer));
            Ok(())
        });
    }
    let runner = runner(&host, &evaluator);

    let (a, b, c) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            runner.execute_id("/src/a.js"),
            runner.execute_id("/src/b.js"),
            runner.execute_id("/src/c.js")
        )
    })
    .await
    .expect("three-module cycle between concurrent roots must not deadlock");

    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a.get(&"peer".into()).get("name"), Value::from("b"));
    assert_eq!(b.get(&"peer".into()).get("name"), Value::from("c"));
    assert_eq!(c.get(&"peer".into()).get("name"), Value::from("a"));
    for name in ["a", "b", "c"] {
        assert_eq!(evaluator.runs(&format!("/src/{}.js", name)), 1);
    }
}

#[tokio::test]
async fn test_errors_are_not_cached() {
    let host = MemoryHost::default();
    host.file("/src/flaky.js", "flaky");
    let attempts = Arc::new(AtomicUsize::new(0));
    let evaluator = Scripted::default();
    let counter = attempts.clone();
    evaluator.module("/src/flaky.js", move |_, exports| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                return Err(JsError::throw("first attempt fails"));
            }
            exports.set("ok", Value::from(true));
            Ok(())
        }
    });
    let runner = runner(&host, &evaluator);

    let err = runner.execute_id("/src/flaky.js").await.unwrap_err();
    assert!(matches!(err, RunnerError::Evaluation { ref id, .. } if id == "/src/flaky.js"));
    let record = runner.cache().get("/src/flaky.js").unwrap();
    assert_eq!(record.state, ModuleState::Errored);
    assert!(record.exports.is_none());

    let ns = runner.execute_id("/src/flaky.js").await.unwrap();
    assert_eq!(ns.get(&"ok".into()), Value::from(true));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_errors_reach_every_importer_unchanged() {
    let host = MemoryHost::default();
    host.file("/src/main.js", "main").file("/src/broken.js", "broken");
    let evaluator = Scripted::default();
    evaluator
        .module("/src/broken.js", |_, _| async { Err(JsError::throw("boom")) })
        .module("/src/main.js", |ctx, _| async move {
            import(&ctx, "./broken").await?;
            Ok(())
        });
    let runner = runner(&host, &evaluator);

    let err = runner.execute_id("/src/main.js").await.unwrap_err();
    match err {
        RunnerError::Evaluation { id, error } => {
            assert_eq!(id, "/src/broken.js");
            assert_eq!(error.value(), Value::from("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_missing_modules_name_the_importer() {
    let host = MemoryHost::default();
    host.file("/src/main.js", "main");
    let evaluator = Scripted::default();
    evaluator.module("/src/main.js", |ctx, _| async move {
        import(&ctx, "./missing").await?;
        Ok(())
    });
    let runner = runner(&host, &evaluator);

    let err = runner.execute_id("/src/nope.js").await.unwrap_err();
    assert!(matches!(err, RunnerError::ModuleNotFound { importer: None, .. }));

    let err = runner.execute_id("/src/main.js").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot find module './missing' imported from '/src/main.js'"
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropped_caller_does_not_cancel_evaluation() {
    let host = MemoryHost::default();
    host.file("/src/slow.js", "slow");
    let evaluator = Scripted::default();
    evaluator.module("/src/slow.js", |_, exports| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        exports.set("done", Value::from(true));
        Ok(())
    });
    let runner = runner(&host, &evaluator);

    let gave_up = tokio::time::timeout(Duration::from_millis(10), runner.execute_id("/src/slow.js")).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = runner.cache().get("/src/slow.js").unwrap();
    assert_eq!(record.state, ModuleState::Resolved);

    let ns = runner.execute_id("/src/slow.js").await.unwrap();
    assert_eq!(ns.get(&"done".into()), Value::from(true));
    assert_eq!(evaluator.runs("/src/slow.js"), 1);
}

#[tokio::test]
async fn test_shebang_is_blanked() {
    let host = MemoryHost::default();
    host.file("/bin/cli.js", "#!/usr/bin/env node\nmain()");
    let evaluator = Scripted::default();
    evaluator.module("/bin/cli.js", |_, _| async { Ok(()) });
    let runner = runner(&host, &evaluator);

    runner.execute_id("/bin/cli.js").await.unwrap();
    let code = evaluator.code("/bin/cli.js").unwrap();
    assert_eq!(code, format!("{}\nmain()", " ".repeat(19)));
}

#[tokio::test]
async fn test_import_meta_and_paths() {
    let host = MemoryHost::default();
    host.file("/src/lib/meta.js", "meta");
    let evaluator = Scripted::default();
    evaluator.module("/src/lib/meta.js", |ctx, exports| async move {
        exports.set("url", Value::from(ctx.import_meta().url.clone()));
        exports.set("dirname", Value::from(ctx.dirname().to_string()));
        Ok(())
    });
    let runner = runner(&host, &evaluator);

    let ns = runner.execute_id("/@id//src/lib/meta.js").await.unwrap();
    assert_eq!(ns.get(&"url".into()), Value::from("file:///src/lib/meta.js"));
    assert_eq!(ns.get(&"dirname".into()), Value::from("/src/lib"));
}

#[tokio::test]
async fn test_externals_use_interop() {
    let host = MemoryHost::default();
    host.file("/src/main.js", "main");
    let chunk = JsFunction::native("chunk", |_, _| Ok(Value::from("chunked")));
    let loader = MapLoader::default();
    loader
        .module(
            "lodash",
            Value::Object(JsObject::from_entries([(
                "default",
                Value::Object(JsObject::from_entries([("chunk", Value::from(chunk.clone()))])),
            )])),
        )
        .module(
            "node:path",
            Value::Object(JsObject::from_entries([("sep", "/")])),
        );
    let evaluator = Scripted::default();
    evaluator.module("/src/main.js", |ctx, exports| async move {
        let lodash = import(&ctx, "lodash").await?;
        let path = import(&ctx, "node:path").await?;
        exports.set("chunk", lodash.get(&"chunk".into()));
        exports.set("sep", path.get(&"sep".into()));
        Ok(())
    });
    let runner = builder(&host, &evaluator)
        .config(RunnerConfig {
            root: "/project".into(),
            external: vec!["^lodash".into()],
            ..Default::default()
        })
        .external_loader(loader.clone())
        .build()
        .unwrap();

    let main = runner.execute_id("/src/main.js").await.unwrap();
    assert!(main.get(&"chunk".into()).same_value(&Value::from(chunk)));
    assert_eq!(main.get(&"sep".into()), Value::from("/"));
    assert_eq!(loader.imports(), vec!["lodash".to_string(), "node:path".to_string()]);
    assert!(runner.cache().contains("path"));
}

#[tokio::test]
async fn test_host_can_externalize() {
    let host = MemoryHost::default();
    host.file("/src/pkg.js", "externalize:/node_modules/pkg/index.mjs");
    let loader = MapLoader::default();
    loader.module(
        "/node_modules/pkg/index.mjs",
        Value::Object(JsObject::from_entries([("default", 1), ("named", 2)])),
    );
    let runner = builder(&host, &Scripted::default())
        .external_loader(loader)
        .build()
        .unwrap();

    let ns = runner.execute_id("/src/pkg.js").await.unwrap();
    assert_eq!(ns.get(&"named".into()), Value::from(2));
    assert_eq!(ns.get(&"default".into()), Value::from(1));
}

#[tokio::test]
async fn test_request_stubs_skip_the_host() {
    let host = MemoryHost::default();
    let stub = JsObject::from_entries([("mode", "test")]);
    let runner = builder(&host, &Scripted::default())
        .request_stub("virtual:env", stub.clone())
        .build()
        .unwrap();

    let ns = runner.execute_id("virtual:env").await.unwrap();
    assert!(ns.ptr_eq(&stub));
    assert_eq!(host.fetches("virtual:env"), 0);

    let client = runner.execute_id("/@vite/client").await.unwrap();
    assert!(client.is_module());
}

#[tokio::test]
async fn test_invalidate_dep_tree_reevaluates_importers() {
    let host = MemoryHost::default();
    host.file("/src/main.js", "main").file("/src/dep.js", "dep");
    let evaluator = Scripted::default();
    evaluator
        .module("/src/dep.js", |_, _| async { Ok(()) })
        .module("/src/main.js", |ctx, _| async move {
            import(&ctx, "./dep").await?;
            Ok(())
        });
    let runner = runner(&host, &evaluator);

    runner.execute_id("/src/main.js").await.unwrap();
    let mut removed = runner.invalidate_dep_tree(["/src/dep.js"]);
    removed.sort();
    assert_eq!(removed, vec!["/src/dep.js".to_string(), "/src/main.js".to_string()]);

    runner.execute_id("/src/main.js").await.unwrap();
    assert_eq!(evaluator.runs("/src/main.js"), 2);
    assert_eq!(evaluator.runs("/src/dep.js"), 2);

    runner.invalidate("/src/main.js");
    runner.execute_id("/src/main.js").await.unwrap();
    assert_eq!(evaluator.runs("/src/main.js"), 3);
    assert_eq!(evaluator.runs("/src/dep.js"), 2);
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_modules_are_reported() {
    let logs = SharedBuf::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let host = MemoryHost::default();
    host.file("/src/main.js", "main").file("/src/slow.js", "slow");
    let evaluator = Scripted::default();
    evaluator
        .module("/src/slow.js", |_, _| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        })
        .module("/src/main.js", |ctx, _| async move {
            import(&ctx, "./slow").await?;
            Ok(())
        });
    let runner = builder(&host, &evaluator)
        .config(RunnerConfig {
            root: "/project".into(),
            slow_module_threshold_ms: Some(20),
            ..Default::default()
        })
        .build()
        .unwrap();

    runner.execute_id("/src/main.js").await.unwrap();

    let output = String::from_utf8(logs.0.lock().clone()).unwrap();
    assert!(output.contains("module is taking long to load"));
    assert!(output.contains("/src/slow.js"));
}
