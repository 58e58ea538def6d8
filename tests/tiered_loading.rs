mod common;
use common::{RecordingSource, exposed_name, recording_factories, sample_manifest};
use dyn_loader::source::SourceFuture;
use dyn_loader::{Exposed, LoadError, ModuleState, Runtime, SourceProvider};
use std::rc::Rc;
use tokio::sync::Notify;
use tokio::task::LocalSet;

fn sample_runtime() -> (Runtime, RecordingSource, Rc<std::cell::RefCell<Vec<String>>>) {
    let manifest = sample_manifest();
    let source = RecordingSource::for_manifest(&manifest);
    let (factories, log) = recording_factories(&manifest);
    let runtime = Runtime::builder(manifest)
        .source_provider(source.clone())
        .instantiator(factories)
        .build()
        .unwrap();
    (runtime, source, log)
}

#[tokio::test]
async fn test_closure_is_fetched_in_one_batch() {
    LocalSet::new()
        .run_until(async {
            let (runtime, source, log) = sample_runtime();

            let values = runtime.load(["a"]).unwrap().await.unwrap();

            assert_eq!(source.batches(), vec![vec!["a", "b", "d"]]);
            assert_eq!(*log.borrow(), vec!["d", "b", "a"]);
            assert_eq!(values.len(), 1);
            assert_eq!(exposed_name(&values["a"]), "a");
            assert_eq!(runtime.instantiated_count(), 3);
            for name in ["a", "b", "d"] {
                assert_eq!(runtime.state(name), ModuleState::Ready);
            }
            assert_eq!(runtime.state("e"), ModuleState::Unregistered);
        })
        .await;
}

#[tokio::test]
async fn test_loaded_modules_are_reused() {
    LocalSet::new()
        .run_until(async {
            let (runtime, source, log) = sample_runtime();

            let first = runtime.load(["a"]).unwrap().await.unwrap();
            let second = runtime.load(["a"]).unwrap().await.unwrap();
            let dependency = runtime.load(["b"]).unwrap().await.unwrap();

            assert!(Rc::ptr_eq(&first["a"], &second["a"]));
            assert!(Rc::ptr_eq(&dependency["b"], &runtime.get("b").unwrap()));
            assert_eq!(source.fetch_count(), 1);
            assert_eq!(log.borrow().len(), 3);
        })
        .await;
}

#[tokio::test]
async fn test_only_missing_modules_are_fetched() {
    LocalSet::new()
        .run_until(async {
            let (runtime, source, _log) = sample_runtime();

            runtime.load(["b"]).unwrap().await.unwrap();
            let values = runtime.load(["a", "e", "a"]).unwrap().await.unwrap();

            assert_eq!(source.batches(), vec![vec!["b", "d"], vec!["a", "e"]]);
            assert_eq!(values.len(), 2);
            assert!(values.contains_key("e"));
        })
        .await;
}

#[tokio::test]
async fn test_unknown_module_fails_synchronously() {
    LocalSet::new()
        .run_until(async {
            let (runtime, source, _log) = sample_runtime();

            let result = runtime.load(["a", "nope"]);
            assert_eq!(
                result.err(),
                Some(LoadError::UnknownModule("nope".to_string()))
            );
            assert_eq!(source.fetch_count(), 0);
            assert_eq!(runtime.instantiated_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_retrieval_failure_instantiates_nothing() {
    LocalSet::new()
        .run_until(async {
            let (runtime, source, log) = sample_runtime();
            source.fail_with("server unavailable");

            let err = runtime.load(["a"]).unwrap().await.unwrap_err();

            match err {
                LoadError::Retrieval(message) => assert!(message.contains("server unavailable")),
                other => panic!("expected a retrieval error, got {other:?}"),
            }
            assert!(log.borrow().is_empty());
            assert_eq!(runtime.instantiated_count(), 0);
            assert_eq!(runtime.state("a"), ModuleState::Unregistered);
        })
        .await;
}

#[tokio::test]
async fn test_factory_failure_is_reported() {
    LocalSet::new()
        .run_until(async {
            let manifest = sample_manifest();
            let source = RecordingSource::for_manifest(&manifest);
            let (factories, _log) = recording_factories(&manifest);
            let factories =
                factories.with_factory("b", |_cx| Err(anyhow::anyhow!("b cannot start")));
            let runtime = Runtime::builder(manifest)
                .source_provider(source)
                .instantiator(factories)
                .build()
                .unwrap();

            let err = runtime.load(["a"]).unwrap().await.unwrap_err();

            assert_eq!(
                err,
                LoadError::Instantiation {
                    module: "b".to_string(),
                    message: "b cannot start".to_string(),
                }
            );
            assert_eq!(runtime.state("d"), ModuleState::Ready);
            assert_eq!(runtime.state("b"), ModuleState::Unregistered);
            assert_eq!(runtime.state("a"), ModuleState::Unregistered);
        })
        .await;
}

#[tokio::test]
async fn test_factories_see_their_load_dependencies() {
    LocalSet::new()
        .run_until(async {
            let manifest = sample_manifest();
            let source = RecordingSource::for_manifest(&manifest);
            let (factories, _log) = recording_factories(&manifest);
            let factories = factories.with_factory("a", |cx| {
                assert_eq!(cx.name(), "a");
                assert_eq!(cx.load_dependencies().len(), 1);
                let b = cx
                    .dependency_as::<String>("b")
                    .ok_or_else(|| anyhow::anyhow!("b missing"))?;
                Ok(Rc::new(format!("a uses {b}")) as Exposed)
            });
            let runtime = Runtime::builder(manifest)
                .source_provider(source)
                .instantiator(factories)
                .build()
                .unwrap();

            let values = runtime.load(["a"]).unwrap().await.unwrap();
            assert_eq!(exposed_name(&values["a"]), "a uses b");
        })
        .await;
}

/// Holds every fetch until released.
#[derive(Clone)]
struct GatedSource {
    inner: RecordingSource,
    gate: Rc<Notify>,
}

impl SourceProvider for GatedSource {
    fn fetch<'a>(&'a self, names: &'a [String]) -> SourceFuture<'a> {
        Box::pin(async move {
            self.gate.notified().await;
            self.inner.fetch(names).await
        })
    }
}

#[tokio::test]
async fn test_concurrent_loads_share_one_fetch() {
    LocalSet::new()
        .run_until(async {
            let manifest = sample_manifest();
            let recording = RecordingSource::for_manifest(&manifest);
            let gate = Rc::new(Notify::new());
            let (factories, log) = recording_factories(&manifest);
            let runtime = Runtime::builder(manifest)
                .source_provider(GatedSource {
                    inner: recording.clone(),
                    gate: Rc::clone(&gate),
                })
                .instantiator(factories)
                .build()
                .unwrap();

            let first = tokio::task::spawn_local(runtime.load(["a"]).unwrap());
            for _ in 0..100 {
                if runtime.state("a") == ModuleState::FetchPending {
                    break;
                }
                tokio::task::yield_now().await;
            }
            assert_eq!(runtime.state("a"), ModuleState::FetchPending);
            assert_eq!(runtime.state("d"), ModuleState::FetchPending);

            let second = tokio::task::spawn_local(runtime.load(["b"]).unwrap());
            tokio::task::yield_now().await;
            gate.notify_one();

            let first = first.await.unwrap().unwrap();
            let second = second.await.unwrap().unwrap();

            assert_eq!(recording.fetch_count(), 1);
            assert_eq!(*log.borrow(), vec!["d", "b", "a"]);
            assert!(Rc::ptr_eq(&second["b"], &runtime.get("b").unwrap()));
            assert_eq!(exposed_name(&first["a"]), "a");
        })
        .await;
}

#[tokio::test]
async fn test_load_with_callback() {
    LocalSet::new()
        .run_until(async {
            let (runtime, _source, _log) = sample_runtime();
            let (tx, rx) = tokio::sync::oneshot::channel();

            runtime
                .load_with(["e", "f"], move |result| {
                    let _ = tx.send(result);
                })
                .unwrap();

            let values = rx.await.unwrap().unwrap();
            let mut names: Vec<String> = values.keys().cloned().collect();
            names.sort();
            assert_eq!(names, vec!["e", "f"]);

            assert!(runtime.load_with(["missing"], |_| {}).is_err());
        })
        .await;
}

#[test]
#[should_panic(expected = "Runtime requires an instantiator")]
fn test_builder_requires_instantiator() {
    let manifest = sample_manifest();
    let source = RecordingSource::for_manifest(&manifest);
    Runtime::builder(manifest)
        .source_provider(source)
        .build()
        .unwrap();
}
