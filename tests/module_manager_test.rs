//! 模块加载、解析顺序与卸载的集成测试

use flexdi::config::{ContainerConfig, DependentScan};
use flexdi::{
    Dependencies, DiError, Injectable, InjectableDescriptor, Instance, ModuleDefinition,
    ModuleManager, ModuleType, ProviderOptions, Scope, Token, UnloadOutcome,
};
use flexdi::infrastructure::ModuleStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct XImpl;

impl Injectable for XImpl {
    fn construct(_deps: Dependencies) -> Result<Self, DiError> {
        Ok(XImpl)
    }
}

struct Greeter {
    name: Arc<String>,
}

impl Injectable for Greeter {
    fn inject() -> Vec<(usize, Token)> {
        vec![(0, Token::from("Name"))]
    }

    fn construct(deps: Dependencies) -> Result<Self, DiError> {
        Ok(Greeter {
            name: deps.get::<String>(0)?,
        })
    }
}

fn counting_factory(token: &str, counter: &Arc<AtomicUsize>) -> ProviderOptions {
    let counter = Arc::clone(counter);
    ProviderOptions::factory_sync(token, Vec::new(), move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Instance::new(n))
    })
}

fn leaf(name: &str) -> ModuleType {
    ModuleDefinition::builder(name).build()
}

#[tokio::test]
async fn test_root_imports_module_with_class_provider() {
    let manager = ModuleManager::new();
    let m = ModuleDefinition::builder("M")
        .provider(ProviderOptions::class("X", InjectableDescriptor::of::<XImpl>()))
        .export("X")
        .build();
    let r = ModuleDefinition::builder("R").import(&m).build();

    let handle = manager.load_module(&r, true).await.unwrap();
    assert!(handle.is_root());
    assert!(manager.is_module_loaded(&m));

    let first = manager.get_service::<XImpl>(&m, "X").unwrap();
    let second = manager.get_service::<XImpl>(&m, "X").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_missing_dependency_rejects_load() {
    let manager = ModuleManager::new();
    let m = ModuleDefinition::builder("M")
        .provider(ProviderOptions::class(
            "Needy",
            InjectableDescriptor::new("NeedyImpl", |_| Ok(Instance::new(()))).inject(0, "Y"),
        ))
        .build();

    let err = manager.load_module(&m, false).await.unwrap_err();
    match err {
        DiError::MissingDependencies {
            token,
            class,
            module,
            missing,
        } => {
            assert_eq!(token, "Needy");
            assert_eq!(class, "NeedyImpl");
            assert_eq!(module, "M");
            assert_eq!(missing, vec!["Y".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!manager.is_module_loaded(&m));
}

#[tokio::test]
async fn test_injection_gap_is_reported_as_null() {
    let manager = ModuleManager::new();
    let m = ModuleDefinition::builder("M")
        .provider(ProviderOptions::value("Clock", Instance::new(0u64)))
        .provider(ProviderOptions::class(
            "Report",
            InjectableDescriptor::new("Report", |_| Ok(Instance::new(()))).inject(1, "Clock"),
        ))
        .build();

    let err = manager.load_module(&m, false).await.unwrap_err();
    assert!(matches!(
        err,
        DiError::MissingDependencies { ref missing, .. } if missing == &vec!["null".to_string()]
    ));
}

#[tokio::test]
async fn test_singleton_and_transient_scopes() {
    let manager = ModuleManager::new();
    let singleton_runs = Arc::new(AtomicUsize::new(0));
    let transient_runs = Arc::new(AtomicUsize::new(0));
    let transient_counter = Arc::clone(&transient_runs);
    let m = ModuleDefinition::builder("ScopeModule")
        .provider(counting_factory("Shared", &singleton_runs))
        .provider(ProviderOptions::class_scoped(
            "Fresh",
            InjectableDescriptor::new("Fresh", move |_| {
                Ok(Instance::new(transient_counter.fetch_add(1, Ordering::SeqCst)))
            }),
            Scope::Transient,
        ))
        .build();

    manager.load_module(&m, false).await.unwrap();
    let module_ref = manager.get_loaded_module("ScopeModule").unwrap();

    let a = module_ref.resolve_provider(&Token::from("Shared")).await.unwrap();
    let b = module_ref.resolve_provider(&Token::from("Shared")).await.unwrap();
    assert!(Instance::ptr_eq(&a, &b));
    assert_eq!(singleton_runs.load(Ordering::SeqCst), 1);

    let c = module_ref.resolve_provider(&Token::from("Fresh")).await.unwrap();
    let d = module_ref.resolve_provider(&Token::from("Fresh")).await.unwrap();
    assert!(!Instance::ptr_eq(&c, &d));
    assert_eq!(transient_runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_class_scope_declared_on_type() {
    struct Ticket;

    impl Injectable for Ticket {
        fn scope() -> Option<Scope> {
            Some(Scope::Transient)
        }

        fn construct(_deps: Dependencies) -> Result<Self, DiError> {
            Ok(Ticket)
        }
    }

    let manager = ModuleManager::new();
    let m = ModuleDefinition::builder("TicketModule")
        .provider(ProviderOptions::injectable::<Ticket>())
        .build();
    manager.load_module(&m, false).await.unwrap();

    let module_ref = manager.get_loaded_module("TicketModule").unwrap();
    let provider = module_ref.local_provider(&Token::of::<Ticket>()).unwrap();
    assert_eq!(provider.scope(), Scope::Transient);
}

#[tokio::test]
async fn test_concurrent_loads_share_one_initialization() {
    let manager = ModuleManager::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let m = ModuleDefinition::builder("SlowModule")
        .provider(ProviderOptions::factory("Slow", Vec::new(), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DiError>(Instance::new(String::from("ready")))
            }
        }))
        .export("Slow")
        .build();

    let (first, second) = futures::join!(
        manager.load_module(&m, false),
        manager.load_module(&m, false)
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let a = first.instance("Slow").unwrap();
    let b = second.instance("Slow").unwrap();
    assert!(Instance::ptr_eq(&a, &b));
    assert_eq!(manager.loaded_module_names(), vec!["SlowModule".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_parallel_loads_never_initialize_twice() {
    for _ in 0..200 {
        let manager = ModuleManager::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let m = ModuleDefinition::builder("RacedModule")
            .provider(counting_factory("Counter", &runs))
            .export("Counter")
            .build();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let m = Arc::clone(&m);
                tokio::spawn(async move { manager.load_module(&m, false).await.map(|_| ()) })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let loaded = manager.get_loaded_module("RacedModule").unwrap();
        let counter = manager.get_service::<usize>(&m, "Counter").unwrap();
        assert_eq!(*counter, 1);
        assert!(loaded.is_initialized());
    }
}

#[tokio::test]
async fn test_local_cache_wins_over_import() {
    let manager = ModuleManager::new();
    let import_runs = Arc::new(AtomicUsize::new(0));
    let library = ModuleDefinition::builder("Library")
        .provider(counting_factory("X", &import_runs))
        .export("X")
        .build();
    let consumer = ModuleDefinition::builder("Consumer")
        .import(&library)
        .provider(ProviderOptions::value("X", Instance::new(100usize)))
        .build();

    manager.load_module(&consumer, false).await.unwrap();
    assert_eq!(import_runs.load(Ordering::SeqCst), 1);

    let module_ref = manager.get_loaded_module("Consumer").unwrap();
    for _ in 0..2 {
        let value = module_ref
            .resolve_provider(&Token::from("X"))
            .await
            .unwrap()
            .downcast::<usize>()
            .unwrap();
        assert_eq!(*value, 100);
    }
    assert!(module_ref.cached_instance(&Token::from("X")).is_some());
    assert_eq!(import_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reexport_chain_shares_instance() {
    let manager = ModuleManager::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let a = ModuleDefinition::builder("A")
        .provider(counting_factory("X", &runs))
        .export("X")
        .build();
    let b = ModuleDefinition::builder("B").import(&a).export("X").build();
    let c = ModuleDefinition::builder("C").import(&b).export("X").build();

    manager.load_module(&c, true).await.unwrap();

    let from_c = manager.get_instance(&c, "X").unwrap();
    let from_a = manager.get_instance(&a, "X").unwrap();
    assert!(Instance::ptr_eq(&from_c, &from_a));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let c_ref = manager.get_loaded_module("C").unwrap();
    let provider = c_ref.local_provider(&Token::from("X")).unwrap();
    assert_eq!(provider.source_module(), "B");
}

#[tokio::test]
async fn test_alias_and_async_factory() {
    let manager = ModuleManager::new();
    let m = ModuleDefinition::builder("LogModule")
        .provider(ProviderOptions::value("ConsoleLogger", Instance::new(String::from("console"))))
        .provider(ProviderOptions::alias("Logger", "ConsoleLogger"))
        .provider(ProviderOptions::factory(
            "Banner",
            vec![Token::from("Logger")],
            |deps| async move {
                let logger = deps.get::<String>(0)?;
                Ok::<_, DiError>(Instance::new(format!("[{}]", logger)))
            },
        ))
        .export("Logger")
        .export("Banner")
        .build();

    manager.load_module(&m, false).await.unwrap();

    let banner = manager.get_service::<String>(&m, "Banner").unwrap();
    assert_eq!(banner.as_str(), "[console]");

    let module_ref = manager.get_loaded_module("LogModule").unwrap();
    let logger = manager.get_instance(&m, "Logger").unwrap();
    let console = module_ref
        .resolve_provider(&Token::from("ConsoleLogger"))
        .await
        .unwrap();
    assert!(Instance::ptr_eq(&logger, &console));
}

#[tokio::test]
async fn test_first_registration_wins() {
    let manager = ModuleManager::new();
    let m = ModuleDefinition::builder("DupModule")
        .provider(ProviderOptions::value("Port", Instance::new(8080u16)))
        .provider(ProviderOptions::value("Port", Instance::new(9090u16)))
        .export("Port")
        .build();

    manager.load_module(&m, false).await.unwrap();
    assert_eq!(*manager.get_service::<u16>(&m, "Port").unwrap(), 8080);
}

#[tokio::test]
async fn test_get_service_errors_are_distinct() {
    let manager = ModuleManager::new();
    let m = ModuleDefinition::builder("M")
        .provider(ProviderOptions::value("Internal", Instance::new(1u8)))
        .provider(ProviderOptions::factory_sync("Broken", Vec::new(), |_| {
            Err(DiError::creation("Broken", "backend offline"))
        }))
        .export("Broken")
        .build();

    assert!(matches!(
        manager.get_instance(&m, "Internal"),
        Err(DiError::ModuleNotLoaded { .. })
    ));

    manager.load_module(&m, false).await.unwrap();

    assert!(matches!(
        manager.get_instance(&m, "Internal"),
        Err(DiError::NotExported { .. })
    ));
    assert!(matches!(
        manager.get_instance(&m, "Broken"),
        Err(DiError::NotPreInitialized { .. })
    ));
    assert!(matches!(
        manager.get_service::<String>(&m, "Broken"),
        Err(DiError::NotPreInitialized { .. })
    ));
}

#[tokio::test]
async fn test_root_cache_and_root_dependencies() {
    let manager = ModuleManager::new();
    let root = ModuleDefinition::builder("AppModule")
        .provider(ProviderOptions::value("Name", Instance::new(String::from("flexdi"))))
        .export("Name")
        .build();
    let feature = ModuleDefinition::builder("FeatureModule")
        .provider(ProviderOptions::injectable::<Greeter>())
        .export(Token::of::<Greeter>())
        .build();

    manager.load_module(&root, true).await.unwrap();
    manager.load_module(&feature, false).await.unwrap();

    let greeter = manager
        .get_service::<Greeter>(&feature, Token::of::<Greeter>())
        .unwrap();
    assert_eq!(greeter.name.as_str(), "flexdi");

    // 未导出但根模块缓存中存在
    let name = manager.get_service::<String>(&feature, "Name").unwrap();
    assert!(Arc::ptr_eq(&name, &greeter.name));
}

/// 根模块的 `Flaky` 首次构造失败，之后成功
fn root_retry_graph(calls: &Arc<AtomicUsize>) -> (ModuleType, ModuleType) {
    let counter = Arc::clone(calls);
    let root = ModuleDefinition::builder("RetryRoot")
        .provider(ProviderOptions::factory_sync("Flaky", Vec::new(), move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(DiError::creation("Flaky", "connection refused"));
            }
            Ok(Instance::new(String::from("connected")))
        }))
        .build();
    let child = ModuleDefinition::builder("RetryChild")
        .provider(ProviderOptions::class(
            "Consumer",
            InjectableDescriptor::new("Consumer", |deps| {
                let flaky = deps.get::<String>(0)?;
                Ok(Instance::new(format!("using {}", flaky)))
            })
            .inject(0, "Flaky"),
        ))
        .build();
    (root, child)
}

#[tokio::test]
async fn test_dependency_retried_through_root() {
    let manager = ModuleManager::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let (root, child) = root_retry_graph(&calls);

    manager.load_module(&root, true).await.unwrap();
    manager.load_module(&child, false).await.unwrap();

    let child_ref = manager.get_loaded_module("RetryChild").unwrap();
    let consumer = child_ref
        .resolve_provider(&Token::from("Consumer"))
        .await
        .unwrap()
        .downcast::<String>()
        .unwrap();
    assert_eq!(consumer.as_str(), "using connected");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_root_retry_can_be_disabled() {
    let mut config = ContainerConfig::default();
    config.resolution.root_retry = false;
    let manager = ModuleManager::with_config(config);
    let calls = Arc::new(AtomicUsize::new(0));
    let (root, child) = root_retry_graph(&calls);

    manager.load_module(&root, true).await.unwrap();
    manager.load_module(&child, false).await.unwrap();

    let child_ref = manager.get_loaded_module("RetryChild").unwrap();
    let err = child_ref
        .resolve_provider(&Token::from("Consumer"))
        .await
        .unwrap_err();
    match err {
        DiError::UnresolvedDependencies { token, missing } => {
            assert_eq!(token, "Consumer");
            assert_eq!(missing, vec!["Flaky".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

fn parent_lookup_graph() -> (ModuleType, ModuleType, ModuleType) {
    let root = leaf("RootModule");
    let child = ModuleDefinition::builder("ChildModule")
        .provider(ProviderOptions::factory_sync(
            "Greeting",
            vec![Token::from("Name")],
            |deps| {
                let name = deps.get::<String>(0)?;
                Ok(Instance::new(format!("hello {}", name)))
            },
        ))
        .build();
    let parent = ModuleDefinition::builder("ParentModule")
        .import(&child)
        .provider(ProviderOptions::value("Name", Instance::new(String::from("parent"))))
        .build();
    (root, parent, child)
}

#[tokio::test]
async fn test_parent_modules_are_searched_last() {
    let manager = ModuleManager::new();
    let (root, parent, _child) = parent_lookup_graph();

    manager.load_module(&root, true).await.unwrap();
    manager.load_module(&parent, false).await.unwrap();

    let child_ref = manager.get_loaded_module("ChildModule").unwrap();
    let greeting = child_ref
        .resolve_provider(&Token::from("Greeting"))
        .await
        .unwrap()
        .downcast::<String>()
        .unwrap();
    assert_eq!(greeting.as_str(), "hello parent");
}

#[tokio::test]
async fn test_parent_lookup_can_be_disabled() {
    let mut config = ContainerConfig::default();
    config.resolution.parent_lookup = false;
    let manager = ModuleManager::with_config(config);
    let (root, parent, _child) = parent_lookup_graph();

    manager.load_module(&root, true).await.unwrap();
    manager.load_module(&parent, false).await.unwrap();

    let child_ref = manager.get_loaded_module("ChildModule").unwrap();
    let err = child_ref
        .resolve_provider(&Token::from("Greeting"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DiError::UnresolvedDependencies { ref missing, .. } if missing == &vec!["Name".to_string()]
    ));

    let err = child_ref.resolve_provider(&Token::from("Name")).await.unwrap_err();
    match err {
        DiError::ProviderNotFound { token, module, attempts } => {
            assert_eq!(token, "Name");
            assert_eq!(module, "ChildModule");
            assert_eq!(attempts.len(), 1);
            assert!(attempts[0].starts_with("root RootModule"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unload_cascades_to_sole_imports() {
    let manager = ModuleManager::new();
    let b = leaf("B");
    let a = ModuleDefinition::builder("A").import(&b).build();

    manager.load_module(&a, false).await.unwrap();
    assert!(manager.is_module_loaded(&b));

    assert_eq!(manager.unload_module(&a), UnloadOutcome::Unloaded);
    assert!(!manager.is_module_loaded(&a));
    assert!(!manager.is_module_loaded(&b));
    assert!(manager.loaded_module_names().is_empty());
}

#[tokio::test]
async fn test_unload_keeps_shared_imports_until_last_importer() {
    let manager = ModuleManager::new();
    let b = leaf("B");
    let a = ModuleDefinition::builder("A").import(&b).build();
    let c = ModuleDefinition::builder("C").import(&b).build();

    manager.load_module(&a, false).await.unwrap();
    manager.load_module(&c, false).await.unwrap();

    assert_eq!(manager.unload_module(&a), UnloadOutcome::Unloaded);
    assert!(manager.is_module_loaded(&b));
    assert_eq!(manager.find_dependent_modules(&b), vec!["C".to_string()]);

    assert_eq!(
        manager.unload_module(&b),
        UnloadOutcome::HasDependents(vec!["C".to_string()])
    );

    assert_eq!(manager.unload_module(&c), UnloadOutcome::Unloaded);
    assert!(!manager.is_module_loaded(&b));
}

#[tokio::test]
async fn test_root_and_singleton_modules_are_retained() {
    let manager = ModuleManager::new();
    let shared = ModuleDefinition::builder("SharedModule")
        .singleton()
        .provider(ProviderOptions::value("Clock", Instance::new(0u64)))
        .export("Clock")
        .build();
    let root = ModuleDefinition::builder("RootModule")
        .import(&shared)
        .provider(ProviderOptions::value("Name", Instance::new(String::from("root"))))
        .export("Name")
        .build();

    manager.load_module(&root, true).await.unwrap();

    assert_eq!(manager.unload_module(&root), UnloadOutcome::RootRetained);
    assert!(manager.is_module_loaded(&root));
    assert_eq!(*manager.get_service::<String>(&root, "Name").unwrap(), "root");

    assert_eq!(manager.unload_module(&shared), UnloadOutcome::SingletonRetained);
    assert!(manager.is_module_loaded(&shared));

    assert_eq!(manager.unload_module(&leaf("Unknown")), UnloadOutcome::NotLoaded);
}

#[tokio::test]
async fn test_unloaded_module_reports_not_loaded() {
    let manager = ModuleManager::new();
    let m = ModuleDefinition::builder("M")
        .provider(ProviderOptions::value("X", Instance::new(1i32)))
        .export("X")
        .build();

    let handle = manager.load_module(&m, false).await.unwrap();
    assert!(handle.is_loaded());

    assert!(manager.unload_module(&m).is_unloaded());
    assert!(!manager.is_module_loaded(&m));
    assert!(!handle.is_loaded());
    assert!(matches!(handle.instance("X"), Err(DiError::ModuleNotLoaded { .. })));
}

#[tokio::test]
async fn test_singleton_importer_counts_as_dependent() {
    let n = leaf("PluginModule");
    let s = ModuleDefinition::builder("RegistryModule")
        .singleton()
        .import(&n)
        .build();

    let manager = ModuleManager::new();
    manager.load_module(&s, false).await.unwrap();
    assert_eq!(
        manager.unload_module(&n),
        UnloadOutcome::HasDependents(vec!["RegistryModule".to_string()])
    );

    let mut config = ContainerConfig::default();
    config.unload.dependent_scan = DependentScan::NonSingletonOnly;
    let legacy = ModuleManager::with_config(config);
    legacy.load_module(&s, false).await.unwrap();
    assert_eq!(legacy.unload_module(&n), UnloadOutcome::Unloaded);
}

#[tokio::test]
async fn test_circular_import_is_rejected() {
    let manager = ModuleManager::new();
    let first_a = leaf("A");
    let b = ModuleDefinition::builder("B").import(&first_a).build();
    let a = ModuleDefinition::builder("A").import(&b).build();

    let err = manager.load_module(&a, false).await.unwrap_err();
    match err {
        DiError::CircularImport { chain } => assert_eq!(chain, vec!["A", "B", "A"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_invalid_module_descriptor() {
    let manager = ModuleManager::new();
    let plain = ModuleDefinition::undeclared("PlainStruct");

    let err = manager.load_module(&plain, false).await.unwrap_err();
    assert!(matches!(err, DiError::InvalidModule { ref module } if module == "PlainStruct"));

    let importer = ModuleDefinition::builder("Importer").import(&plain).build();
    let err = manager.load_module(&importer, false).await.unwrap_err();
    assert!(matches!(err, DiError::InvalidModule { ref module } if module == "PlainStruct"));
}

#[tokio::test]
async fn test_failed_load_can_be_retried() {
    let manager = ModuleManager::new();
    let m = ModuleDefinition::builder("M")
        .provider(ProviderOptions::class(
            "Needy",
            InjectableDescriptor::new("NeedyImpl", |_| Ok(Instance::new(()))).inject(0, "Y"),
        ))
        .build();

    for _ in 0..2 {
        let err = manager.load_module(&m, true).await.unwrap_err();
        assert!(matches!(err, DiError::MissingDependencies { .. }));
    }
    assert!(!manager.is_root_module(&m));
    assert!(manager.root_module().is_none());
}

#[tokio::test]
async fn test_module_status_and_reset() {
    let manager = ModuleManager::new();
    let b = leaf("B");
    let a = ModuleDefinition::builder("A").import(&b).build();

    manager.load_module(&a, true).await.unwrap();
    let a_ref = manager.get_loaded_module("A").unwrap();
    assert_eq!(a_ref.status(), ModuleStatus::Initialized);
    assert_eq!(manager.loaded_module_names(), vec!["A".to_string(), "B".to_string()]);
    assert!(manager.is_root_module(&a));

    manager.reset();

    assert!(manager.loaded_module_names().is_empty());
    assert!(manager.root_module().is_none());
    assert!(!manager.is_module_loaded(&a));
}
