//! # flexdi 演示程序
//!
//! 构建一个小型模块图，以根模块方式加载，读取导出的服务，然后演示级联卸载。
//!
//! ```bash
//! cargo run -- --verbose
//! cargo run -- --config flexdi.toml --log-format json
//! cargo run -- --profile production
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use flexdi::config::ConfigLoader;
use flexdi::logging::{init_logging, LogFormat, LoggingConfig, LoggingEnvironment};
use flexdi::{
    DiError, Injectable, Instance, ModuleDefinition, ModuleManager, ModuleType,
    OnDisposeInstance, ProviderOptions, Scope, Token,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 配置文件路径（默认读取当前目录下的 flexdi.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 日志格式：pretty、compact 或 json
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// 日志预设：development、testing 或 production（优先于配置文件中的 [logging]）
    #[arg(long)]
    profile: Option<LoggingEnvironment>,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

struct Clock {
    ticks: AtomicU64,
}

impl Clock {
    fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }
}

struct Store {
    clock: Arc<Clock>,
    name: String,
}

impl Injectable for Store {
    fn inject() -> Vec<(usize, Token)> {
        vec![(0, Token::from("Clock"))]
    }

    fn construct(deps: flexdi::Dependencies) -> Result<Self, DiError> {
        Ok(Self {
            clock: deps.get::<Clock>(0)?,
            name: "memory".to_string(),
        })
    }

    fn into_instance(self) -> Instance {
        Instance::disposable(self)
    }
}

impl OnDisposeInstance for Store {
    fn on_dispose_instance(&self) {
        info!(store = %self.name, "Store disposed");
    }
}

struct Reporter {
    store: Arc<Store>,
}

impl Reporter {
    fn report(&self) -> String {
        format!("store={} tick={}", self.store.name, self.store.clock.tick())
    }
}

struct DemoGraph {
    app: ModuleType,
    feature: ModuleType,
    storage: ModuleType,
    shared: ModuleType,
}

fn build_graph() -> DemoGraph {
    let shared = ModuleDefinition::builder("SharedModule")
        .singleton()
        .provider(ProviderOptions::value(
            "Clock",
            Instance::new(Clock {
                ticks: AtomicU64::new(0),
            }),
        ))
        .export("Clock")
        .build();

    let storage = ModuleDefinition::builder("StorageModule")
        .import(&shared)
        .provider(ProviderOptions::injectable::<Store>())
        .provider(ProviderOptions::alias("Store", Token::of::<Store>()))
        .export("Store")
        .build();

    let feature = ModuleDefinition::builder("FeatureModule")
        .import(&storage)
        .provider(ProviderOptions::factory(
            "Reporter",
            vec![Token::from("Store")],
            |deps| async move {
                let store = deps.get::<Store>(0)?;
                Ok::<_, DiError>(Instance::new(Reporter { store }))
            },
        ))
        .provider(ProviderOptions::class_scoped(
            "RequestId",
            flexdi::InjectableDescriptor::new("RequestId", |_| {
                static NEXT: AtomicU64 = AtomicU64::new(1);
                Ok(Instance::new(NEXT.fetch_add(1, Ordering::Relaxed)))
            }),
            Scope::Transient,
        ))
        .export("Reporter")
        .export("Store")
        .build();

    let app = ModuleDefinition::builder("AppModule")
        .import(&shared)
        .provider(ProviderOptions::value("AppName", Instance::new(String::from("flexdi-demo"))))
        .export("AppName")
        .build();

    DemoGraph {
        app,
        feature,
        storage,
        shared,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let config = loader.load_config().context("Failed to load configuration")?;

    let mut logging = match cli.profile {
        Some(environment) => LoggingConfig::for_environment(environment),
        None if cli.verbose => LoggingConfig::development(),
        None => LoggingConfig::from_settings(&config.logging)?,
    };
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    if cli.verbose {
        logging.level = Level::DEBUG;
    }
    init_logging(logging)?;

    let manager = ModuleManager::with_config(config);
    let graph = build_graph();

    let app = manager.load_module(&graph.app, true).await?;
    let feature = manager.load_module(&graph.feature, false).await?;

    let app_name = app.get::<String>("AppName")?;
    let reporter = feature.get::<Reporter>("Reporter")?;
    println!("{} loaded: {}", app_name, manager.loaded_module_names().join(", "));
    println!("Reporter: {}", reporter.report());
    println!("Reporter: {}", reporter.report());

    if let Some(feature_ref) = manager.get_loaded_module(feature.name()) {
        let first = feature_ref.resolve_provider(&Token::from("RequestId")).await?;
        let second = feature_ref.resolve_provider(&Token::from("RequestId")).await?;
        println!(
            "Transient RequestId: {:?} then {:?}",
            first.downcast::<u64>(),
            second.downcast::<u64>()
        );
    }

    for module in [&graph.storage, &graph.feature, &graph.shared, &graph.app] {
        let outcome = manager.unload_module(module);
        println!("unload {:<14} -> {:?}", module.name(), outcome);
    }
    println!("Still loaded: {}", manager.loaded_module_names().join(", "));

    Ok(())
}
