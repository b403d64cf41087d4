//! 模块记录
//!
//! `ModuleRef` 保存一个已加载模块的运行时状态：本地提供者、导入的模块、
//! 导出集合与实例缓存，并驱动模块初始化和按标识的逐级查找。

use super::container::{
    Dependencies, FactoryFn, Instance, ModuleDescriptor, ModuleType, ProviderOptions, Scope,
    Token,
};
use super::manager::{ModuleManager, WeakManager};
use super::provider::{ProviderKind, ProviderRef};
use crate::config::ResolutionConfig;
use crate::errors::DiError;
use dashmap::DashMap;
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    /// 未初始化
    NotInitialized,
    /// 初始化中
    Initializing,
    /// 已初始化
    Initialized,
}

/// 查找步骤，按顺序尝试，前一步未命中才进入下一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchStep {
    /// 本地瞬态提供者，总是重新创建
    LocalTransient,
    /// 本地实例缓存
    LocalCache,
    /// 本地其它提供者
    LocalProvider,
    /// 导出该标识的导入模块
    Imports,
    /// 根模块
    RootModule,
    /// 导入了当前模块的父模块
    ParentModules,
}

const SEARCH_ORDER: [SearchStep; 6] = [
    SearchStep::LocalTransient,
    SearchStep::LocalCache,
    SearchStep::LocalProvider,
    SearchStep::Imports,
    SearchStep::RootModule,
    SearchStep::ParentModules,
];

enum InitEntry {
    Done,
    Wait(watch::Receiver<bool>),
    Run(InitGuard),
}

/// 初始化进行中的标记；无论成功、失败还是被取消，丢弃时都会唤醒等待者
struct InitGuard {
    module: Arc<ModuleRef>,
    done: watch::Sender<bool>,
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        *self.module.init_gate.lock() = None;
        self.done.send_replace(true);
    }
}

pub struct ModuleRef {
    definition: ModuleType,
    providers: DashMap<Token, Arc<ProviderRef>>,
    imports: RwLock<Vec<Arc<ModuleRef>>>,
    exports: RwLock<Vec<Token>>,
    instance_cache: DashMap<Token, Instance>,
    initialized: AtomicBool,
    init_gate: Mutex<Option<watch::Receiver<bool>>>,
    root_module: RwLock<Option<Weak<ModuleRef>>>,
    manager: WeakManager,
    settings: ResolutionConfig,
}

impl ModuleRef {
    pub(crate) fn new(definition: ModuleType, manager: &ModuleManager) -> Arc<Self> {
        Arc::new(Self {
            definition,
            providers: DashMap::new(),
            imports: RwLock::new(Vec::new()),
            exports: RwLock::new(Vec::new()),
            instance_cache: DashMap::new(),
            initialized: AtomicBool::new(false),
            init_gate: Mutex::new(None),
            root_module: RwLock::new(None),
            manager: manager.downgrade(),
            settings: manager.config().resolution,
        })
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &ModuleType {
        &self.definition
    }

    pub fn is_singleton(&self) -> bool {
        self.definition.is_singleton()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ModuleStatus {
        let gate = self.init_gate.lock();
        if self.is_initialized() {
            ModuleStatus::Initialized
        } else if gate.is_some() {
            ModuleStatus::Initializing
        } else {
            ModuleStatus::NotInitialized
        }
    }

    pub fn is_exported(&self, token: &Token) -> bool {
        self.exports.read().contains(token)
    }

    pub fn exports(&self) -> Vec<Token> {
        self.exports.read().clone()
    }

    pub fn imports(&self) -> Vec<Arc<ModuleRef>> {
        self.imports.read().clone()
    }

    /// 当前导入列表中是否包含指定名称的模块
    pub fn imports_module(&self, name: &str) -> bool {
        self.imports.read().iter().any(|module| module.name() == name)
    }

    pub fn local_provider(&self, token: &Token) -> Option<Arc<ProviderRef>> {
        self.providers.get(token).map(|entry| Arc::clone(entry.value()))
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn cached_instance(&self, token: &Token) -> Option<Instance> {
        self.instance_cache.get(token).map(|entry| entry.value().clone())
    }

    pub fn root_module(&self) -> Option<Arc<ModuleRef>> {
        self.root_module.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn settings(&self) -> ResolutionConfig {
        self.settings
    }

    fn is_self(&self, other: &Arc<ModuleRef>) -> bool {
        std::ptr::eq(Arc::as_ptr(other), self)
    }

    /// 初始化模块
    ///
    /// 已初始化时立即返回；另一个调用正在初始化时等待其完成后返回，
    /// 保证每个模块最多只执行一次初始化流程。
    pub fn initialize(
        self: &Arc<Self>,
        root: Option<Arc<ModuleRef>>,
    ) -> BoxFuture<'static, Result<(), DiError>> {
        self.initialize_within(root, Vec::new())
    }

    fn initialize_within(
        self: &Arc<Self>,
        root: Option<Arc<ModuleRef>>,
        chain: Vec<String>,
    ) -> BoxFuture<'static, Result<(), DiError>> {
        let this = Arc::clone(self);
        async move {
            let guard = match this.enter_initialization() {
                InitEntry::Done => return Ok(()),
                InitEntry::Wait(mut done) => {
                    debug!(module = %this.name(), "Module is initializing, waiting");
                    // 发送端在清理时总是先写入 true
                    let _ = done.wait_for(|finished| *finished).await;
                    return Ok(());
                }
                InitEntry::Run(guard) => guard,
            };

            let result = this.run_initialization(root, chain).await;
            match &result {
                Ok(()) => {
                    this.initialized.store(true, Ordering::Release);
                    debug!(
                        module = %this.name(),
                        providers = this.provider_count(),
                        exports = this.exports.read().len(),
                        "Module initialized"
                    );
                }
                Err(err) => debug!(module = %this.name(), error = %err, "Module initialization failed"),
            }
            drop(guard);
            result
        }
        .boxed()
    }

    fn enter_initialization(self: &Arc<Self>) -> InitEntry {
        let mut gate = self.init_gate.lock();
        if self.is_initialized() {
            return InitEntry::Done;
        }
        if let Some(done) = gate.as_ref() {
            return InitEntry::Wait(done.clone());
        }
        let (done, receiver) = watch::channel(false);
        *gate = Some(receiver);
        InitEntry::Run(InitGuard {
            module: Arc::clone(self),
            done,
        })
    }

    async fn run_initialization(
        self: &Arc<Self>,
        root: Option<Arc<ModuleRef>>,
        mut chain: Vec<String>,
    ) -> Result<(), DiError> {
        let definition = Arc::clone(&self.definition);
        let descriptor = definition.descriptor()?;
        let manager = self.manager.upgrade().ok_or_else(|| DiError::ModuleUnavailable {
            module: "ModuleManager".to_string(),
        })?;

        let root = root.unwrap_or_else(|| Arc::clone(self));
        *self.root_module.write() = Some(Arc::downgrade(&root));
        chain.push(self.name().to_string());

        for import in &descriptor.imports {
            if let Some(position) = chain.iter().position(|name| name == import.name()) {
                let mut cycle = chain[position..].to_vec();
                cycle.push(import.name().to_string());
                return Err(DiError::CircularImport { chain: cycle });
            }

            let imported = match manager.get_loaded_module(import.name()) {
                Some(existing) => existing,
                None => {
                    let created = ModuleRef::new(Arc::clone(import), &manager);
                    created
                        .initialize_within(Some(Arc::clone(&root)), chain.clone())
                        .await?;
                    manager.register_module(&created);
                    created
                }
            };
            self.imports.write().push(Arc::clone(&imported));

            for token in &descriptor.exports {
                if imported.is_exported(token) && !self.providers.contains_key(token) {
                    self.link_reexport(token, &imported).await?;
                }
            }
        }

        for options in &descriptor.providers {
            self.register_provider(options, descriptor).await?;
        }

        for token in &descriptor.exports {
            self.add_export(token);
            if self.providers.contains_key(token) {
                continue;
            }

            let source = self
                .imports
                .read()
                .iter()
                .find(|module| module.is_exported(token))
                .cloned();
            match source {
                Some(imported) => self.link_reexport(token, &imported).await?,
                None => warn!(
                    module = %self.name(),
                    token = %token,
                    "Module {} exports token {} not found",
                    self.name(),
                    token
                ),
            }
        }

        self.pre_initialize_exports().await;
        Ok(())
    }

    fn add_export(&self, token: &Token) {
        let mut exports = self.exports.write();
        if !exports.contains(token) {
            exports.push(token.clone());
        }
    }

    /// 为导入模块导出的标识建立再导出，并立即缓存实例供同步读取
    async fn link_reexport(
        self: &Arc<Self>,
        token: &Token,
        imported: &Arc<ModuleRef>,
    ) -> Result<(), DiError> {
        let provider = ProviderRef::reexport(
            token.clone(),
            Arc::downgrade(self),
            self.name(),
            imported.name(),
        );
        self.providers.insert(token.clone(), Arc::new(provider));

        let instance = imported.resolve_provider(token).await?;
        self.instance_cache.insert(token.clone(), instance);
        debug!(
            module = %self.name(),
            token = %token,
            source = %imported.name(),
            "Re-exported token from import"
        );
        Ok(())
    }

    async fn pre_initialize_exports(&self) {
        for token in self.exports() {
            if self.instance_cache.contains_key(&token) {
                continue;
            }
            let Some(provider) = self.local_provider(&token) else {
                continue;
            };
            match provider.resolve().await {
                Ok(instance) => {
                    self.instance_cache.insert(token, instance);
                }
                Err(err) => error!(
                    module = %self.name(),
                    token = %token,
                    error = %err,
                    "Failed to pre-initialize export {}",
                    token
                ),
            }
        }
    }

    /// 注册提供者；同一标识先注册者生效
    async fn register_provider(
        self: &Arc<Self>,
        options: &ProviderOptions,
        descriptor: &ModuleDescriptor,
    ) -> Result<(), DiError> {
        let token = options.provide().clone();
        if self.providers.contains_key(&token) {
            debug!(module = %self.name(), token = %token, "Provider already registered, skipping");
            return Ok(());
        }

        let owner = Arc::downgrade(self);
        let provider = match options {
            ProviderOptions::Class { class, scope, .. } => {
                let dependencies = class.injection_tokens();
                let missing: Vec<String> = dependencies
                    .iter()
                    .filter(|dep| !self.can_satisfy(dep))
                    .map(Token::debug_name)
                    .collect();
                if !missing.is_empty() {
                    return Err(DiError::MissingDependencies {
                        token: token.debug_name(),
                        class: class.name().to_string(),
                        module: self.name().to_string(),
                        missing,
                    });
                }

                let constructor = class.constructor();
                let factory: FactoryFn =
                    Arc::new(move |deps| future::ready(constructor(deps)).boxed());
                ProviderRef::new(token.clone(), ProviderKind::Class, owner, self.name())
                    .with_scope((*scope).or(class.scope()).unwrap_or_default())
                    .with_dependencies(dependencies)
                    .with_factory(factory)
            }
            ProviderOptions::Value { value, .. } => {
                ProviderRef::new(token.clone(), ProviderKind::Value, owner, self.name())
                    .with_instance(value.clone())
            }
            ProviderOptions::Factory { factory, deps, .. } => {
                ProviderRef::new(token.clone(), ProviderKind::Factory, owner, self.name())
                    .with_dependencies(deps.clone())
                    .with_factory(Arc::clone(factory))
            }
            ProviderOptions::Alias { use_token, .. } => {
                let alias = token.debug_name();
                let factory: FactoryFn = Arc::new(move |deps: Dependencies| {
                    let target = deps.into_instances().into_iter().next().ok_or_else(|| {
                        DiError::MissingArgument {
                            class: alias.clone(),
                            index: 0,
                        }
                    });
                    future::ready(target).boxed()
                });
                ProviderRef::new(token.clone(), ProviderKind::Token, owner, self.name())
                    .with_dependencies(vec![use_token.clone()])
                    .with_factory(factory)
            }
        };

        let provider = Arc::new(provider);
        self.providers.insert(token.clone(), Arc::clone(&provider));
        debug!(
            module = %self.name(),
            token = %token,
            kind = ?provider.kind(),
            scope = ?provider.scope(),
            "Registered provider"
        );

        if descriptor.declares_export(&token) {
            match provider.resolve().await {
                Ok(instance) => {
                    self.instance_cache.insert(token, instance);
                }
                Err(err) => error!(
                    module = %self.name(),
                    token = %token,
                    error = %err,
                    "Failed to pre-initialize provider {}",
                    token
                ),
            }
        }
        Ok(())
    }

    /// 结构性检查：本地、导入模块的导出或根模块的本地提供者中是否存在该标识
    fn can_satisfy(&self, token: &Token) -> bool {
        if self.providers.contains_key(token) {
            return true;
        }
        if self.imports.read().iter().any(|module| module.is_exported(token)) {
            return true;
        }
        self.root_module()
            .filter(|root| !self.is_self(root))
            .is_some_and(|root| root.providers.contains_key(token))
    }

    /// 按固定顺序查找标识对应的实例
    ///
    /// 本地提供者的失败直接返回；委托给其它模块的失败被记录下来并继续下一条路径，
    /// 全部未命中时返回带有这些记录的 `ProviderNotFound`。
    pub fn resolve_provider(self: &Arc<Self>, token: &Token) -> BoxFuture<'static, Result<Instance, DiError>> {
        self.search(token.clone(), Vec::new())
    }

    fn search(
        self: &Arc<Self>,
        token: Token,
        mut path: Vec<String>,
    ) -> BoxFuture<'static, Result<Instance, DiError>> {
        let this = Arc::clone(self);
        async move {
            path.push(this.name().to_string());
            let mut attempts = Vec::new();
            for step in SEARCH_ORDER {
                if let Some(instance) = this.try_step(step, &token, &path, &mut attempts).await? {
                    return Ok(instance);
                }
            }
            Err(DiError::ProviderNotFound {
                token: token.debug_name(),
                module: this.name().to_string(),
                attempts,
            })
        }
        .boxed()
    }

    async fn try_step(
        self: &Arc<Self>,
        step: SearchStep,
        token: &Token,
        path: &[String],
        attempts: &mut Vec<String>,
    ) -> Result<Option<Instance>, DiError> {
        match step {
            SearchStep::LocalTransient => match self.local_provider(token) {
                Some(provider) if provider.scope() == Scope::Transient => {
                    provider.resolve().await.map(Some)
                }
                _ => Ok(None),
            },
            SearchStep::LocalCache => Ok(self.cached_instance(token)),
            SearchStep::LocalProvider => {
                let Some(provider) = self.local_provider(token) else {
                    return Ok(None);
                };
                let instance = provider.resolve().await?;
                if provider.scope() == Scope::Singleton {
                    self.instance_cache.insert(token.clone(), instance.clone());
                }
                Ok(Some(instance))
            }
            SearchStep::Imports => {
                let candidates: Vec<_> = self
                    .imports
                    .read()
                    .iter()
                    .filter(|module| module.is_exported(token))
                    .cloned()
                    .collect();
                Ok(delegate(candidates, "import", token, path, attempts).await)
            }
            SearchStep::RootModule => {
                let root = self.root_module().filter(|root| !self.is_self(root));
                Ok(delegate(root.into_iter().collect(), "root", token, path, attempts).await)
            }
            SearchStep::ParentModules => {
                if !self.settings.parent_lookup {
                    return Ok(None);
                }
                let parents = self
                    .manager
                    .upgrade()
                    .map(|manager| manager.find_parent_modules(self.name()))
                    .unwrap_or_default();
                Ok(delegate(parents, "parent", token, path, attempts).await)
            }
        }
    }

    /// 释放本地提供者并清空状态；导入的模块是共享引用，不在此释放
    pub fn dispose(&self) {
        let providers: Vec<_> = self
            .providers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for provider in &providers {
            provider.dispose();
        }

        self.providers.clear();
        self.exports.write().clear();
        self.imports.write().clear();
        self.instance_cache.clear();
        self.initialized.store(false, Ordering::Release);
        *self.root_module.write() = None;
        debug!(module = %self.name(), disposed = providers.len(), "Module disposed");
    }
}

/// 依次委托给候选模块，跳过已在当前查找路径上的模块
async fn delegate(
    candidates: Vec<Arc<ModuleRef>>,
    via: &str,
    token: &Token,
    path: &[String],
    attempts: &mut Vec<String>,
) -> Option<Instance> {
    for candidate in candidates {
        if path.iter().any(|name| name == candidate.name()) {
            continue;
        }
        match candidate.search(token.clone(), path.to_vec()).await {
            Ok(instance) => return Some(instance),
            Err(err) => {
                debug!(
                    token = %token,
                    via,
                    module = %candidate.name(),
                    error = %err,
                    "Lookup path failed, trying next"
                );
                attempts.push(format!("{via} {}: {err}", candidate.name()));
            }
        }
    }
    None
}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRef")
            .field("name", &self.name())
            .field("singleton", &self.is_singleton())
            .field("status", &self.status())
            .field("providers", &self.provider_count())
            .field("exports", &self.exports())
            .finish()
    }
}
