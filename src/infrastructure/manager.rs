//! 模块注册表
//!
//! `ModuleManager` 记录已加载的模块、导入关系图以及正在进行的初始化，
//! 负责模块的加载、同步取用服务和安全卸载。它是一个可廉价克隆的句柄，
//! 由启动流程显式创建并传递，不存在全局实例。

use super::container::{Instance, ModuleType, Token};
use super::module::ModuleRef;
use crate::config::{ContainerConfig, DependentScan};
use crate::errors::DiError;
use crate::logging::OperationTimer;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

type PendingInit = Shared<BoxFuture<'static, Result<(), DiError>>>;

struct ManagerState {
    config: ContainerConfig,
    modules: DashMap<String, Arc<ModuleRef>>,
    singleton_modules: DashMap<String, Arc<ModuleRef>>,
    root: RwLock<Option<Arc<ModuleRef>>>,
    /// 被导入模块名 -> 导入它的模块名
    module_imports: RwLock<HashMap<String, BTreeSet<String>>>,
    in_flight: Mutex<HashMap<String, PendingInit>>,
}

impl ManagerState {
    fn new(config: ContainerConfig) -> Self {
        Self {
            config,
            modules: DashMap::new(),
            singleton_modules: DashMap::new(),
            root: RwLock::new(None),
            module_imports: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

/// 卸载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnloadOutcome {
    /// 已释放并从注册表移除
    Unloaded,
    /// 模块未加载
    NotLoaded,
    /// 单例模块不会被单独卸载
    SingletonRetained,
    /// 根模块不会被卸载
    RootRetained,
    /// 仍被其它已加载模块导入
    HasDependents(Vec<String>),
}

impl UnloadOutcome {
    pub fn is_unloaded(&self) -> bool {
        matches!(self, UnloadOutcome::Unloaded)
    }
}

/// 模块管理器
#[derive(Clone)]
pub struct ModuleManager {
    state: Arc<ManagerState>,
}

/// 模块记录持有的弱引用，避免注册表与模块之间形成引用环
#[derive(Clone)]
pub(crate) struct WeakManager(Weak<ManagerState>);

impl WeakManager {
    pub(crate) fn upgrade(&self) -> Option<ModuleManager> {
        self.0.upgrade().map(|state| ModuleManager { state })
    }
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleManager {
    /// 使用默认配置创建
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        Self {
            state: Arc::new(ManagerState::new(config)),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.state.config
    }

    pub(crate) fn downgrade(&self) -> WeakManager {
        WeakManager(Arc::downgrade(&self.state))
    }

    /// 登记已初始化的模块并记录其导入关系；单例模块先登记者生效
    pub fn register_module(&self, module: &Arc<ModuleRef>) {
        let name = module.name().to_string();
        if module.is_singleton() {
            self.state
                .singleton_modules
                .entry(name.clone())
                .or_insert_with(|| Arc::clone(module));
        } else {
            self.state.modules.insert(name.clone(), Arc::clone(module));
        }

        let mut graph = self.state.module_imports.write();
        for import in module.definition().imports() {
            graph
                .entry(import.name().to_string())
                .or_default()
                .insert(name.clone());
        }
        debug!(module = %name, singleton = module.is_singleton(), "Registered module");
    }

    pub fn get_loaded_module(&self, name: &str) -> Option<Arc<ModuleRef>> {
        self.state
            .modules
            .get(name)
            .or_else(|| self.state.singleton_modules.get(name))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_module_loaded(&self, module: &ModuleType) -> bool {
        self.get_loaded_module(module.name())
            .is_some_and(|loaded| loaded.is_initialized())
    }

    pub fn root_module(&self) -> Option<Arc<ModuleRef>> {
        self.state.root.read().clone()
    }

    pub fn is_root_module(&self, module: &ModuleType) -> bool {
        self.state
            .root
            .read()
            .as_ref()
            .is_some_and(|root| root.name() == module.name())
    }

    /// 已登记模块的名称（排序）
    pub fn loaded_module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .modules
            .iter()
            .chain(self.state.singleton_modules.iter())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// 加载模块
    ///
    /// 已加载时直接返回句柄；同名模块正在初始化时等待同一个初始化过程，
    /// 不会重复初始化。
    pub async fn load_module(
        &self,
        module: &ModuleType,
        is_root: bool,
    ) -> Result<ModuleHandle, DiError> {
        if self.is_module_loaded(module) {
            return Ok(self.handle(module));
        }

        let pending = {
            let mut in_flight = self.state.in_flight.lock();
            match in_flight.get(module.name()) {
                Some(pending) => {
                    debug!(module = %module.name(), "Module initialization in flight, joining");
                    pending.clone()
                }
                None => {
                    // 领先者先注册模块再移除进行中记录，锁内复查即可避免重复初始化
                    if self.is_module_loaded(module) {
                        return Ok(self.handle(module));
                    }
                    module.descriptor()?;
                    let pending = self.start_initialization(module, is_root);
                    in_flight.insert(module.name().to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await?;
        Ok(self.handle(module))
    }

    fn start_initialization(&self, module: &ModuleType, is_root: bool) -> PendingInit {
        let module_ref = ModuleRef::new(Arc::clone(module), self);
        let root = if is_root {
            *self.state.root.write() = Some(Arc::clone(&module_ref));
            Some(Arc::clone(&module_ref))
        } else {
            self.root_module()
        };

        let manager = self.downgrade();
        let name = module.name().to_string();
        async move {
            let _in_flight = InFlightGuard {
                manager: manager.clone(),
                name: name.clone(),
            };
            let timer = OperationTimer::new("load_module").with_metadata("module", &name);

            let result = module_ref.initialize(root).await;
            let Some(manager) = manager.upgrade() else {
                return result;
            };
            match &result {
                Ok(()) => {
                    manager.register_module(&module_ref);
                    info!(module = %name, root = is_root, "Module loaded");
                }
                Err(err) => {
                    let mut root = manager.state.root.write();
                    if root.as_ref().is_some_and(|r| Arc::ptr_eq(r, &module_ref)) {
                        *root = None;
                    }
                    warn!(module = %name, error = %err, "Module failed to load");
                }
            }
            timer.finish();
            result
        }
        .boxed()
        .shared()
    }

    fn handle(&self, module: &ModuleType) -> ModuleHandle {
        ModuleHandle {
            manager: self.clone(),
            module: Arc::clone(module),
        }
    }

    /// 同步读取模块导出的实例，只读取初始化期间填充的缓存，从不触发解析
    pub fn get_instance(
        &self,
        module: &ModuleType,
        token: impl Into<Token>,
    ) -> Result<Instance, DiError> {
        let token = token.into();
        let module_ref = self
            .get_loaded_module(module.name())
            .ok_or_else(|| DiError::ModuleNotLoaded {
                module: module.name().to_string(),
            })?;
        let from_root = || {
            self.root_module()
                .and_then(|root| root.cached_instance(&token))
        };

        if !module_ref.is_exported(&token) {
            return from_root().ok_or_else(|| DiError::NotExported {
                token: token.debug_name(),
                module: module.name().to_string(),
            });
        }

        module_ref
            .cached_instance(&token)
            .or_else(from_root)
            .ok_or_else(|| DiError::NotPreInitialized {
                token: token.debug_name(),
                module: module.name().to_string(),
            })
    }

    pub fn get_service<T: Any + Send + Sync>(
        &self,
        module: &ModuleType,
        token: impl Into<Token>,
    ) -> Result<Arc<T>, DiError> {
        let token = token.into();
        let instance = self.get_instance(module, &token)?;
        instance.downcast::<T>().ok_or_else(|| DiError::TypeMismatch {
            token: token.debug_name(),
            expected: std::any::type_name::<T>().to_string(),
            actual: instance.type_name().to_string(),
        })
    }

    /// 卸载模块
    ///
    /// 单例模块、根模块以及仍被其它模块导入的模块保持加载；
    /// 卸载成功后，继续卸载已没有导入者的导入模块。
    pub fn unload_module(&self, module: &ModuleType) -> UnloadOutcome {
        let name = module.name();
        let Some(module_ref) = self.get_loaded_module(name) else {
            return UnloadOutcome::NotLoaded;
        };
        if module_ref.is_singleton() {
            debug!(module = %name, "Singleton module is never unloaded individually");
            return UnloadOutcome::SingletonRetained;
        }
        if self
            .root_module()
            .is_some_and(|root| Arc::ptr_eq(&root, &module_ref))
        {
            warn!(module = %name, "Cannot unload root module");
            return UnloadOutcome::RootRetained;
        }

        let dependents = self.find_dependent_modules(module);
        if !dependents.is_empty() {
            warn!(
                module = %name,
                dependents = ?dependents,
                "Cannot unload module {}, still imported by: {}",
                name,
                dependents.join(", ")
            );
            return UnloadOutcome::HasDependents(dependents);
        }

        module_ref.dispose();
        self.state.modules.remove(name);
        {
            let mut graph = self.state.module_imports.write();
            graph.remove(name);
            for importers in graph.values_mut() {
                importers.remove(name);
            }
        }
        info!(module = %name, "Module unloaded");

        for import in module_ref.definition().imports() {
            if self.find_dependent_modules(import).is_empty() {
                let outcome = self.unload_module(import);
                debug!(module = %import.name(), importer = %name, outcome = ?outcome, "Cascading unload");
            }
        }

        UnloadOutcome::Unloaded
    }

    /// 当前导入列表中包含该模块的其它已加载模块（排序）
    pub fn find_dependent_modules(&self, module: &ModuleType) -> Vec<String> {
        let name = module.name();
        let mut candidates: Vec<Arc<ModuleRef>> = self
            .state
            .modules
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        if self.state.config.unload.dependent_scan == DependentScan::AllLoaded {
            candidates.extend(
                self.state
                    .singleton_modules
                    .iter()
                    .map(|entry| Arc::clone(entry.value())),
            );
        }

        let mut dependents: Vec<String> = candidates
            .iter()
            .filter(|other| other.name() != name && other.imports_module(name))
            .map(|other| other.name().to_string())
            .collect();
        dependents.sort();
        dependents.dedup();
        dependents
    }

    /// 导入关系图中导入了该模块、且仍处于加载状态的模块
    pub fn find_parent_modules(&self, name: &str) -> Vec<Arc<ModuleRef>> {
        let parents: Vec<String> = self
            .state
            .module_imports
            .read()
            .get(name)
            .map(|importers| importers.iter().cloned().collect())
            .unwrap_or_default();
        parents
            .iter()
            .filter_map(|parent| self.get_loaded_module(parent))
            .collect()
    }

    /// 仅用于测试和调试：丢弃所有已登记的模块与状态，不调用释放钩子
    pub fn reset(&self) {
        self.state.modules.clear();
        self.state.singleton_modules.clear();
        *self.state.root.write() = None;
        self.state.module_imports.write().clear();
        self.state.in_flight.lock().clear();
        debug!("Module manager reset");
    }
}

impl fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleManager")
            .field("modules", &self.loaded_module_names())
            .field("root", &self.root_module().map(|root| root.name().to_string()))
            .finish()
    }
}

/// 初始化 future 完成（成功或失败）或被丢弃时移除进行中的记录
///
/// 等待者被取消并不会丢弃共享 future；只要仍有其他持有者，记录会保留到下一次轮询完成
struct InFlightGuard {
    manager: WeakManager,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.state.in_flight.lock().remove(&self.name);
        }
    }
}

/// 已加载模块的句柄
#[derive(Clone)]
pub struct ModuleHandle {
    manager: ModuleManager,
    module: ModuleType,
}

impl ModuleHandle {
    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn definition(&self) -> &ModuleType {
        &self.module
    }

    pub fn get<T: Any + Send + Sync>(&self, token: impl Into<Token>) -> Result<Arc<T>, DiError> {
        self.manager.get_service(&self.module, token)
    }

    pub fn instance(&self, token: impl Into<Token>) -> Result<Instance, DiError> {
        self.manager.get_instance(&self.module, token)
    }

    pub fn is_loaded(&self) -> bool {
        self.manager.is_module_loaded(&self.module)
    }

    pub fn is_root(&self) -> bool {
        self.manager.is_root_module(&self.module)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("module", &self.module.name())
            .finish()
    }
}
