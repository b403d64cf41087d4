//! 提供者记录
//!
//! 每个 `ProviderRef` 持有一个提供者的工厂、依赖列表、作用域和缓存实例，
//! 在需要时自行解析依赖并创建实例。

use super::container::{Dependencies, FactoryFn, Instance, Scope, Token};
use super::module::ModuleRef;
use crate::errors::DiError;
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use tracing::debug;

/// 提供者来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Class,
    Value,
    Factory,
    /// 别名或再导出：实例属于另一个提供者
    Token,
}

pub struct ProviderRef {
    token: Token,
    kind: ProviderKind,
    scope: Scope,
    dependencies: Vec<Token>,
    factory: Option<FactoryFn>,
    /// 单例缓存；释放时整体替换为新的空单元
    instance: Mutex<Arc<OnceCell<Instance>>>,
    module: Weak<ModuleRef>,
    source_module: String,
}

impl ProviderRef {
    pub(crate) fn new(
        token: Token,
        kind: ProviderKind,
        module: Weak<ModuleRef>,
        source_module: impl Into<String>,
    ) -> Self {
        Self {
            token,
            kind,
            scope: Scope::Singleton,
            dependencies: Vec::new(),
            factory: None,
            instance: Mutex::new(Arc::new(OnceCell::new())),
            module,
            source_module: source_module.into(),
        }
    }

    /// 再导出：工厂直接读取所属模块的实例缓存
    pub(crate) fn reexport(
        token: Token,
        module: Weak<ModuleRef>,
        owner_name: &str,
        source_module: &str,
    ) -> Self {
        let owner = module.clone();
        let owner_name = owner_name.to_string();
        let key = token.clone();
        let factory: FactoryFn = Arc::new(move |_| {
            let result = match owner.upgrade() {
                Some(module) => module.cached_instance(&key).ok_or_else(|| {
                    DiError::NotPreInitialized {
                        token: key.debug_name(),
                        module: module.name().to_string(),
                    }
                }),
                None => Err(DiError::ModuleUnavailable {
                    module: owner_name.clone(),
                }),
            };
            future::ready(result).boxed()
        });
        Self::new(token, ProviderKind::Token, module, source_module).with_factory(factory)
    }

    pub(crate) fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub(crate) fn with_dependencies(mut self, dependencies: Vec<Token>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub(crate) fn with_factory(mut self, factory: FactoryFn) -> Self {
        self.factory = Some(factory);
        self
    }

    pub(crate) fn with_instance(self, instance: Instance) -> Self {
        *self.instance.lock() = Arc::new(OnceCell::new_with(Some(instance)));
        self
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn dependencies(&self) -> &[Token] {
        &self.dependencies
    }

    /// 提供者所属（或再导出来源）模块的名称
    pub fn source_module(&self) -> &str {
        &self.source_module
    }

    pub fn cached_instance(&self) -> Option<Instance> {
        self.instance.lock().get().cloned()
    }

    /// 解析实例
    ///
    /// 单例已缓存时直接返回，不再调用工厂；瞬态每次都重新解析依赖并调用工厂。
    pub fn resolve(self: &Arc<Self>) -> BoxFuture<'static, Result<Instance, DiError>> {
        let this = Arc::clone(self);
        async move {
            if this.scope == Scope::Transient {
                let factory = this.require_factory()?;
                return this.produce(factory).await;
            }

            let cell = this.instance.lock().clone();
            if let Some(instance) = cell.get() {
                return Ok(instance.clone());
            }

            let factory = this.require_factory()?;
            let instance = cell.get_or_try_init(|| this.produce(factory)).await?;
            Ok(instance.clone())
        }
        .boxed()
    }

    fn require_factory(&self) -> Result<FactoryFn, DiError> {
        self.factory.clone().ok_or_else(|| DiError::NoFactory {
            token: self.token.debug_name(),
        })
    }

    async fn produce(&self, factory: FactoryFn) -> Result<Instance, DiError> {
        let values = if self.dependencies.is_empty() {
            Vec::new()
        } else {
            self.resolve_dependencies().await?
        };
        let deps = Dependencies::new(self.token.debug_name(), self.dependencies.clone(), values);
        factory(deps).await
    }

    async fn resolve_dependencies(&self) -> Result<Vec<Instance>, DiError> {
        let module = self.module.upgrade().ok_or_else(|| DiError::ModuleUnavailable {
            module: self.source_module.clone(),
        })?;

        let resolved = future::join_all(
            self.dependencies
                .iter()
                .map(|dep| resolve_dependency(module.clone(), dep.clone())),
        )
        .await;

        let missing: Vec<String> = self
            .dependencies
            .iter()
            .zip(&resolved)
            .filter(|(_, value)| value.is_none())
            .map(|(dep, _)| dep.debug_name())
            .collect();
        if !missing.is_empty() {
            return Err(DiError::UnresolvedDependencies {
                token: self.token.debug_name(),
                missing,
            });
        }

        Ok(resolved.into_iter().flatten().collect())
    }

    /// 释放缓存实例；别名和再导出不拥有实例，不调用释放钩子
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.instance.lock(), Arc::new(OnceCell::new()));
        if let Some(instance) = previous.get() {
            if self.kind != ProviderKind::Token {
                instance.dispose();
            }
        }
    }
}

/// 先在所属模块中解析依赖，失败后再经根模块重试一次
async fn resolve_dependency(module: Arc<ModuleRef>, dep: Token) -> Option<Instance> {
    let err = match module.resolve_provider(&dep).await {
        Ok(instance) => return Some(instance),
        Err(err) => err,
    };

    let root = module
        .root_module()
        .filter(|root| !Arc::ptr_eq(root, &module))?;
    if !module.settings().root_retry {
        return None;
    }

    debug!(
        module = %module.name(),
        token = %dep,
        error = %err,
        "Dependency lookup failed, retrying via root module"
    );
    root.resolve_provider(&dep).await.ok()
}

impl fmt::Debug for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRef")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("scope", &self.scope)
            .field("dependencies", &self.dependencies)
            .field("source_module", &self.source_module)
            .field("cached", &self.cached_instance().is_some())
            .finish()
    }
}
