//! 模块与可注入类型的声明
//!
//! 声明在模块定义时一次性构建，之后只读；容器只消费这些值结构。

use super::instance::{Dependencies, Instance};
use super::token::{Token, TypeToken};
use super::Scope;
use crate::errors::DiError;
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// 同步构造函数
pub type Constructor = Arc<dyn Fn(Dependencies) -> Result<Instance, DiError> + Send + Sync>;

/// 统一签名的工厂：按位置接收已解析的依赖，返回（可能异步的）实例
pub type FactoryFn =
    Arc<dyn Fn(Dependencies) -> BoxFuture<'static, Result<Instance, DiError>> + Send + Sync>;

/// 可注入类型
///
/// 对应"类"提供者：声明构造参数的注入点、类级作用域以及构造方式。
pub trait Injectable: Send + Sync + Sized + 'static {
    /// 注入点（参数位置 -> 标识）
    fn inject() -> Vec<(usize, Token)> {
        Vec::new()
    }

    fn scope() -> Option<Scope> {
        None
    }

    fn construct(deps: Dependencies) -> Result<Self, DiError>;

    /// 需要释放钩子的类型可覆盖为 `Instance::disposable(self)`
    fn into_instance(self) -> Instance {
        Instance::new(self)
    }
}

/// 可注入类型的描述
#[derive(Clone)]
pub struct InjectableDescriptor {
    name: String,
    scope: Option<Scope>,
    inject: BTreeMap<usize, Token>,
    constructor: Constructor,
}

impl InjectableDescriptor {
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(Dependencies) -> Result<Instance, DiError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            scope: None,
            inject: BTreeMap::new(),
            constructor: Arc::new(constructor),
        }
    }

    pub fn of<T: Injectable>() -> Self {
        let mut descriptor = Self::new(TypeToken::of::<T>().short_name(), |deps| {
            T::construct(deps).map(T::into_instance)
        });
        descriptor.scope = T::scope();
        descriptor.inject = T::inject().into_iter().collect();
        descriptor
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn inject(mut self, index: usize, token: impl Into<Token>) -> Self {
        self.inject.insert(index, token.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Option<Scope> {
        self.scope
    }

    /// 按参数位置排列的依赖标识；未声明的位置使用占位名 `null`
    pub fn injection_tokens(&self) -> Vec<Token> {
        let count = self.inject.keys().next_back().map_or(0, |max| max + 1);
        (0..count)
            .map(|index| {
                self.inject
                    .get(&index)
                    .cloned()
                    .unwrap_or_else(|| Token::from_display(&"null"))
            })
            .collect()
    }

    pub(crate) fn constructor(&self) -> Constructor {
        self.constructor.clone()
    }
}

impl fmt::Debug for InjectableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectableDescriptor")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("inject", &self.inject)
            .finish()
    }
}

/// 提供者声明
#[derive(Clone)]
pub enum ProviderOptions {
    Class {
        provide: Token,
        class: InjectableDescriptor,
        scope: Option<Scope>,
    },
    Value {
        provide: Token,
        value: Instance,
    },
    Factory {
        provide: Token,
        factory: FactoryFn,
        deps: Vec<Token>,
    },
    Alias {
        provide: Token,
        use_token: Token,
    },
}

impl ProviderOptions {
    pub fn class(provide: impl Into<Token>, class: InjectableDescriptor) -> Self {
        ProviderOptions::Class {
            provide: provide.into(),
            class,
            scope: None,
        }
    }

    /// 以类型自身作为标识注册
    pub fn injectable<T: Injectable>() -> Self {
        Self::class(Token::of::<T>(), InjectableDescriptor::of::<T>())
    }

    pub fn class_scoped(provide: impl Into<Token>, class: InjectableDescriptor, scope: Scope) -> Self {
        ProviderOptions::Class {
            provide: provide.into(),
            class,
            scope: Some(scope),
        }
    }

    pub fn value(provide: impl Into<Token>, value: Instance) -> Self {
        ProviderOptions::Value {
            provide: provide.into(),
            value,
        }
    }

    pub fn factory<F, Fut>(provide: impl Into<Token>, deps: Vec<Token>, factory: F) -> Self
    where
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Instance, DiError>> + Send + 'static,
    {
        ProviderOptions::Factory {
            provide: provide.into(),
            factory: Arc::new(move |deps| factory(deps).boxed()),
            deps,
        }
    }

    pub fn factory_sync<F>(provide: impl Into<Token>, deps: Vec<Token>, factory: F) -> Self
    where
        F: Fn(Dependencies) -> Result<Instance, DiError> + Send + Sync + 'static,
    {
        ProviderOptions::Factory {
            provide: provide.into(),
            factory: Arc::new(move |deps| futures_util::future::ready(factory(deps)).boxed()),
            deps,
        }
    }

    pub fn alias(provide: impl Into<Token>, use_token: impl Into<Token>) -> Self {
        ProviderOptions::Alias {
            provide: provide.into(),
            use_token: use_token.into(),
        }
    }

    pub fn provide(&self) -> &Token {
        match self {
            ProviderOptions::Class { provide, .. }
            | ProviderOptions::Value { provide, .. }
            | ProviderOptions::Factory { provide, .. }
            | ProviderOptions::Alias { provide, .. } => provide,
        }
    }
}

impl fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderOptions::Class { provide, class, scope } => f
                .debug_struct("Class")
                .field("provide", provide)
                .field("class", &class.name)
                .field("scope", scope)
                .finish(),
            ProviderOptions::Value { provide, value } => f
                .debug_struct("Value")
                .field("provide", provide)
                .field("value", value)
                .finish(),
            ProviderOptions::Factory { provide, deps, .. } => f
                .debug_struct("Factory")
                .field("provide", provide)
                .field("deps", deps)
                .finish(),
            ProviderOptions::Alias { provide, use_token } => f
                .debug_struct("Alias")
                .field("provide", provide)
                .field("use_token", use_token)
                .finish(),
        }
    }
}

/// 模块声明：导入、提供者、导出
#[derive(Debug, Clone, Default)]
pub struct ModuleDescriptor {
    pub imports: Vec<ModuleType>,
    pub providers: Vec<ProviderOptions>,
    pub exports: Vec<Token>,
}

impl ModuleDescriptor {
    pub fn declares_export(&self, token: &Token) -> bool {
        self.exports.contains(token)
    }
}

/// 模块定义；名称即模块身份
#[derive(Debug)]
pub struct ModuleDefinition {
    name: String,
    singleton: bool,
    descriptor: Option<ModuleDescriptor>,
}

pub type ModuleType = Arc<ModuleDefinition>;

impl ModuleDefinition {
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder {
            name: name.into(),
            singleton: false,
            descriptor: ModuleDescriptor::default(),
        }
    }

    /// 没有模块声明的定义，加载时会被拒绝
    pub fn undeclared(name: impl Into<String>) -> ModuleType {
        Arc::new(Self {
            name: name.into(),
            singleton: false,
            descriptor: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    pub fn descriptor(&self) -> Result<&ModuleDescriptor, DiError> {
        self.descriptor.as_ref().ok_or_else(|| DiError::InvalidModule {
            module: self.name.clone(),
        })
    }

    /// 声明的导入；无效模块视为没有导入
    pub fn imports(&self) -> &[ModuleType] {
        self.descriptor.as_ref().map_or(&[], |d| d.imports.as_slice())
    }
}

pub struct ModuleBuilder {
    name: String,
    singleton: bool,
    descriptor: ModuleDescriptor,
}

impl ModuleBuilder {
    /// 单例模块：全局只加载一次，且不会被单独卸载
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn import(mut self, module: &ModuleType) -> Self {
        self.descriptor.imports.push(module.clone());
        self
    }

    pub fn provider(mut self, provider: ProviderOptions) -> Self {
        self.descriptor.providers.push(provider);
        self
    }

    pub fn export(mut self, token: impl Into<Token>) -> Self {
        self.descriptor.exports.push(token.into());
        self
    }

    pub fn build(self) -> ModuleType {
        Arc::new(ModuleDefinition {
            name: self.name,
            singleton: self.singleton,
            descriptor: Some(self.descriptor),
        })
    }
}
