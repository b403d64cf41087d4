//! 容器基础类型：标识、实例、声明

pub mod descriptor;
pub mod instance;
pub mod token;

pub use descriptor::{
    Constructor, FactoryFn, Injectable, InjectableDescriptor, ModuleBuilder, ModuleDefinition,
    ModuleDescriptor, ModuleType, ProviderOptions,
};
pub use instance::{Dependencies, Instance, OnDisposeInstance};
pub use token::{Symbol, Token, TypeToken};

/// 提供者作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// 首次解析后缓存，之后始终返回同一实例
    #[default]
    Singleton,
    /// 每次解析都重新解析依赖并调用工厂
    Transient,
}
