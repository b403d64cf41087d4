//! 容器核心
//!
//! - `container`：标识、实例与声明等基础类型
//! - `provider`：提供者记录
//! - `module`：模块记录
//! - `manager`：模块注册表
//! - `host`：绑定层使用的宿主接口

pub mod container;
pub mod host;
pub mod manager;
pub mod module;
pub mod provider;

pub use container::{
    Dependencies, Injectable, InjectableDescriptor, Instance, ModuleDefinition, ModuleDescriptor,
    ModuleType, OnDisposeInstance, ProviderOptions, Scope, Symbol, Token, TypeToken,
};
pub use host::{preload_module, ModuleHost};
pub use manager::{ModuleHandle, ModuleManager, UnloadOutcome};
pub use module::{ModuleRef, ModuleStatus};
pub use provider::{ProviderKind, ProviderRef};
