pub mod config;
pub mod errors;
pub mod infrastructure;
pub mod logging;

// Re-export commonly used items for convenience
pub use config::{ConfigLoader, ContainerConfig};
pub use errors::{ConfigError, DiError};
pub use infrastructure::{
    preload_module, Dependencies, Injectable, InjectableDescriptor, Instance, ModuleDefinition,
    ModuleHandle, ModuleHost, ModuleManager, ModuleRef, ModuleType, OnDisposeInstance,
    ProviderOptions, Scope, Token, UnloadOutcome,
};
