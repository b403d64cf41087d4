use thiserror::Error;

/// 容器错误
///
/// 实现了 `Clone`：同一模块的初始化结果会被所有并发等待者共享。
#[derive(Debug, Clone, Error)]
pub enum DiError {
    #[error("{module} is not a valid module")]
    InvalidModule { module: String },

    #[error(
        "Cannot register provider {token} ({class}) in module {module}: missing dependencies [{}]. \
         Make sure all dependencies are available through the module's providers, imports, or root module.",
        missing.join(", ")
    )]
    MissingDependencies {
        token: String,
        class: String,
        module: String,
        missing: Vec<String>,
    },

    #[error("Cannot resolve dependencies for {token}: missing {}", missing.join(", "))]
    UnresolvedDependencies { token: String, missing: Vec<String> },

    #[error("Cannot resolve provider {token}: no factory configured")]
    NoFactory { token: String },

    #[error("Provider {token} not found in module {module}")]
    ProviderNotFound {
        token: String,
        module: String,
        /// 回退路径上被吞掉的失败
        attempts: Vec<String>,
    },

    #[error("Module {module} not loaded")]
    ModuleNotLoaded { module: String },

    #[error("Token {token} not exported from module {module}")]
    NotExported { token: String, module: String },

    #[error("Provider {token} not pre-initialized in module {module}")]
    NotPreInitialized { token: String, module: String },

    #[error("Type cast failed for {token}: expected {expected}, got {actual}")]
    TypeMismatch {
        token: String,
        expected: String,
        actual: String,
    },

    #[error("Missing constructor argument {index} for {class}")]
    MissingArgument { class: String, index: usize },

    #[error("Circular module import detected: {}", chain.join(" -> "))]
    CircularImport { chain: Vec<String> },

    #[error("Module {module} is no longer available")]
    ModuleUnavailable { module: String },

    #[error("Service creation failed for {token}: {reason}")]
    CreationFailed { token: String, reason: String },
}

impl DiError {
    /// 工厂或构造函数内部失败的便捷构造
    pub fn creation(token: impl ToString, reason: impl ToString) -> Self {
        DiError::CreationFailed {
            token: token.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from file '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}
