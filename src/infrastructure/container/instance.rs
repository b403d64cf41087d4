//! 类型擦除的服务实例与构造参数

use super::token::Token;
use crate::errors::DiError;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// 实例释放钩子
///
/// 模块卸载时，本地拥有的单例实例如果实现了此 trait，会被调用一次。
pub trait OnDisposeInstance: Send + Sync {
    fn on_dispose_instance(&self);
}

type DisposeHook = Arc<dyn Fn() + Send + Sync>;

/// 已解析的服务实例
#[derive(Clone)]
pub struct Instance {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    on_dispose: Option<DisposeHook>,
}

impl Instance {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: type_name::<T>(),
            on_dispose: None,
        }
    }

    /// 带释放钩子的实例
    pub fn disposable<T: OnDisposeInstance + Any>(value: T) -> Self {
        let value = Arc::new(value);
        let hook_target = value.clone();
        Self {
            value,
            type_name: type_name::<T>(),
            on_dispose: Some(Arc::new(move || hook_target.on_dispose_instance())),
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn has_dispose_hook(&self) -> bool {
        self.on_dispose.is_some()
    }

    /// 引用相等
    pub fn ptr_eq(a: &Instance, b: &Instance) -> bool {
        Arc::ptr_eq(&a.value, &b.value)
    }

    pub(crate) fn dispose(&self) {
        if let Some(hook) = &self.on_dispose {
            hook();
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_name)
            .field("disposable", &self.on_dispose.is_some())
            .finish()
    }
}

/// 按声明顺序排列的已解析依赖
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    owner: String,
    tokens: Vec<Token>,
    values: Vec<Instance>,
}

impl Dependencies {
    pub(crate) fn new(owner: impl Into<String>, tokens: Vec<Token>, values: Vec<Instance>) -> Self {
        Self {
            owner: owner.into(),
            tokens,
            values,
        }
    }

    /// 取出第 `index` 个依赖并转换为具体类型
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, DiError> {
        let instance = self.instance(index).ok_or_else(|| DiError::MissingArgument {
            class: self.owner.clone(),
            index,
        })?;
        instance.downcast::<T>().ok_or_else(|| DiError::TypeMismatch {
            token: self
                .tokens
                .get(index)
                .map(Token::debug_name)
                .unwrap_or_else(|| format!("#{index}")),
            expected: type_name::<T>().to_string(),
            actual: instance.type_name().to_string(),
        })
    }

    pub fn instance(&self, index: usize) -> Option<&Instance> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_instances(self) -> Vec<Instance> {
        self.values
    }
}
