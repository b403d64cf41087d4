//! 绑定层使用的模块宿主接口
//!
//! 组件树、路由等外部绑定只通过这几个操作访问容器。

use super::container::{Instance, ModuleType, Token};
use super::manager::{ModuleManager, UnloadOutcome};
use crate::errors::DiError;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

#[async_trait]
pub trait ModuleHost: Send + Sync {
    /// 加载模块（幂等）
    async fn load_module(&self, module: &ModuleType, is_root: bool) -> Result<(), DiError>;

    fn is_module_loaded(&self, module: &ModuleType) -> bool;

    fn is_root_module(&self, module: &ModuleType) -> bool;

    /// 同步读取已预初始化的导出实例
    fn get_instance(&self, module: &ModuleType, token: &Token) -> Result<Instance, DiError>;

    /// 尽力卸载；拒绝时只记录警告
    fn unload_module(&self, module: &ModuleType) -> UnloadOutcome;

    fn get_service<T: Any + Send + Sync>(
        &self,
        module: &ModuleType,
        token: &Token,
    ) -> Result<Arc<T>, DiError>
    where
        Self: Sized,
    {
        let instance = self.get_instance(module, token)?;
        instance.downcast::<T>().ok_or_else(|| DiError::TypeMismatch {
            token: token.debug_name(),
            expected: std::any::type_name::<T>().to_string(),
            actual: instance.type_name().to_string(),
        })
    }
}

#[async_trait]
impl ModuleHost for ModuleManager {
    async fn load_module(&self, module: &ModuleType, is_root: bool) -> Result<(), DiError> {
        ModuleManager::load_module(self, module, is_root).await.map(|_| ())
    }

    fn is_module_loaded(&self, module: &ModuleType) -> bool {
        ModuleManager::is_module_loaded(self, module)
    }

    fn is_root_module(&self, module: &ModuleType) -> bool {
        ModuleManager::is_root_module(self, module)
    }

    fn get_instance(&self, module: &ModuleType, token: &Token) -> Result<Instance, DiError> {
        ModuleManager::get_instance(self, module, token)
    }

    fn unload_module(&self, module: &ModuleType) -> UnloadOutcome {
        ModuleManager::unload_module(self, module)
    }
}

/// 预加载模块，不关心返回的句柄
pub async fn preload_module(
    host: &dyn ModuleHost,
    module: &ModuleType,
    is_root: bool,
) -> Result<(), DiError> {
    host.load_module(module, is_root).await
}
