use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use jobd_core::models::JobKind;
use jobd_core::traits::JobHandler;

/// 处理器注册表
///
/// 每种任务类型注册一个处理器，Worker按任务类型查找。
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let kind = handler.kind();
        info!(kind = %kind, "job handler registered");
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn registered_kinds(&self) -> Vec<JobKind> {
        self.handlers.keys().copied().collect()
    }
}
