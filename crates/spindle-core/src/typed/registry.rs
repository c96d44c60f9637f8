//! HandlerRegistry - JobKind ごとの Handler の登録と管理
//!
//! 起動時に一度だけ登録し、以後は読み取り専用です。
//! 新しい kind の追加は「enum variant + handler の登録」だけで済みます。

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::job_spec::JobSpec;
use crate::domain::JobKind;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn DynHandler>>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for job kind '{0}' is already registered")]
    AlreadyRegistered(JobKind),
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `T::KIND`.
    pub fn register<T: JobSpec, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register_dyn(Arc::new(TypedHandler::new(handler)))
    }

    /// Register an already type-erased handler.
    pub fn register_dyn(&mut self, handler: Arc<dyn DynHandler>) -> Result<(), RegistryError> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds in declaration order.
    pub fn registered_kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }
}
