//! Post-order hook registration.
//!
//! The orchestrator runs an explicit ordered list of hooks after an order is committed. Each hook is invoked
//! individually and its error is logged and swallowed: one hook failing never blocks the others, and never fails
//! the checkout that already produced the order.
use std::{future::Future, pin::Pin, sync::Arc};

use thiserror::Error;

use crate::events::OrderCompletedEvent;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl From<String> for HookError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

pub type HookResult = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send>>;
pub type Hook<E> = Arc<dyn Fn(E) -> HookResult + Send + Sync>;

#[derive(Clone)]
pub struct NamedHook<E> {
    pub name: String,
    handler: Hook<E>,
}

impl<E> NamedHook<E> {
    pub fn new<S, F>(name: S, handler: F) -> Self
    where
        S: Into<String>,
        F: (Fn(E) -> HookResult) + Send + Sync + 'static,
    {
        Self { name: name.into(), handler: Arc::new(handler) }
    }

    pub async fn call(&self, event: E) -> Result<(), HookError> {
        (self.handler)(event).await
    }
}

/// The hooks the orchestrator invokes after `handle_successful_order` decides an order counts as revenue. They run
/// in registration order.
#[derive(Default, Clone)]
pub struct PostOrderHooks {
    pub on_order_completed: Vec<NamedHook<OrderCompletedEvent>>,
}

impl PostOrderHooks {
    pub fn on_order_completed<S, F>(mut self, name: S, f: F) -> Self
    where
        S: Into<String>,
        F: (Fn(OrderCompletedEvent) -> HookResult) + Send + Sync + 'static,
    {
        self.on_order_completed.push(NamedHook::new(name, f));
        self
    }
}
