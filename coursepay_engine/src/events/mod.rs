//! Post-order hooks and fulfillment dispatch.

mod event_types;
mod fulfillment;
mod hooks;

pub use event_types::{FulfillmentRequest, OrderCompletedEvent};
pub use fulfillment::{start_fulfillment_worker, DispatchMode, Fulfiller, FulfillmentDispatcher, FulfillmentError};
pub use hooks::{Hook, HookError, HookResult, NamedHook, PostOrderHooks};
