//! Routes placed orders to synchronous or asynchronous fulfillment.
//!
//! A rollout percentage decides, independently for every order, whether fulfillment runs inline (errors surface to
//! the dispatch caller) or is enqueued for the background worker (errors land in the worker's log). The percentage
//! lives behind an atomic so an operator can change it at runtime and the very next order sees the new value.
use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use log::*;
use rand::{thread_rng, Rng};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{db_types::Order, events::FulfillmentRequest};

#[derive(Debug, Clone, Error)]
pub enum FulfillmentError {
    #[error("Fulfillment failed: {0}")]
    Failed(String),
    #[error("The fulfillment queue is closed: {0}")]
    QueueClosed(String),
}

/// The actual fulfillment work, supplied by the embedder. Same shape as a post-order hook so it stays dyn-safe.
pub type Fulfiller =
    Arc<dyn Fn(FulfillmentRequest) -> Pin<Box<dyn Future<Output = Result<(), FulfillmentError>> + Send>> + Send + Sync>;

/// How a given order's fulfillment was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Handed to the background worker; `dispatch` returned as soon as the request was enqueued.
    Enqueued,
    /// Ran inline; any fulfiller error was propagated to the caller.
    Inline,
}

#[derive(Clone)]
pub struct FulfillmentDispatcher {
    fulfiller: Fulfiller,
    queue: mpsc::Sender<FulfillmentRequest>,
    rollout: Arc<AtomicU8>,
}

impl Debug for FulfillmentDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FulfillmentDispatcher (rollout {}%)", self.rollout.load(Ordering::Relaxed))
    }
}

impl FulfillmentDispatcher {
    pub fn new(fulfiller: Fulfiller, queue: mpsc::Sender<FulfillmentRequest>, rollout_percent: u8) -> Self {
        Self { fulfiller, queue, rollout: Arc::new(AtomicU8::new(rollout_percent.min(100))) }
    }

    /// A handle for changing the rollout percentage at runtime.
    pub fn rollout_handle(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.rollout)
    }

    pub fn set_rollout(&self, percent: u8) {
        self.rollout.store(percent.min(100), Ordering::Relaxed);
    }

    /// Routes the order. The rollout sample is drawn fresh per order; nothing is cached per process.
    pub async fn dispatch(&self, order: &Order) -> Result<DispatchMode, FulfillmentError> {
        let request = FulfillmentRequest::from_order(order);
        let rollout = self.rollout.load(Ordering::Relaxed).min(100);
        let sample = thread_rng().gen_range(0..100u8);
        if sample < rollout {
            let order_number = request.order_number.clone();
            self.queue.send(request).await.map_err(|e| FulfillmentError::QueueClosed(e.to_string()))?;
            debug!("🚚️ Order {order_number} queued for asynchronous fulfillment");
            Ok(DispatchMode::Enqueued)
        } else {
            (self.fulfiller)(request).await?;
            debug!("🚚️ Order {} fulfilled inline", order.order_number);
            Ok(DispatchMode::Inline)
        }
    }
}

/// Starts the background fulfillment worker. Do not await the returned JoinHandle until the last sender is dropped,
/// as the worker runs for as long as the queue is open.
pub fn start_fulfillment_worker(
    fulfiller: Fulfiller,
    buffer_size: usize,
) -> (mpsc::Sender<FulfillmentRequest>, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<FulfillmentRequest>(buffer_size);
    let handle = tokio::spawn(async move {
        info!("🚚️ Fulfillment worker started");
        while let Some(request) = receiver.recv().await {
            trace!("🚚️ Fulfilling order {} for {}", request.order_number, request.partner_code);
            if let Err(e) = (fulfiller)(request.clone()).await {
                error!("🚚️ Fulfillment failed for order {} ({}): {e}", request.order_number, request.partner_code);
            }
        }
        info!("🚚️ Fulfillment worker shut down");
    });
    (sender, handle)
}
