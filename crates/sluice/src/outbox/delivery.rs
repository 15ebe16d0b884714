/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Delivery of coalesced messages to per-category handlers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::KillSwitch;
use crate::error::HandlerError;
use crate::metrics;
use crate::models::{OutboxCategory, OutboxMessage};

/// Receives the representative of a coalesce group.
///
/// Returning an error leaves the message in the outbox to be retried after
/// backoff. Handlers must tolerate repeated delivery of the same payload.
#[async_trait]
pub trait OutboxHandler: Send + Sync {
    async fn handle(&self, message: &OutboxMessage) -> Result<(), HandlerError>;
}

/// Adapts an async closure into an [`OutboxHandler`].
pub struct FnHandler<F>(F);

/// Wraps `f` as a handler; it receives an owned copy of the message.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(OutboxMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> OutboxHandler for FnHandler<F>
where
    F: Fn(OutboxMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, message: &OutboxMessage) -> Result<(), HandlerError> {
        (self.0)(message.clone()).await
    }
}

/// Immutable category → handler map, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<OutboxCategory, Arc<dyn OutboxHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, category: OutboxCategory) -> Option<&Arc<dyn OutboxHandler>> {
        self.handlers.get(&category)
    }

    pub fn categories(&self) -> impl Iterator<Item = OutboxCategory> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("categories", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<OutboxCategory, Arc<dyn OutboxHandler>>,
}

impl HandlerRegistryBuilder {
    /// Registers the handler for a category, replacing any previous one.
    pub fn register(mut self, category: OutboxCategory, handler: impl OutboxHandler + 'static) -> Self {
        self.handlers.insert(category, Arc::new(handler));
        self
    }

    pub fn register_arc(mut self, category: OutboxCategory, handler: Arc<dyn OutboxHandler>) -> Self {
        self.handlers.insert(category, handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The handler accepted the message, or no handler is registered.
    Delivered,
    /// The shard is disabled by the kill switch.
    Skipped,
    Failed(HandlerError),
}

impl DeliveryOutcome {
    /// Whether the representative may be deleted.
    pub fn is_final(&self) -> bool {
        !matches!(self, DeliveryOutcome::Failed(_))
    }
}

/// Dispatches messages to handlers and applies the kill switch.
#[derive(Debug, Clone)]
pub struct DeliveryInvoker {
    registry: HandlerRegistry,
    kill_switch: KillSwitch,
}

impl DeliveryInvoker {
    pub fn new(registry: HandlerRegistry, kill_switch: KillSwitch) -> Self {
        Self {
            registry,
            kill_switch,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Sends the message to its category's handler.
    pub async fn send(&self, message: &OutboxMessage, synchronous: bool) -> DeliveryOutcome {
        if self.kill_switch.should_skip(&message.shard_key()) {
            debug!(
                "Skipping message {} for disabled shard {}",
                message.id,
                message.shard_key()
            );
            metrics::record_skipped(message.category);
            return DeliveryOutcome::Skipped;
        }

        let Some(handler) = self.registry.get(message.category) else {
            debug!(
                "No handler registered for {}, dropping message {}",
                message.category, message.id
            );
            return DeliveryOutcome::Delivered;
        };

        let started = Instant::now();
        let result = handler.handle(message).await;
        metrics::record_delivery(message.category, synchronous, started.elapsed(), result.is_err());

        match result {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                warn!(
                    "Delivery of {} message {} for shard {} failed: {}",
                    message.category,
                    message.id,
                    message.shard_key(),
                    e
                );
                DeliveryOutcome::Failed(e)
            }
        }
    }
}
