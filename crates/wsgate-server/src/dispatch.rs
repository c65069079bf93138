//! Handler registry and dispatcher.
//!
//! A handler is a boxed async function bound to one message `type`.
//! Dispatch never fails: unknown types and handler errors both come back
//! as well-formed `error` envelopes, so the connection task always has
//! exactly one response to write per inbound envelope.

use crate::registry::ClientRegistry;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use wsgate_core::envelope::codes;
use wsgate_core::{Envelope, GateResult, ResponseEnvelope};

/// Context handed to every handler invocation.
#[derive(Clone)]
pub struct HandlerContext {
    /// Id of the connection the envelope arrived on.
    pub client_id: String,
    /// Shared registry, for identity lookups and user binding.
    pub registry: Arc<ClientRegistry>,
}

impl HandlerContext {
    /// Authenticated user id of the calling connection, if bound.
    pub async fn user_id(&self) -> Option<String> {
        self.registry
            .get(&self.client_id)
            .await
            .and_then(|r| r.user_id)
    }
}

/// A registered message handler.
///
/// Returning `Err` is the handler fault path: the dispatcher logs it and
/// synthesizes an `INTERNAL_ERROR` response. Handlers that want a
/// specific wire code return `Ok(ResponseEnvelope::failure(..))` instead.
pub type Handler = Arc<
    dyn Fn(HandlerContext, Envelope) -> BoxFuture<'static, GateResult<ResponseEnvelope>>
        + Send
        + Sync,
>;

/// Mapping from message `type` to handler. Populated at startup, then
/// frozen behind the dispatcher, so the dispatch path takes no lock.
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for `msg_type`, replacing any previous one.
    pub fn register<F>(&mut self, msg_type: impl Into<String>, handler: F)
    where
        F: Fn(HandlerContext, Envelope) -> BoxFuture<'static, GateResult<ResponseEnvelope>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(msg_type.into(), Arc::new(handler));
    }

    pub fn get(&self, msg_type: &str) -> Option<&Handler> {
        self.handlers.get(msg_type)
    }
}

/// Resolves and runs handlers with fault isolation.
pub struct Dispatcher {
    handlers: HandlerRegistry,
    registry: Arc<ClientRegistry>,
}

impl Dispatcher {
    pub fn new(handlers: HandlerRegistry, registry: Arc<ClientRegistry>) -> Self {
        Self { handlers, registry }
    }

    /// Dispatch one decoded envelope for one client.
    ///
    /// Every inbound envelope produces exactly one response envelope; no
    /// handler fault escapes to the caller.
    pub async fn dispatch(&self, client_id: &str, envelope: Envelope) -> ResponseEnvelope {
        let request_id = envelope.id.clone();
        let msg_type = envelope.msg_type.clone();

        let Some(handler) = self.handlers.get(&msg_type) else {
            // Expected from forward-compatible clients; informational only.
            info!(client_id = %client_id, msg_type = %msg_type, "no handler registered");
            return ResponseEnvelope::failure(
                request_id,
                codes::UNKNOWN_MESSAGE_TYPE,
                format!("unknown message type: {msg_type}"),
                None,
            );
        };

        let ctx = HandlerContext {
            client_id: client_id.to_string(),
            registry: self.registry.clone(),
        };

        match handler(ctx, envelope).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    client_id = %client_id,
                    msg_type = %msg_type,
                    request_id = ?request_id,
                    error = %e,
                    "handler failed"
                );
                // Generic wire message; diagnostics stay in the log.
                ResponseEnvelope::failure(request_id, codes::INTERNAL_ERROR, "internal error", None)
            }
        }
    }
}
