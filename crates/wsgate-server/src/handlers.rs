//! Built-in protocol handlers: `ping` and `authenticate`.
//!
//! Credential verification is an external collaborator behind the
//! [`AuthVerifier`] trait; the handler only owns the envelope contract
//! and the set-once user binding.

use crate::dispatch::{HandlerContext, HandlerRegistry};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use wsgate_core::envelope::{codes, TYPE_PING, TYPE_PONG};
use wsgate_core::{Envelope, GateError, GateResult, ResponseEnvelope};

/// External credential verifier.
///
/// `Ok(false)` is a clean rejection; `Err` means the verifier itself was
/// unreachable and is reported to the client as `VERIFIER_UNAVAILABLE`.
pub trait AuthVerifier: Send + Sync {
    fn verify(&self, user_id: &str, token: &str) -> BoxFuture<'static, GateResult<bool>>;
}

/// Verifier comparing tokens against one shared secret. `None` rejects
/// every attempt (the operator has not configured a secret).
pub struct SharedTokenVerifier {
    token: Option<String>,
}

impl SharedTokenVerifier {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl AuthVerifier for SharedTokenVerifier {
    fn verify(&self, _user_id: &str, token: &str) -> BoxFuture<'static, GateResult<bool>> {
        let accepted = self.token.as_deref() == Some(token);
        Box::pin(async move { Ok(accepted) })
    }
}

#[derive(Debug, Deserialize)]
struct AuthenticateRequest {
    #[serde(rename = "userId")]
    user_id: String,
    token: String,
}

/// Register the gateway's built-in handlers.
pub fn register_builtins(handlers: &mut HandlerRegistry, verifier: Arc<dyn AuthVerifier>) {
    // Pure and synchronous: doubles as a reachability probe independent
    // of business-logic health.
    handlers.register(TYPE_PING, |_ctx, env| {
        Box::pin(async move {
            Ok(ResponseEnvelope::success(
                env.id,
                TYPE_PONG,
                json!({"message": "pong"}),
            ))
        })
    });

    handlers.register("authenticate", move |ctx, env| {
        let verifier = verifier.clone();
        Box::pin(authenticate(ctx, env, verifier))
    });
}

async fn authenticate(
    ctx: HandlerContext,
    env: Envelope,
    verifier: Arc<dyn AuthVerifier>,
) -> GateResult<ResponseEnvelope> {
    let request_id = env.id.clone();

    let req: AuthenticateRequest = match serde_json::from_value(env.data) {
        Ok(req) => req,
        Err(e) => {
            return Ok(ResponseEnvelope::failure(
                request_id,
                codes::INVALID_FORMAT,
                format!("authenticate payload invalid: {e}"),
                None,
            ));
        }
    };

    // Re-authentication is rejected; the original binding stands.
    if ctx.user_id().await.is_some() {
        return Ok(ResponseEnvelope::failure(
            request_id,
            codes::ALREADY_AUTHENTICATED,
            "connection already authenticated",
            None,
        ));
    }

    match verifier.verify(&req.user_id, &req.token).await {
        Ok(true) => {}
        Ok(false) => {
            info!(client_id = %ctx.client_id, user_id = %req.user_id, "authentication rejected");
            return Ok(ResponseEnvelope::failure(
                request_id,
                codes::AUTH_FAILED,
                "invalid credentials",
                None,
            ));
        }
        Err(e) => {
            warn!(client_id = %ctx.client_id, error = %e, "verifier unreachable");
            return Ok(ResponseEnvelope::failure(
                request_id,
                codes::VERIFIER_UNAVAILABLE,
                "credential verification unavailable",
                None,
            ));
        }
    }

    match ctx.registry.bind_user(&ctx.client_id, req.user_id.clone()).await {
        Ok(()) => {
            info!(client_id = %ctx.client_id, user_id = %req.user_id, "client authenticated");
            Ok(ResponseEnvelope::success(
                request_id,
                "authenticated",
                json!({
                    "success": true,
                    "userId": req.user_id,
                    "message": "authentication successful",
                }),
            ))
        }
        // Lost a race with a concurrent authenticate on the same connection.
        Err(GateError::UserAlreadyBound(_)) => Ok(ResponseEnvelope::failure(
            request_id,
            codes::ALREADY_AUTHENTICATED,
            "connection already authenticated",
            None,
        )),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::registry::{ClientRecord, ClientRegistry};
    use serde_json::Value;

    /// Verifier that errors out, as if the auth service were down.
    struct DownVerifier;

    impl AuthVerifier for DownVerifier {
        fn verify(&self, _user_id: &str, _token: &str) -> BoxFuture<'static, GateResult<bool>> {
            Box::pin(async { Err(GateError::Verifier("connection refused".into())) })
        }
    }

    async fn setup(verifier: Arc<dyn AuthVerifier>) -> (Dispatcher, Arc<ClientRegistry>) {
        let registry = Arc::new(ClientRegistry::new());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        registry
            .insert(ClientRecord::new("c1".into(), tx))
            .await
            .unwrap();
        let mut handlers = HandlerRegistry::new();
        register_builtins(&mut handlers, verifier);
        (Dispatcher::new(handlers, registry.clone()), registry)
    }

    fn auth_envelope(id: &str, user_id: &str, token: &str) -> Envelope {
        Envelope {
            id: Some(id.to_string()),
            msg_type: "authenticate".to_string(),
            timestamp: None,
            data: json!({"userId": user_id, "token": token}),
        }
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let (d, _) = setup(Arc::new(SharedTokenVerifier::new(None))).await;
        let env = Envelope {
            id: Some("1".into()),
            msg_type: TYPE_PING.into(),
            timestamp: None,
            data: Value::Null,
        };
        let resp = d.dispatch("c1", env).await;
        assert_eq!(resp.id.as_deref(), Some("1"));
        assert_eq!(resp.msg_type, TYPE_PONG);
        assert_eq!(resp.data.unwrap()["message"], "pong");
    }

    #[tokio::test]
    async fn authenticate_binds_user() {
        let verifier = Arc::new(SharedTokenVerifier::new(Some("good".into())));
        let (d, registry) = setup(verifier).await;

        let resp = d.dispatch("c1", auth_envelope("2", "u1", "good")).await;
        assert_eq!(resp.id.as_deref(), Some("2"));
        assert_eq!(resp.msg_type, "authenticated");
        let data = resp.data.unwrap();
        assert_eq!(data["success"], true);
        assert_eq!(data["userId"], "u1");

        let bound = registry.by_user_id("u1").await;
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].id, "c1");
    }

    #[tokio::test]
    async fn bad_token_is_rejected_cleanly() {
        let verifier = Arc::new(SharedTokenVerifier::new(Some("good".into())));
        let (d, registry) = setup(verifier).await;

        let resp = d.dispatch("c1", auth_envelope("3", "u1", "bad")).await;
        assert_eq!(resp.error.unwrap().code, codes::AUTH_FAILED);
        assert!(registry.by_user_id("u1").await.is_empty());
    }

    #[tokio::test]
    async fn reauthentication_is_rejected() {
        let verifier = Arc::new(SharedTokenVerifier::new(Some("good".into())));
        let (d, registry) = setup(verifier).await;

        let first = d.dispatch("c1", auth_envelope("4", "u1", "good")).await;
        assert!(!first.is_error());

        let second = d.dispatch("c1", auth_envelope("5", "u2", "good")).await;
        assert_eq!(second.error.unwrap().code, codes::ALREADY_AUTHENTICATED);
        // The original binding stands.
        assert_eq!(registry.by_user_id("u1").await.len(), 1);
        assert!(registry.by_user_id("u2").await.is_empty());
    }

    #[tokio::test]
    async fn verifier_outage_is_an_error_envelope() {
        let (d, _) = setup(Arc::new(DownVerifier)).await;
        let resp = d.dispatch("c1", auth_envelope("6", "u1", "good")).await;
        assert_eq!(resp.error.unwrap().code, codes::VERIFIER_UNAVAILABLE);
    }

    #[tokio::test]
    async fn malformed_auth_payload_keeps_request_id() {
        let (d, _) = setup(Arc::new(SharedTokenVerifier::new(None))).await;
        let env = Envelope {
            id: Some("7".into()),
            msg_type: "authenticate".into(),
            timestamp: None,
            data: json!({"userId": 5}),
        };
        let resp = d.dispatch("c1", env).await;
        assert_eq!(resp.id.as_deref(), Some("7"));
        assert_eq!(resp.error.unwrap().code, codes::INVALID_FORMAT);
    }
}
