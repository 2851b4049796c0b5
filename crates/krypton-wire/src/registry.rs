//! Wallet-side method registry.
//!
//! Maps method names to async handlers. Unknown methods go to a fallback,
//! which by default logs and answers `null`. The handshake has its own
//! handler slot since it also establishes the connection.

use crate::methods::{decode_args, KrMethod, HANDSHAKE_METHOD};
use async_trait::async_trait;
use futures::FutureExt;
use krypton_types::{DappIdentity, WalletIdentity};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Failure raised by a handler while processing one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("invalid params: {e}"))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Outcome of dispatching a request that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The handler failed. The peer receives a `null` result.
    #[error("Handler for {method} failed: {reason}")]
    HandlerFailure { method: String, reason: String },
}

/// Errors raised while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Method already registered: {0}")]
    DuplicateMethod(String),
    #[error("Method {0} is reserved; use on_connected for the handshake")]
    ReservedMethod(String),
}

/// Handles one method.
#[async_trait]
pub trait MethodHandler: Send + Sync + 'static {
    async fn handle(&self, params: Vec<Value>) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Vec<Value>) -> Result<Value, HandlerError> {
        (self)(params).await
    }
}

/// Handler for methods nobody registered: `(method, params) -> result`.
pub type FallbackHandler = Arc<dyn Fn(&str, Vec<Value>) -> Result<Value, HandlerError> + Send + Sync>;

/// Produces the wallet identity returned from the handshake.
pub type HandshakeHandler =
    Arc<dyn Fn(DappIdentity) -> Result<WalletIdentity, HandlerError> + Send + Sync>;

/// Method name to handler table.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    fallback: FallbackHandler,
    handshake: Option<HandshakeHandler>,
}

impl MethodRegistry {
    /// An empty registry with the logging fallback installed.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(unknown_method),
            handshake: None,
        }
    }

    /// Register an untyped handler.
    pub fn register<H: MethodHandler>(
        &mut self,
        method: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self, RegistryError> {
        let method = method.into();
        if method == HANDSHAKE_METHOD {
            return Err(RegistryError::ReservedMethod(method));
        }
        if self.handlers.contains_key(&method) {
            return Err(RegistryError::DuplicateMethod(method));
        }
        self.handlers.insert(method, Arc::new(handler));
        Ok(self)
    }

    /// Register a handler for a typed method. Params are decoded into
    /// `M::Args` before the handler runs; decoding failures count as
    /// handler failures.
    pub fn register_method<M, F, Fut>(&mut self, handler: F) -> Result<&mut Self, RegistryError>
    where
        M: KrMethod,
        F: Fn(M::Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Return, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(M::NAME, move |params: Vec<Value>| {
            let handler = Arc::clone(&handler);
            async move {
                let args = decode_args::<M>(params)?;
                let value = handler(args).await?;
                Ok::<Value, HandlerError>(serde_json::to_value(value)?)
            }
        })
    }

    /// Replace the handler used for unknown method names.
    pub fn set_fallback<F>(&mut self, fallback: F) -> &mut Self
    where
        F: Fn(&str, Vec<Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.fallback = Arc::new(fallback);
        self
    }

    /// Choose the wallet identity returned for a given dapp. Without this,
    /// the identity passed to [`serve`](crate::serve) is returned.
    pub fn on_connected<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(DappIdentity) -> Result<WalletIdentity, HandlerError> + Send + Sync + 'static,
    {
        self.handshake = Some(Arc::new(handler));
        self
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Run the handler registered for `method`, or the fallback.
    ///
    /// A handler that panics is reported as [`DispatchError::HandlerFailure`]
    /// like one that returns an error.
    pub async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, DispatchError> {
        let outcome = match self.handlers.get(method) {
            Some(handler) => AssertUnwindSafe(handler.handle(params)).catch_unwind().await,
            None => panic::catch_unwind(AssertUnwindSafe(|| (self.fallback)(method, params))),
        };
        let failure = |reason: String| DispatchError::HandlerFailure {
            method: method.to_string(),
            reason,
        };
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(failure(e.to_string())),
            Err(payload) => Err(failure(panic_message(payload.as_ref()))),
        }
    }

    /// Process the params of a `kr_connected` request.
    pub fn handshake(
        &self,
        params: Vec<Value>,
        default_identity: &WalletIdentity,
    ) -> Result<(DappIdentity, WalletIdentity), DispatchError> {
        let failure = |reason: String| DispatchError::HandlerFailure {
            method: HANDSHAKE_METHOD.to_string(),
            reason,
        };

        let (dapp,) = decode_args::<crate::methods::KrConnected>(params)
            .map_err(|e| failure(format!("invalid dapp identity: {e}")))?;
        let wallet = match &self.handshake {
            Some(handler) => panic::catch_unwind(AssertUnwindSafe(|| handler(dapp.clone())))
                .map_err(|payload| failure(panic_message(payload.as_ref())))?
                .map_err(|e| failure(e.to_string()))?,
            None => default_identity.clone(),
        };
        Ok((dapp, wallet))
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

fn unknown_method(method: &str, params: Vec<Value>) -> Result<Value, HandlerError> {
    warn!(method, ?params, "Unknown method called");
    Ok(Value::Null)
}
