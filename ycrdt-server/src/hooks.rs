//! Ordered extension pipeline. Each hook point runs registered extensions in
//! priority (registration) order; an extension may enrich the shared
//! `HookContext`, or short-circuit with a terminal result (e.g. an auth
//! rejection). Unhandled extension failures are caught and routed to the
//! error handler rather than breaking the pipeline — the one exception is
//! `on_authenticate`, whose terminal "reject" result is the documented way
//! to end a connection, not a failure.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Shared, mutable bag of context visible to a hook point's extensions and,
/// afterwards, to the connection that invoked the chain.
#[derive(Debug, Default, Clone)]
pub struct HookContext {
    pub doc_name: String,
    pub data: Map<String, Value>,
}

impl HookContext {
    pub fn new(doc_name: impl Into<String>) -> Self {
        HookContext { doc_name: doc_name.into(), data: Map::new() }
    }
}

/// One pluggable participant in the server's hook pipeline. Every method has
/// a pass-through default so an extension only overrides the hook points it
/// cares about.
#[async_trait]
pub trait Extension: std::fmt::Debug + Send + Sync {
    async fn on_connect(&self, _ctx: &mut HookContext) -> Result<()> {
        Ok(())
    }

    /// Terminal: `Ok(false)` rejects the connection (`HookReject`); `Ok(true)`
    /// lets the chain continue.
    async fn on_authenticate(&self, _ctx: &mut HookContext, _token: &[u8]) -> Result<bool> {
        Ok(true)
    }

    async fn on_load_document(&self, _ctx: &mut HookContext) -> Result<()> {
        Ok(())
    }

    async fn on_change(&self, _ctx: &HookContext, _update: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn on_store_document(&self, _ctx: &HookContext, _state: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn on_disconnect(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }

    async fn before_broadcast_stateless(&self, _ctx: &HookContext, payload: Vec<u8>) -> Result<Vec<u8>> {
        Ok(payload)
    }
}

pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Default error handler: logs at `warn!` and drops the error. A single
/// process-wide default plus a per-document override is enough here; this
/// stays a plain function value rather than growing into a hook framework.
pub fn default_error_handler() -> ErrorHandler {
    Arc::new(|err: &Error| {
        tracing::warn!(error = %err, "unhandled error routed to default handler");
    })
}

/// The ordered extension list plus the error handler failures from hooks
/// (and everywhere else in the server) are routed to.
pub struct HookChain {
    extensions: Vec<Arc<dyn Extension>>,
    error_handler: ErrorHandler,
}

impl HookChain {
    pub fn new(extensions: Vec<Arc<dyn Extension>>, error_handler: ErrorHandler) -> Self {
        HookChain { extensions, error_handler }
    }

    pub fn report(&self, err: &Error) {
        (self.error_handler)(err);
    }

    pub async fn run_on_connect(&self, ctx: &mut HookContext) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_connect(ctx).await {
                self.report(&e);
            }
        }
    }

    /// Runs the authentication chain; the first extension to reject ends
    /// the chain immediately with `Ok(false)`.
    pub async fn run_on_authenticate(&self, ctx: &mut HookContext, token: &[u8]) -> bool {
        for ext in &self.extensions {
            match ext.on_authenticate(ctx, token).await {
                Ok(true) => continue,
                Ok(false) => return false,
                Err(e) => {
                    self.report(&e);
                    return false;
                }
            }
        }
        true
    }

    pub async fn run_on_load_document(&self, ctx: &mut HookContext) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_load_document(ctx).await {
                self.report(&e);
            }
        }
    }

    pub async fn run_on_change(&self, ctx: &HookContext, update: &[u8]) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_change(ctx, update).await {
                self.report(&e);
            }
        }
    }

    pub async fn run_on_store_document(&self, ctx: &HookContext, state: &[u8]) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_store_document(ctx, state).await {
                self.report(&e);
            }
        }
    }

    pub async fn run_on_disconnect(&self, ctx: &HookContext) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_disconnect(ctx).await {
                self.report(&e);
            }
        }
    }

    pub async fn run_before_broadcast_stateless(&self, ctx: &HookContext, payload: Vec<u8>) -> Vec<u8> {
        let mut payload = payload;
        for ext in &self.extensions {
            match ext.before_broadcast_stateless(ctx, payload.clone()).await {
                Ok(next) => payload = next,
                Err(e) => self.report(&e),
            }
        }
        payload
    }
}

impl Default for HookChain {
    fn default() -> Self {
        HookChain::new(Vec::new(), default_error_handler())
    }
}
