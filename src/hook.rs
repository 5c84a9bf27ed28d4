use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::error::Error;

/// Callback notified of remote failures.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Shared, replaceable slot holding the fallback error handler.
///
/// Surrounding code installs or clears the handler at any time; every
/// store and query holding a clone of the hook sees the current value at
/// the moment a failure happens.
#[derive(Clone, Default)]
pub struct ErrorHook {
    slot: Arc<RwLock<Option<ErrorHandler>>>,
}

impl ErrorHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(handler: ErrorHandler) -> Self {
        let hook = Self::new();
        hook.set(handler);
        hook
    }

    pub fn set(&self, handler: ErrorHandler) {
        match self.slot.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    pub fn clear(&self) {
        match self.slot.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn get(&self) -> Option<ErrorHandler> {
        match self.slot.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

impl std::fmt::Debug for ErrorHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHook")
            .field("installed", &self.is_set())
            .finish()
    }
}

/// Ordered notification chain for remote failures: the per-query handler
/// first, then the fallback hook. Both fire when present.
#[derive(Clone, Default)]
pub struct ErrorChain {
    handler: Option<ErrorHandler>,
    hook: ErrorHook,
}

impl ErrorChain {
    pub fn new(handler: Option<ErrorHandler>, hook: ErrorHook) -> Self {
        Self { handler, hook }
    }

    pub fn notify(&self, error: &Error) {
        if let Some(handler) = &self.handler {
            handler(error);
        }
        if let Some(fallback) = self.hook.get() {
            fallback(error);
        }
    }

    /// Normalize a collaborator failure, run it through the chain and hand
    /// it back for the caller to return.
    pub fn reject(&self, error: Error) -> Error {
        let error = error.into_remote();
        warn!(error = %error, "remote operation failed");
        self.notify(&error);
        error
    }
}

impl std::fmt::Debug for ErrorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorChain")
            .field("handler", &self.handler.is_some())
            .field("hook", &self.hook)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_chain_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = calls.clone();
        let handler: ErrorHandler = Arc::new(move |_: &Error| c.lock().unwrap().push("query"));
        let c = calls.clone();
        let hook = ErrorHook::with_handler(Arc::new(move |_: &Error| {
            c.lock().unwrap().push("global")
        }));

        let chain = ErrorChain::new(Some(handler), hook);
        let err = chain.reject(Error::NotFound);

        assert_eq!(err, Error::Remote("Not found".to_string()));
        assert_eq!(*calls.lock().unwrap(), vec!["query", "global"]);
    }

    #[test]
    fn test_hook_is_read_at_failure_time() {
        let calls = Arc::new(Mutex::new(0));
        let hook = ErrorHook::new();
        let chain = ErrorChain::new(None, hook.clone());

        chain.notify(&Error::Remote("first".to_string()));
        assert_eq!(*calls.lock().unwrap(), 0);

        let c = calls.clone();
        hook.set(Arc::new(move |_: &Error| *c.lock().unwrap() += 1));
        chain.notify(&Error::Remote("second".to_string()));
        assert_eq!(*calls.lock().unwrap(), 1);

        hook.clear();
        chain.notify(&Error::Remote("third".to_string()));
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
