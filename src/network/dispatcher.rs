use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::InboundEvent;
use crate::error::HandlerError;

/// Consumer of inbound socket events.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &InboundEvent) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&InboundEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &InboundEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Ordered registry of handlers sharing the one socket.
///
/// Handlers are identified by their `Arc` allocation: registering the same `Arc` twice is a
/// no-op. Each dispatch works on a snapshot of the registry taken when it starts, so a
/// handler may add or remove handlers without affecting the pass in progress.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<Arc<dyn EventHandler>>> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `false` when the handler was already registered.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.handlers();
        if handlers.iter().any(|known| same_handler(known, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Returns `false` when the handler was not registered.
    pub fn remove_handler(&self, handler: &Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.handlers();
        let before = handlers.len();
        handlers.retain(|known| !same_handler(known, handler));
        handlers.len() != before
    }

    pub fn clear(&self) {
        self.handlers().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every handler in registration order. Returns how many succeeded.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        let snapshot: Vec<Arc<dyn EventHandler>> = self.handlers().clone();
        let mut delivered = 0;

        for (index, handler) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    log::error!("Handler #{index} failed on `{}` event: {err}", event.kind());
                }
                Err(_) => {
                    log::error!("Handler #{index} panicked on `{}` event", event.kind());
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn error_event() -> InboundEvent {
        InboundEvent::Error {
            message: "boom".to_string(),
        }
    }

    fn recorder(
        log: Arc<StdMutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> Arc<dyn EventHandler> {
        Arc::new(move |_: &InboundEvent| -> Result<(), HandlerError> {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    #[test]
    fn delivers_in_registration_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        dispatcher.add_handler(recorder(log.clone(), "first"));
        dispatcher.add_handler(recorder(log.clone(), "second"));

        assert_eq!(dispatcher.dispatch(&error_event()), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn add_is_idempotent_and_remove_tolerates_absence() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        let handler = recorder(log.clone(), "only");

        assert!(dispatcher.add_handler(handler.clone()));
        assert!(!dispatcher.add_handler(handler.clone()));
        dispatcher.dispatch(&error_event());
        assert_eq!(log.lock().unwrap().len(), 1);

        assert!(dispatcher.remove_handler(&handler));
        assert!(!dispatcher.remove_handler(&handler));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn failing_and_panicking_handlers_are_isolated() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        dispatcher.add_handler(Arc::new(|_: &InboundEvent| -> Result<(), HandlerError> {
            Err(HandlerError("nope".into()))
        }));
        dispatcher.add_handler(Arc::new(|_: &InboundEvent| -> Result<(), HandlerError> {
            panic!("handler bug")
        }));
        dispatcher.add_handler(recorder(log.clone(), "survivor"));

        assert_eq!(dispatcher.dispatch(&error_event()), 1);
        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    }

    #[test]
    fn mutation_during_dispatch_applies_to_next_pass() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = Arc::new(EventDispatcher::new());
        let late = recorder(log.clone(), "late");

        let registering: Arc<dyn EventHandler> = {
            let dispatcher = dispatcher.clone();
            let late = late.clone();
            Arc::new(move |_: &InboundEvent| -> Result<(), HandlerError> {
                dispatcher.add_handler(late.clone());
                Ok(())
            })
        };
        dispatcher.add_handler(registering);

        assert_eq!(dispatcher.dispatch(&error_event()), 1);
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(dispatcher.dispatch(&error_event()), 2);
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }
}
