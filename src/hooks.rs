//! Hook dispatcher (C4): a typed registry of callbacks keyed by event class.
//!
//! The teacher has no dedicated dispatcher — its lifecycle callbacks are
//! plain `Option<Arc<dyn Fn>>` fields on `Agent` (`on_before_turn`,
//! `on_after_turn`, `on_error`; see `agent.rs`). That "registration order,
//! `Arc`-shared closure" shape is generalized here into a multi-event
//! registry keyed by `TypeId`, as the spec's typed hook-event classes need.
//! The teacher's single-closure convenience stays too, layered on `Agent`
//! directly (§2 ambient supplement).

use crate::content::Message;
use crate::error::HookError;
use crate::types::StopReason;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Marker trait for hook event payloads. `reverse_callbacks` lets "after"
/// events opt into LIFO dispatch relative to their "before" counterpart's
/// registration order (teardown mirrors setup).
pub trait HookEvent: Any + Send + Sync {
    fn reverse_callbacks() -> bool
    where
        Self: Sized,
    {
        false
    }
}

macro_rules! hook_event {
    ($name:ident { $($field:ident: $ty:ty),* $(,)? } $(, reverse = $rev:expr)?) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl HookEvent for $name {
            $(fn reverse_callbacks() -> bool { $rev })?
        }
    };
}

hook_event!(BeforeInvocationEvent {});
hook_event!(AfterInvocationEvent {}, reverse = true);
hook_event!(BeforeModelCallEvent { messages: Vec<Message> });
hook_event!(AfterModelCallEvent { message: Message, stop_reason: StopReason }, reverse = true);

/// A hook may cancel the tool call (setting `cancel_reason`) or request an
/// interrupt (setting `interrupt_request`). Interior mutability lets
/// callbacks mutate the event through a shared `&BeforeToolCallEvent`; `Mutex`
/// (rather than `RefCell`) is required here since `HookEvent: Sync`.
#[derive(Debug, Default)]
pub struct BeforeToolCallEvent {
    pub tool_use_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub cancel_reason: Mutex<Option<String>>,
    pub interrupt_request: Mutex<Option<(String, Option<String>)>>,
}

impl HookEvent for BeforeToolCallEvent {}

hook_event!(AfterToolCallEvent { tool_use_id: String, tool_name: String, is_error: bool }, reverse = true);
hook_event!(MultiAgentInitializedEvent {});
hook_event!(BeforeMultiAgentInvocationEvent {});
hook_event!(AfterMultiAgentInvocationEvent {}, reverse = true);
hook_event!(BeforeNodeCallEvent { node_id: String });
hook_event!(AfterNodeCallEvent { node_id: String }, reverse = true);

type Callback = Arc<dyn Fn(&dyn Any) -> Result<(), HookError> + Send + Sync>;

/// Typed, ordered registry of hook callbacks. Dispatch iterates a snapshot
/// (`Vec::clone` of `Arc`s) so registering from within a callback never
/// affects the in-flight dispatch.
#[derive(Default, Clone)]
pub struct HookRegistry {
    callbacks: HashMap<TypeId, Vec<Callback>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for event type `E`. Callbacks for the same event
    /// type run in registration order (or reversed, if `E::reverse_callbacks`
    /// returns true) at dispatch time.
    pub fn on<E, F>(&mut self, callback: F)
    where
        E: HookEvent + 'static,
        F: Fn(&E) -> Result<(), HookError> + Send + Sync + 'static,
    {
        let wrapped: Callback = Arc::new(move |event: &dyn Any| {
            let typed = event.downcast_ref::<E>().expect("hook dispatch type mismatch");
            callback(typed)
        });
        self.callbacks.entry(TypeId::of::<E>()).or_default().push(wrapped);
    }

    /// Dispatch `event` to every registered callback for its type, in
    /// registration order (or reverse). The first error short-circuits and
    /// propagates to the caller — the dispatcher never swallows errors.
    pub fn dispatch<E: HookEvent + 'static>(&self, event: &E) -> Result<(), HookError> {
        let Some(callbacks) = self.callbacks.get(&TypeId::of::<E>()) else {
            return Ok(());
        };
        let snapshot = callbacks.clone();
        if E::reverse_callbacks() {
            for cb in snapshot.iter().rev() {
                cb(event)?;
            }
        } else {
            for cb in snapshot.iter() {
                cb(event)?;
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.values().all(|v| v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn callbacks_run_in_registration_order() {
        let mut reg = HookRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        reg.on::<BeforeInvocationEvent, _>(move |_| {
            o1.lock().unwrap().push(1);
            Ok(())
        });
        let o2 = order.clone();
        reg.on::<BeforeInvocationEvent, _>(move |_| {
            o2.lock().unwrap().push(2);
            Ok(())
        });
        reg.dispatch(&BeforeInvocationEvent {}).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn reverse_event_runs_callbacks_lifo() {
        let mut reg = HookRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        reg.on::<AfterInvocationEvent, _>(move |_| {
            o1.lock().unwrap().push(1);
            Ok(())
        });
        let o2 = order.clone();
        reg.on::<AfterInvocationEvent, _>(move |_| {
            o2.lock().unwrap().push(2);
            Ok(())
        });
        reg.dispatch(&AfterInvocationEvent {}).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn callback_error_propagates_and_stops_dispatch() {
        let mut reg = HookRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        reg.on::<BeforeInvocationEvent, _>(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
            Err(HookError::CallbackFailed("nope".into()))
        });
        let c2 = count.clone();
        reg.on::<BeforeInvocationEvent, _>(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let err = reg.dispatch(&BeforeInvocationEvent {}).unwrap_err();
        assert!(matches!(err, HookError::CallbackFailed(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn before_tool_call_event_can_request_cancellation() {
        let mut reg = HookRegistry::new();
        reg.on::<BeforeToolCallEvent, _>(|event| {
            *event.cancel_reason.lock().unwrap() = Some("denied".into());
            Ok(())
        });
        let event = BeforeToolCallEvent {
            tool_use_id: "t1".into(),
            tool_name: "bash".into(),
            input: serde_json::json!({}),
            ..Default::default()
        };
        reg.dispatch(&event).unwrap();
        assert_eq!(event.cancel_reason.lock().unwrap().as_deref(), Some("denied"));
    }

    #[test]
    fn dispatch_with_no_registered_callbacks_is_a_noop() {
        let reg = HookRegistry::new();
        assert!(reg.dispatch(&BeforeInvocationEvent {}).is_ok());
    }
}
