use std::collections::HashMap;

use bytes::Bytes;

use crate::types::{FaultHandler, PropertyValue};

/// Per-message context carried through mediation and routing.
///
/// Owned by the worker processing one inbound message for the lifetime of
/// the exchange. The engine reads and mutates it but never shares it across
/// threads.
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Unique identifier of this message (UUID v4).
    pub message_id: String,
    /// Destination address (`To`).
    pub to: Option<String>,
    /// Originating address (`From`).
    pub from: Option<String>,
    /// Where replies should go (`ReplyTo`).
    pub reply_to: Option<String>,
    /// Where faults should go (`FaultTo`).
    pub fault_to: Option<String>,
    /// `true` when this context carries a response rather than a request.
    pub is_response: bool,
    /// Opaque payload handle. The engine never inspects it.
    pub payload: Bytes,
    properties: HashMap<String, PropertyValue>,
    fault_stack: Vec<FaultHandler>,
}

impl MessageContext {
    /// Creates a request context with a fresh message id and the given payload.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            to: None,
            from: None,
            reply_to: None,
            fault_to: None,
            is_response: false,
            payload: payload.into(),
            properties: HashMap::new(),
            fault_stack: Vec::new(),
        }
    }

    /// Sets the `To` address, builder style.
    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    /// Iterates all properties in arbitrary order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn push_fault_handler(&mut self, handler: FaultHandler) {
        self.fault_stack.push(handler);
    }

    pub fn pop_fault_handler(&mut self) -> Option<FaultHandler> {
        self.fault_stack.pop()
    }

    pub fn peek_fault_handler(&self) -> Option<&FaultHandler> {
        self.fault_stack.last()
    }

    /// Pops the top handler only if it equals `handler`.
    ///
    /// Returns `true` when a handler was removed. A handler that was already
    /// consumed by fault processing leaves the stack untouched.
    pub fn pop_fault_handler_if(&mut self, handler: &FaultHandler) -> bool {
        if self.fault_stack.last() == Some(handler) {
            self.fault_stack.pop();
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn fault_stack_depth(&self) -> usize {
        self.fault_stack.len()
    }
}
