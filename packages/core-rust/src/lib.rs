//! `Switchyard` Core: message context, property values, and the fault-handler stack.

pub mod clock;
pub mod context;
pub mod types;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use context::MessageContext;
pub use types::{keys, EndpointId, FaultHandler, PropertyValue};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
