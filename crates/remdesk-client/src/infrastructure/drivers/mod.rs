//! Protocol driver implementations.
//!
//! - **`tcp`** – `TcpProbeDriver`, a real network driver that connects to
//!   the endpoint, checks the server greeting, and streams status frames.
//!   Used for every protocol by the `remdesk` binary.
//! - **`mock`** – `MockDriver`, scriptable and recording.  Used by tests and
//!   by `remdesk --simulate`.

pub mod mock;
pub mod tcp;

use std::sync::Arc;

use remdesk_core::ProtocolKind;

use crate::application::driver::{DriverRegistry, ProtocolDriver};

use self::mock::{MockBehavior, MockDriverFactory};
use self::tcp::TcpProbeDriver;

/// Registry with a [`TcpProbeDriver`] for every protocol kind.
pub fn default_registry() -> DriverRegistry {
    ProtocolKind::ALL
        .into_iter()
        .fold(DriverRegistry::new(), |registry, kind| {
            registry.with(kind, move || {
                Arc::new(TcpProbeDriver::new(kind)) as Arc<dyn ProtocolDriver>
            })
        })
}

/// Registry of offline [`MockDriver`](mock::MockDriver)s that all succeed
/// after `behavior.connect_delay`.
pub fn simulated_registry(behavior: MockBehavior) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    for kind in ProtocolKind::ALL {
        MockDriverFactory::new(kind, behavior.clone()).register_into(&mut registry);
    }
    registry
}
