// Adapters layer: concrete implementations of the domain ports.

pub mod listener;
pub mod simulated;

pub use listener::TracingProfilesListener;
pub use simulated::{SimulatedBackend, SimulatedCard, SimulatedLpa};
