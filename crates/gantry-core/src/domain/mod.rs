//! Domain types shared by every environment backend.

mod resources;
mod signal;
mod state;

pub use resources::{ResourceSnapshot, ResourceUsage};
pub use signal::TerminateSignal;
pub use state::LifecycleState;
