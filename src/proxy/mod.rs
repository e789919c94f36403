pub mod engine;
pub mod error;
pub mod lifecycle;

pub use engine::CommandEngine;
pub use lifecycle::ProxyLifecycleController;
