//! Refresh/validation orchestration and proxy lifecycle for birbwatch.

pub mod app_state;
pub mod controller;
pub mod engine;
pub mod event;
pub mod probe;
pub mod process;
pub mod refresh;
pub mod resolver;
pub mod sources;
pub mod task_pool;

pub use engine::Engine;
pub use event::CoreEvent;
