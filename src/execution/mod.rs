//! Pipeline execution engine

pub mod engine;
pub mod invoker;
pub mod scheduler;

pub use engine::{CancelHandle, EventHandler, ExecutionEngine, ExecutionEvent};
pub use invoker::{RunContext, SimulatedInvoker, StageInvoker};
pub use scheduler::ExecutionScheduler;
