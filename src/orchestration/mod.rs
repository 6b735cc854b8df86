//! The coordination engine.
//!
//! One request flows through this module front to back: the planner
//! turns the request into a plan, the effort classifier parameterizes
//! the engine, and the coordinator alternates dispatch waves with
//! collection barriers until the plan settles and the synthesizer folds
//! the results into a final outcome.

pub mod collector;
pub mod coordinator;
pub mod dispatcher;
pub mod effort;
pub mod planner;
pub mod pool;
pub mod resolver;
pub mod synthesizer;

pub use collector::Collector;
pub use coordinator::{Coordinator, EngineEvent, RequestId};
pub use dispatcher::Dispatcher;
pub use effort::{classify, EffortLevel, EffortParams};
pub use planner::Request;
pub use pool::{WorkerEvent, WorkerPool};
pub use synthesizer::{Synthesis, Synthesizer};
