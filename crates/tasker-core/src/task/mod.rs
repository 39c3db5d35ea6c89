//! Linear-step task execution: definitions, the engine that advances an
//! instance through them, the name registry and the polling scheduler.

pub mod definition;
pub mod engine;
pub mod registry;
pub mod scheduler;
pub mod step;

pub use definition::{DEFAULT_MAX_RETRY, DefinitionError, TaskDefinition};
pub use engine::{EngineError, ExecutionEngine, NoopObserver, RunOutcome, TransitionObserver};
pub use registry::{RegistryError, TaskRegistry};
pub use scheduler::{CycleReport, Scheduler, SchedulerError};
pub use step::{ActionError, Step, StepAction};
