// Execution Engine Module
// Block graph, fan-out materialization, completion detection and the run scheduler

pub mod cache;
pub mod child;
pub mod completion;
pub mod counter;
pub mod events;
pub mod executor;
pub mod factory;
pub mod graph;
pub mod identifier;
pub mod scheduler;

// Re-export key types
pub use cache::{FanoutState, PositionKey, TickCache};
pub use child::{compare_positions, cross_product, restrict, Axis, DynamicChildFactory};
pub use completion::{CompletionDetector, CompletionStatus};
pub use counter::{CounterKind, DynamicItemCounter};
pub use events::{progress_channel, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use executor::{BlockExecutor, BlockOutcome, PipelineRunner, RunSummary};
pub use factory::DynamicBlockFactory;
pub use graph::{BlockGraph, GraphError, GraphErrorKind};
pub use identifier::{base_uuid, decode_indexes, instance_uuid, placeholder_uuid, Coordinate};
pub use scheduler::{DynamicScheduler, TickOutcome};
