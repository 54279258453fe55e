pub mod executor;
pub mod graph;
pub mod task;

pub use executor::DagExecutor;
pub use graph::Dag;
pub use task::{Task, TaskContext, TaskOutput, TaskResult};
