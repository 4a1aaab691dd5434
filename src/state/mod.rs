pub mod task_store;

pub use task_store::{TaskKind, TaskParams, TaskProgress, TaskRecord, TaskStatus, TaskStore};
