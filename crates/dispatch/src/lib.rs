//! Request dispatch: classification into worker kinds, a dynamically sized
//! worker pool, and a retrying dispatcher that drives the whole chain.

pub mod classifier;
pub mod dispatcher;
pub mod pool;
pub mod task;
pub mod worker;
pub mod workers;

pub use classifier::{WorkerKind, classify};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use pool::WorkerPool;
pub use task::{TaskState, WorkerTask};
pub use worker::{Worker, WorkerRegistry};
pub use workers::{ServiceClients, default_registry};
