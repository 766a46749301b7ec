pub mod error;
pub mod handlers;
pub mod model;
pub mod sync;

pub use error::{Result, SyncEngineError};
pub use handlers::{
    action, blocking_action, task, task_cancel, ActionHandler, BlockingActionHandler, Target,
    TaskCancelHandler, TaskFactory,
};
pub use model::{to_camel_case, to_snake_case, SchemaExport, SyncModel, SyncSchema};
pub use sync::{Sync, SyncBuilder};
