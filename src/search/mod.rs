pub mod debounce;
pub mod error;
pub mod pipeline;

pub use debounce::Debouncer;
pub use error::{ErrorKind, SearchError, UserError};
pub use pipeline::{BusyFlags, RunMode, SearchPipeline, SearchRun};
