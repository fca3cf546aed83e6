pub mod align;
pub mod cache;
pub mod classify;
pub mod consts;
pub mod curation;
pub mod detection;
pub mod error;
pub mod frame;
pub mod io;
pub mod pipeline;
pub mod registration;
pub mod results;
pub mod session;

pub use error::{Result, SomataError};
pub use pipeline::{load_session, run_pipeline, PipelineConfig};
pub use session::Session;
