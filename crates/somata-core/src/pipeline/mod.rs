pub mod config;
mod load;
mod orchestrator;
mod types;

pub use config::PipelineConfig;
pub use load::load_session;
pub use orchestrator::{run_pipeline, Orchestrator};
pub use types::{
    CancelToken, EntryPoint, NoOpReporter, PipelineStage, PlaneReport, PlaneState,
    ProgressReporter, RegistrationStatus, RunRequest, SessionReport,
};
