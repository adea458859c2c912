mod errors;
mod events;

pub mod commands;
pub mod engine;
pub mod memory;
pub mod pipeline;
pub mod shell;

pub use commands::CommandSurface;
pub use errors::Error;
pub use errors::Result;
pub use events::{Event, EventBody, OutputChannel};
pub use pipeline::{Pipeline, PipelineConfig, RegistryAuthOptions, ResolvedState, SourceOptions};
