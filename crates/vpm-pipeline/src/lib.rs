pub mod localize;
pub mod pipeline;
pub mod store;

pub use localize::{localize, localize_file, LocalizeOptions, LocalizeReport};
pub use pipeline::{EmbeddingPipeline, FailureReason, ItemFailure, ItemState, PipelineOptions, PipelineReport};
pub use store::{write_json_atomic, write_store};
