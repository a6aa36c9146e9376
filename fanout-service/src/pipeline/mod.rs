pub mod models;
pub mod parser;

pub use models::{Block, BlockDefinition, FanoutConfig, FanoutMode, Pipeline};
pub use parser::PipelineParser;
