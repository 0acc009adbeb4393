mod enricher;
mod pipeline;

pub use enricher::enrich;
pub use pipeline::BridgePipeline;
