pub mod answer;
pub mod generation;

pub use answer::{
    HealthStatus, QueryOptions, QueryPipeline, QueryResponse, SourceAttribution,
    EMPTY_CORPUS_ANSWER,
};
pub use generation::{ChatModel, OpenAiChat};
