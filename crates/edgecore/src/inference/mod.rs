#![forbid(unsafe_code)]

mod cache;
mod dispatcher;

pub use cache::{
    InferenceCacheStatistics, InferenceResultCache, SceneSample, SceneSource, WarmupReport,
};
pub use dispatcher::{InferenceDispatcher, InferenceExecutor, InferenceResponse, ResultSource};
