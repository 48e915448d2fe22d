//! Generated natural-language explanations and their cache

mod cache;
mod generator;
mod prompt;
mod store;

pub use cache::{
    CacheConfig, Clock, ExplanationCache, ManualClock, SystemClock, DEFAULT_GENERATION_TIMEOUT,
    DEFAULT_TTL_DAYS,
};
pub use generator::{GenerateError, GeneratorConfig, OpenAiGenerator, TextGenerator};
pub use prompt::{build_portfolio_prompt, build_prompt, SYSTEM_PROMPT};
pub use store::{CacheEntry, ExpiringStore, FileExpiringStore, MemoryExpiringStore};
