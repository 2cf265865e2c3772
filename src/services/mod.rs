pub mod matcher;
pub mod normalizer;
pub mod pipeline;
pub mod reconciler;
pub mod scheduler;
pub mod signature;
pub mod suppressor;
pub mod worker;
