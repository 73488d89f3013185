pub mod config;
pub mod error;
pub mod model;
pub mod registry;

// Re-exports for convenience
pub use config::{AsfpConfig, DetectorConfig, ModuleSpec, NormConfig, RefineType, SepcHeadConfig};
pub use error::{AsfpError, Result};
pub use model::{Asfp, AsfpRetinaNet, HeadInput, LevelPrediction, SepcRetinaHead};
