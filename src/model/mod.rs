pub mod blocks;
pub mod detector;
pub mod head;
pub mod neck;
pub mod refine;

pub use detector::AsfpRetinaNet;
pub use head::{HeadInput, LevelPrediction, SepcRetinaHead};
pub use neck::{Asfp, Gathered};
pub use refine::Refine;
