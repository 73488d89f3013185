pub mod conv;
pub mod gate;
pub mod non_local;
pub mod resize;

pub use conv::{Activation, ConvModule, Norm};
pub use gate::LevelGate;
pub use non_local::NonLocal2d;
pub use resize::{adaptive_max_pool2d, interpolate_nearest, ResizeMode};
