use std::path::Path;

use burn::module::Ignored;
use burn::prelude::*;
use burn::record::{BinFileRecorder, FullPrecisionSettings};

use super::head::{LevelPrediction, SepcRetinaHead};
use super::neck::Asfp;
use crate::config::DetectorConfig;
use crate::error::{AsfpError, Result};
use crate::registry::{build_head, build_neck};

/// Single-stage RetinaNet-style detector over externally produced pyramid
/// features: ASFP neck followed by the SEPC head.
#[derive(Module, Debug)]
pub struct AsfpRetinaNet<B: Backend> {
    pub neck: Asfp<B>,
    pub head: SepcRetinaHead<B>,
    strides: Ignored<Vec<usize>>,
}

impl<B: Backend> AsfpRetinaNet<B> {
    pub fn new(device: &B::Device, config: &DetectorConfig) -> Result<Self> {
        config.validate()?;
        let neck = build_neck(&config.neck, device)?;
        let head = build_head(&config.head, device)?;

        if config.strides.len() != neck.num_levels() {
            return Err(AsfpError::invalid(format!(
                "{} strides configured for {} pyramid levels",
                config.strides.len(),
                neck.num_levels()
            )));
        }
        if head.in_channels() != neck.in_channels() {
            return Err(AsfpError::invalid(format!(
                "head expects {} input channels, neck produces {}",
                head.in_channels(),
                neck.in_channels()
            )));
        }

        Ok(Self {
            neck,
            head,
            strides: Ignored(config.strides.clone()),
        })
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides.0
    }

    /// Expected `[B, C, H, W]` of every pyramid level for a square input image.
    pub fn feature_shapes(&self, batch: usize, image_size: usize) -> Vec<[usize; 4]> {
        let channels = self.neck.in_channels();
        self.strides
            .0
            .iter()
            .map(|&stride| {
                let side = image_size.div_ceil(stride);
                [batch, channels, side, side]
            })
            .collect()
    }

    /// Weight initialisation run once after construction.
    pub fn init_weights(self) -> Self {
        Self {
            neck: self.neck.init_weights(),
            head: self.head.init_weights(),
            ..self
        }
    }

    pub fn forward(&self, features: Vec<Tensor<B, 4>>) -> Result<Vec<LevelPrediction<B>>> {
        let refined = self.neck.forward(features)?;
        Ok(self.head.forward(refined))
    }

    /// Writes `<path>.bin` weights and a `<path>.json` summary.
    pub fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.clone()
            .save_file(path.to_path_buf(), &recorder)
            .map_err(|e| AsfpError::Checkpoint(format!("Failed to save model: {:?}", e)))?;

        let summary = serde_json::json!({
            "model_type": "AsfpRetinaNet",
            "num_levels": self.neck.num_levels(),
            "refine_level": self.neck.refine_level(),
            "refine_type": self.neck.refine_type().to_string(),
            "num_classes": self.head.num_classes(),
            "num_anchors": self.head.num_anchors(),
            "strides": self.strides(),
        });
        let summary = serde_json::to_string_pretty(&summary)
            .map_err(|e| AsfpError::Checkpoint(e.to_string()))?;
        std::fs::write(path.with_extension("json"), summary)?;

        log::info!("Checkpoint saved: {}", path.display());
        Ok(())
    }

    pub fn load_checkpoint(self, path: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.load_file(path.as_ref().to_path_buf(), &recorder, device)
            .map_err(|e| AsfpError::Checkpoint(format!("Failed to load model: {:?}", e)))
    }
}
