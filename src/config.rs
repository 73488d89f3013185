use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{AsfpError, Result};

/// Operator applied once to the fused feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefineType {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "conv", alias = "convolution")]
    Conv,
    #[serde(rename = "non_local", alias = "non-local")]
    NonLocal,
}

impl FromStr for RefineType {
    type Err = AsfpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "conv" | "convolution" => Ok(Self::Conv),
            "non_local" | "non-local" => Ok(Self::NonLocal),
            other => Err(AsfpError::invalid(format!(
                "refine_type must be one of none, conv, non_local (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for RefineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Conv => "conv",
            Self::NonLocal => "non_local",
        };
        f.write_str(name)
    }
}

/// Normalization layer placed after each convolution of a ConvModule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NormConfig {
    #[serde(rename = "BN")]
    BatchNorm,
    #[serde(rename = "GN")]
    GroupNorm { num_groups: usize },
}

impl NormConfig {
    pub fn validate(&self, channels: usize) -> Result<()> {
        match *self {
            NormConfig::BatchNorm => Ok(()),
            NormConfig::GroupNorm { num_groups } => {
                if num_groups == 0 || channels % num_groups != 0 {
                    return Err(AsfpError::invalid(format!(
                        "GN num_groups={num_groups} must divide {channels} channels"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Construction parameters of the ASFP neck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsfpConfig {
    pub in_channels: usize,
    pub num_levels: usize,
    #[serde(default = "default_refine_level")]
    pub refine_level: usize,
    #[serde(default, deserialize_with = "refine_type_or_none")]
    pub refine_type: RefineType,
    #[serde(default)]
    pub norm: Option<NormConfig>,
}

fn default_refine_level() -> usize {
    2
}

// `refine_type: null` (or `~`) means no refine operator
fn refine_type_or_none<'de, D>(deserializer: D) -> std::result::Result<RefineType, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<RefineType>::deserialize(deserializer)?.unwrap_or_default())
}

impl AsfpConfig {
    pub fn new(in_channels: usize, num_levels: usize) -> Self {
        Self {
            in_channels,
            num_levels,
            refine_level: default_refine_level(),
            refine_type: RefineType::None,
            norm: None,
        }
    }

    pub fn with_refine_level(mut self, refine_level: usize) -> Self {
        self.refine_level = refine_level;
        self
    }

    pub fn with_refine_type(mut self, refine_type: RefineType) -> Self {
        self.refine_type = refine_type;
        self
    }

    pub fn with_norm(mut self, norm: Option<NormConfig>) -> Self {
        self.norm = norm;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 {
            return Err(AsfpError::invalid("in_channels must be positive"));
        }
        if self.num_levels == 0 {
            return Err(AsfpError::invalid("num_levels must be positive"));
        }
        if self.refine_level >= self.num_levels {
            return Err(AsfpError::invalid(format!(
                "refine_level {} outside [0, {})",
                self.refine_level, self.num_levels
            )));
        }
        if let Some(norm) = &self.norm {
            norm.validate(self.in_channels)?;
        }
        Ok(())
    }
}

/// Settings of the SEPC RetinaNet head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SepcHeadConfig {
    pub num_classes: usize,
    #[serde(default = "default_channels")]
    pub in_channels: usize,
    #[serde(default = "default_channels")]
    pub feat_channels: usize,
    #[serde(default = "default_stacked_convs")]
    pub stacked_convs: usize,
    #[serde(default = "default_num_anchors")]
    pub num_anchors: usize,
    #[serde(default = "default_prior_prob")]
    pub prior_prob: f64,
    #[serde(default)]
    pub norm: Option<NormConfig>,
}

fn default_channels() -> usize {
    256
}

fn default_stacked_convs() -> usize {
    4
}

// 3 scales per octave x 3 aspect ratios
fn default_num_anchors() -> usize {
    9
}

fn default_prior_prob() -> f64 {
    0.01
}

impl SepcHeadConfig {
    pub fn new(num_classes: usize, in_channels: usize) -> Self {
        Self {
            num_classes,
            in_channels,
            feat_channels: default_channels(),
            stacked_convs: default_stacked_convs(),
            num_anchors: default_num_anchors(),
            prior_prob: default_prior_prob(),
            norm: None,
        }
    }

    pub fn with_feat_channels(mut self, feat_channels: usize) -> Self {
        self.feat_channels = feat_channels;
        self
    }

    pub fn with_stacked_convs(mut self, stacked_convs: usize) -> Self {
        self.stacked_convs = stacked_convs;
        self
    }

    pub fn with_num_anchors(mut self, num_anchors: usize) -> Self {
        self.num_anchors = num_anchors;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(AsfpError::invalid("num_classes must be positive"));
        }
        if self.in_channels == 0 || self.feat_channels == 0 {
            return Err(AsfpError::invalid("head channels must be positive"));
        }
        if self.num_anchors == 0 {
            return Err(AsfpError::invalid("num_anchors must be positive"));
        }
        if !(self.prior_prob > 0.0 && self.prior_prob < 1.0) {
            return Err(AsfpError::invalid(format!(
                "prior_prob {} outside (0, 1)",
                self.prior_prob
            )));
        }
        if let Some(norm) = &self.norm {
            norm.validate(self.feat_channels)?;
        }
        Ok(())
    }
}

/// A `type:`-tagged block of a textual model config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub args: Mapping,
}

impl ModuleSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: Mapping::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(Value::from(key), value.into());
        self
    }
}

/// Neck + head wiring of a single-stage detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub neck: ModuleSpec,
    pub head: ModuleSpec,
    /// Downsampling factor of each pyramid level w.r.t. the input image
    #[serde(default = "default_strides")]
    pub strides: Vec<usize>,
}

fn default_strides() -> Vec<usize> {
    vec![8, 16, 32, 64, 128]
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            neck: ModuleSpec::new("ASFP")
                .with_arg("in_channels", 256)
                .with_arg("num_levels", 5)
                .with_arg("refine_level", 1)
                .with_arg("refine_type", "non_local"),
            head: ModuleSpec::new("SEPCRetinaHead")
                .with_arg("num_classes", 80)
                .with_arg("in_channels", 256)
                .with_arg("stacked_convs", 4)
                .with_arg("feat_channels", 256),
            strides: default_strides(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.strides.is_empty() {
            return Err(AsfpError::invalid("strides must not be empty"));
        }
        if let Some(level) = self.strides.iter().position(|&s| s == 0) {
            return Err(AsfpError::invalid(format!(
                "stride of level {level} must be positive"
            )));
        }
        Ok(())
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DetectorConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}
