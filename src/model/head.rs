use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::*;

use crate::config::SepcHeadConfig;
use crate::model::blocks::{Activation, ConvModule};
use crate::error::Result;

/// Feature(s) handed to the head for one pyramid level.
#[derive(Debug, Clone)]
pub enum HeadInput<B: Backend> {
    /// One map feeds both the classification and regression towers
    Shared(Tensor<B, 4>),
    /// Separate maps for the classification and regression towers
    Split {
        cls: Tensor<B, 4>,
        reg: Tensor<B, 4>,
    },
}

impl<B: Backend> From<Tensor<B, 4>> for HeadInput<B> {
    fn from(x: Tensor<B, 4>) -> Self {
        HeadInput::Shared(x)
    }
}

/// Raw per-level predictions.
#[derive(Debug, Clone)]
pub struct LevelPrediction<B: Backend> {
    /// [B, A * num_classes, H, W]
    pub cls_score: Tensor<B, 4>,
    /// [B, A * 4, H, W]
    pub bbox_pred: Tensor<B, 4>,
}

/// RetinaNet head whose towers may run on different inputs per level.
#[derive(Module, Debug)]
pub struct SepcRetinaHead<B: Backend> {
    cls_convs: Vec<ConvModule<B>>,
    reg_convs: Vec<ConvModule<B>>,
    retina_cls: Conv2d<B>,
    retina_reg: Conv2d<B>,
    in_channels: usize,
    num_classes: usize,
    num_anchors: usize,
    prior_prob: f64,
}

fn conv3x3<B: Backend>(device: &B::Device, in_channels: usize, out_channels: usize) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

fn bias_init_with_prob(prior_prob: f64) -> f64 {
    -((1.0 - prior_prob) / prior_prob).ln()
}

impl<B: Backend> SepcRetinaHead<B> {
    pub fn new(device: &B::Device, config: &SepcHeadConfig) -> Result<Self> {
        config.validate()?;

        let norm = config.norm.as_ref();
        let tower = |device: &B::Device| -> Vec<ConvModule<B>> {
            (0..config.stacked_convs)
                .map(|i| {
                    let in_channels = if i == 0 {
                        config.in_channels
                    } else {
                        config.feat_channels
                    };
                    ConvModule::new(
                        device,
                        in_channels,
                        config.feat_channels,
                        3,
                        norm,
                        Some(Activation::Relu),
                    )
                })
                .collect()
        };

        // Without stacked convs the predictors read the input directly
        let pred_in = if config.stacked_convs == 0 {
            config.in_channels
        } else {
            config.feat_channels
        };

        log::info!("SEPCRetinaHead init:");
        log::info!("  num_classes   = {}", config.num_classes);
        log::info!("  num_anchors   = {}", config.num_anchors);
        log::info!(
            "  cls channels  = {} x {} = {}",
            config.num_anchors,
            config.num_classes,
            config.num_anchors * config.num_classes
        );
        log::info!("  stacked_convs = {}", config.stacked_convs);

        Ok(Self {
            cls_convs: tower(device),
            reg_convs: tower(device),
            retina_cls: conv3x3(device, pred_in, config.num_anchors * config.num_classes),
            retina_reg: conv3x3(device, pred_in, config.num_anchors * 4),
            in_channels: config.in_channels,
            num_classes: config.num_classes,
            num_anchors: config.num_anchors,
            prior_prob: config.prior_prob,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_anchors(&self) -> usize {
        self.num_anchors
    }

    /// Gaussian (std 0.01) weights everywhere; the classifier bias encodes
    /// the foreground prior.
    pub fn init_weights(self) -> Self {
        let cls_bias = bias_init_with_prob(self.prior_prob);
        Self {
            cls_convs: self
                .cls_convs
                .into_iter()
                .map(|conv| conv.normal_init(0.01, 0.0))
                .collect(),
            reg_convs: self
                .reg_convs
                .into_iter()
                .map(|conv| conv.normal_init(0.01, 0.0))
                .collect(),
            retina_cls: normal_init(self.retina_cls, 0.01, cls_bias),
            retina_reg: normal_init(self.retina_reg, 0.01, 0.0),
            ..self
        }
    }

    pub fn forward_single(&self, input: HeadInput<B>) -> LevelPrediction<B> {
        let (cls_feat, reg_feat) = match input {
            HeadInput::Shared(x) => (x.clone(), x),
            HeadInput::Split { cls, reg } => (cls, reg),
        };

        let cls_feat = self
            .cls_convs
            .iter()
            .fold(cls_feat, |x, conv| conv.forward(x));
        let reg_feat = self
            .reg_convs
            .iter()
            .fold(reg_feat, |x, conv| conv.forward(x));

        LevelPrediction {
            cls_score: self.retina_cls.forward(cls_feat),
            bbox_pred: self.retina_reg.forward(reg_feat),
        }
    }

    pub fn forward<I>(&self, inputs: I) -> Vec<LevelPrediction<B>>
    where
        I: IntoIterator,
        I::Item: Into<HeadInput<B>>,
    {
        inputs
            .into_iter()
            .enumerate()
            .map(|(level, input)| {
                let pred = self.forward_single(input.into());
                log::debug!(
                    "  head level {}: cls {:?}, reg {:?}",
                    level,
                    pred.cls_score.dims(),
                    pred.bbox_pred.dims()
                );
                pred
            })
            .collect()
    }
}

fn normal_init<B: Backend>(mut conv: Conv2d<B>, std: f64, bias: f64) -> Conv2d<B> {
    let weight = conv.weight.val();
    let device = weight.device();
    let [out_c, in_c, kh, kw] = weight.dims();

    conv.weight = Initializer::Normal { mean: 0.0, std }.init_with(
        [out_c, in_c, kh, kw],
        Some(in_c * kh * kw),
        Some(out_c * kh * kw),
        &device,
    );
    conv.bias = Some(Initializer::Constant { value: bias }.init([out_c], &device));
    conv
}
