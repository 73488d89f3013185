use burn::module::Ignored;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{
    BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig, Initializer, PaddingConfig2d,
};
use burn::prelude::*;
use burn::tensor::activation;

use crate::config::NormConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Silu,
}

#[derive(Module, Debug)]
pub enum Norm<B: Backend> {
    Batch(BatchNorm<B>),
    Group(GroupNorm<B>),
}

impl<B: Backend> Norm<B> {
    fn new(device: &B::Device, config: &NormConfig, channels: usize) -> Self {
        match *config {
            NormConfig::BatchNorm => Norm::Batch(BatchNormConfig::new(channels).init(device)),
            NormConfig::GroupNorm { num_groups } => {
                Norm::Group(GroupNormConfig::new(num_groups, channels).init(device))
            }
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Norm::Batch(bn) => bn.forward(x),
            Norm::Group(gn) => gn.forward(x),
        }
    }
}

/// Conv -> optional norm -> optional activation.
///
/// Odd kernels use same padding so the spatial size is preserved. The conv
/// carries a bias only when there is no norm layer after it.
#[derive(Module, Debug)]
pub struct ConvModule<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<Norm<B>>,
    activation: Ignored<Option<Activation>>,
}

impl<B: Backend> ConvModule<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        norm: Option<&NormConfig>,
        activation: Option<Activation>,
    ) -> Self {
        let padding = kernel_size / 2;

        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_bias(norm.is_none())
                .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                .init(device),
            norm: norm.map(|cfg| Norm::new(device, cfg, out_channels)),
            activation: Ignored(activation),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        match self.activation.0 {
            Some(Activation::Relu) => activation::relu(x),
            Some(Activation::Silu) => activation::silu(x),
            None => x,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.conv.weight.val().dims()[0]
    }

    /// Xavier/Glorot uniform weights (gain 1), zero bias.
    pub fn xavier_init(self) -> Self {
        self.reinit(Initializer::XavierUniform { gain: 1.0 }, 0.0)
    }

    /// Gaussian weights, constant bias.
    pub fn normal_init(self, std: f64, bias: f64) -> Self {
        self.reinit(Initializer::Normal { mean: 0.0, std }, bias)
    }

    pub(crate) fn reinit(mut self, initializer: Initializer, bias: f64) -> Self {
        let weight = self.conv.weight.val();
        let device = weight.device();
        let [out_c, in_c, kh, kw] = weight.dims();
        let fan_in = in_c * kh * kw;
        let fan_out = out_c * kh * kw;

        self.conv.weight =
            initializer.init_with([out_c, in_c, kh, kw], Some(fan_in), Some(fan_out), &device);
        if self.conv.bias.is_some() {
            self.conv.bias = Some(Initializer::Constant { value: bias }.init([out_c], &device));
        }
        self
    }
}
