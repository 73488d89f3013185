use burn::prelude::*;
use burn::tensor::activation::softmax;

use super::ConvModule;
use crate::config::NormConfig;

/// Embedded-gaussian non-local block.
///
/// Every spatial position attends to every other one through a softmax over
/// `theta(x)^T phi(x)`, aggregates `g(x)` with those weights and is added back
/// to the input after a 1x1 projection.
#[derive(Module, Debug)]
pub struct NonLocal2d<B: Backend> {
    g: ConvModule<B>,
    theta: ConvModule<B>,
    phi: ConvModule<B>,
    conv_out: ConvModule<B>,
    inter_channels: usize,
    use_scale: bool,
}

impl<B: Backend> NonLocal2d<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        reduction: usize,
        use_scale: bool,
        norm: Option<&NormConfig>,
    ) -> Self {
        let inter_channels = (in_channels / reduction.max(1)).max(1);

        Self {
            g: ConvModule::new(device, in_channels, inter_channels, 1, None, None),
            theta: ConvModule::new(device, in_channels, inter_channels, 1, None, None),
            phi: ConvModule::new(device, in_channels, inter_channels, 1, None, None),
            conv_out: ConvModule::new(device, inter_channels, in_channels, 1, norm, None),
            inter_channels,
            use_scale,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [n, _, h, w] = x.dims();
        let inter = self.inter_channels;

        // [N, HW, C']
        let g_x = self
            .g
            .forward(x.clone())
            .reshape([n, inter, h * w])
            .swap_dims(1, 2);
        let theta_x = self
            .theta
            .forward(x.clone())
            .reshape([n, inter, h * w])
            .swap_dims(1, 2);
        // [N, C', HW]
        let phi_x = self.phi.forward(x.clone()).reshape([n, inter, h * w]);

        // [N, HW, HW]
        let mut pairwise = theta_x.matmul(phi_x);
        if self.use_scale {
            pairwise = pairwise / (inter as f32).sqrt();
        }
        let pairwise = softmax(pairwise, 2);

        let y = pairwise
            .matmul(g_x)
            .swap_dims(1, 2)
            .reshape([n, inter, h, w]);

        x + self.conv_out.forward(y)
    }

    pub fn xavier_init(self) -> Self {
        Self {
            g: self.g.xavier_init(),
            theta: self.theta.xavier_init(),
            phi: self.phi.xavier_init(),
            conv_out: self.conv_out.xavier_init(),
            ..self
        }
    }
}
