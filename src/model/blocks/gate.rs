use burn::module::Param;
use burn::prelude::*;
use burn::tensor::activation::sigmoid;

/// Per-level learned affine transform feeding a sigmoid gate.
///
/// `scale` and `bias` are shaped `[1, C, 1, 1]` and broadcast over batch and
/// spatial dims. They start at ones and zeros, so the initial gate is
/// `sigmoid(x)` rather than a constant.
#[derive(Module, Debug)]
pub struct LevelGate<B: Backend> {
    pub scale: Param<Tensor<B, 4>>,
    pub bias: Param<Tensor<B, 4>>,
}

impl<B: Backend> LevelGate<B> {
    pub fn new(device: &B::Device, channels: usize) -> Self {
        Self {
            scale: Param::from_tensor(Tensor::ones([1, channels, 1, 1], device)),
            bias: Param::from_tensor(Tensor::zeros([1, channels, 1, 1], device)),
        }
    }

    /// `scale * x + bias`
    pub fn affine(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        x * self.scale.val() + self.bias.val()
    }

    /// Returns the affine output together with its sigmoid gate.
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let affine = self.affine(x);
        let gate = sigmoid(affine.clone());
        (affine, gate)
    }
}
