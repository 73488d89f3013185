use burn::prelude::*;

use super::blocks::{Activation, ConvModule, NonLocal2d};
use crate::config::{NormConfig, RefineType};

/// The single operator applied to the fused map. `None` in the neck means
/// identity, so only the two parameterised kinds exist as variants.
#[derive(Module, Debug)]
pub enum Refine<B: Backend> {
    Conv(ConvModule<B>),
    NonLocal(NonLocal2d<B>),
}

impl<B: Backend> Refine<B> {
    /// Builds the operator selected by `refine_type`, or nothing for `none`.
    pub fn build(
        device: &B::Device,
        refine_type: RefineType,
        channels: usize,
        norm: Option<&NormConfig>,
    ) -> Option<Self> {
        match refine_type {
            RefineType::None => None,
            RefineType::Conv => Some(Refine::Conv(ConvModule::new(
                device,
                channels,
                channels,
                3,
                norm,
                Some(Activation::Relu),
            ))),
            // no channel reduction, unscaled affinities
            RefineType::NonLocal => Some(Refine::NonLocal(NonLocal2d::new(
                device, channels, 1, false, norm,
            ))),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Refine::Conv(conv) => conv.forward(x),
            Refine::NonLocal(block) => block.forward(x),
        }
    }

    pub fn refine_type(&self) -> RefineType {
        match self {
            Refine::Conv(_) => RefineType::Conv,
            Refine::NonLocal(_) => RefineType::NonLocal,
        }
    }

    pub fn xavier_init(self) -> Self {
        match self {
            Refine::Conv(conv) => Refine::Conv(conv.xavier_init()),
            Refine::NonLocal(block) => Refine::NonLocal(block.xavier_init()),
        }
    }
}
