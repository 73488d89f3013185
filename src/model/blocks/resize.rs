use burn::prelude::*;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

/// How a feature map is brought to another spatial size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Adaptive max pooling over the target grid cells
    MaxPool,
    /// Nearest-neighbor index mapping
    Nearest,
}

impl ResizeMode {
    /// Mode used to pull `level` to the refine resolution.
    pub fn gather(level: usize, refine_level: usize) -> Self {
        if level < refine_level {
            ResizeMode::MaxPool
        } else {
            ResizeMode::Nearest
        }
    }

    /// Mode used to push the refined map back to `level`, inverse of `gather`.
    pub fn scatter(level: usize, refine_level: usize) -> Self {
        match Self::gather(level, refine_level) {
            ResizeMode::MaxPool => ResizeMode::Nearest,
            ResizeMode::Nearest => ResizeMode::MaxPool,
        }
    }

    pub fn apply<B: Backend>(self, x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
        match self {
            ResizeMode::MaxPool => adaptive_max_pool2d(x, size),
            ResizeMode::Nearest => interpolate_nearest(x, size),
        }
    }
}

/// Adaptive max pooling to `[out_h, out_w]`.
///
/// Cell `i` of an axis of length `n` pooled to `m` covers
/// `floor(i*n/m) .. ceil((i+1)*n/m)`.
pub fn adaptive_max_pool2d<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    let [out_h, out_w] = size;

    if height % out_h == 0 && width % out_w == 0 {
        // Exact tiling: [B, C, OH, KH, OW, KW] and reduce both kernel axes
        let (kh, kw) = (height / out_h, width / out_w);
        return x
            .reshape([batch, channels, out_h, kh, out_w, kw])
            .max_dim(5)
            .max_dim(3)
            .reshape([batch, channels, out_h, out_w]);
    }

    // Max over a rectangle is separable: rows first, then columns
    let x = adaptive_max_dim(x, 2, out_h);
    adaptive_max_dim(x, 3, out_w)
}

fn adaptive_max_dim<B: Backend>(x: Tensor<B, 4>, dim: usize, out: usize) -> Tensor<B, 4> {
    let size = x.dims()[dim];
    if size == out {
        return x;
    }

    let cells = (0..out)
        .map(|i| {
            let start = i * size / out;
            let end = ((i + 1) * size).div_ceil(out);
            x.clone().narrow(dim, start, end - start).max_dim(dim)
        })
        .collect();
    Tensor::cat(cells, dim)
}

/// Nearest-neighbor resize to `[out_h, out_w]`; output index `i` reads
/// source index `floor(i * n / m)`.
pub fn interpolate_nearest<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    if [height, width] == size {
        return x;
    }
    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Nearest))
}
