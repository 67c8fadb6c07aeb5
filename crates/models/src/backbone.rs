//! ResNet-style backbone built from basic residual blocks.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{GroupNorm, GroupNormConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Largest group count <= 32 that divides `channels`.
pub(crate) fn norm_groups(channels: usize) -> usize {
    (1..=32.min(channels))
        .rev()
        .find(|g| channels % g == 0)
        .unwrap_or(1)
}

#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    conv: Conv2d<B>,
    norm: GroupNorm<B>,
}

impl<B: Backend> ConvNorm<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
    ) -> Self {
        let padding = kernel_size / 2;
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_bias(false)
                .init(device),
            norm: GroupNormConfig::new(norm_groups(out_channels), out_channels).init(device),
        }
    }

    /// Conv + norm, no activation.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvNorm<B>,
    conv2: ConvNorm<B>,
    downsample: Option<ConvNorm<B>>,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(device: &B::Device, in_channels: usize, out_channels: usize, stride: usize) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| ConvNorm::new(device, in_channels, out_channels, 1, stride));
        Self {
            conv1: ConvNorm::new(device, in_channels, out_channels, 3, stride),
            conv2: ConvNorm::new(device, out_channels, out_channels, 3, 1),
            downsample,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(ds) => ds.forward(x.clone()),
            None => x.clone(),
        };
        let out = relu(self.conv1.forward(x));
        let out = self.conv2.forward(out);
        relu(out + identity)
    }
}

#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> Stage<B> {
    fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        depth: usize,
        stride: usize,
    ) -> Self {
        let mut blocks = Vec::with_capacity(depth.max(1));
        blocks.push(BasicBlock::new(device, in_channels, out_channels, stride));
        for _ in 1..depth {
            blocks.push(BasicBlock::new(device, out_channels, out_channels, 1));
        }
        Self { blocks }
    }

    fn forward(&self, mut x: Tensor<B, 4>) -> Tensor<B, 4> {
        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    stem: ConvNorm<B>,
    pool: MaxPool2d,
    stages: Vec<Stage<B>>,
}

impl<B: Backend> ResNetBackbone<B> {
    /// Four stages with strides 4, 8, 16, 32 relative to the input.
    pub fn new(device: &B::Device, depths: [usize; 4], widths: [usize; 4]) -> Self {
        let stem = ConvNorm::new(device, 3, widths[0], 7, 2);
        let pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();
        let mut stages = Vec::with_capacity(4);
        let mut in_ch = widths[0];
        for (i, (&depth, &width)) in depths.iter().zip(widths.iter()).enumerate() {
            let stride = if i == 0 { 1 } else { 2 };
            stages.push(Stage::new(device, in_ch, width, depth, stride));
            in_ch = width;
        }
        Self { stem, pool, stages }
    }

    /// Returns `[C3, C4, C5]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> [Tensor<B, 4>; 3] {
        let x = relu(self.stem.forward(images));
        let c2 = self.stages[0].forward(self.pool.forward(x));
        let c3 = self.stages[1].forward(c2);
        let c4 = self.stages[2].forward(c3.clone());
        let c5 = self.stages[3].forward(c4.clone());
        [c3, c4, c5]
    }
}
