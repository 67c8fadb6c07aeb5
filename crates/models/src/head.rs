//! Shared dense prediction heads.

use burn::module::Param;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

const HEAD_INIT_STD: f64 = 0.01;

fn head_conv<B: Backend>(
    device: &B::Device,
    in_channels: usize,
    out_channels: usize,
    bias: f32,
) -> Conv2d<B> {
    let mut conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_initializer(Initializer::Normal {
            mean: 0.0,
            std: HEAD_INIT_STD,
        })
        .init(device);
    conv.bias = Some(Param::from_tensor(Tensor::full(
        [out_channels],
        bias,
        device,
    )));
    conv
}

/// Conv tower + predictor applied to every pyramid level with shared weights.
#[derive(Module, Debug)]
pub struct DenseHead<B: Backend> {
    tower: Vec<Conv2d<B>>,
    predictor: Conv2d<B>,
    num_anchors: usize,
    out_per_anchor: usize,
}

impl<B: Backend> DenseHead<B> {
    pub fn new(
        device: &B::Device,
        channels: usize,
        num_convs: usize,
        num_anchors: usize,
        out_per_anchor: usize,
        predictor_bias: f32,
    ) -> Self {
        Self {
            tower: (0..num_convs)
                .map(|_| head_conv(device, channels, channels, 0.0))
                .collect(),
            predictor: head_conv(
                device,
                channels,
                num_anchors * out_per_anchor,
                predictor_bias,
            ),
            num_anchors,
            out_per_anchor,
        }
    }

    /// Classification head whose initial sigmoid output is `prior_prob` everywhere.
    pub fn classification(
        device: &B::Device,
        channels: usize,
        num_convs: usize,
        num_anchors: usize,
        num_classes: usize,
        prior_prob: f32,
    ) -> Self {
        let bias = -((1.0 - prior_prob) / prior_prob).ln();
        Self::new(device, channels, num_convs, num_anchors, num_classes, bias)
    }

    pub fn regression(
        device: &B::Device,
        channels: usize,
        num_convs: usize,
        num_anchors: usize,
    ) -> Self {
        Self::new(device, channels, num_convs, num_anchors, 4, 0.0)
    }

    /// [B, C, H, W] -> [B, H*W*A, K], rows ordered (y, x, anchor).
    pub fn forward_level(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        let mut x = x;
        for conv in &self.tower {
            x = relu(conv.forward(x));
        }
        let out = self.predictor.forward(x);
        let [b, _, h, w] = out.dims();
        out.permute([0, 2, 3, 1])
            .reshape([b, h * w * self.num_anchors, self.out_per_anchor])
    }

    pub fn forward(&self, features: &[Tensor<B, 4>]) -> Tensor<B, 3> {
        let levels = features
            .iter()
            .map(|f| self.forward_level(f.clone()))
            .collect();
        Tensor::cat(levels, 1)
    }
}
