use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::relu;

fn conv2d<B: Backend>(
    device: &B::Device,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
) -> Conv2d<B> {
    let padding = kernel_size / 2;
    Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .init(device)
}

/// Nearest 2x upsample cropped to `(h, w)`.
/// [B, C, H, W] -> [B, C, h, w] with h <= 2H, w <= 2W.
fn upsample_to<B: Backend>(x: Tensor<B, 4>, h: usize, w: usize) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    let x = x
        .reshape([batch, channels, height, 1, width, 1])
        .repeat_dim(3, 2)
        .repeat_dim(5, 2)
        .reshape([batch, channels, height * 2, width * 2]);
    x.slice([0..batch, 0..channels, 0..h, 0..w])
}

/// Levels `l` of the maps `Fpn::forward` returns, in order; each has stride `2^l`.
pub const PYRAMID_LEVELS: [u32; 5] = [3, 4, 5, 6, 7];

/// Feature pyramid producing P3..P7 from C3..C5.
#[derive(Module, Debug)]
pub struct Fpn<B: Backend> {
    lateral: Vec<Conv2d<B>>,
    output: Vec<Conv2d<B>>,
    p6: Conv2d<B>,
    p7: Conv2d<B>,
}

impl<B: Backend> Fpn<B> {
    /// `in_channels` are the channel counts of C3, C4, C5.
    pub fn new(device: &B::Device, in_channels: [usize; 3], channels: usize) -> Self {
        Self {
            lateral: in_channels
                .iter()
                .map(|&c| conv2d(device, c, channels, 1, 1))
                .collect(),
            output: (0..3)
                .map(|_| conv2d(device, channels, channels, 3, 1))
                .collect(),
            p6: conv2d(device, in_channels[2], channels, 3, 2),
            p7: conv2d(device, channels, channels, 3, 2),
        }
    }

    pub fn forward(&self, features: [Tensor<B, 4>; 3]) -> Vec<Tensor<B, 4>> {
        let [c3, c4, c5] = features;

        let l5 = self.lateral[2].forward(c5.clone());
        let l4 = self.lateral[1].forward(c4);
        let [_, _, h4, w4] = l4.dims();
        let l4 = l4 + upsample_to(l5.clone(), h4, w4);
        let l3 = self.lateral[0].forward(c3);
        let [_, _, h3, w3] = l3.dims();
        let l3 = l3 + upsample_to(l4.clone(), h3, w3);

        let p3 = self.output[0].forward(l3);
        let p4 = self.output[1].forward(l4);
        let p5 = self.output[2].forward(l5);
        let p6 = self.p6.forward(c5);
        let p7 = self.p7.forward(relu(p6.clone()));
        vec![p3, p4, p5, p6, p7]
    }
}
