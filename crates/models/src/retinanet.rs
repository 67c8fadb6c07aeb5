use crate::backbone::ResNetBackbone;
use crate::fpn::Fpn;
use crate::head::DenseHead;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vision_core::anchors::AnchorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetinaNetConfig {
    pub num_classes: usize,
    /// Residual blocks per backbone stage.
    pub depths: [usize; 4],
    /// Channels per backbone stage.
    pub widths: [usize; 4],
    pub fpn_channels: usize,
    /// Conv layers in each head tower.
    pub head_convs: usize,
    /// Initial foreground probability of the classification head.
    pub prior_prob: f32,
    pub anchors: AnchorConfig,
}

impl Default for RetinaNetConfig {
    fn default() -> Self {
        Self {
            num_classes: data_contracts::OXFORD_PET_BREEDS.len(),
            depths: [2, 2, 2, 2],
            widths: [64, 128, 256, 512],
            fpn_channels: 256,
            head_convs: 4,
            prior_prob: 0.01,
            anchors: AnchorConfig::default(),
        }
    }
}

impl RetinaNetConfig {
    pub fn num_anchors(&self) -> usize {
        self.anchors.anchors_per_location()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> RetinaNet<B> {
        RetinaNet::new(self.clone(), device)
    }
}

/// Raw head outputs for a batch.
#[derive(Debug, Clone)]
pub struct RetinaOutput<B: Backend> {
    /// [B, N, num_classes] pre-sigmoid scores.
    pub cls_logits: Tensor<B, 3>,
    /// [B, N, 4] box deltas relative to the anchors.
    pub box_deltas: Tensor<B, 3>,
    /// (h, w) of P3..P7; N = sum(h * w) * anchors per location.
    pub level_sizes: Vec<(usize, usize)>,
}

#[derive(Module, Debug)]
pub struct RetinaNet<B: Backend> {
    backbone: ResNetBackbone<B>,
    fpn: Fpn<B>,
    cls_head: DenseHead<B>,
    box_head: DenseHead<B>,
    num_classes: usize,
}

impl<B: Backend> RetinaNet<B> {
    pub fn new(cfg: RetinaNetConfig, device: &B::Device) -> Self {
        let num_anchors = cfg.num_anchors();
        debug!(
            num_classes = cfg.num_classes,
            num_anchors,
            fpn_channels = cfg.fpn_channels,
            "building retinanet"
        );
        Self {
            backbone: ResNetBackbone::new(device, cfg.depths, cfg.widths),
            fpn: Fpn::new(
                device,
                [cfg.widths[1], cfg.widths[2], cfg.widths[3]],
                cfg.fpn_channels,
            ),
            cls_head: DenseHead::classification(
                device,
                cfg.fpn_channels,
                cfg.head_convs,
                num_anchors,
                cfg.num_classes,
                cfg.prior_prob,
            ),
            box_head: DenseHead::regression(device, cfg.fpn_channels, cfg.head_convs, num_anchors),
            num_classes: cfg.num_classes,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// `images` is [B, 3, H, W], ImageNet-normalized.
    pub fn forward(&self, images: Tensor<B, 4>) -> RetinaOutput<B> {
        let features = self.fpn.forward(self.backbone.forward(images));
        let level_sizes = features
            .iter()
            .map(|f| {
                let [_, _, h, w] = f.dims();
                (h, w)
            })
            .collect();
        RetinaOutput {
            cls_logits: self.cls_head.forward(&features),
            box_deltas: self.box_head.forward(&features),
            level_sizes,
        }
    }
}
