//! Anchor-relative box regression targets.

/// Encodes boxes as `(dx, dy, dw, dh)` offsets from an anchor and back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCoder {
    pub weights: [f32; 4],
    /// Upper bound applied to `dw`/`dh` before exponentiation.
    pub scale_clamp: f32,
}

impl Default for BoxCoder {
    fn default() -> Self {
        Self {
            weights: [1.0, 1.0, 1.0, 1.0],
            scale_clamp: (1000.0f32 / 16.0).ln(),
        }
    }
}

fn center_size(b: [f32; 4]) -> (f32, f32, f32, f32) {
    let w = b[2] - b[0];
    let h = b[3] - b[1];
    (b[0] + 0.5 * w, b[1] + 0.5 * h, w, h)
}

impl BoxCoder {
    pub fn encode(&self, anchor: [f32; 4], gt: [f32; 4]) -> [f32; 4] {
        let (ax, ay, aw, ah) = center_size(anchor);
        let (gx, gy, gw, gh) = center_size(gt);
        let [wx, wy, ww, wh] = self.weights;
        [
            wx * (gx - ax) / aw,
            wy * (gy - ay) / ah,
            ww * (gw.max(f32::EPSILON) / aw).ln(),
            wh * (gh.max(f32::EPSILON) / ah).ln(),
        ]
    }

    pub fn decode(&self, anchor: [f32; 4], delta: [f32; 4]) -> [f32; 4] {
        let (ax, ay, aw, ah) = center_size(anchor);
        let [wx, wy, ww, wh] = self.weights;
        let dx = delta[0] / wx;
        let dy = delta[1] / wy;
        let dw = (delta[2] / ww).min(self.scale_clamp);
        let dh = (delta[3] / wh).min(self.scale_clamp);

        let cx = dx * aw + ax;
        let cy = dy * ah + ay;
        let w = dw.exp() * aw;
        let h = dh.exp() * ah;
        [cx - 0.5 * w, cy - 0.5 * h, cx + 0.5 * w, cy + 0.5 * h]
    }
}
