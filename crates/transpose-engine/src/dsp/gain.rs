use crate::block::AudioBlock;

/// Linear output level in [0, 1], ramped across one block on change.
pub struct Gain {
    target: f32,
    current: f32,
}

impl Gain {
    pub fn new(level: f32) -> Self {
        let level = clamp_level(level);
        Self { target: level, current: level }
    }

    pub fn level(&self) -> f32 {
        self.target
    }

    pub fn set_level(&mut self, level: f32) {
        self.target = clamp_level(level);
    }

    /// Apply the level in place and hard-clip to [-1, 1]. Allocation free.
    pub fn process(&mut self, block: &mut AudioBlock) {
        let frames = block.frames();
        let start = self.current;
        let step = if frames == 0 { 0.0 } else { (self.target - start) / frames as f32 };
        for ch in 0..block.channels() {
            for (i, s) in block.channel_mut(ch).iter_mut().enumerate() {
                let g = start + step * (i + 1) as f32;
                let x = *s * g;
                *s = if x > 1.0 { 1.0 } else if x < -1.0 { -1.0 } else { x };
            }
        }
        self.current = self.target;
    }
}

fn clamp_level(level: f32) -> f32 {
    if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) }
}
