/// Anything that yields decoded audio one block at a time.
///
/// `pull` runs on the render thread: it must fill the whole block (silence when
/// there is nothing to play) without blocking or allocating.
pub trait BlockSource: Send {
    fn pull(&mut self, block: &mut AudioBlock);
}

/// Shape of the audio stream the engine renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames per render quantum.
    pub block_frames: usize,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self { sample_rate: 48_000, channels: 2, block_frames: 128 }
    }
}

/// Planar block of f32 frames with a fixed channel count and length.
///
/// Storage is allocated once in `new`; nothing on the render path resizes it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    channels: usize,
    frames: usize,
    data: Vec<f32>,
}

impl AudioBlock {
    pub fn new(channels: usize, frames: usize) -> Self {
        Self { channels, frames, data: vec![0.0; channels * frames] }
    }

    pub fn for_format(format: &StreamFormat) -> Self {
        Self::new(format.channels, format.block_frames)
    }

    /// Build a block from a per-sample generator, mostly useful in tests.
    pub fn from_fn(channels: usize, frames: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut block = Self::new(channels, frames);
        for ch in 0..channels {
            for (i, s) in block.channel_mut(ch).iter_mut().enumerate() {
                *s = f(ch, i);
            }
        }
        block
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn same_shape(&self, other: &AudioBlock) -> bool {
        self.channels == other.channels && self.frames == other.frames
    }

    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        &self.data[ch * self.frames..(ch + 1) * self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        &mut self.data[ch * self.frames..(ch + 1) * self.frames]
    }

    pub fn fill_silence(&mut self) {
        self.data.fill(0.0);
    }

    pub fn is_silent(&self) -> bool {
        self.data.iter().all(|&s| s == 0.0)
    }

    /// Copy `other` into `self`. Shapes must match.
    pub fn copy_from(&mut self, other: &AudioBlock) {
        debug_assert!(self.same_shape(other), "block shapes differ");
        self.data.copy_from_slice(&other.data);
    }

    /// Write frames interleaved into `out`, which must hold `channels * frames` samples.
    pub fn write_interleaved(&self, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.channels * self.frames);
        for ch in 0..self.channels {
            for (i, &s) in self.channel(ch).iter().enumerate() {
                out[i * self.channels + ch] = s;
            }
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_contiguous_and_independent() {
        let block = AudioBlock::from_fn(2, 4, |ch, i| (ch * 10 + i) as f32);
        assert_eq!(block.channel(0), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(block.channel(1), &[10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn interleaves_frames() {
        let block = AudioBlock::from_fn(2, 3, |ch, i| if ch == 0 { i as f32 } else { -(i as f32) });
        let mut out = [9.0; 6];
        block.write_interleaved(&mut out);
        assert_eq!(out, [0.0, -0.0, 1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn silence_detection() {
        let mut block = AudioBlock::from_fn(1, 8, |_, _| 0.5);
        assert!(!block.is_silent());
        block.fill_silence();
        assert!(block.is_silent());
    }
}
