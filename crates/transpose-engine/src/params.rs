pub const MIN_SEMITONES: f32 = -12.0;
pub const MAX_SEMITONES: f32 = 12.0;
pub const MIN_TEMPO: f32 = 0.5;
pub const MAX_TEMPO: f32 = 2.0;

/// Frequency ratio for a pitch offset: `2^(semitones / 12)`.
pub fn pitch_ratio(semitones: f32) -> f64 {
    (semitones as f64 / 12.0).exp2()
}

/// Clamp a semitone offset into range. NaN has no meaningful bound and yields `None`.
pub fn clamp_semitones(value: f32) -> Option<f32> {
    (!value.is_nan()).then(|| value.clamp(MIN_SEMITONES, MAX_SEMITONES))
}

/// Clamp a tempo ratio into range. NaN yields `None`.
pub fn clamp_tempo(value: f32) -> Option<f32> {
    (!value.is_nan()).then(|| value.clamp(MIN_TEMPO, MAX_TEMPO))
}

/// Pitch offset and tempo ratio, each set independently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchTempoParameters {
    semitones: f32,
    tempo: f32,
}

impl Default for PitchTempoParameters {
    fn default() -> Self {
        Self { semitones: 0.0, tempo: 1.0 }
    }
}

impl PitchTempoParameters {
    pub fn new(semitones: f32, tempo: f32) -> Self {
        let mut p = Self::default();
        p.set_semitones(semitones);
        p.set_tempo(tempo);
        p
    }

    pub fn semitones(&self) -> f32 {
        self.semitones
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    /// Set the pitch offset, clamped. Returns false (and changes nothing) for NaN.
    pub fn set_semitones(&mut self, value: f32) -> bool {
        match clamp_semitones(value) {
            Some(v) => {
                self.semitones = v;
                true
            }
            None => false,
        }
    }

    /// Set the tempo ratio, clamped. Returns false (and changes nothing) for NaN.
    pub fn set_tempo(&mut self, value: f32) -> bool {
        match clamp_tempo(value) {
            Some(v) => {
                self.tempo = v;
                true
            }
            None => false,
        }
    }

    /// Exactly 0 semitones and exactly 1.0 tempo.
    pub fn is_unity(&self) -> bool {
        self.semitones == 0.0 && self.tempo == 1.0
    }

    pub fn pitch_ratio(&self) -> f64 {
        pitch_ratio(self.semitones)
    }

    /// Time-stretch factor applied before resampling: `pitch_ratio / tempo`.
    pub fn stretch_factor(&self) -> f64 {
        self.pitch_ratio() / self.tempo as f64
    }
}
