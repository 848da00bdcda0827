//! Second-order Butterworth low-pass filter on a measured joint state

use flaw::{
    SisoIirFilter, butter2,
    generated::butter::butter2::{MAX_CUTOFF_RATIO, MIN_CUTOFF_RATIO},
};

/// Single-input, single-output filter implemented with `flaw::butter2`.
///
/// The cutoff ratio is clamped to the range where the filter is stable.
/// The first sample primes the filter's steady state and is passed through.
#[derive(Clone)]
pub struct LowPass {
    cutoff_hz: f64,
    sample_hz: f64,
    filt: SisoIirFilter<2>,
    primed: bool,
    last_output: f64,
}

impl core::fmt::Debug for LowPass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LowPass")
            .field("cutoff_hz", &self.cutoff_hz)
            .field("sample_hz", &self.sample_hz)
            .field("last_output", &self.last_output)
            .finish()
    }
}

impl LowPass {
    pub fn new(cutoff_hz: f64, sample_hz: f64) -> Result<Self, String> {
        if !(cutoff_hz > 0.0 && cutoff_hz.is_finite()) {
            return Err(format!("cutoff {cutoff_hz} Hz must be positive"));
        }
        if !(sample_hz > 0.0 && sample_hz.is_finite()) {
            return Err(format!("sampling rate {sample_hz} Hz must be positive"));
        }

        let cutoff_ratio = (cutoff_hz / sample_hz).clamp(MIN_CUTOFF_RATIO, MAX_CUTOFF_RATIO);
        let filt = butter2(cutoff_ratio).map_err(|e| {
            format!("Failed to construct butter2 filter for ratio {cutoff_ratio}: {e}")
        })?;

        Ok(Self {
            cutoff_hz,
            sample_hz,
            filt,
            primed: false,
            last_output: 0.0,
        })
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let y = if !self.primed {
            self.filt.initialize(x as f32);
            self.primed = true;
            x
        } else {
            self.filt.update(x as f32) as f64
        };
        self.last_output = y;
        y
    }

    /// Forget the filter history; the next sample primes it again
    pub fn reset(&mut self) {
        self.primed = false;
        self.last_output = 0.0;
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }
}
