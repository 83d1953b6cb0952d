use serde::{Deserialize, Serialize};

// ─── Error ───────────────────────────────────────────────────────────────────

/// Invalid sizer or limit parameter, raised at construction.
#[derive(Clone, Debug, PartialEq)]
pub enum SizingConfigError {
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
    /// `tape_band_low` must not exceed `tape_band_high`.
    InvertedBand { low: f64, high: f64 },
}

impl std::fmt::Display for SizingConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                field,
                value,
                expected,
            } => write!(f, "config field '{field}' = {value} out of range, expected {expected}"),
            Self::InvertedBand { low, high } => {
                write!(f, "tape band low {low} exceeds high {high}")
            }
        }
    }
}

impl std::error::Error for SizingConfigError {}

pub(crate) fn require(
    ok: bool,
    field: &'static str,
    value: f64,
    expected: &'static str,
) -> Result<(), SizingConfigError> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(SizingConfigError::OutOfRange {
            field,
            value,
            expected,
        })
    }
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizerConfig {
    /// Size at full conviction before the tape multiplier.
    pub base_size: f64,
    /// Giller exponent in (0, 1].
    pub alpha: f64,
    /// SOPS steepness is `steepness_basis / volatility`.
    pub steepness_basis: f64,
    /// Steepness used when volatility is non-finite or <= 0.
    pub fallback_steepness: f64,
    /// Lower bound applied to positive volatility before dividing.
    pub volatility_floor: f64,
    /// EMA decay of tape speed, in (0, 1).
    pub tape_decay: f64,
    pub tape_band_low: f64,
    pub tape_band_high: f64,
    /// Slope of the logistic mapping tape/EMA onto the band.
    pub tape_logistic_steepness: f64,
    /// Hard cap on |size|.
    pub max_size: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            base_size: 1.0,
            alpha: 0.5,
            steepness_basis: 2.0,
            fallback_steepness: 1.0,
            volatility_floor: 1e-9,
            tape_decay: 0.9,
            tape_band_low: 0.5,
            tape_band_high: 1.5,
            tape_logistic_steepness: 4.0,
            max_size: 1.0,
        }
    }
}

impl SizerConfig {
    pub fn validate(&self) -> Result<(), SizingConfigError> {
        require(self.base_size > 0.0, "sizing.base_size", self.base_size, "> 0")?;
        require(
            self.alpha > 0.0 && self.alpha <= 1.0,
            "sizing.alpha",
            self.alpha,
            "(0, 1]",
        )?;
        require(
            self.steepness_basis > 0.0,
            "sizing.steepness_basis",
            self.steepness_basis,
            "> 0",
        )?;
        require(
            self.fallback_steepness > 0.0,
            "sizing.fallback_steepness",
            self.fallback_steepness,
            "> 0",
        )?;
        require(
            self.volatility_floor > 0.0,
            "sizing.volatility_floor",
            self.volatility_floor,
            "> 0",
        )?;
        require(
            self.tape_decay > 0.0 && self.tape_decay < 1.0,
            "sizing.tape_decay",
            self.tape_decay,
            "(0, 1)",
        )?;
        require(
            self.tape_band_low > 0.0,
            "sizing.tape_band_low",
            self.tape_band_low,
            "> 0",
        )?;
        require(
            self.tape_band_high > 0.0,
            "sizing.tape_band_high",
            self.tape_band_high,
            "> 0",
        )?;
        if self.tape_band_low > self.tape_band_high {
            return Err(SizingConfigError::InvertedBand {
                low: self.tape_band_low,
                high: self.tape_band_high,
            });
        }
        require(
            self.tape_logistic_steepness > 0.0,
            "sizing.tape_logistic_steepness",
            self.tape_logistic_steepness,
            "> 0",
        )?;
        require(self.max_size > 0.0, "sizing.max_size", self.max_size, "> 0")?;
        Ok(())
    }
}

// ─── Stages ──────────────────────────────────────────────────────────────────

/// Stage 1 steepness: `basis / max(vol, floor)`, or the fallback when
/// volatility is unusable.
pub fn steepness(volatility: f64, cfg: &SizerConfig) -> f64 {
    if volatility.is_finite() && volatility > 0.0 {
        cfg.steepness_basis / volatility.max(cfg.volatility_floor)
    } else {
        cfg.fallback_steepness
    }
}

/// Stage 1: bounded direction in [-1, 1].
pub fn sops_direction(signal: f64, k: f64) -> f64 {
    (k * signal).tanh()
}

/// Stage 2: `base_size · |direction|^alpha`. Concave for alpha < 1.
pub fn giller_magnitude(direction: f64, base_size: f64, alpha: f64) -> f64 {
    base_size * direction.abs().powf(alpha)
}

/// Stage 4: clamp into [-max, max].
pub fn hard_clamp(size: f64, max_size: f64) -> f64 {
    size.clamp(-max_size, max_size)
}

// ─── Stage 3: tape speed ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TapeSnapshot {
    pub ema: Option<f64>,
    pub observations: u64,
}

/// EMA of market tape speed, mapped through a logistic onto
/// `[tape_band_low, tape_band_high]`.
///
/// The multiplier compares the current observation against the EMA that
/// already includes it. Tape at its average sits at the band midpoint; faster
/// tape approaches `high`, slower tape approaches `low`.
#[derive(Clone, Debug, PartialEq)]
pub struct TapeSpeedTracker {
    decay: f64,
    low: f64,
    high: f64,
    slope: f64,
    ema: Option<f64>,
    observations: u64,
}

impl TapeSpeedTracker {
    pub fn new(cfg: &SizerConfig) -> Self {
        Self {
            decay: cfg.tape_decay,
            low: cfg.tape_band_low,
            high: cfg.tape_band_high,
            slope: cfg.tape_logistic_steepness,
            ema: None,
            observations: 0,
        }
    }

    pub fn ema(&self) -> Option<f64> {
        self.ema
    }

    /// Folds in one observation and returns the multiplier. Non-finite or
    /// negative tape speeds are rejected (`None`) without touching the EMA.
    pub fn observe(&mut self, tape_speed: f64) -> Option<f64> {
        if !(tape_speed.is_finite() && tape_speed >= 0.0) {
            return None;
        }
        let ema = match self.ema {
            None => tape_speed,
            Some(prev) => self.decay * prev + (1.0 - self.decay) * tape_speed,
        };
        self.ema = Some(ema);
        self.observations += 1;
        Some(self.multiplier(tape_speed, ema))
    }

    fn multiplier(&self, tape_speed: f64, ema: f64) -> f64 {
        let ratio = if ema > 0.0 { tape_speed / ema } else { 1.0 };
        let logistic = 1.0 / (1.0 + (-self.slope * (ratio - 1.0)).exp());
        self.low + (self.high - self.low) * logistic
    }

    pub fn snapshot(&self) -> TapeSnapshot {
        TapeSnapshot {
            ema: self.ema,
            observations: self.observations,
        }
    }

    pub fn restore(&mut self, snap: &TapeSnapshot) {
        self.ema = snap.ema;
        self.observations = snap.observations;
    }
}

// ─── PositionSizer ───────────────────────────────────────────────────────────

/// Intermediate values of one sizing call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizingBreakdown {
    pub steepness: f64,
    pub direction: f64,
    pub magnitude: f64,
    pub tape_multiplier: f64,
    pub size: f64,
}

impl SizingBreakdown {
    fn zero(steepness: f64, tape_multiplier: f64) -> Self {
        Self {
            steepness,
            direction: 0.0,
            magnitude: 0.0,
            tape_multiplier,
            size: 0.0,
        }
    }
}

/// Converts a raw strategy signal into a bounded, signed position size.
///
/// Guarantees:
/// - signal 0 (or NaN) → size 0.
/// - |size| ≤ max_size.
/// - for fixed volatility and tape multiplier, |size| is non-decreasing in
///   |signal| and the sign follows the signal.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionSizer {
    cfg: SizerConfig,
    tape: TapeSpeedTracker,
}

impl PositionSizer {
    pub fn new(cfg: SizerConfig) -> Result<Self, SizingConfigError> {
        cfg.validate()?;
        Ok(Self {
            tape: TapeSpeedTracker::new(&cfg),
            cfg,
        })
    }

    pub fn config(&self) -> &SizerConfig {
        &self.cfg
    }

    pub fn tape(&self) -> &TapeSpeedTracker {
        &self.tape
    }

    /// Full pipeline for one signal; also advances the tape EMA.
    pub fn calculate(&mut self, signal: f64, volatility: f64, tape_speed: f64) -> f64 {
        self.calculate_with_breakdown(signal, volatility, tape_speed)
            .size
    }

    pub fn calculate_with_breakdown(
        &mut self,
        signal: f64,
        volatility: f64,
        tape_speed: f64,
    ) -> SizingBreakdown {
        match self.observe_tape(tape_speed) {
            Some(m) => self.size_with_multiplier(signal, volatility, m),
            None => SizingBreakdown::zero(steepness(volatility, &self.cfg), 0.0),
        }
    }

    /// Stage 3 alone. Call once per period when sizing several strategies
    /// against the same tape.
    pub fn observe_tape(&mut self, tape_speed: f64) -> Option<f64> {
        self.tape.observe(tape_speed)
    }

    /// Stages 1, 2 and 4 with an externally supplied tape multiplier.
    pub fn size_with_multiplier(
        &self,
        signal: f64,
        volatility: f64,
        tape_multiplier: f64,
    ) -> SizingBreakdown {
        let k = steepness(volatility, &self.cfg);
        if !signal.is_finite() || !tape_multiplier.is_finite() {
            return SizingBreakdown::zero(k, tape_multiplier);
        }
        let direction = sops_direction(signal, k);
        if direction == 0.0 {
            return SizingBreakdown::zero(k, tape_multiplier);
        }
        let magnitude = giller_magnitude(direction, self.cfg.base_size, self.cfg.alpha);
        let raw = direction.signum() * magnitude * tape_multiplier;
        SizingBreakdown {
            steepness: k,
            direction,
            magnitude,
            tape_multiplier,
            size: hard_clamp(raw, self.cfg.max_size),
        }
    }

    pub fn tape_snapshot(&self) -> TapeSnapshot {
        self.tape.snapshot()
    }

    pub fn restore_tape(&mut self, snap: &TapeSnapshot) {
        self.tape.restore(snap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> PositionSizer {
        PositionSizer::new(SizerConfig::default()).unwrap()
    }

    #[test]
    fn rejects_bad_config() {
        let bad = [
            SizerConfig {
                alpha: 0.0,
                ..Default::default()
            },
            SizerConfig {
                alpha: 1.2,
                ..Default::default()
            },
            SizerConfig {
                max_size: 0.0,
                ..Default::default()
            },
            SizerConfig {
                tape_decay: 1.0,
                ..Default::default()
            },
            SizerConfig {
                base_size: f64::NAN,
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(PositionSizer::new(cfg).is_err(), "{cfg:?}");
        }
        let inverted = SizerConfig {
            tape_band_low: 2.0,
            tape_band_high: 1.0,
            ..Default::default()
        };
        assert_eq!(
            inverted.validate(),
            Err(SizingConfigError::InvertedBand {
                low: 2.0,
                high: 1.0
            })
        );
    }

    #[test]
    fn zero_and_nan_signals_size_to_zero() {
        let mut s = sizer();
        assert_eq!(s.calculate(0.0, 0.02, 1.0), 0.0);
        assert_eq!(s.calculate(-0.0, 0.02, 1.0), 0.0);
        assert_eq!(s.calculate(f64::NAN, 0.02, 1.0), 0.0);
        assert_eq!(s.calculate(0.0, f64::NAN, f64::NAN), 0.0);
    }

    #[test]
    fn non_finite_tape_sizes_to_zero_and_keeps_ema() {
        let mut s = sizer();
        s.calculate(0.5, 0.02, 2.0);
        let ema = s.tape().ema();
        assert_eq!(s.calculate(0.5, 0.02, f64::INFINITY), 0.0);
        assert_eq!(s.calculate(0.5, 0.02, -1.0), 0.0);
        assert_eq!(s.tape().ema(), ema);
    }

    #[test]
    fn bad_volatility_uses_fallback_steepness() {
        let cfg = SizerConfig::default();
        assert_eq!(steepness(f64::NAN, &cfg), cfg.fallback_steepness);
        assert_eq!(steepness(0.0, &cfg), cfg.fallback_steepness);
        assert_eq!(steepness(-0.3, &cfg), cfg.fallback_steepness);
        assert_eq!(steepness(0.5, &cfg), 4.0);
        assert_eq!(steepness(1e-20, &cfg), 2.0 / 1e-9);
    }

    #[test]
    fn giller_is_concave() {
        let half = giller_magnitude(0.5, 1.0, 0.5);
        assert!((half - 0.5f64.sqrt()).abs() < 1e-15);
        assert!(half > 0.5);
        assert_eq!(giller_magnitude(-1.0, 2.0, 0.5), 2.0);
    }

    #[test]
    fn tape_at_average_is_neutral() {
        let mut t = TapeSpeedTracker::new(&SizerConfig::default());
        let m = t.observe(3.0).unwrap();
        assert!((m - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tape_multiplier_tracks_speed_within_band() {
        let mut t = TapeSpeedTracker::new(&SizerConfig::default());
        for _ in 0..50 {
            t.observe(1.0);
        }
        let fast = t.clone().observe(10.0).unwrap();
        let slow = t.clone().observe(0.0).unwrap();
        assert!(fast > 1.0 && fast <= 1.5);
        assert!(slow < 1.0 && slow >= 0.5);
    }

    #[test]
    fn sign_follows_signal_and_clamp_holds() {
        let s = PositionSizer::new(SizerConfig {
            base_size: 5.0,
            max_size: 2.0,
            ..Default::default()
        })
        .unwrap();
        let long = s.size_with_multiplier(0.8, 0.1, 1.5);
        let short = s.size_with_multiplier(-0.8, 0.1, 1.5);
        assert_eq!(long.size, 2.0);
        assert_eq!(short.size, -2.0);
        assert!(long.direction > 0.0 && short.direction < 0.0);
    }
}
