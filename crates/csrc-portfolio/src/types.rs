use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::CorrelationMetrics;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Invalid construction-time parameter. Raised once, at construction; a
/// component that was built successfully never re-validates its config.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// A numeric parameter lies outside its admissible range.
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
    /// The particle cloud needs at least two particles to resample.
    TooFewParticles { n_particles: usize },
    /// The strategy universe is empty.
    EmptyUniverse,
    /// The same strategy id appears twice in the universe.
    DuplicateStrategy { strategy_id: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                field,
                value,
                expected,
            } => write!(f, "config field '{field}' = {value} out of range, expected {expected}"),
            Self::TooFewParticles { n_particles } => {
                write!(f, "n_particles must be >= 2, got {n_particles}")
            }
            Self::EmptyUniverse => write!(f, "strategy universe must not be empty"),
            Self::DuplicateStrategy { strategy_id } => {
                write!(f, "duplicate strategy id '{strategy_id}' in universe")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors produced while feeding observations into the allocation stack.
///
/// Every variant is raised before any state is touched: a rejected update
/// leaves the component bit-identical to its pre-call state.
#[derive(Clone, Debug, PartialEq)]
pub enum PortfolioError {
    Config(ConfigError),
    /// The returns map does not match the fixed universe.
    StrategySetMismatch {
        /// Ids present in the input but not in the universe.
        unknown: Vec<String>,
        /// Universe ids absent from the input.
        missing: Vec<String>,
    },
    /// A realized return is NaN or infinite.
    NonFiniteReturn { strategy_id: String, value: f64 },
    /// A snapshot does not fit the component it is restored into.
    SnapshotMismatch { reason: String },
}

impl std::fmt::Display for PortfolioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::StrategySetMismatch { unknown, missing } => write!(
                f,
                "strategy set mismatch: unknown={unknown:?} missing={missing:?}"
            ),
            Self::NonFiniteReturn { strategy_id, value } => {
                write!(f, "non-finite return {value} for strategy '{strategy_id}'")
            }
            Self::SnapshotMismatch { reason } => write!(f, "snapshot mismatch: {reason}"),
        }
    }
}

impl std::error::Error for PortfolioError {}

impl From<ConfigError> for PortfolioError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ─── Range checks ────────────────────────────────────────────────────────────

pub(crate) fn check_open_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "(0, 1)",
        })
    }
}

pub(crate) fn check_half_open_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "(0, 1]",
        })
    }
}

pub(crate) fn check_closed_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "[0, 1]",
        })
    }
}

pub(crate) fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "> 0",
        })
    }
}

pub(crate) fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: ">= 0",
        })
    }
}

// ─── Universe ────────────────────────────────────────────────────────────────

/// Fixed, ordered strategy universe. Position in the list is the strategy's
/// row/column in every dense buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Universe {
    ids: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl TryFrom<Vec<String>> for Universe {
    type Error = ConfigError;

    fn try_from(ids: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(ids)
    }
}

impl From<Universe> for Vec<String> {
    fn from(u: Universe) -> Self {
        u.ids
    }
}

impl Universe {
    pub fn new<I, S>(ids: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        let mut index = BTreeMap::new();
        for (i, id) in ids.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateStrategy {
                    strategy_id: id.clone(),
                });
            }
        }
        Ok(Self { ids, index })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn index_of(&self, strategy_id: &str) -> Option<usize> {
        self.index.get(strategy_id).copied()
    }

    /// Map from strategy id to dense index.
    pub fn indices(&self) -> &BTreeMap<String, usize> {
        &self.index
    }

    /// Checks that `returns` covers exactly this universe with finite values.
    ///
    /// Unknown ids are reported before missing ones; non-finite values are
    /// reported only when the key set itself is correct.
    pub fn check_returns(&self, returns: &BTreeMap<String, f64>) -> Result<(), PortfolioError> {
        self.check_known(returns)?;
        let missing: Vec<String> = self
            .ids
            .iter()
            .filter(|id| !returns.contains_key(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PortfolioError::StrategySetMismatch {
                unknown: Vec::new(),
                missing,
            });
        }
        check_finite(returns)
    }

    /// Like [`Universe::check_returns`] but tolerates absent strategies.
    pub fn check_partial(&self, returns: &BTreeMap<String, f64>) -> Result<(), PortfolioError> {
        self.check_known(returns)?;
        check_finite(returns)
    }

    fn check_known(&self, returns: &BTreeMap<String, f64>) -> Result<(), PortfolioError> {
        let unknown: Vec<String> = returns
            .keys()
            .filter(|id| !self.index.contains_key(*id))
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(PortfolioError::StrategySetMismatch {
                unknown,
                missing: Vec::new(),
            })
        }
    }

    pub(crate) fn to_map(&self, dense: &[f64]) -> BTreeMap<String, f64> {
        self.ids
            .iter()
            .zip(dense.iter())
            .map(|(id, w)| (id.clone(), *w))
            .collect()
    }
}

fn check_finite(returns: &BTreeMap<String, f64>) -> Result<(), PortfolioError> {
    match returns.iter().find(|(_, r)| !r.is_finite()) {
        Some((id, r)) => Err(PortfolioError::NonFiniteReturn {
            strategy_id: id.clone(),
            value: *r,
        }),
        None => Ok(()),
    }
}

// ─── PortfolioState ──────────────────────────────────────────────────────────

/// Allocation produced by one update.
///
/// `weights` is non-negative and sums to 1 within 1e-9. `selected_strategies`
/// is in universe order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub tick: u64,
    pub weights: BTreeMap<String, f64>,
    pub selected_strategies: Vec<String>,
    pub correlation_metrics: CorrelationMetrics,
}

/// Normalizes `w` in place to sum to 1. Negative and non-finite entries are
/// zeroed first; an all-zero vector becomes uniform.
pub(crate) fn normalize_simplex(w: &mut [f64]) {
    for x in w.iter_mut() {
        if !x.is_finite() || *x < 0.0 {
            *x = 0.0;
        }
    }
    let total: f64 = w.iter().sum();
    if total > 0.0 && total.is_finite() {
        for x in w.iter_mut() {
            *x /= total;
        }
    } else if !w.is_empty() {
        let u = 1.0 / w.len() as f64;
        for x in w.iter_mut() {
            *x = u;
        }
    }
}
