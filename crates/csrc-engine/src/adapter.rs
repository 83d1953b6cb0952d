/// Closed capability interface implemented by each signal source.
///
/// The engine asks every adapter for its realized return each period, and
/// asks only the strategies the ensemble selected for a raw signal.
pub trait StrategyAdapter {
    fn strategy_id(&self) -> &str;

    /// Unbounded raw signal for the coming period.
    fn get_signal(&mut self) -> f64;

    /// Return realized over the period just ended.
    fn get_realized_return(&mut self) -> f64;
}

/// Market-wide inputs shared by every sizing call in a period.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarketContext {
    pub volatility: f64,
    /// Trade arrivals per second.
    pub tape_speed: f64,
}

impl MarketContext {
    pub fn new(volatility: f64, tape_speed: f64) -> Self {
        Self {
            volatility,
            tape_speed,
        }
    }
}
