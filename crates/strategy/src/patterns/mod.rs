//! Structural pattern detection on confirmed local extrema.

pub mod extrema;
pub mod quasimodo;

use serde::{Deserialize, Serialize};

use common::{Error, PatternOccurrence, Result, Side};

pub use extrema::{Extremum, ExtremumKind};
pub use quasimodo::{detect, scan};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Bars on each side an extremum must dominate (`w`).
    pub order: usize,
    /// Trailing window, in bars, searched for extrema.
    pub lookback: usize,
    /// A pattern is stale once its right shoulder is this many bars old.
    pub recency: usize,
    /// Minimum bars between consecutive shoulder/head points.
    pub min_separation: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            order: 3,
            lookback: 100,
            recency: 20,
            min_separation: 2,
        }
    }
}

impl PatternConfig {
    pub fn validate(&self) -> Result<()> {
        if self.order == 0 {
            return Err(Error::Config("pattern order must be > 0".into()));
        }
        if self.lookback < 2 * self.order + 1 {
            return Err(Error::Config(format!(
                "pattern lookback must be >= 2 * order + 1 = {}",
                2 * self.order + 1
            )));
        }
        // A pattern is confirmed `order` bars after its right shoulder, so a
        // window no wider than that could never hold a valid occurrence.
        if self.recency <= self.order {
            return Err(Error::Config(format!(
                "pattern recency ({}) must exceed order ({})",
                self.recency, self.order
            )));
        }
        Ok(())
    }

    /// Bars between an extremum and the first index at which it is confirmed.
    /// Every pattern is reported exactly this late relative to its last point.
    pub fn confirmation_delay(&self) -> usize {
        self.order
    }
}

/// Current bull/bear candidates at one evaluation index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternState {
    pub bull: Option<PatternOccurrence>,
    pub bear: Option<PatternOccurrence>,
}

impl PatternState {
    /// Most recent valid occurrence. Ties on `end_index` go to the bear side.
    pub fn latest_valid(&self) -> Option<&PatternOccurrence> {
        let bull = self.bull.as_ref().filter(|p| p.valid);
        let bear = self.bear.as_ref().filter(|p| p.valid);
        match (bull, bear) {
            (Some(b), Some(s)) if b.end_index > s.end_index => Some(b),
            (Some(_), Some(s)) => Some(s),
            (b, s) => b.or(s),
        }
    }

    /// Valid occurrence pointing in `side`'s direction.
    pub fn for_side(&self, side: Side) -> Option<&PatternOccurrence> {
        match side {
            Side::Long => self.bull.as_ref(),
            Side::Short => self.bear.as_ref(),
        }
        .filter(|p| p.valid)
    }

    /// Valid occurrences whose confirmation lands exactly on `index`.
    pub fn fresh(&self, index: usize) -> impl Iterator<Item = &PatternOccurrence> {
        [self.bull.as_ref(), self.bear.as_ref()]
            .into_iter()
            .flatten()
            .filter(move |p| p.valid && p.confirmed_at == index)
    }
}
