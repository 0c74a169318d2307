use crate::model::{MatchStatus, Percentages};

/// `Match` iff every percentage is within the threshold. The bound is inclusive.
pub fn classify(pct: &Percentages, threshold_percent: f64) -> MatchStatus {
    let within = [pct.charges, pct.payments, pct.adjustments]
        .iter()
        .all(|p| *p <= threshold_percent);
    if within {
        MatchStatus::Match
    } else {
        MatchStatus::Mismatch
    }
}
