use crate::model::{MatchStatus, ReconSummary, ReconciledRow};

/// Compute summary statistics from reconciled rows.
pub fn compute_summary(rows: &[ReconciledRow]) -> ReconSummary {
    let matched = rows
        .iter()
        .filter(|r| r.match_status == MatchStatus::Match)
        .count();
    let incomplete = rows
        .iter()
        .filter(|r| !r.own.missing().is_empty())
        .count();
    ReconSummary {
        total: rows.len(),
        matched,
        mismatched: rows.len() - matched,
        incomplete,
    }
}

impl ReconSummary {
    /// Fold another summary into this one.
    pub fn absorb(&mut self, other: &ReconSummary) {
        self.total += other.total;
        self.matched += other.matched;
        self.mismatched += other.mismatched;
        self.incomplete += other.incomplete;
    }
}
