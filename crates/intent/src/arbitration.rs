//! Ambiguity arbitration over ranked match candidates.

use homegw_protocol::MatchCandidate;

/// Minimum confidence for the top candidate to be acted on alone.
pub const CONFIDENCE_THRESHOLD: f64 = 0.8;
/// Minimum lead of the top candidate over the runner-up.
pub const MIN_MARGIN: f64 = 0.15;
/// Candidates at or below this confidence are never offered as choices.
pub const CHOICE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub enum Arbitration {
    /// The model found nothing relevant.
    NoMatch,
    /// One candidate is confident and clearly ahead.
    Selected(MatchCandidate),
    /// The caller must choose; holds every candidate above [`CHOICE_FLOOR`],
    /// highest confidence first.
    Ambiguous(Vec<MatchCandidate>),
}

/// Decide between acting on the top candidate and asking the caller.
///
/// Candidates are sorted by confidence first, so the result does not depend
/// on the order the model listed them in. Equal confidences keep model order.
#[must_use]
pub fn arbitrate(mut candidates: Vec<MatchCandidate>) -> Arbitration {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let Some(top) = candidates.first() else {
        return Arbitration::NoMatch;
    };
    let second = candidates.get(1).map_or(0.0, |c| c.confidence);

    if top.confidence < CONFIDENCE_THRESHOLD || top.confidence - second < MIN_MARGIN {
        candidates.retain(|c| c.confidence > CHOICE_FLOOR);
        return Arbitration::Ambiguous(candidates);
    }

    Arbitration::Selected(candidates.swap_remove(0))
}
