//! Intent resolution: which processor a message is for, and with what
//! parameters.
//!
//! - [`IntentMatcher`] ranks enabled processors against the text
//! - [`arbitrate`] decides between acting on the top match and asking
//! - [`ParameterExtractor`] pulls typed values for the chosen processor

pub mod arbitration;
pub mod error;
pub mod extractor;
pub mod matcher;

pub use {
    arbitration::{Arbitration, CHOICE_FLOOR, CONFIDENCE_THRESHOLD, MIN_MARGIN, arbitrate},
    error::{Error, Result},
    extractor::ParameterExtractor,
    matcher::IntentMatcher,
};
