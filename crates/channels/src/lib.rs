//! Inbound channel normalizers and outbound reply senders.
//!
//! Channels are a closed set ([`ChannelNormalizer`]); each variant turns its
//! wire payload into a `NormalizedMessage` before the pipeline sees it.

pub mod error;
pub mod normalize;
pub mod outbound;
pub mod telegram;

pub use {
    error::{Error, Result},
    normalize::{ANONYMOUS_USER, ChannelNormalizer, from_command_request},
    outbound::{ChannelOutbound, TelegramOutbound},
    telegram::TelegramNormalizer,
};
