//! Hardware-agnostic core of a Doom MUS-to-OPL music player: GENMIDI patch
//! parsing, MUS score parsing, voice allocation, and the register-level
//! translation that drives any [`OplChip`] implementation.
//!
//! This crate owns no audio hardware or file I/O of its own; callers supply
//! GENMIDI/MUS bytes and an `OplChip` implementation (see the `opl3` crate
//! for a software one) and pull synthesized samples out of [`Player::generate`].

mod channel;
mod chip;
mod error;
mod frequency;
mod parser;
mod patch_bank;
mod player;
mod register;
mod scheduler;
mod tables;
mod voice;

#[cfg(test)]
mod test_support;

pub use chip::OplChip;
pub use error::{MusOplError, MusOplResult};
pub use patch_bank::{Instrument, InstrumentKey, Operator, PatchBank, VoiceDescriptor};
pub use player::{Player, PlayerConfig};
