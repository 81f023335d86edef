//! GENMIDI patch bank: the 175 OPL instrument definitions a MUS score's
//! program numbers and percussion notes resolve against. Once loaded, a
//! `PatchBank` is immutable for the life of the player.

use crate::error::{MusOplError, MusOplResult};
use musopl_common::GetBit;

pub const MELODIC_COUNT: usize = 128;
pub const PERCUSSION_COUNT: usize = 47;
pub const INSTRUMENT_COUNT: usize = MELODIC_COUNT + PERCUSSION_COUNT;
const INSTRUMENT_BYTES: usize = 36;
const HEADER_TAG: &[u8; 8] = b"#OPL_II#";

const FLAG_FIXED_NOTE_BIT: u8 = 0;
const FLAG_DOUBLE_VOICE_BIT: u8 = 2;
#[cfg(test)]
const FLAG_DOUBLE_VOICE: u16 = 1 << FLAG_DOUBLE_VOICE_BIT;

/// One FM operator's register payload, as stored in a GENMIDI instrument.
#[derive(Debug, Clone, Copy, Default)]
pub struct Operator {
    pub tremolo: u8,
    pub attack: u8,
    pub sustain: u8,
    pub waveform: u8,
    pub scale: u8,
    pub level: u8,
}

/// A modulator/carrier operator pair plus the register fields that apply to
/// the voice as a whole.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceDescriptor {
    pub modulator: Operator,
    pub feedback: u8,
    pub carrier: Operator,
    pub base_note_offset: i16,
}

/// One GENMIDI instrument: either a single voice, or two voices layered
/// together when [`Instrument::is_double_voice`] is set.
#[derive(Debug, Clone, Copy)]
pub struct Instrument {
    pub flags: u16,
    pub fine_tuning: u8,
    pub fixed_note: u8,
    pub voices: [VoiceDescriptor; 2],
}

impl Instrument {
    pub fn is_fixed_note(&self) -> bool {
        self.flags.bit(FLAG_FIXED_NOTE_BIT)
    }

    pub fn is_double_voice(&self) -> bool {
        self.flags.bit(FLAG_DOUBLE_VOICE_BIT)
    }
}

/// Identifies an instrument within a [`PatchBank`] without borrowing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentKey {
    pub percussion: bool,
    pub index: u8,
}

/// The full set of 175 instruments (128 melodic programs + 47 percussion
/// notes) parsed from a GENMIDI lump.
#[derive(Debug, Clone)]
pub struct PatchBank {
    melodic: Vec<Instrument>,
    percussion: Vec<Instrument>,
    loaded: bool,
}

impl PatchBank {
    /// An empty, unloaded bank. [`Player::load_patches`](crate::player::Player::load_patches)
    /// must run before playback; note-on events are suppressed while [`is_loaded`](Self::is_loaded)
    /// is `false` rather than playing against placeholder instruments.
    pub fn empty() -> Self {
        let silent = Instrument {
            flags: 0,
            fine_tuning: 0,
            fixed_note: 0,
            voices: [VoiceDescriptor::default(); 2],
        };
        Self {
            melodic: vec![silent; MELODIC_COUNT],
            percussion: vec![silent; PERCUSSION_COUNT],
            loaded: false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Parses a raw GENMIDI lump. Validates the `#OPL_II#` tag and that the buffer holds all
    /// 175 fixed-size instrument records; does not otherwise interpret instrument contents.
    pub fn load(bytes: &[u8]) -> MusOplResult<Self> {
        let required = HEADER_TAG.len() + INSTRUMENT_COUNT * INSTRUMENT_BYTES;
        if bytes.len() < required {
            return Err(MusOplError::InvalidData("genmidi lump too short"));
        }
        if &bytes[..HEADER_TAG.len()] != HEADER_TAG {
            return Err(MusOplError::InvalidData("missing #OPL_II# tag"));
        }

        let mut instruments = Vec::with_capacity(INSTRUMENT_COUNT);
        let mut offset = HEADER_TAG.len();
        for _ in 0..INSTRUMENT_COUNT {
            instruments.push(parse_instrument(&bytes[offset..offset + INSTRUMENT_BYTES]));
            offset += INSTRUMENT_BYTES;
        }

        let percussion = instruments.split_off(MELODIC_COUNT);
        Ok(Self { melodic: instruments, percussion, loaded: true })
    }

    /// Resolves the instrument a note-on should play: the channel's program for melodic
    /// channels, or `percussion[note - 35]` for the percussion channel when `35..=81` contains
    /// the note. Percussion notes outside that range fall back to melodic program 0, matching
    /// the reference player.
    pub fn resolve(&self, is_percussion: bool, program: u8, note: u8) -> InstrumentKey {
        if is_percussion {
            if (35..=81).contains(&note) {
                InstrumentKey { percussion: true, index: note - 35 }
            } else {
                InstrumentKey { percussion: false, index: 0 }
            }
        } else {
            InstrumentKey { percussion: false, index: program }
        }
    }

    pub fn get(&self, key: InstrumentKey) -> &Instrument {
        if key.percussion {
            &self.percussion[key.index as usize]
        } else {
            &self.melodic[key.index as usize]
        }
    }
}

fn parse_operator(bytes: &[u8]) -> Operator {
    Operator {
        tremolo: bytes[0],
        attack: bytes[1],
        sustain: bytes[2],
        waveform: bytes[3],
        scale: bytes[4],
        level: bytes[5],
    }
}

fn parse_voice(bytes: &[u8]) -> VoiceDescriptor {
    let modulator = parse_operator(&bytes[0..6]);
    let feedback = bytes[6];
    let carrier = parse_operator(&bytes[7..13]);
    // bytes[13] is an unused padding byte.
    let base_note_offset = i16::from_le_bytes([bytes[14], bytes[15]]);
    VoiceDescriptor { modulator, feedback, carrier, base_note_offset }
}

fn parse_instrument(bytes: &[u8]) -> Instrument {
    let flags = u16::from_le_bytes([bytes[0], bytes[1]]);
    let fine_tuning = bytes[2];
    let fixed_note = bytes[3];
    let voice0 = parse_voice(&bytes[4..20]);
    let voice1 = parse_voice(&bytes[20..36]);
    Instrument { flags, fine_tuning, fixed_note, voices: [voice0, voice1] }
}

/// A minimal-but-valid GENMIDI lump (every instrument silent/melodic-default except
/// instrument 5, which is flagged double-voice), shared by other modules' tests that need a
/// loaded patch bank without caring about its instrument contents.
#[cfg(test)]
pub(crate) fn test_genmidi_bytes() -> Vec<u8> {
    let mut bytes = HEADER_TAG.to_vec();
    for i in 0..INSTRUMENT_COUNT {
        let flags: u16 = if i == 5 { FLAG_DOUBLE_VOICE } else { 0 };
        let mut instrument = vec![0u8; INSTRUMENT_BYTES];
        instrument[0..2].copy_from_slice(&flags.to_le_bytes());
        bytes.extend(instrument);
    }
    bytes
}
