//! The 18-voice pool shared by all 16 logical channels. Voices are the unit
//! of OPL hardware allocation; channels own zero or more of them at a time.

use crate::chip::OplChip;
use crate::patch_bank::InstrumentKey;
use crate::register;
use crate::tables::VOICE_OPERATORS;

pub const VOICE_COUNT: usize = 18;

/// One hardware FM voice: a fixed pair of operator register addresses plus
/// whatever note is currently (or was most recently) assigned to it.
#[derive(Debug, Clone, Copy)]
pub struct Voice {
    /// Index within its bank, 0..=8.
    pub bank_index: u8,
    /// Register bank offset: 0 for voices 0..=8, 0x100 for voices 9..=17.
    pub array: u16,
    /// Modulator operator register offset (includes `array`).
    pub op1: u16,
    /// Carrier operator register offset (includes `array`).
    pub op2: u16,

    pub in_use: bool,
    pub channel: Option<u8>,
    pub instrument: Option<InstrumentKey>,
    /// Which of the instrument's two voice descriptors this hardware voice plays.
    pub instrument_voice: u8,
    /// The original MUS event note byte this voice was struck with. Release events match
    /// against this, not [`note`](Self::note), since a fixed-note instrument's `note` is the
    /// instrument's own pitch rather than whatever note byte triggered it.
    pub key: u8,
    pub note: u8,
    pub note_volume: u8,
    pub pan_bits: u8,
    /// Last carrier operator attenuation register value written, cached so
    /// [`crate::register::set_voice_volume`] can detect when it's unchanged and skip the
    /// nested modulator-level update that only applies in additive connection mode.
    pub carrier_level: u8,
    pub modulator_level: u8,
    pub freq: u16,
}

impl Voice {
    fn new(index: usize) -> Self {
        let bank = index / 9;
        let bank_index = (index % 9) as u8;
        let array = if bank == 0 { 0 } else { 0x100 };
        let op1 = u16::from(VOICE_OPERATORS[0][bank_index as usize]) + array;
        let op2 = u16::from(VOICE_OPERATORS[1][bank_index as usize]) + array;
        Self {
            bank_index,
            array,
            op1,
            op2,
            in_use: false,
            channel: None,
            instrument: None,
            instrument_voice: 0,
            key: 0,
            note: 0,
            note_volume: 0,
            pan_bits: 0x30,
            carrier_level: 0x3F,
            modulator_level: 0x3F,
            freq: 0,
        }
    }
}

/// Owns all 18 hardware voices and implements the priority-based stealing
/// policy used when every voice is already in use.
#[derive(Debug, Clone)]
pub struct VoicePool {
    pub voices: [Voice; VOICE_COUNT],
}

impl VoicePool {
    pub fn new() -> Self {
        let mut voices = [Voice::new(0); VOICE_COUNT];
        for (i, voice) in voices.iter_mut().enumerate() {
            *voice = Voice::new(i);
        }
        Self { voices }
    }

    /// Returns the index of a free voice, if any, and marks it in-use.
    pub fn allocate(&mut self) -> Option<usize> {
        let index = self.voices.iter().position(|v| !v.in_use)?;
        self.voices[index].in_use = true;
        Some(index)
    }

    /// Releases a voice: keys it off on the chip and clears its ownership.
    pub fn release<C: OplChip>(&mut self, index: usize, chip: &mut C) {
        register::key_off(chip, &mut self.voices[index]);
        let voice = &mut self.voices[index];
        voice.in_use = false;
        voice.channel = None;
        voice.instrument = None;
    }

    /// Frees up one voice by priority: a voice playing an instrument's second
    /// (layered) sub-voice is preferred; otherwise the voice owned by the
    /// highest-numbered channel is chosen, ties broken toward the
    /// higher voice index. Returns the freed voice's index.
    ///
    /// Only meaningful to call once [`allocate`](Self::allocate) has returned `None`, i.e. every
    /// voice is in use.
    pub fn steal<C: OplChip>(&mut self, chip: &mut C) -> Option<usize> {
        let mut candidate: Option<usize> = None;
        for i in 0..VOICE_COUNT {
            if !self.voices[i].in_use {
                continue;
            }
            if self.voices[i].instrument_voice == 1 {
                candidate = Some(i);
                break;
            }
            let this_channel = self.voices[i].channel.unwrap_or(0);
            let keep = match candidate {
                None => true,
                Some(best) => this_channel >= self.voices[best].channel.unwrap_or(0),
            };
            if keep {
                candidate = Some(i);
            }
        }
        if let Some(index) = candidate {
            self.release(index, chip);
        }
        candidate
    }

    /// Releases every voice currently owned by `channel`.
    pub fn release_channel<C: OplChip>(&mut self, channel: u8, chip: &mut C) {
        for i in 0..VOICE_COUNT {
            if self.voices[i].in_use && self.voices[i].channel == Some(channel) {
                self.release(i, chip);
            }
        }
    }

    /// Releases every voice on `channel` whose original note-on byte was `key`. Used by
    /// release-note events and zero-velocity play-note events; a double-voice instrument's
    /// two sub-voices share the same `key`, so this doesn't stop after the first match.
    pub fn release_matching<C: OplChip>(&mut self, channel: u8, key: u8, chip: &mut C) {
        for i in 0..VOICE_COUNT {
            if self.voices[i].in_use && self.voices[i].channel == Some(channel) && self.voices[i].key == key {
                self.release(i, chip);
            }
        }
    }
}

impl Default for VoicePool {
    fn default() -> Self {
        Self::new()
    }
}
