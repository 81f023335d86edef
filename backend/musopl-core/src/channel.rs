//! The 16 logical MIDI-style channels a MUS score addresses. Channels own
//! zero or more hardware voices at any moment; their volume/pan/bend state
//! is reapplied to every voice they currently own whenever it changes.

use crate::chip::OplChip;
use crate::patch_bank::PatchBank;
use crate::register;
use crate::voice::VoicePool;

pub const CHANNEL_COUNT: usize = 16;

/// MUS channel 15 and MIDI channel 9 are swapped on ingest so that channel 9's
/// traditional "percussion" role lines up with the percussion bank.
pub const PERCUSSION_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Copy)]
pub struct Channel {
    pub program: u8,
    pub volume: u8,
    pub pan_bits: u8,
    pub bend: i32,
    /// Velocity to reuse for a play-note event that omits its own volume byte.
    pub last_velocity: u8,
}

impl Channel {
    fn new() -> Self {
        Self { program: 0, volume: 100, pan_bits: 0x30, bend: 0, last_velocity: 127 }
    }
}

/// True if `index` (a 0-based channel number) is the percussion channel.
pub fn is_percussion_channel(index: usize) -> bool {
    index as u8 == PERCUSSION_CHANNEL
}

#[derive(Debug, Clone)]
pub struct ChannelTable {
    pub channels: [Channel; CHANNEL_COUNT],
}

impl ChannelTable {
    pub fn new() -> Self {
        Self { channels: [Channel::new(); CHANNEL_COUNT] }
    }

    fn for_each_owned_voice(
        &self,
        index: usize,
        voices: &mut VoicePool,
        mut f: impl FnMut(&mut VoicePool, usize),
    ) {
        for i in 0..voices.voices.len() {
            if voices.voices[i].in_use && voices.voices[i].channel == Some(index as u8) {
                f(voices, i);
            }
        }
    }

    /// Sets channel `index`'s volume (clamped to 0..=127) and recomputes every voice it
    /// currently owns so the change is heard immediately, not just on the next note-on.
    pub fn set_volume(
        &mut self,
        index: usize,
        value: u8,
        voices: &mut VoicePool,
        patches: &PatchBank,
        master_volume: u8,
        chip: &mut impl OplChip,
    ) {
        let value = value.min(127);
        self.channels[index].volume = value;
        self.for_each_owned_voice(index, voices, |voices, i| {
            let Some(key) = voices.voices[i].instrument else { return };
            let instr = patches.get(key);
            let note_volume = voices.voices[i].note_volume;
            register::set_voice_volume(chip, &mut voices.voices[i], instr, value, master_volume, note_volume);
        });
    }

    /// Sets channel `index`'s stereo pan (0 = hard left, 64 = center, 127 = hard right in
    /// MUS/MIDI terms) and rewrites every owned voice's feedback register with the
    /// corresponding OPL pan bits, using DMX's thresholds: `<= 48` hard left (`0x20`),
    /// `>= 96` hard right (`0x10`), otherwise center (`0x30`).
    pub fn set_pan(
        &mut self,
        index: usize,
        value: u8,
        voices: &mut VoicePool,
        patches: &PatchBank,
        chip: &mut impl OplChip,
    ) {
        let pan_bits = if value >= 96 {
            0x10
        } else if value <= 48 {
            0x20
        } else {
            0x30
        };
        self.channels[index].pan_bits = pan_bits;
        self.for_each_owned_voice(index, voices, |voices, i| {
            let Some(key) = voices.voices[i].instrument else { return };
            let instr = patches.get(key);
            register::set_voice_pan(chip, &mut voices.voices[i], instr, pan_bits);
        });
    }

    /// Applies a new pitch bend value to channel `index` and forces every owned voice to
    /// rewrite its frequency registers, even if the note itself hasn't changed.
    pub fn set_bend(
        &mut self,
        index: usize,
        bend: i32,
        voices: &mut VoicePool,
        patches: &PatchBank,
        chip: &mut impl OplChip,
    ) {
        self.channels[index].bend = bend;
        self.for_each_owned_voice(index, voices, |voices, i| {
            let Some(key) = voices.voices[i].instrument else { return };
            let instr = patches.get(key);
            // Force the write: a voice that happens to land on the same f-number/octave word
            // as before the bend would otherwise see no change and skip re-striking the
            // frequency registers.
            voices.voices[i].freq = 0;
            register::update_voice_frequency(chip, &mut voices.voices[i], instr, bend);
        });
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch_bank::InstrumentKey;
    use crate::test_support::StubChip;

    #[test]
    fn set_volume_clamps_and_updates_owned_voices() {
        let mut table = ChannelTable::new();
        let mut voices = VoicePool::new();
        let patches = PatchBank::empty();
        let mut chip = StubChip::default();

        voices.voices[0].in_use = true;
        voices.voices[0].channel = Some(2);
        voices.voices[0].instrument = Some(InstrumentKey { percussion: false, index: 0 });
        voices.voices[0].note_volume = 100;

        table.set_volume(2, 200, &mut voices, &patches, 127, &mut chip);
        assert_eq!(table.channels[2].volume, 127);
        assert!(!chip.writes.is_empty());
    }

    #[test]
    fn set_pan_maps_ranges_to_opl_bits() {
        let mut table = ChannelTable::new();
        let mut voices = VoicePool::new();
        let patches = PatchBank::empty();
        let mut chip = StubChip::default();
        table.set_pan(0, 0, &mut voices, &patches, &mut chip);
        assert_eq!(table.channels[0].pan_bits, 0x20);
        table.set_pan(0, 64, &mut voices, &patches, &mut chip);
        assert_eq!(table.channels[0].pan_bits, 0x30);
        table.set_pan(0, 127, &mut voices, &patches, &mut chip);
        assert_eq!(table.channels[0].pan_bits, 0x10);
    }
}
