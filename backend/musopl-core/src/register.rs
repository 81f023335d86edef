//! Pure translation from player-level decisions (load this instrument onto
//! this voice, set this channel's volume, ...) into OPL register writes.
//! Nothing in this module holds state of its own; it only mutates the
//! [`Voice`] and [`OplChip`] it's handed.

use crate::chip::OplChip;
use crate::patch_bank::{Instrument, Operator};
use crate::tables::VOLUME_CURVE;
use crate::voice::Voice;

const REG_TREMOLO: u16 = 0x20;
const REG_LEVEL: u16 = 0x40;
const REG_ATTACK: u16 = 0x60;
const REG_SUSTAIN: u16 = 0x80;
const REG_FEEDBACK: u16 = 0xC0;
const REG_WAVEFORM: u16 = 0xE0;
const REG_FREQ_LOW: u16 = 0xA0;
const REG_FREQ_HIGH: u16 = 0xB0;

/// Writes one operator's five registers (tremolo/vibrato flags, attenuation level,
/// attack/decay, sustain/release, waveform select) at `op_addr` (a bank-relative operator
/// register offset). `max_level` forces the attenuation to minimum output, used for carrier
/// operators of voices whose volume hasn't been set yet and for modulators that don't feed
/// into the carrier. Returns the level byte written, which callers cache to avoid
/// redundant writes later.
fn load_operator<C: OplChip>(chip: &mut C, op_addr: u16, op: &Operator, max_level: bool) -> u8 {
    let level = op.scale | if max_level { 0x3F } else { op.level };
    chip.write_reg(REG_LEVEL + op_addr, level);
    chip.write_reg(REG_TREMOLO + op_addr, op.tremolo);
    chip.write_reg(REG_ATTACK + op_addr, op.attack);
    chip.write_reg(REG_SUSTAIN + op_addr, op.sustain);
    chip.write_reg(REG_WAVEFORM + op_addr, op.waveform);
    level
}

/// Loads `instr`'s `sub_voice` descriptor onto `voice`'s two operators. A no-op if this
/// exact instrument/sub-voice pair is already loaded, since instrument changes between
/// consecutive notes on the same channel are common in MUS scores.
pub fn set_voice_instrument(
    chip: &mut impl OplChip,
    voice: &mut Voice,
    key: crate::patch_bank::InstrumentKey,
    instr: &Instrument,
    sub_voice: u8,
) {
    if voice.instrument == Some(key) && voice.instrument_voice == sub_voice {
        return;
    }
    voice.instrument = Some(key);
    voice.instrument_voice = sub_voice;

    let data = &instr.voices[sub_voice as usize];
    let modulating = data.feedback & 1 == 0;
    voice.carrier_level = load_operator(chip, voice.op2, &data.carrier, true);
    voice.modulator_level = load_operator(chip, voice.op1, &data.modulator, !modulating);
    chip.write_reg(REG_FEEDBACK + voice.bank_index as u16 + voice.array, data.feedback | voice.pan_bits);
}

/// Recomputes and writes the carrier operator's attenuation from the note's velocity, the
/// owning channel's volume, and the player's master volume. `note_volume` is the raw,
/// uncurved velocity (0..=127) — this function applies [`VOLUME_CURVE`] itself, and caches
/// the raw value on `voice.note_volume` so a later channel-volume change can recombine it
/// without needing the original note-on event.
///
/// In additive (non-modulating) connection mode the modulator operator contributes directly
/// to the output, so it must track note volume too; that update only ever happens if the
/// carrier's own attenuation actually changed, mirroring the reference player's nesting.
pub fn set_voice_volume(
    chip: &mut impl OplChip,
    voice: &mut Voice,
    instr: &Instrument,
    channel_volume: u8,
    master_volume: u8,
    note_volume: u8,
) {
    voice.note_volume = note_volume;
    let data = &instr.voices[voice.instrument_voice as usize];

    let note_curve = u32::from(VOLUME_CURVE[note_volume as usize & 0x7F]);
    let channel_factor = 2 * (u32::from(VOLUME_CURVE[channel_volume as usize & 0x7F]) + 1);
    let mut full = (note_curve * channel_factor) >> 9;
    full = (full * (u32::from(master_volume) + 1)) / 128;
    let full = full.min(0x3F) as u8;

    let car_level = 0x3F - full;
    if car_level != (voice.carrier_level & 0x3F) {
        voice.carrier_level = car_level | (voice.carrier_level & 0xC0);
        chip.write_reg(REG_LEVEL + voice.op2, voice.carrier_level);

        if data.feedback & 1 != 0 && data.modulator.level != 0x3F {
            let mut mod_level = data.modulator.level;
            if mod_level < car_level {
                mod_level = car_level;
            }
            mod_level |= voice.modulator_level & 0xC0;
            if mod_level != voice.modulator_level {
                voice.modulator_level = mod_level;
                chip.write_reg(REG_LEVEL + voice.op1, mod_level | (data.modulator.scale & 0xC0));
            }
        }
    }
}

/// Writes the feedback/connection register with updated pan bits, or does nothing if the
/// pan bits are unchanged or the voice has no instrument loaded yet.
pub fn set_voice_pan(chip: &mut impl OplChip, voice: &mut Voice, instr: &Instrument, pan_bits: u8) {
    if voice.pan_bits == pan_bits || voice.instrument.is_none() {
        return;
    }
    voice.pan_bits = pan_bits;
    let data = &instr.voices[voice.instrument_voice as usize];
    chip.write_reg(REG_FEEDBACK + voice.bank_index as u16 + voice.array, data.feedback | pan_bits);
}

/// Recomputes the voice's frequency/octave/key-on word via
/// [`frequency_for_voice`](crate::frequency::frequency_for_voice) and writes the
/// frequency-low/frequency-high-with-key-on register pair, but only if the value actually
/// changed (re-striking the key-on bit on every event would retrigger the envelope).
pub fn update_voice_frequency(chip: &mut impl OplChip, voice: &mut Voice, instr: &Instrument, channel_bend: i32) {
    let freq = crate::frequency::frequency_for_voice(voice, instr, channel_bend);
    if freq != voice.freq {
        voice.freq = freq;
        chip.write_reg(REG_FREQ_LOW + voice.bank_index as u16 + voice.array, (freq & 0xFF) as u8);
        chip.write_reg(
            REG_FREQ_HIGH + voice.bank_index as u16 + voice.array,
            ((freq >> 8) as u8) | 0x20,
        );
    }
}

/// Clears the key-on bit without otherwise disturbing the voice's frequency word, so a
/// released voice's pitch is still known if it's reused before its instrument changes.
pub fn key_off(chip: &mut impl OplChip, voice: &mut Voice) {
    chip.write_reg(REG_FREQ_HIGH + voice.bank_index as u16 + voice.array, (voice.freq >> 8) as u8);
}

/// Puts both OPL3 register banks into a known state: full attenuation on every operator,
/// cleared envelope/waveform registers, OPL3 mode and fast-envelope bits enabled. Called
/// once when the player is created, before any instrument or note is loaded.
pub fn init_opl_registers(chip: &mut impl OplChip) {
    for &array in &[0u16, 0x100] {
        if array == 0 {
            for addr in 0..=21u16 {
                chip.write_reg(REG_LEVEL + addr, 0x3F);
            }
            for addr in REG_ATTACK..=(REG_WAVEFORM + 21) {
                chip.write_reg(addr, 0);
            }
            for addr in 1..REG_LEVEL {
                chip.write_reg(addr, 0);
            }
            // Enable the waveform-select extension (reg 1), OPL3's faster envelope timing
            // (reg 4 low nibble), percussion-mode-off (reg 4 high nibble), and, on the high
            // bank's register 5, OPL3 mode itself.
            chip.write_reg(4, 0x60);
            chip.write_reg(4, 0x80);
            chip.write_reg(1, 0x20);
            chip.write_reg(0x105, 0x01);
        } else {
            for addr in 0..=21u16 {
                chip.write_reg(array + REG_LEVEL + addr, 0x3F);
            }
            for addr in REG_ATTACK..=(REG_WAVEFORM + 21) {
                chip.write_reg(array + addr, 0);
            }
            for addr in 1..REG_LEVEL {
                chip.write_reg(array + addr, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch_bank::{InstrumentKey, VoiceDescriptor};
    use crate::test_support::StubChip;
    use crate::voice::VoicePool;

    fn instrument() -> Instrument {
        Instrument {
            flags: 0,
            fine_tuning: 0,
            fixed_note: 0,
            voices: [
                VoiceDescriptor {
                    modulator: Operator { tremolo: 1, attack: 2, sustain: 3, waveform: 4, scale: 5, level: 6 },
                    feedback: 0x0A,
                    carrier: Operator { tremolo: 7, attack: 8, sustain: 9, waveform: 10, scale: 11, level: 12 },
                    base_note_offset: 0,
                },
                VoiceDescriptor::default(),
            ],
        }
    }

    #[test]
    fn set_voice_instrument_is_idempotent_for_same_key() {
        let mut chip = StubChip::default();
        let mut pool = VoicePool::new();
        let voice = &mut pool.voices[0];
        let key = InstrumentKey { percussion: false, index: 3 };
        let instr = instrument();
        set_voice_instrument(&mut chip, voice, key, &instr, 0);
        let writes_after_first = chip.writes.len();
        set_voice_instrument(&mut chip, voice, key, &instr, 0);
        assert_eq!(chip.writes.len(), writes_after_first);
    }

    #[test]
    fn set_voice_volume_caps_at_full_scale() {
        let mut chip = StubChip::default();
        let mut pool = VoicePool::new();
        let voice = &mut pool.voices[0];
        let instr = instrument();
        set_voice_volume(&mut chip, voice, &instr, 127, 127, 127);
        let (_, level) = *chip.writes.last().unwrap();
        assert_eq!(level & 0x3F, 0x00);
    }

    #[test]
    fn update_voice_frequency_skips_redundant_writes() {
        let mut chip = StubChip::default();
        let mut pool = VoicePool::new();
        let voice = &mut pool.voices[0];
        let instr = instrument();
        update_voice_frequency(&mut chip, voice, &instr, 0);
        let count = chip.writes.len();
        update_voice_frequency(&mut chip, voice, &instr, 0);
        assert_eq!(chip.writes.len(), count);
    }

    #[test]
    fn key_off_preserves_frequency_word() {
        let mut chip = StubChip::default();
        let mut pool = VoicePool::new();
        let voice = &mut pool.voices[0];
        voice.freq = 0x2AB;
        key_off(&mut chip, voice);
        assert_eq!(voice.freq, 0x2AB);
    }

    #[test]
    fn init_opl_registers_clears_both_banks() {
        let mut chip = StubChip::default();
        init_opl_registers(&mut chip);
        assert!(chip.writes.iter().any(|&(addr, _)| addr == 0x105));
        assert!(chip.writes.iter().any(|&(addr, val)| addr == REG_LEVEL && val == 0x3F));
        assert!(chip.writes.iter().any(|&(addr, val)| addr == 0x100 + REG_LEVEL && val == 0x3F));
    }
}
