//! The FM chip interface the player drives. Any bit-accurate (or otherwise
//! conformant) OPL3 emulator satisfies this contract; `musopl-core` only
//! ever calls these three methods and never inspects chip internals.

/// A dual-bank, 18-voice OPL3-compatible FM synthesis chip.
///
/// Register addresses are 9-bit: `0x000..=0x0FF` address the low bank,
/// `0x100..=0x1FF` the high bank (OPL3's second register array).
pub trait OplChip {
    /// Resets all chip state and fixes the output sample rate. Called once at player
    /// construction; the player never changes the sample rate afterwards.
    fn reset(&mut self, sample_rate: u32);

    /// Writes one byte to a 9-bit register address.
    fn write_reg(&mut self, addr: u16, value: u8);

    /// Advances the chip by one output sample and writes an interleaved stereo i16 frame.
    fn generate_resampled(&mut self, out: &mut [i16; 2]);
}
