//! The player facade: owns the chip, the loaded patch bank and score, and
//! all playback state. [`parser`](crate::parser) and
//! [`scheduler`](crate::scheduler) add further `impl` blocks for this type
//! so each file maps onto one component of the design.

use crate::chip::OplChip;
use crate::channel::ChannelTable;
use crate::error::{MusOplError, MusOplResult};
use crate::patch_bank::PatchBank;
use crate::register;
use crate::voice::VoicePool;

pub(crate) const TICKS_PER_SECOND: u64 = 140;
const MUS_MAGIC: &[u8; 4] = b"MUS\x1A";
pub(crate) const MUS_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ScoreHeader {
    pub score_len: u16,
    pub score_start: u16,
}

/// Playback configuration fixed at construction time.
#[derive(Debug, Clone, Copy)]
pub struct PlayerConfig {
    pub sample_rate: u32,
    /// Whether channel pan controls apply stereo separation at all. Some original Doom
    /// configurations (mono OPL output, or `doom_version` variants predating stereo OPL3
    /// support) ignore pan entirely and always center every voice.
    pub stereo_panning_enabled: bool,
    pub looping: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self { sample_rate: 44_100, stereo_panning_enabled: true, looping: false }
    }
}

/// Drives an OPL-compatible chip from a MUS score and a GENMIDI patch bank.
pub struct Player<C: OplChip> {
    pub(crate) chip: C,
    pub(crate) config: PlayerConfig,
    pub(crate) patches: PatchBank,
    pub(crate) channels: ChannelTable,
    pub(crate) voices: VoicePool,

    pub(crate) score: Vec<u8>,
    pub(crate) score_header: ScoreHeader,
    pub(crate) pos: usize,

    pub(crate) playing: bool,
    pub(crate) paused: bool,
    pub(crate) master_volume: u8,

    pub(crate) current_sample: u64,
    pub(crate) next_event_sample: u64,
    pub(crate) timing_remainder: u64,

    /// Total score length in 140Hz ticks, precomputed by a dry-run scan at load time so
    /// [`length_ms`](Self::length_ms) doesn't need to re-walk the score or fall back to a
    /// guessed constant.
    pub(crate) length_ticks: u64,
}

impl<C: OplChip> Player<C> {
    /// Creates a player around `chip`, resetting it and programming both OPL register banks
    /// into their initial state. No patches or score are loaded yet.
    pub fn new(mut chip: C, config: PlayerConfig) -> Self {
        chip.reset(config.sample_rate);
        register::init_opl_registers(&mut chip);
        Self {
            chip,
            config,
            patches: PatchBank::empty(),
            channels: ChannelTable::new(),
            voices: VoicePool::new(),
            score: Vec::new(),
            score_header: ScoreHeader { score_len: 0, score_start: 0 },
            pos: 0,
            playing: false,
            paused: false,
            master_volume: 127,
            current_sample: 0,
            next_event_sample: 0,
            timing_remainder: 0,
            length_ticks: 0,
        }
    }

    /// Parses and installs a GENMIDI patch bank. May be called again later to hot-swap
    /// instruments; in-flight voices keep playing with whichever instrument they already
    /// loaded until their next note-on.
    pub fn load_patches(&mut self, genmidi_bytes: &[u8]) -> MusOplResult<()> {
        self.patches = PatchBank::load(genmidi_bytes)?;
        log::debug!("loaded genmidi patch bank ({} bytes)", genmidi_bytes.len());
        Ok(())
    }

    /// Parses a MUS score's header, validates its magic and bounds, and resets all playback
    /// state to the start of the score. Does not start playback; call
    /// [`start`](Self::start) afterwards.
    pub fn load_score(&mut self, mus_bytes: &[u8]) -> MusOplResult<()> {
        let header = parse_score_header(mus_bytes)?;
        self.score = mus_bytes.to_vec();
        self.score_header = header;
        self.reset_playback_position();
        self.length_ticks = self.scan_length_ticks();
        log::debug!(
            "loaded mus score ({} bytes, {} ticks)",
            mus_bytes.len(),
            self.length_ticks
        );
        Ok(())
    }

    /// Drops the loaded score and stops playback. The patch bank and chip state are left
    /// untouched so a new score can be loaded without re-initializing the chip.
    pub fn unload_score(&mut self) {
        self.stop();
        self.score.clear();
        self.length_ticks = 0;
    }

    pub(crate) fn reset_playback_position(&mut self) {
        self.pos = self.score_header.score_start as usize;
        self.current_sample = 0;
        self.next_event_sample = 0;
        self.timing_remainder = 0;
    }

    /// Begins (or restarts) playback from the start of the loaded score. `looping` controls
    /// whether reaching the end of the score restarts it or stops playback; it may be changed
    /// on every call, unlike the rest of [`PlayerConfig`].
    pub fn start(&mut self, looping: bool) -> MusOplResult<()> {
        if self.score.is_empty() {
            return Err(MusOplError::NotInitialized);
        }
        self.config.looping = looping;
        self.reset_playback_position();
        self.playing = true;
        self.paused = false;
        Ok(())
    }

    /// Restarts playback from the beginning of the current score. Sample-accurate seeking is
    /// out of scope; this matches the reference player's own seek behavior, which likewise
    /// only supports jumping back to the start.
    pub fn seek_ms(&mut self, _position_ms: u64) -> MusOplResult<()> {
        if self.score.is_empty() {
            return Err(MusOplError::NotInitialized);
        }
        log::warn!("seek_ms approximated as restart-from-start; sample-accurate seeking is unsupported");
        let looping = self.config.looping;
        self.start(looping)
    }

    /// Stops playback, releases every active voice, and rewinds to the start of the score.
    pub fn stop(&mut self) {
        for i in 0..self.voices.voices.len() {
            if self.voices.voices[i].in_use {
                self.voices.release(i, &mut self.chip);
            }
        }
        self.playing = false;
        self.paused = false;
        self.reset_playback_position();
    }

    /// Pauses playback without releasing active voices or resetting position.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resumes playback from wherever it was paused.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing && !self.paused
    }

    /// Sets the independent master volume (0..=127) applied on top of every channel's own
    /// volume, and immediately reapplies it to every currently sounding voice.
    pub fn set_master_volume(&mut self, volume: u8) {
        self.master_volume = volume.min(127);
        for i in 0..self.voices.voices.len() {
            if !self.voices.voices[i].in_use {
                continue;
            }
            let Some(key) = self.voices.voices[i].instrument else { continue };
            let Some(channel) = self.voices.voices[i].channel else { continue };
            let instr = self.patches.get(key);
            let channel_volume = self.channels.channels[channel as usize].volume;
            let note_volume = self.voices.voices[i].note_volume;
            register::set_voice_volume(
                &mut self.chip,
                &mut self.voices.voices[i],
                instr,
                channel_volume,
                self.master_volume,
                note_volume,
            );
        }
    }

    pub fn master_volume(&self) -> u8 {
        self.master_volume
    }

    /// Number of hardware voices currently in use (0..=18). Exposed as a diagnostic for
    /// hosts that want to display voice pressure, and exercised by the property tests that
    /// check the 18-voice ceiling holds under simultaneous note events and stealing.
    pub fn active_voice_count(&self) -> usize {
        self.voices.voices.iter().filter(|v| v.in_use).count()
    }

    /// Current playback position, in milliseconds.
    pub fn position_ms(&self) -> u64 {
        self.current_sample * 1000 / u64::from(self.config.sample_rate)
    }

    /// Total score length, in milliseconds, from the dry-run scan performed at load time.
    pub fn length_ms(&self) -> u64 {
        self.length_ticks * 1000 / TICKS_PER_SECOND
    }

    /// Crate version string, matching `CARGO_PKG_VERSION`.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

pub(crate) fn parse_score_header(bytes: &[u8]) -> MusOplResult<ScoreHeader> {
    if bytes.len() < MUS_HEADER_LEN {
        return Err(MusOplError::InvalidData("mus header too short"));
    }
    if &bytes[0..4] != MUS_MAGIC {
        return Err(MusOplError::InvalidData("missing MUS magic"));
    }
    let score_len = u16::from_le_bytes([bytes[4], bytes[5]]);
    let score_start = u16::from_le_bytes([bytes[6], bytes[7]]);
    let end = score_start as usize + score_len as usize;
    if end > bytes.len() {
        return Err(MusOplError::InvalidData("mus score length exceeds buffer"));
    }
    Ok(ScoreHeader { score_len, score_start })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubChip;

    fn header_bytes(score_len: u16, score_start: u16, total_len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; total_len];
        bytes[0..4].copy_from_slice(MUS_MAGIC);
        bytes[4..6].copy_from_slice(&score_len.to_le_bytes());
        bytes[6..8].copy_from_slice(&score_start.to_le_bytes());
        bytes
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = header_bytes(0, 16, 16);
        bytes[0] = b'X';
        assert!(matches!(parse_score_header(&bytes), Err(MusOplError::InvalidData(_))));
    }

    #[test]
    fn rejects_overflowing_score_length() {
        let bytes = header_bytes(1000, 16, 16);
        assert!(matches!(parse_score_header(&bytes), Err(MusOplError::InvalidData(_))));
    }

    #[test]
    fn new_player_initializes_chip_registers() {
        let chip = StubChip::default();
        let player = Player::new(chip, PlayerConfig::default());
        assert_eq!(player.chip.reset_sample_rate, Some(44_100));
        assert!(!player.chip.writes.is_empty());
    }

    #[test]
    fn start_without_score_fails() {
        let chip = StubChip::default();
        let mut player = Player::new(chip, PlayerConfig::default());
        assert!(matches!(player.start(false), Err(MusOplError::NotInitialized)));
    }
}
