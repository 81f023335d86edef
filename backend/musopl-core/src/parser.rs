//! MUS score parsing and the note-on/off logic that turns decoded events into
//! voice allocations. Lives as further `impl` blocks on
//! [`Player`](crate::player::Player) so score-reading, instrument
//! resolution, and register programming all share one coherent state
//! machine without needing a separate parser object threaded everywhere.

use crate::chip::OplChip;
use crate::channel::is_percussion_channel;
use crate::player::Player;
use crate::register;
use crate::tables::MUS_TO_MIDI_CTRL;

const EVENT_RELEASE_NOTE: u8 = 0;
const EVENT_PLAY_NOTE: u8 = 1;
const EVENT_PITCH_BEND: u8 = 2;
const EVENT_SYSTEM: u8 = 3;
const EVENT_CONTROLLER: u8 = 4;
const EVENT_FINISH: u8 = 6;

const SYSTEM_ALL_SOUNDS_OFF: u8 = 10;
const SYSTEM_ALL_NOTES_OFF: u8 = 11;
const SYSTEM_RESET_ALL_CONTROLLERS: u8 = 14;

const CONTROLLER_PROGRAM: u8 = 0;

/// MIDI continuous-controller numbers `MUS_TO_MIDI_CTRL` maps MUS controllers onto; only
/// these two have an effect, matching the reference player.
const MIDI_CC_VOLUME: u8 = 7;
const MIDI_CC_PAN: u8 = 10;

/// Maps a MUS channel number (0..=15) onto the internal channel index used for patch
/// resolution, swapping MUS channel 15 (its hardwired percussion channel) with channel 9
/// (the conventional percussion channel in GENMIDI/GM terms) so `channel == 9` always means
/// percussion downstream. The swap is its own inverse: MUS channel 9 maps to 15 and vice
/// versa, so no channel number collides.
fn map_channel(mus_channel: u8) -> usize {
    match mus_channel {
        15 => 9,
        9 => 15,
        other => other as usize,
    }
}

impl<C: OplChip> Player<C> {
    fn read_byte(&mut self) -> Option<u8> {
        let byte = *self.score.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn read_varlen(&mut self) -> u32 {
        let mut value: u32 = 0;
        loop {
            let Some(byte) = self.read_byte() else { break };
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                break;
            }
        }
        value
    }

    /// Processes score events until a delay is encountered (or the score ends), and returns
    /// the delay in 140Hz ticks before the next event batch, or `None` if playback should
    /// stop (end of score reached with looping disabled, or a malformed/truncated score).
    pub(crate) fn process_events(&mut self) -> Option<u32> {
        loop {
            let Some(byte) = self.read_byte() else {
                return self.handle_score_end();
            };
            let has_delay = byte & 0x80 != 0;
            let event_type = (byte >> 4) & 0x07;
            let channel_raw = byte & 0x0F;

            match event_type {
                EVENT_RELEASE_NOTE => self.event_release_note(channel_raw),
                EVENT_PLAY_NOTE => self.event_play_note(channel_raw),
                EVENT_PITCH_BEND => self.event_pitch_bend(channel_raw),
                EVENT_SYSTEM => self.event_system(channel_raw),
                EVENT_CONTROLLER => self.event_controller(channel_raw),
                EVENT_FINISH => return self.handle_score_end(),
                _ => {}
            }

            if has_delay {
                return Some(self.read_varlen());
            }
        }
    }

    fn handle_score_end(&mut self) -> Option<u32> {
        if self.config.looping {
            self.pos = self.score_header.score_start as usize;
            Some(0)
        } else {
            None
        }
    }

    fn event_release_note(&mut self, channel_raw: u8) {
        let Some(note_byte) = self.read_byte() else { return };
        let note = note_byte & 0x7F;
        let channel = map_channel(channel_raw) as u8;
        self.voices.release_matching(channel, note, &mut self.chip);
    }

    fn event_play_note(&mut self, channel_raw: u8) {
        let Some(note_byte) = self.read_byte() else { return };
        let note = note_byte & 0x7F;
        let has_volume = note_byte & 0x80 != 0;
        let channel = map_channel(channel_raw);

        let velocity = if has_volume {
            let Some(volume_byte) = self.read_byte() else { return };
            let velocity = volume_byte & 0x7F;
            self.channels.channels[channel].last_velocity = velocity;
            velocity
        } else {
            self.channels.channels[channel].last_velocity
        };

        if velocity == 0 {
            self.voices.release_matching(channel as u8, note, &mut self.chip);
            return;
        }

        if self.patches.is_loaded() {
            self.key_on(channel, note, velocity);
        }
    }

    fn event_pitch_bend(&mut self, channel_raw: u8) {
        let Some(value) = self.read_byte() else { return };
        let channel = map_channel(channel_raw);
        let bend = (i32::from(value) - 128) / 2;

        let Player { chip, patches, voices, channels, .. } = self;
        channels.set_bend(channel, bend, voices, patches, chip);
    }

    fn event_system(&mut self, channel_raw: u8) {
        let Some(controller) = self.read_byte() else { return };
        let channel = map_channel(channel_raw) as u8;
        match controller {
            SYSTEM_ALL_SOUNDS_OFF | SYSTEM_ALL_NOTES_OFF => {
                self.voices.release_channel(channel, &mut self.chip);
            }
            SYSTEM_RESET_ALL_CONTROLLERS => {
                self.reset_channel_controllers(channel as usize);
            }
            _ => {}
        }
    }

    fn event_controller(&mut self, channel_raw: u8) {
        let (Some(controller), Some(value)) = (self.read_byte(), self.read_byte()) else { return };
        let channel = map_channel(channel_raw);
        let value = value & 0x7F;

        if controller == CONTROLLER_PROGRAM {
            self.channels.channels[channel].program = value;
            return;
        }
        let Some(&midi_cc) = MUS_TO_MIDI_CTRL.get(controller as usize) else { return };
        match midi_cc {
            MIDI_CC_VOLUME => {
                let Player { chip, patches, voices, channels, master_volume, .. } = self;
                channels.set_volume(channel, value, voices, patches, *master_volume, chip);
            }
            MIDI_CC_PAN => {
                // Stereo panning off (OPL2 / pre-1.9 mode) means pan stays centered forever;
                // a mid-note pan controller must not reach already-sounding voices either.
                if self.config.stereo_panning_enabled {
                    let Player { chip, patches, voices, channels, .. } = self;
                    channels.set_pan(channel, value, voices, patches, chip);
                }
            }
            _ => {}
        }
    }

    /// Resets volume, pan, and bend to their power-on defaults. Unlike a full channel reset,
    /// this leaves the channel's selected program alone — the reference player's reset-all-
    /// controllers handler never touches `channel->instrument`, only volume/pan/bend.
    fn reset_channel_controllers(&mut self, channel: usize) {
        let Player { chip, patches, voices, channels, master_volume, .. } = self;
        channels.set_volume(channel, 100, voices, patches, *master_volume, chip);
        channels.set_pan(channel, 64, voices, patches, chip);
        // Bend is reset in-place, not through `set_bend`: the reference player doesn't force a
        // frequency rewrite here, only on an explicit pitch-bend event.
        channels.channels[channel].bend = 0;
    }

    /// Allocates (stealing if necessary) one voice per sub-voice of the resolved instrument
    /// and keys it on. Layered (double-voice) instruments allocate two hardware voices for
    /// a single MUS note-on. `key` is the raw MUS event note byte, used for matching later
    /// release events; percussion voices always resolve to the fixed pitch 60 regardless of
    /// `key`, since only the percussion instrument (not the note byte) determines their pitch.
    fn key_on(&mut self, channel: usize, key: u8, velocity: u8) {
        let is_percussion = is_percussion_channel(channel);
        let program = self.channels.channels[channel].program;
        let patch_key = self.patches.resolve(is_percussion, program, key);
        let double_voice = self.patches.get(patch_key).is_double_voice();
        let sub_voices: &[u8] = if double_voice { &[0, 1] } else { &[0] };
        let note = if is_percussion { 60 } else { key };
        let channel_volume = self.channels.channels[channel].volume;
        let channel_bend = self.channels.channels[channel].bend;
        let pan_bits = if self.config.stereo_panning_enabled {
            self.channels.channels[channel].pan_bits
        } else {
            0x30
        };

        // Allocate every sub-voice first, before configuring any of them. A double-voice note's
        // primary must not have `channel` set yet when the secondary is allocated, or `steal`
        // could see the primary as a same-or-higher-channel candidate and take it right back.
        let mut allocated: [Option<usize>; 2] = [None, None];
        for (slot, _) in sub_voices.iter().enumerate() {
            allocated[slot] = self.voices.allocate().or_else(|| self.voices.steal(&mut self.chip));
        }

        for (slot, &sub) in sub_voices.iter().enumerate() {
            let Some(idx) = allocated[slot] else { continue };

            let instr = self.patches.get(patch_key);
            let voice = &mut self.voices.voices[idx];
            voice.channel = Some(channel as u8);
            voice.key = key;
            voice.note = if instr.is_fixed_note() { instr.fixed_note } else { note };
            voice.pan_bits = pan_bits;

            register::set_voice_instrument(&mut self.chip, voice, patch_key, instr, sub);
            register::set_voice_volume(
                &mut self.chip,
                voice,
                instr,
                channel_volume,
                self.master_volume,
                velocity,
            );
            voice.freq = 0;
            register::update_voice_frequency(&mut self.chip, voice, instr, channel_bend);
        }
    }

    /// Walks the score once without touching chip or voice state, summing every delay to
    /// determine the score's total length in ticks. Used at load time so
    /// [`length_ms`](Player::length_ms) is exact rather than a guessed constant.
    pub(crate) fn scan_length_ticks(&self) -> u64 {
        let start = self.score_header.score_start as usize;
        let end = start + self.score_header.score_len as usize;
        let mut pos = start;
        let mut total: u64 = 0;

        let read_byte = |pos: &mut usize| -> Option<u8> {
            let byte = *self.score.get(*pos)?;
            *pos += 1;
            Some(byte)
        };
        let read_varlen = |pos: &mut usize| -> u32 {
            let mut value = 0u32;
            loop {
                let Some(byte) = read_byte(pos) else { break };
                value = (value << 7) | u32::from(byte & 0x7F);
                if byte & 0x80 == 0 {
                    break;
                }
            }
            value
        };

        while pos < end {
            let Some(byte) = read_byte(&mut pos) else { break };
            let has_delay = byte & 0x80 != 0;
            let event_type = (byte >> 4) & 0x07;
            match event_type {
                EVENT_RELEASE_NOTE | EVENT_PITCH_BEND => {
                    read_byte(&mut pos);
                }
                EVENT_PLAY_NOTE => {
                    if let Some(note_byte) = read_byte(&mut pos) {
                        if note_byte & 0x80 != 0 {
                            read_byte(&mut pos);
                        }
                    }
                }
                EVENT_SYSTEM => {
                    read_byte(&mut pos);
                }
                EVENT_CONTROLLER => {
                    read_byte(&mut pos);
                    read_byte(&mut pos);
                }
                EVENT_FINISH => break,
                _ => {}
            }
            if has_delay {
                total += u64::from(read_varlen(&mut pos));
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerConfig;
    use crate::test_support::StubChip;

    fn mus_score(events: &[u8], score_start: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; score_start as usize];
        bytes[0..4].copy_from_slice(b"MUS\x1A");
        bytes[4..6].copy_from_slice(&(events.len() as u16).to_le_bytes());
        bytes[6..8].copy_from_slice(&score_start.to_le_bytes());
        bytes.extend_from_slice(events);
        bytes
    }

    fn player() -> Player<StubChip> {
        Player::new(StubChip::default(), PlayerConfig::default())
    }

    fn player_with_patches() -> Player<StubChip> {
        let mut p = player();
        p.load_patches(&crate::patch_bank::test_genmidi_bytes()).unwrap();
        p
    }

    #[test]
    fn channel_swap_is_involution() {
        assert_eq!(map_channel(15), 9);
        assert_eq!(map_channel(9), 15);
        assert_eq!(map_channel(3), 3);
    }

    #[test]
    fn play_note_allocates_a_voice() {
        let mut p = player_with_patches();
        // play-note(channel 0, has-volume) note=60 volume=100, then finish.
        let events = [0x10, 0xC0 /* note 0x40 | has_volume */, 100, 0x60];
        let score = mus_score(&events, 16);
        p.load_score(&score).unwrap();
        p.start(false).unwrap();
        let delay = p.process_events();
        assert!(delay.is_none());
        assert!(p.voices.voices.iter().any(|v| v.in_use));
    }

    #[test]
    fn play_note_is_suppressed_without_a_loaded_patch_bank() {
        let mut p = player();
        let events = [0x10, 0xC0, 100, 0x60];
        let score = mus_score(&events, 16);
        p.load_score(&score).unwrap();
        p.start(false).unwrap();
        p.process_events();
        assert!(!p.voices.voices.iter().any(|v| v.in_use));
    }

    #[test]
    fn release_note_frees_the_matching_voice() {
        let mut p = player_with_patches();
        let events = [
            0x10, 0xC0, 100, // play note 0x40 w/ volume
            0x80, 0x40, // release note 0x40, channel 0, last event -> delay follows
            0x00, // delay 0
            0x60, // finish
        ];
        let score = mus_score(&events, 16);
        p.load_score(&score).unwrap();
        p.start(false).unwrap();
        p.process_events();
        assert!(!p.voices.voices.iter().any(|v| v.in_use));
    }

    #[test]
    fn zero_velocity_play_note_releases_the_matching_voice() {
        let mut p = player_with_patches();
        let events = [
            0x10, 0xC0, 100, // play note 0x40, velocity 100
            0x10, 0xC0, 0, // play note 0x40, velocity 0 -> release
            0x00, // delay 0
            0x60, // finish
        ];
        let score = mus_score(&events, 16);
        p.load_score(&score).unwrap();
        p.start(false).unwrap();
        p.process_events();
        assert!(!p.voices.voices.iter().any(|v| v.in_use));
    }

    #[test]
    fn scan_length_ticks_sums_delays() {
        let mut p = player();
        let events = [0x90, 0x40, 0x05]; // play note (no volume byte) with delay 5
        let score = mus_score(&events, 16);
        p.load_score(&score).unwrap();
        assert_eq!(p.length_ticks, 5);
    }

    #[test]
    fn pitch_bend_byte_maps_to_expected_bend_values() {
        let mut p = player();
        // pitch_bend(channel 0) 128 -> bend 0; same for 0 -> -64 and 255 -> 63.
        for (byte, expected) in [(128u8, 0i32), (0, -64), (255, 63)] {
            let events = [0x20, byte, 0x60];
            let score = mus_score(&events, 16);
            p.load_score(&score).unwrap();
            p.start(false).unwrap();
            p.process_events();
            assert_eq!(p.channels.channels[0].bend, expected);
        }
    }

    #[test]
    fn non_looping_score_end_stops_playback() {
        let mut p = player();
        let events = [0x60];
        let score = mus_score(&events, 16);
        p.load_score(&score).unwrap();
        p.start(false).unwrap();
        assert_eq!(p.process_events(), None);
    }

    #[test]
    fn looping_score_restarts_at_score_start() {
        let mut p = player();
        let events = [0x60];
        let score = mus_score(&events, 16);
        p.load_score(&score).unwrap();
        p.start(true).unwrap();
        p.process_events();
        assert_eq!(p.pos, p.score_header.score_start as usize);
    }
}
