//! Black-box scenarios exercised only through `musopl_core`'s public API: a player built
//! around a silent `OplChip` test double, fed hand-built MUS scores and GENMIDI lumps.

use musopl_core::{OplChip, Player, PlayerConfig};

const HEADER_LEN: usize = 16;

/// Swallows every register write; `generate_resampled` always reports silence. Good enough
/// for these scenarios, which only care about playback state and voice bookkeeping.
#[derive(Default)]
struct SilentChip;

impl OplChip for SilentChip {
    fn reset(&mut self, _sample_rate: u32) {}

    fn write_reg(&mut self, _addr: u16, _value: u8) {}

    fn generate_resampled(&mut self, out: &mut [i16; 2]) {
        *out = [0, 0];
    }
}

/// Wraps `events` in a minimal 16-byte MUS header (`score_start` right after the header, no
/// instrument-patch list).
fn mus_bytes(events: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_LEN];
    bytes[0..4].copy_from_slice(b"MUS\x1A");
    bytes[4..6].copy_from_slice(&(events.len() as u16).to_le_bytes());
    bytes[6..8].copy_from_slice(&(HEADER_LEN as u16).to_le_bytes());
    bytes.extend_from_slice(events);
    bytes
}

/// A 175-instrument GENMIDI lump with every instrument melodic, non-fixed, single-voice —
/// enough to let note-on events resolve an instrument without caring about its contents.
fn genmidi_bytes() -> Vec<u8> {
    let mut bytes = b"#OPL_II#".to_vec();
    bytes.extend(vec![0u8; (128 + 47) * 36]);
    bytes
}

fn player_with_patches() -> Player<SilentChip> {
    let mut p = Player::new(SilentChip::default(), PlayerConfig::default());
    p.load_patches(&genmidi_bytes()).unwrap();
    p
}

fn run_frames(p: &mut Player<SilentChip>, frames: usize) {
    let mut buf = vec![0i16; frames * 2];
    p.generate(&mut buf);
}

// Scenario 1: a single play-note event with no velocity byte and no terminator. The score
// runs out mid-stream while decoding the next (truncated) event, which is treated as
// end-of-score; the voice that was already struck stays allocated.
#[test]
fn single_play_note_allocates_one_voice_even_without_terminator() {
    let mut p = player_with_patches();
    // 0x10: play_note, channel 0, no delay. 0x3C: note 60, no velocity byte follows.
    // 0x00: release_note, channel 0, no delay -- but its note byte is missing, so the score
    // ends here instead.
    p.load_score(&mus_bytes(&[0x10, 0x3C, 0x00])).unwrap();
    p.start(false).unwrap();
    run_frames(&mut p, 4);

    assert_eq!(p.active_voice_count(), 1);
    assert!(!p.is_playing());
}

// Scenario 2: a note is struck and then explicitly released before end-of-score; no voices
// remain in use afterward.
#[test]
fn play_then_release_leaves_no_voices_in_use() {
    let mut p = player_with_patches();
    let events = [
        0x10, 0xBC, 0x40, // play_note ch0, note 60 with velocity byte, velocity 64
        0x80, 0x3C, 0x00, // release_note ch0, note 60, delay-follows, delay = 0 ticks
        0x60, // score end
    ];
    p.load_score(&mus_bytes(&events)).unwrap();
    p.start(false).unwrap();
    run_frames(&mut p, 4);

    assert_eq!(p.active_voice_count(), 0);
    assert!(!p.is_playing());
}

// Scenario 5: a play-note event carrying a 128-tick variable-length delay reaches
// end-of-score once enough samples have been generated to cross that delay.
#[test]
fn score_stops_once_delayed_terminator_is_reached() {
    let mut p = player_with_patches();
    let events = [
        0x90, 0x3C, // play_note ch0, delay-follows, note 60 (velocity from default)
        0x81, 0x00, // varlen delay: (1 << 7) | 0 = 128 ticks
        0x60, // score end
    ];
    p.load_score(&mus_bytes(&events)).unwrap();
    p.start(false).unwrap();

    // 128 ticks at 140Hz is well under a second; a couple of seconds of samples is enough
    // for the event clock to reach the terminator either way.
    run_frames(&mut p, 44_100 * 2);

    assert!(!p.is_playing());
}

// Scenario 6: far more simultaneous note-on events than there are hardware voices. The pool
// must settle at exactly its 18-voice ceiling rather than growing past it or panicking.
#[test]
fn nineteen_simultaneous_notes_cap_at_eighteen_voices() {
    let mut p = player_with_patches();

    let mut events = Vec::new();
    for i in 0..19u8 {
        let channel = i % 16;
        let note = 10 + i;
        let has_delay = i == 18;
        let event_byte = 0x10 | channel | if has_delay { 0x80 } else { 0x00 };
        events.push(event_byte);
        events.push(note);
        if has_delay {
            events.push(5); // a short delay so draining stops after this event
        }
    }
    events.push(0x60);

    p.load_score(&mus_bytes(&events)).unwrap();
    p.start(false).unwrap();
    run_frames(&mut p, 1);

    assert_eq!(p.active_voice_count(), 18);
}

// Boundary: an empty, non-looping score produces silence and stops immediately.
#[test]
fn empty_score_without_looping_stops_immediately() {
    let mut p = player_with_patches();
    p.load_score(&mus_bytes(&[])).unwrap();
    p.start(false).unwrap();

    let mut buf = [1i16; 64];
    p.generate(&mut buf);

    assert!(!p.is_playing());
    assert!(buf.iter().all(|&s| s == 0));
}

// Boundary: an empty, looping score never finds a later position to stop at, but must still
// return from `generate` with silence instead of spinning forever.
#[test]
fn empty_score_with_looping_never_hangs() {
    let mut p = player_with_patches();
    p.load_score(&mus_bytes(&[])).unwrap();
    p.start(true).unwrap();

    let mut buf = [1i16; 512];
    p.generate(&mut buf);

    assert!(p.is_playing());
    assert!(buf.iter().all(|&s| s == 0));
}

// Boundary: a velocity-0 play_note event behaves as a release rather than a silent key-on.
#[test]
fn zero_velocity_play_note_releases_rather_than_allocates() {
    let mut p = player_with_patches();
    let events = [
        0x10, 0xBC, 0x00, // play_note ch0, note 60, velocity byte present, velocity 0
        0x60,
    ];
    p.load_score(&mus_bytes(&events)).unwrap();
    p.start(false).unwrap();
    run_frames(&mut p, 4);

    assert_eq!(p.active_voice_count(), 0);
}

// Boundary: percussion notes outside 35..=81 fall back to melodic instrument 0 rather than
// indexing out of range, and still allocate a voice.
#[test]
fn out_of_range_percussion_note_falls_back_without_panicking() {
    let mut p = player_with_patches();
    // Channel 15 maps to the internal percussion channel; note 34 is just below the
    // percussion range (35..=81) and must fall back to melodic program 0.
    let events = [0x1F, 0x22, 0x60]; // play_note ch15, note 34 (0x22), score end
    p.load_score(&mus_bytes(&events)).unwrap();
    p.start(false).unwrap();
    run_frames(&mut p, 4);

    assert_eq!(p.active_voice_count(), 1);
}
