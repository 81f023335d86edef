//! Ties the MUS 140Hz tick clock to the chip's sample clock and drives
//! sample generation. Kept as its own `impl` block on
//! [`Player`](crate::player::Player) so the fixed-point timing math — the
//! one part of this crate where floating point must never sneak in, or
//! splitting a `generate` call across calls would drift audibly out of
//! sync with a single larger call — stays in one place.

use crate::chip::OplChip;
use crate::player::{Player, TICKS_PER_SECOND};

/// Upper bound on events drained per output frame. A well-formed score never gets close to
/// this; it exists so a looping score with an empty body (every iteration immediately hits
/// end-of-score at zero ticks elapsed) can't spin the event-draining loop forever instead of
/// producing a sample.
const MAX_EVENTS_PER_FRAME: u32 = 1024;

impl<C: OplChip> Player<C> {
    /// Advances the event clock by `delay_ticks` (a MUS tick count), in exact integer
    /// arithmetic so that splitting [`generate`](Self::generate) into many small calls
    /// produces bit-identical output to one large call.
    fn advance_event_time(&mut self, delay_ticks: u32) {
        let accum = self.timing_remainder + u64::from(delay_ticks) * u64::from(self.config.sample_rate);
        self.next_event_sample += accum / TICKS_PER_SECOND;
        self.timing_remainder = accum % TICKS_PER_SECOND;
    }

    /// Fills `out` (interleaved stereo i16 samples) with synthesized audio, processing
    /// score events as playback reaches their scheduled sample. If playback isn't active
    /// (never started, paused, or already stopped) at the moment of the call, the whole
    /// buffer is filled with silence instead.
    ///
    /// Once playback stops mid-call (the score ends without looping), every remaining frame
    /// still asks the chip for a sample rather than being force-zeroed, so release-stage
    /// decay already in flight rings out naturally instead of cutting off abruptly.
    pub fn generate(&mut self, out: &mut [i16]) {
        if !self.is_playing() {
            out.fill(0);
            return;
        }

        for frame in out.chunks_mut(2) {
            if frame.len() < 2 {
                break;
            }

            let mut events_drained = 0;
            while self.playing
                && self.current_sample >= self.next_event_sample
                && events_drained < MAX_EVENTS_PER_FRAME
            {
                match self.process_events() {
                    Some(delay) => self.advance_event_time(delay),
                    None => {
                        self.playing = false;
                        break;
                    }
                }
                events_drained += 1;
            }

            let mut sample = [0i16; 2];
            self.chip.generate_resampled(&mut sample);
            frame[0] = sample[0];
            frame[1] = sample[1];

            if self.playing {
                self.current_sample += 1;
            }
        }
    }
}
