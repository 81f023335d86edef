//! Test-only `OplChip` double that records writes instead of synthesizing audio.

use crate::chip::OplChip;

#[derive(Debug, Default)]
pub struct StubChip {
    pub writes: Vec<(u16, u8)>,
    pub reset_sample_rate: Option<u32>,
}

impl OplChip for StubChip {
    fn reset(&mut self, sample_rate: u32) {
        self.reset_sample_rate = Some(sample_rate);
    }

    fn write_reg(&mut self, addr: u16, value: u8) {
        self.writes.push((addr, value));
    }

    fn generate_resampled(&mut self, out: &mut [i16; 2]) {
        out[0] = 0;
        out[1] = 0;
    }
}
