//! H.264 NAL unit inspection
//!
//! Payloads are Annex-B byte streams (`00 00 01` / `00 00 00 01` start
//! codes). A payload without any start code is treated as one bare NAL unit.

use bytes::{BufMut, Bytes, BytesMut};

/// Coded slice of an IDR picture
pub const NALU_TYPE_IDR: u8 = 5;
/// Sequence parameter set
pub const NALU_TYPE_SPS: u8 = 7;
/// Picture parameter set
pub const NALU_TYPE_PPS: u8 = 8;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Type of a NAL unit, from the low five bits of its header byte
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|header| header & 0x1F)
}

/// Iterator over the NAL units of an Annex-B payload
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> NalUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let pos = match find_start_code(data, 0) {
            Some((_, after)) => after,
            // No start code at all: bare NAL unit
            None => 0,
        };
        Self { data, pos }
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        while self.pos < self.data.len() {
            let start = self.pos;
            let end = match find_start_code(self.data, start) {
                Some((code_at, after)) => {
                    self.pos = after;
                    code_at
                }
                None => {
                    self.pos = self.data.len();
                    self.data.len()
                }
            };

            let nal = trim_trailing_zeros(&self.data[start..end]);
            if !nal.is_empty() {
                return Some(nal);
            }
        }
        None
    }
}

/// Split a payload into NAL units
pub fn nal_units(payload: &[u8]) -> NalUnits<'_> {
    NalUnits::new(payload)
}

/// True if the access unit contains an IDR slice
pub fn is_keyframe(payload: &[u8]) -> bool {
    nal_units(payload).any(|nal| nal_unit_type(nal) == Some(NALU_TYPE_IDR))
}

/// True if the access unit contains any coded slice (types 1-5)
pub fn has_picture_data(payload: &[u8]) -> bool {
    nal_units(payload).any(|nal| matches!(nal_unit_type(nal), Some(1..=5)))
}

/// Collect in-band SPS and PPS units as an Annex-B config blob.
///
/// Returns `None` unless both parameter sets are present.
pub fn parameter_sets(payload: &[u8]) -> Option<Bytes> {
    let mut config = BytesMut::new();
    let mut has_sps = false;
    let mut has_pps = false;

    for nal in nal_units(payload) {
        match nal_unit_type(nal) {
            Some(NALU_TYPE_SPS) => has_sps = true,
            Some(NALU_TYPE_PPS) => has_pps = true,
            _ => continue,
        }
        config.put_slice(&START_CODE);
        config.put_slice(nal);
    }

    (has_sps && has_pps).then(|| config.freeze())
}

/// Find the next three-byte start code at or after `from`.
///
/// Returns (index of the code, index just past it).
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    if data.len() < 3 {
        return None;
    }
    (from..=data.len() - 3)
        .find(|&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
        .map(|i| (i, i + 3))
}

fn trim_trailing_zeros(nal: &[u8]) -> &[u8] {
    let end = nal.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &nal[..end]
}
