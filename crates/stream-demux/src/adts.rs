//! ADTS header parsing for legacy AAC packets

/// Sampling frequency index values 13-15 are reserved/escape
const MAX_SAMPLING_FREQUENCY_INDEX: u8 = 12;

/// Fixed part of an ADTS frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// MPEG-4 audio object type minus one
    pub profile: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    /// 7 bytes, or 9 when a CRC follows
    pub header_len: usize,
    /// Frame length including the header
    pub frame_len: usize,
}

impl AdtsHeader {
    /// Parse the header at the start of `data`
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 7 {
            return None;
        }
        if data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return None;
        }

        let protection_absent = data[1] & 0x01 == 1;
        let profile = data[2] >> 6;
        let sampling_frequency_index = (data[2] >> 2) & 0x0F;
        let channel_configuration = ((data[2] & 0x01) << 2) | (data[3] >> 6);
        let frame_len = ((data[3] as usize & 0x03) << 11)
            | ((data[4] as usize) << 3)
            | (data[5] as usize >> 5);

        if sampling_frequency_index > MAX_SAMPLING_FREQUENCY_INDEX {
            return None;
        }

        Some(Self {
            profile,
            sampling_frequency_index,
            channel_configuration,
            header_len: if protection_absent { 7 } else { 9 },
            frame_len,
        })
    }

    /// Two-byte MPEG-4 AudioSpecificConfig equivalent to this header
    pub fn audio_specific_config(&self) -> [u8; 2] {
        let object_type = u16::from(self.profile) + 1;
        let config = (object_type << 11)
            | (u16::from(self.sampling_frequency_index) << 7)
            | (u16::from(self.channel_configuration) << 3);
        config.to_be_bytes()
    }
}
