//! Decoder backends for the mirroring client
//!
//! Provides one capability interface over interchangeable backends:
//! - Passthrough (encoded access units handed to an external player)
//! - OpenH264 (software H.264)
//! - Native (platform decoder, when one is compiled in)
//!
//! `MediaPipeline` sits in front of the active backend and gates frames on
//! codec configuration.

mod error;
mod openh264_decoder;
mod passthrough;
mod pipeline;
mod traits;

pub use error::*;
pub use openh264_decoder::*;
pub use passthrough::*;
pub use pipeline::*;
pub use traits::*;

/// Samples per AAC access unit
pub const AAC_SAMPLES_PER_FRAME: u64 = 1024;

/// Create the decoder backend selected by `kind`
pub fn create_decoder(kind: DecoderKind, sink: FrameSink) -> DecoderResult<Box<dyn DecoderAdapter>> {
    match kind {
        DecoderKind::Passthrough => Ok(Box::new(PassthroughDecoder::new(sink))),
        DecoderKind::Software => Ok(Box::new(OpenH264Decoder::new(sink)?)),
        // No platform decoder is compiled into this build
        DecoderKind::Native => Err(DecoderError::UnsupportedBackend(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_backend_is_unsupported() {
        let (sink, _frames) = frame_channel();
        assert!(matches!(
            create_decoder(DecoderKind::Native, sink),
            Err(DecoderError::UnsupportedBackend(DecoderKind::Native))
        ));
    }

    #[test]
    fn test_factory_reports_kind() {
        let (sink, _frames) = frame_channel();
        let decoder = create_decoder(DecoderKind::Passthrough, sink).unwrap();
        assert_eq!(decoder.kind(), DecoderKind::Passthrough);
    }
}
