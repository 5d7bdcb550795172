// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A FLAC decoder and encoder with seek-table-free seeking
//!
//! The decoder reconstructs PCM samples from a FLAC stream
//! one frame at a time, the encoder packages PCM samples
//! into FLAC frames, and the seekable decoder locates
//! any sample in a stream by binary-searching its frames.
//!
//! # Example
//!
//! ```
//! use flac_seek::{decode::Decoder, encode::{Encoder, EncodingOptions}};
//! use std::io::{Cursor, Seek};
//! use std::num::NonZero;
//!
//! let left = [100, 200, 300, 400];
//! let right = [100, 200, 300, 400];
//!
//! let mut flac = Cursor::new(vec![]);
//! let mut encoder = Encoder::new(
//!     &mut flac,
//!     EncodingOptions::default(),
//!     44100,
//!     16,
//!     NonZero::new(2).unwrap(),
//!     None,
//! ).unwrap();
//! encoder.encode(&[&left, &right]).unwrap();
//! encoder.finalize().unwrap();
//!
//! flac.rewind().unwrap();
//!
//! let mut decoder = Decoder::new(flac).unwrap();
//! let frame = decoder.read_frame().unwrap().unwrap();
//! assert_eq!(frame.channel(0), &left);
//! assert_eq!(frame.channel(1), &right);
//! assert!(decoder.read_frame().unwrap().is_none());
//! ```

pub mod audio;
pub mod crc;
pub mod decode;
pub mod encode;
pub mod metadata;
pub mod residual;
pub mod seek;
pub mod stereo;
pub mod stream;
pub mod subframe;

/// A broad category of [`Error`]
///
/// Only I/O errors make the underlying stream unusable;
/// everything else describes the bytes at the current position
/// and may be recovered from by resynchronizing elsewhere.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The stream violates the FLAC format
    Format,
    /// No frame sync code where one was expected
    Resync,
    /// A frame's CRC-8 or CRC-16 does not match its contents
    Checksum,
    /// The stream ended while more bits were expected
    EndOfData,
    /// An error from the underlying reader or writer
    Io,
}

/// A FLAC decoding or encoding error
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    UnexpectedEof,
    MissingFlacTag,
    MissingStreaminfo,
    MultipleStreaminfo,
    InvalidMetadataBlock,
    InvalidMetadataBlockSize,
    InvalidSyncCode,
    InvalidBlockSize,
    InvalidSampleRate,
    InvalidChannels,
    InvalidBitsPerSample,
    InvalidFrameNumber,
    ChannelsMismatch,
    BitsPerSampleMismatch,
    ReservedBit,
    Crc8Mismatch,
    Crc16Mismatch,
    Md5Mismatch,
    InvalidSubframeHeader,
    ExcessiveWastedBits,
    InvalidLpcPrecision,
    NegativeLpcShift,
    InvalidCodingMethod,
    InvalidPartitionOrder,
    ResidualOverflow,
    InvalidSeek,
    InvalidStereoMode,
    ExcessiveChannels,
    ExcessiveTotalSamples,
    SampleCountMismatch,
    SamplesLengthMismatch,
    SampleOutOfRange,
}

impl Error {
    /// Which broad category this error falls into
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::UnexpectedEof => ErrorKind::EndOfData,
            Self::InvalidSyncCode => ErrorKind::Resync,
            Self::Crc8Mismatch | Self::Crc16Mismatch | Self::Md5Mismatch => ErrorKind::Checksum,
            _ => ErrorKind::Format,
        }
    }

    /// Whether the stream may be resynchronized after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Io)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            _ => Self::Io(error),
        }
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::UnexpectedEof => "unexpected end of stream".fmt(f),
            Self::MissingFlacTag => "missing FLAC tag".fmt(f),
            Self::MissingStreaminfo => "STREAMINFO block not found".fmt(f),
            Self::MultipleStreaminfo => "multiple STREAMINFO blocks found in file".fmt(f),
            Self::InvalidMetadataBlock => "invalid metadata block".fmt(f),
            Self::InvalidMetadataBlockSize => "invalid metadata block size".fmt(f),
            Self::InvalidSyncCode => "invalid frame sync code".fmt(f),
            Self::InvalidBlockSize => "invalid frame block size".fmt(f),
            Self::InvalidSampleRate => "invalid frame sample rate".fmt(f),
            Self::InvalidChannels => "invalid frame channel assignment".fmt(f),
            Self::InvalidBitsPerSample => "invalid frame bits-per-sample".fmt(f),
            Self::InvalidFrameNumber => "invalid frame number".fmt(f),
            Self::ChannelsMismatch => "channel count does not match stream".fmt(f),
            Self::BitsPerSampleMismatch => "bits-per-sample does not match stream".fmt(f),
            Self::ReservedBit => "reserved bit set in frame header".fmt(f),
            Self::Crc8Mismatch => "frame header CRC-8 mismatch".fmt(f),
            Self::Crc16Mismatch => "frame CRC-16 mismatch".fmt(f),
            Self::Md5Mismatch => "decoded MD5 does not match STREAMINFO".fmt(f),
            Self::InvalidSubframeHeader => "invalid subframe header".fmt(f),
            Self::ExcessiveWastedBits => "wasted bits exceed subframe bits-per-sample".fmt(f),
            Self::InvalidLpcPrecision => "invalid LPC coefficient precision".fmt(f),
            Self::NegativeLpcShift => "negative LPC shift".fmt(f),
            Self::InvalidCodingMethod => "invalid residual coding method".fmt(f),
            Self::InvalidPartitionOrder => "invalid residual partition order".fmt(f),
            Self::ResidualOverflow => "residual value out of range".fmt(f),
            Self::InvalidSeek => "seek target beyond end of stream".fmt(f),
            Self::InvalidStereoMode => "stereo decorrelation requires 2 channels".fmt(f),
            Self::ExcessiveChannels => "channel count must be between 1 and 8".fmt(f),
            Self::ExcessiveTotalSamples => "too many samples for stream".fmt(f),
            Self::SampleCountMismatch => "samples written do not match total samples".fmt(f),
            Self::SamplesLengthMismatch => "channel buffers differ in length".fmt(f),
            Self::SampleOutOfRange => "sample does not fit bits-per-sample".fmt(f),
        }
    }
}

/// A writer which counts the bytes passing through it
pub(crate) struct Counter<W> {
    writer: W,
    pub count: u64,
}

impl<W> Counter<W> {
    pub(crate) fn new(writer: W) -> Self {
        Self { writer, count: 0 }
    }
}

impl<W: std::io::Write> std::io::Write for Counter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf).inspect(|written| {
            self.count += *written as u64;
        })
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod test {
    use super::{Error, ErrorKind};

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::InvalidSyncCode.kind(), ErrorKind::Resync);
        assert_eq!(Error::Crc16Mismatch.kind(), ErrorKind::Checksum);
        assert_eq!(Error::InvalidPartitionOrder.kind(), ErrorKind::Format);
        assert!(Error::Crc8Mismatch.is_recoverable());

        let eof: Error = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert_eq!(eof.kind(), ErrorKind::EndOfData);

        let io: Error = std::io::Error::other("device gone").into();
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(!io.is_recoverable());
    }
}
