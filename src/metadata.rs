// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For handling a FLAC file's metadata blocks
//!
//! A FLAC stream starts with the `fLaC` tag
//! followed by one or more metadata blocks.
//! Only the STREAMINFO block is needed for decoding;
//! all other blocks are skipped over by their length.

use crate::Error;
use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter, FromBitStream, ToBitStream};
use std::num::NonZero;

const FLAC_TAG: &[u8; 4] = b"fLaC";

/// A trait for indicating various pieces of FLAC stream metadata
///
/// This metadata is what an external container writer
/// needs in order to build its own header.
pub trait Metadata {
    /// Returns channel count
    ///
    /// From 1 to 8
    fn channel_count(&self) -> u8;

    /// Returns sample rate, in Hz
    fn sample_rate(&self) -> u32;

    /// Returns decoder's bits-per-sample
    ///
    /// From 1 to 32
    fn bits_per_sample(&self) -> u32;

    /// Returns total number of channel-independent samples, if known
    fn total_samples(&self) -> Option<u64> {
        None
    }

    /// Returns MD5 of entire stream, if known
    ///
    /// MD5 is always calculated in terms of little-endian,
    /// signed, byte-aligned values.
    fn md5(&self) -> Option<&[u8; 16]> {
        None
    }

    /// Returns duration of stream, if known
    fn duration(&self) -> Option<std::time::Duration> {
        const NANOS_PER_SEC: u64 = 1_000_000_000;

        let sample_rate = u64::from(self.sample_rate());

        self.total_samples()
            .filter(|_| sample_rate > 0)
            .map(|s| {
                std::time::Duration::new(
                    s / sample_rate,
                    u32::try_from(((s % sample_rate) * NANOS_PER_SEC) / sample_rate)
                        .unwrap_or_default(),
                )
            })
    }
}

/// A FLAC metadata block header
///
/// | Bits | Field | Meaning |
/// |-----:|------:|---------|
/// | 1    | `last` | final metadata block in file |
/// | 7    | `block_type` | type of block |
/// | 24   | `size` | block size, in bytes |
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    /// Whether we are the final block
    pub last: bool,
    /// Our block type, where 0 is STREAMINFO
    pub block_type: u8,
    /// Our block size, in bytes
    pub size: u32,
}

impl BlockHeader {
    const STREAMINFO: u8 = 0;
    const INVALID: u8 = 127;
}

impl FromBitStream for BlockHeader {
    type Error = Error;

    fn from_reader<R: BitRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        Ok(Self {
            last: r.read_bit()?,
            block_type: match r.read::<7, u8>()? {
                Self::INVALID => return Err(Error::InvalidMetadataBlock),
                block_type => block_type,
            },
            size: r.read::<24, u32>()?,
        })
    }
}

impl ToBitStream for BlockHeader {
    type Error = Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        w.write_bit(self.last)?;
        w.write::<7, u8>(self.block_type)?;
        w.write::<24, u32>(self.size)?;
        Ok(())
    }
}

/// A STREAMINFO metadata block
///
/// This block contains metadata about the stream's contents.
///
/// It must *always* be present in a FLAC file,
/// must *always* be the first metadata block in the stream,
/// and must *not* be present more than once.
///
/// | Bits | Field | Meaning |
/// |-----:|------:|---------|
/// | 16   | `minimum_block_size` | minimum block size (in samples) in the stream
/// | 16   | `maximum_block_size` | maximum block size (in samples) in the stream
/// | 24   | `minimum_frame_size` | minimum frame size (in bytes) in the stream
/// | 24   | `maximum_frame_size` | maximum frame size (in bytes) in the stream
/// | 20   | `sample_rate` | stream's sample rate, in Hz
/// | 3    | `channels` | stream's channel count (+1)
/// | 5    | `bits_per_sample` | stream's bits-per-sample (+1)
/// | 36   | `total_samples` | stream's total channel-independent samples
/// | 16×8 | `md5` | decoded stream's MD5 sum hash
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Streaminfo {
    /// The minimum block size (in samples) used in the stream,
    /// excluding the last block.
    pub minimum_block_size: u16,
    /// The maximum block size (in samples) used in the stream,
    /// excluding the last block.
    pub maximum_block_size: u16,
    /// The minimum framesize (in bytes) used in the stream.
    ///
    /// `None` indicates the value is unknown.
    pub minimum_frame_size: Option<NonZero<u32>>,
    /// The maximum framesize (in bytes) used in the stream.
    ///
    /// `None` indicates the value is unknown.
    pub maximum_frame_size: Option<NonZero<u32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels, from 1 to 8
    pub channels: NonZero<u8>,
    /// Number of bits-per-sample, from 1 to 32
    pub bits_per_sample: u32,
    /// Total number of interchannel samples in stream.
    ///
    /// `None` indicates the value is unknown.
    pub total_samples: Option<NonZero<u64>>,
    /// MD5 hash of unencoded audio data.
    ///
    /// `None` indicates the value is unknown.
    pub md5: Option<[u8; 16]>,
}

impl Streaminfo {
    /// The maximum size of a frame, in bytes (2²⁴ - 1)
    pub const MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

    /// The maximum sample rate, in Hz (2²⁰ - 1)
    pub const MAX_SAMPLE_RATE: u32 = (1 << 20) - 1;

    /// The maximum number of channels (8)
    pub const MAX_CHANNELS: u8 = 8;

    /// The maximum number of total samples (2³⁶ - 1)
    pub const MAX_TOTAL_SAMPLES: u64 = (1 << 36) - 1;

    /// Defined size of STREAMINFO block, in bytes
    pub const SIZE: u32 = 0x22;

    /// Returns the stream's block size if every block but the last shares it
    pub fn fixed_block_size(&self) -> Option<u16> {
        (self.minimum_block_size == self.maximum_block_size).then_some(self.maximum_block_size)
    }

    /// Returns the `fLaC` tag and this block as the only metadata block
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::with_capacity(FLAC_TAG.len() + 4 + Self::SIZE as usize);
        write_streaminfo(self, &mut bytes)?;
        Ok(bytes)
    }
}

impl Metadata for Streaminfo {
    fn channel_count(&self) -> u8 {
        self.channels.get()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn bits_per_sample(&self) -> u32 {
        self.bits_per_sample
    }

    fn total_samples(&self) -> Option<u64> {
        self.total_samples.map(|s| s.get())
    }

    fn md5(&self) -> Option<&[u8; 16]> {
        self.md5.as_ref()
    }
}

impl FromBitStream for Streaminfo {
    type Error = std::io::Error;

    fn from_reader<R: BitRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        Ok(Self {
            minimum_block_size: r.read::<16, _>()?,
            maximum_block_size: r.read::<16, _>()?,
            minimum_frame_size: NonZero::new(r.read::<24, u32>()?),
            maximum_frame_size: NonZero::new(r.read::<24, u32>()?),
            sample_rate: r.read::<20, _>()?,
            channels: NonZero::<u8>::MIN.saturating_add(r.read::<3, u8>()?),
            bits_per_sample: r.read::<5, u32>()? + 1,
            total_samples: NonZero::new(r.read::<36, u64>()?),
            md5: {
                let mut md5 = [0; 16];
                r.read_bytes(&mut md5)?;
                md5.iter().any(|b| *b != 0).then_some(md5)
            },
        })
    }
}

impl ToBitStream for Streaminfo {
    type Error = std::io::Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        w.write::<16, _>(self.minimum_block_size)?;
        w.write::<16, _>(self.maximum_block_size)?;
        w.write::<24, u32>(self.minimum_frame_size.map(|s| s.get()).unwrap_or(0))?;
        w.write::<24, u32>(self.maximum_frame_size.map(|s| s.get()).unwrap_or(0))?;
        w.write::<20, _>(self.sample_rate)?;
        w.write::<3, u8>(self.channels.get() - 1)?;
        w.write::<5, u32>(self.bits_per_sample - 1)?;
        w.write::<36, u64>(self.total_samples.map(|s| s.get()).unwrap_or(0))?;
        w.write_bytes(&self.md5.unwrap_or([0; 16]))?;
        Ok(())
    }
}

/// Reads the `fLaC` tag and all metadata blocks, returning STREAMINFO
///
/// The reader is left positioned at the start of the first frame.
/// Blocks other than STREAMINFO are skipped unread.
///
/// # Errors
///
/// Returns an error if the tag is missing, if STREAMINFO
/// is missing or duplicated, or if an I/O error occurs.
pub fn read_streaminfo<R: std::io::Read>(mut reader: R) -> Result<Streaminfo, Error> {
    use std::io::Read;

    let mut tag = [0; 4];
    reader.read_exact(&mut tag)?;
    if &tag != FLAC_TAG {
        return Err(Error::MissingFlacTag);
    }

    let mut streaminfo = None;

    loop {
        let header: BlockHeader = BitReader::endian(reader.by_ref(), BigEndian).parse()?;

        match header.block_type {
            BlockHeader::STREAMINFO => {
                if header.size != Streaminfo::SIZE {
                    return Err(Error::InvalidMetadataBlockSize);
                }
                if streaminfo.is_some() {
                    return Err(Error::MultipleStreaminfo);
                }
                streaminfo = Some(BitReader::endian(reader.by_ref(), BigEndian).parse()?);
            }
            _ => {
                let size = u64::from(header.size);
                if std::io::copy(&mut reader.by_ref().take(size), &mut std::io::sink())? != size {
                    return Err(Error::UnexpectedEof);
                }
            }
        }

        if header.last {
            break streaminfo.ok_or(Error::MissingStreaminfo);
        }
    }
}

/// Writes the `fLaC` tag and STREAMINFO as the stream's only metadata block
///
/// # Errors
///
/// Returns an error if any field is too large for its bit width
/// or if an I/O error occurs.
pub fn write_streaminfo<W: std::io::Write>(
    streaminfo: &Streaminfo,
    mut writer: W,
) -> Result<(), Error> {
    writer.write_all(FLAC_TAG)?;

    let mut w = BitWriter::endian(writer, BigEndian);
    w.build(&BlockHeader {
        last: true,
        block_type: BlockHeader::STREAMINFO,
        size: Streaminfo::SIZE,
    })?;
    w.build(streaminfo)?;
    Ok(())
}
