// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For handling common FLAC stream items
//!
//! A frame header looks like:
//!
//! | Bits | Field |
//! |-----:|-------|
//! | 14   | sync code (`0b11111111111110`) |
//! | 1    | reserved (0) |
//! | 1    | blocking strategy |
//! | 4    | block size code |
//! | 4    | sample rate code |
//! | 4    | channel assignment |
//! | 3    | bits-per-sample code |
//! | 1    | reserved (0) |
//! | 8-56 | frame or sample number, UTF-8 style |
//! | 0/8/16 | explicit block size |
//! | 0/8/16 | explicit sample rate |
//! | 8    | CRC-8 of all preceding header bytes |

use crate::Error;
use crate::crc::{Checksum, Crc8, CrcReader, CrcWriter};
use crate::metadata::Streaminfo;
use bitstream_io::{
    BigEndian, BitRead, BitReader, BitWrite, BitWriter, FromBitStreamWith, ToBitStream,
};

const SYNC_CODE: u16 = 0b11111111111110;

/// How a frame's position in the stream is numbered
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockingStrategy {
    /// Frames are numbered sequentially and share one block size
    Fixed,
    /// Frames are numbered by their first sample
    Variable,
}

/// How a frame's subframes map to output channels
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelAssignment {
    /// Each subframe is its own channel
    Independent(u8),
    /// Subframe 0 is left, subframe 1 is left minus right
    LeftSide,
    /// Subframe 0 is left minus right, subframe 1 is right
    SideRight,
    /// Subframe 0 is the average, subframe 1 is left minus right
    MidSide,
}

impl ChannelAssignment {
    /// Number of channels this assignment produces
    pub fn count(&self) -> u8 {
        match self {
            Self::Independent(c) => *c,
            Self::LeftSide | Self::SideRight | Self::MidSide => 2,
        }
    }

    /// Bits-per-sample of the given subframe
    ///
    /// Side channels need one bit more than the stream's
    /// bits-per-sample to hold the full range of differences.
    pub fn subframe_bits(&self, bits_per_sample: u32, subframe: usize) -> u32 {
        match (self, subframe) {
            (Self::LeftSide, 1) | (Self::SideRight, 0) | (Self::MidSide, 1) => bits_per_sample + 1,
            _ => bits_per_sample,
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::Independent(c) => c - 1,
            Self::LeftSide => 0b1000,
            Self::SideRight => 0b1001,
            Self::MidSide => 0b1010,
        }
    }
}

/// A FLAC frame header
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// How the frame is numbered
    pub blocking_strategy: BlockingStrategy,
    /// Samples per channel in the frame, from 1 to 65536
    pub block_size: u32,
    /// Sample rate, in Hz
    pub sample_rate: u32,
    /// The frame's channel assignment
    pub channel_assignment: ChannelAssignment,
    /// Bits-per-sample of the decoded channels
    pub bits_per_sample: u32,
    /// Frame number for fixed blocking, sample number for variable blocking
    pub number: u64,
}

impl FrameHeader {
    /// The largest frame number of a fixed-blocksize stream (31 bits)
    pub const MAX_FRAME_NUMBER: u64 = (1 << 31) - 1;

    /// The largest sample number of a variable-blocksize stream (36 bits)
    pub const MAX_SAMPLE_NUMBER: u64 = (1 << 36) - 1;

    /// Reads frame header from the given byte reader,
    /// including its trailing CRC-8
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSyncCode`] if the reader is not
    /// positioned at a frame, [`Error::Crc8Mismatch`] if the
    /// header's checksum is wrong, some other format error
    /// if a header field is invalid, or an I/O error.
    pub fn read<R: std::io::Read>(reader: R, streaminfo: &Streaminfo) -> Result<Self, Error> {
        let mut crc8: CrcReader<_, Crc8> = CrcReader::new(reader);

        let header = {
            let mut r = BitReader::endian(&mut crc8, BigEndian);
            let header = r.parse_with::<FrameHeader>(streaminfo)?;
            r.skip(8)?;
            header
        };

        match crc8.into_checksum().valid() {
            true => Ok(header),
            false => Err(Error::Crc8Mismatch),
        }
    }

    /// Writes frame header to the given byte writer,
    /// including its trailing CRC-8
    ///
    /// # Errors
    ///
    /// Returns an error if the header's number is out of range
    /// or an I/O error occurs.
    pub fn write<W: std::io::Write>(&self, writer: W) -> Result<(), Error> {
        use std::io::Write;

        let mut crc8: CrcWriter<_, Crc8> = CrcWriter::new(writer);
        BitWriter::endian(&mut crc8, BigEndian).build(self)?;
        let checksum = crc8.checksum().checksum();
        crc8.write_all(&[checksum])?;
        Ok(())
    }

    /// The absolute index of the frame's first sample
    ///
    /// Fixed-blocksize streams number their frames,
    /// so their position is the frame number multiplied
    /// by the stream's block size.
    pub fn sample_position(&self, streaminfo: &Streaminfo) -> u64 {
        match self.blocking_strategy {
            BlockingStrategy::Variable => self.number,
            BlockingStrategy::Fixed => {
                self.number
                    * u64::from(
                        streaminfo
                            .fixed_block_size()
                            .unwrap_or(streaminfo.maximum_block_size),
                    )
            }
        }
    }
}

impl FromBitStreamWith<'_> for FrameHeader {
    type Error = Error;
    type Context = Streaminfo;

    fn from_reader<R: BitRead + ?Sized>(
        r: &mut R,
        streaminfo: &Streaminfo,
    ) -> Result<Self, Self::Error> {
        if r.read::<14, u16>()? != SYNC_CODE {
            return Err(Error::InvalidSyncCode);
        }
        if r.read_bit()? {
            return Err(Error::ReservedBit);
        }
        let blocking_strategy = match r.read_bit()? {
            false => BlockingStrategy::Fixed,
            true => BlockingStrategy::Variable,
        };
        let encoded_block_size = r.read::<4, u8>()?;
        let encoded_sample_rate = r.read::<4, u8>()?;
        let encoded_channels = r.read::<4, u8>()?;
        let encoded_bps = r.read::<3, u8>()?;
        if r.read_bit()? {
            return Err(Error::ReservedBit);
        }

        let number = read_utf8(r)?;
        if number
            > match blocking_strategy {
                BlockingStrategy::Fixed => Self::MAX_FRAME_NUMBER,
                BlockingStrategy::Variable => Self::MAX_SAMPLE_NUMBER,
            }
        {
            return Err(Error::InvalidFrameNumber);
        }

        let block_size = match encoded_block_size {
            0b0000 => return Err(Error::InvalidBlockSize),
            0b0001 => 192,
            v @ 0b0010..=0b0101 => 576 << (v - 2),
            0b0110 => r.read::<8, u32>()? + 1,
            0b0111 => r.read::<16, u32>()? + 1,
            v => 256 << (v - 8),
        };

        let sample_rate = match encoded_sample_rate {
            0b0000 => streaminfo.sample_rate,
            0b0001 => 88200,
            0b0010 => 176400,
            0b0011 => 192000,
            0b0100 => 8000,
            0b0101 => 16000,
            0b0110 => 22050,
            0b0111 => 24000,
            0b1000 => 32000,
            0b1001 => 44100,
            0b1010 => 48000,
            0b1011 => 96000,
            0b1100 => r.read::<8, u32>()? * 1000,
            0b1101 => r.read::<16, u32>()?,
            0b1110 => r.read::<16, u32>()? * 10,
            _ => return Err(Error::InvalidSampleRate),
        };

        let channel_assignment = match encoded_channels {
            c @ 0b0000..=0b0111 => ChannelAssignment::Independent(c + 1),
            0b1000 => ChannelAssignment::LeftSide,
            0b1001 => ChannelAssignment::SideRight,
            0b1010 => ChannelAssignment::MidSide,
            _ => return Err(Error::InvalidChannels),
        };
        if channel_assignment.count() != streaminfo.channels.get() {
            return Err(Error::ChannelsMismatch);
        }

        let bits_per_sample = match encoded_bps {
            0b000 => streaminfo.bits_per_sample,
            0b001 => 8,
            0b010 => 12,
            0b100 => 16,
            0b101 => 20,
            0b110 => 24,
            0b111 => 32,
            _ => return Err(Error::InvalidBitsPerSample),
        };
        if bits_per_sample != streaminfo.bits_per_sample {
            return Err(Error::BitsPerSampleMismatch);
        }

        Ok(Self {
            blocking_strategy,
            block_size,
            sample_rate,
            channel_assignment,
            bits_per_sample,
            number,
        })
    }
}

impl ToBitStream for FrameHeader {
    type Error = Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        let (encoded_block_size, explicit_block_size) = match self.block_size {
            192 => (0b0001, None),
            576 => (0b0010, None),
            1152 => (0b0011, None),
            2304 => (0b0100, None),
            4608 => (0b0101, None),
            256 => (0b1000, None),
            512 => (0b1001, None),
            1024 => (0b1010, None),
            2048 => (0b1011, None),
            4096 => (0b1100, None),
            8192 => (0b1101, None),
            16384 => (0b1110, None),
            32768 => (0b1111, None),
            size @ 1..=65536 => (0b0111, Some(size - 1)),
            _ => return Err(Error::InvalidBlockSize),
        };

        let (encoded_sample_rate, explicit_sample_rate) = match self.sample_rate {
            88200 => (0b0001, None),
            176400 => (0b0010, None),
            192000 => (0b0011, None),
            8000 => (0b0100, None),
            16000 => (0b0101, None),
            22050 => (0b0110, None),
            24000 => (0b0111, None),
            32000 => (0b1000, None),
            44100 => (0b1001, None),
            48000 => (0b1010, None),
            96000 => (0b1011, None),
            rate if rate % 1000 == 0 && rate / 1000 <= 0xFF => (0b1100, Some((8, rate / 1000))),
            rate if rate <= 0xFFFF => (0b1101, Some((16, rate))),
            rate if rate % 10 == 0 && rate / 10 <= 0xFFFF => (0b1110, Some((16, rate / 10))),
            _ => (0b0000, None),
        };

        let encoded_bps = match self.bits_per_sample {
            8 => 0b001,
            12 => 0b010,
            16 => 0b100,
            20 => 0b101,
            24 => 0b110,
            32 => 0b111,
            _ => 0b000,
        };

        if self.number
            > match self.blocking_strategy {
                BlockingStrategy::Fixed => Self::MAX_FRAME_NUMBER,
                BlockingStrategy::Variable => Self::MAX_SAMPLE_NUMBER,
            }
        {
            return Err(Error::InvalidFrameNumber);
        }

        w.write::<14, u16>(SYNC_CODE)?;
        w.write_bit(false)?;
        w.write_bit(self.blocking_strategy == BlockingStrategy::Variable)?;
        w.write::<4, u8>(encoded_block_size)?;
        w.write::<4, u8>(encoded_sample_rate)?;
        w.write::<4, u8>(self.channel_assignment.code())?;
        w.write::<3, u8>(encoded_bps)?;
        w.write_bit(false)?;
        write_utf8(w, self.number)?;
        if let Some(size) = explicit_block_size {
            w.write::<16, u32>(size)?;
        }
        match explicit_sample_rate {
            Some((8, rate)) => w.write::<8, u32>(rate)?,
            Some((_, rate)) => w.write::<16, u32>(rate)?,
            None => {}
        }
        Ok(())
    }
}

fn read_utf8<R: BitRead + ?Sized>(r: &mut R) -> Result<u64, Error> {
    match r.read_unary::<0>()? {
        0 => Ok(r.read::<7, _>()?),
        bytes @ 2..=7 => {
            let mut number: u64 = match bytes {
                7 => 0,
                _ => r.read_var(7 - bytes)?,
            };
            for _ in 1..bytes {
                match r.read::<2, u8>()? {
                    0b10 => {
                        number = number << 6 | r.read::<6, u64>()?;
                    }
                    _ => return Err(Error::InvalidFrameNumber),
                }
            }
            Ok(number)
        }
        _ => Err(Error::InvalidFrameNumber),
    }
}

fn write_utf8<W: BitWrite + ?Sized>(w: &mut W, number: u64) -> Result<(), Error> {
    if number < 0x80 {
        w.write::<8, u64>(number)?;
        return Ok(());
    }

    // an n byte value holds 5n + 1 bits
    let bytes = (2..=7u32)
        .find(|n| number < 1 << (5 * n + 1))
        .ok_or(Error::InvalidFrameNumber)?;

    w.write_unary::<0>(bytes)?;
    if bytes < 7 {
        w.write_var(7 - bytes, number >> (6 * (bytes - 1)))?;
    }
    for i in (0..bytes - 1).rev() {
        w.write::<2, u8>(0b10)?;
        w.write::<6, u64>((number >> (6 * i)) & 0x3F)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{BlockingStrategy, ChannelAssignment, FrameHeader};
    use crate::Error;
    use crate::metadata::Streaminfo;
    use std::num::NonZero;

    fn streaminfo(channels: u8, bits_per_sample: u32) -> Streaminfo {
        Streaminfo {
            minimum_block_size: 4096,
            maximum_block_size: 4096,
            minimum_frame_size: None,
            maximum_frame_size: None,
            sample_rate: 44100,
            channels: NonZero::new(channels).unwrap(),
            bits_per_sample,
            total_samples: None,
            md5: None,
        }
    }

    fn header(block_size: u32, sample_rate: u32, number: u64) -> FrameHeader {
        FrameHeader {
            blocking_strategy: BlockingStrategy::Fixed,
            block_size,
            sample_rate,
            channel_assignment: ChannelAssignment::MidSide,
            bits_per_sample: 16,
            number,
        }
    }

    #[test]
    fn test_known_header() {
        // fixed blocking, 4096 samples, 44.1kHz, mid/side, 16 bps, frame 0
        let mut bytes = vec![];
        header(4096, 44100, 0).write(&mut bytes).unwrap();
        assert_eq!(&bytes[0..5], &[0xFF, 0xF8, 0xC9, 0xA8, 0x00]);
        assert_eq!(bytes.len(), 6);

        assert_eq!(
            FrameHeader::read(bytes.as_slice(), &streaminfo(2, 16)).unwrap(),
            header(4096, 44100, 0)
        );
    }

    #[test]
    fn test_explicit_8bit_block_size() {
        use crate::crc::{Checksum, Crc8};

        fn with_crc8(mut bytes: Vec<u8>) -> Vec<u8> {
            let mut crc8 = Crc8::default();
            crc8.update(&bytes);
            bytes.push(crc8.checksum());
            bytes
        }

        let streaminfo = streaminfo(1, 16);

        // 8-bit block size, sample rate in kHz
        let bytes = with_crc8(vec![0xFF, 0xF8, 0x6C, 0x08, 0x00, 0x03, 0x30]);
        let mut reader = bytes.as_slice();
        let header = FrameHeader::read(&mut reader, &streaminfo).unwrap();
        assert!(reader.is_empty());
        assert_eq!(
            header,
            FrameHeader {
                blocking_strategy: BlockingStrategy::Fixed,
                block_size: 4,
                sample_rate: 48000,
                channel_assignment: ChannelAssignment::Independent(1),
                bits_per_sample: 16,
                number: 0,
            }
        );

        // 8-bit block size, sample rate in tens of Hz
        let bytes = with_crc8(vec![0xFF, 0xF8, 0x6E, 0x08, 0x00, 0xFF, 0x12, 0xC0]);
        let header = FrameHeader::read(bytes.as_slice(), &streaminfo).unwrap();
        assert_eq!(header.block_size, 256);
        assert_eq!(header.sample_rate, 48000);

        // a bad CRC-8 still fails
        let mut bytes = bytes;
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            FrameHeader::read(bytes.as_slice(), &streaminfo),
            Err(Error::Crc8Mismatch)
        ));
    }

    #[test]
    fn test_header_fields() {
        let streaminfo = streaminfo(2, 16);

        for block_size in [1, 192, 193, 576, 4096, 4608, 32768, 65535, 65536] {
            for sample_rate in [44100, 11025, 50000, 96000, 100000, 654321] {
                for number in [0, 0x7F, 0x80, 0x7FF, 0x800, 0xFFFF, 0x1FFFFF, (1 << 31) - 1] {
                    let mut bytes = vec![];
                    header(block_size, sample_rate, number)
                        .write(&mut bytes)
                        .unwrap();

                    let mut reader = bytes.as_slice();
                    let mut parsed = FrameHeader::read(&mut reader, &streaminfo).unwrap();
                    assert!(reader.is_empty());

                    // rates with no header code come from STREAMINFO
                    if sample_rate == 654321 {
                        assert_eq!(parsed.sample_rate, 44100);
                        parsed.sample_rate = sample_rate;
                    }
                    assert_eq!(parsed, header(block_size, sample_rate, number));
                }
            }
        }
    }

    #[test]
    fn test_sample_numbers() {
        let streaminfo = streaminfo(2, 16);

        for number in [0, 1 << 30, 1 << 31, (1 << 36) - 1] {
            let header = FrameHeader {
                blocking_strategy: BlockingStrategy::Variable,
                ..header(4096, 44100, number)
            };
            let mut bytes = vec![];
            header.write(&mut bytes).unwrap();
            let parsed = FrameHeader::read(bytes.as_slice(), &streaminfo).unwrap();
            assert_eq!(parsed.sample_position(&streaminfo), number);
        }

        // frame numbers must fit in 31 bits
        let mut bytes = vec![];
        assert!(matches!(
            header(4096, 44100, 1 << 31).write(&mut bytes),
            Err(Error::InvalidFrameNumber)
        ));

        assert_eq!(
            header(4096, 44100, 3).sample_position(&streaminfo),
            3 * 4096
        );
    }

    #[test]
    fn test_invalid_headers() {
        let streaminfo = streaminfo(2, 16);
        let mut bytes = vec![];
        header(4096, 44100, 0).write(&mut bytes).unwrap();

        let mut bad_sync = bytes.clone();
        bad_sync[1] = 0xF0;
        assert!(matches!(
            FrameHeader::read(bad_sync.as_slice(), &streaminfo),
            Err(Error::InvalidSyncCode)
        ));

        let mut bad_crc = bytes.clone();
        bad_crc[5] ^= 1;
        assert!(matches!(
            FrameHeader::read(bad_crc.as_slice(), &streaminfo),
            Err(Error::Crc8Mismatch)
        ));

        assert!(matches!(
            FrameHeader::read(bytes.as_slice(), &self::streaminfo(2, 24)),
            Err(Error::BitsPerSampleMismatch)
        ));

        assert!(matches!(
            FrameHeader::read(bytes.as_slice(), &self::streaminfo(1, 16)),
            Err(Error::ChannelsMismatch)
        ));

        assert!(matches!(
            FrameHeader::read(&bytes[0..3], &streaminfo),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn test_subframe_bits() {
        assert_eq!(ChannelAssignment::Independent(2).subframe_bits(16, 1), 16);
        assert_eq!(ChannelAssignment::LeftSide.subframe_bits(16, 0), 16);
        assert_eq!(ChannelAssignment::LeftSide.subframe_bits(16, 1), 17);
        assert_eq!(ChannelAssignment::SideRight.subframe_bits(16, 0), 17);
        assert_eq!(ChannelAssignment::SideRight.subframe_bits(16, 1), 16);
        assert_eq!(ChannelAssignment::MidSide.subframe_bits(16, 0), 16);
        assert_eq!(ChannelAssignment::MidSide.subframe_bits(16, 1), 17);
    }
}
