// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For decoding FLAC files to PCM samples

use crate::Error;
use crate::audio::Frame;
use crate::metadata::{Metadata, Streaminfo, read_streaminfo};
use arrayvec::ArrayVec;
use log::{trace, warn};
use std::io::Read;

/// A FLAC decoder
pub struct Decoder<R> {
    reader: R,
    streaminfo: Streaminfo,
    // running MD5 of decoded samples, if it's still verifiable
    md5: Option<md5::Context>,
    samples_read: u64,
    // whether the last frame failed, leaving us at an unknown position
    resync: bool,
}

impl<R: Read> Decoder<R> {
    /// Builds a new FLAC decoder from the given stream
    ///
    /// This assumes the stream is positioned at the start
    /// of the file.
    ///
    /// # Errors
    ///
    /// Returns an error of the initial FLAC metadata
    /// is invalid or an I/O error occurs reading
    /// the initial metadata.
    pub fn new(mut reader: R) -> Result<Self, Error> {
        let streaminfo = read_streaminfo(reader.by_ref())?;

        Ok(Self {
            md5: streaminfo.md5.map(|_| md5::Context::new()),
            reader,
            streaminfo,
            samples_read: 0,
            resync: false,
        })
    }

    /// Returns the stream's STREAMINFO block
    #[inline]
    pub fn streaminfo(&self) -> &Streaminfo {
        &self.streaminfo
    }

    /// Returns the underlying reader
    #[inline]
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Returns the underlying reader
    #[inline]
    pub(crate) fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Stops verifying the stream's MD5 sum
    ///
    /// Once frames have been skipped, the sum can't match.
    pub(crate) fn disable_md5(&mut self) {
        self.md5 = None;
    }

    /// Reads the next whole FLAC frame
    ///
    /// Returns `None` once the stream ends cleanly at a frame boundary.
    /// At that point, if every frame has been decoded in order,
    /// the decoded samples are checked against STREAMINFO's MD5 sum.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs when reading
    /// the stream, or if the stream data is invalid.
    /// Any error other than an I/O error is confined to one frame;
    /// the following call skips ahead to the next frame sync code,
    /// so decoding may continue from there.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, Error> {
        let start: ArrayVec<u8, 2> = if std::mem::take(&mut self.resync) {
            match skip_to_sync(self.reader.by_ref())? {
                Some((skipped, sync)) => {
                    trace!("skipped {} bytes to next frame", skipped - 2);
                    ArrayVec::from(sync)
                }
                None => return self.finish().map(|()| None),
            }
        } else {
            let mut first = [0; 1];
            loop {
                match self.reader.read(&mut first) {
                    Ok(0) => return self.finish().map(|()| None),
                    Ok(_) => break first.into_iter().collect(),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        match decode_frame(start.as_slice().chain(self.reader.by_ref()), &self.streaminfo) {
            Ok(frame) => {
                self.samples_read += frame.pcm_frames() as u64;
                if let Some(md5) = &mut self.md5 {
                    let mut bytes = Vec::new();
                    frame.to_le_bytes(&mut bytes);
                    md5.consume(&bytes);
                }
                Ok(Some(frame))
            }
            Err(err) => {
                match err {
                    Error::Crc8Mismatch => {
                        warn!("CRC-8 mismatch in frame header after sample {}", self.samples_read)
                    }
                    Error::Crc16Mismatch => {
                        warn!("CRC-16 mismatch in frame after sample {}", self.samples_read)
                    }
                    _ => { /* not a checksum failure */ }
                }
                self.md5 = None;
                self.resync = err.is_recoverable();
                Err(err)
            }
        }
    }

    /// Decodes a frame at the reader's current position,
    /// without end-of-stream handling or MD5 tracking
    pub(crate) fn decode_frame(&mut self) -> Result<Frame, Error> {
        decode_frame(self.reader.by_ref(), &self.streaminfo)
    }

    fn finish(&mut self) -> Result<(), Error> {
        let Some(md5) = self.md5.take() else {
            return Ok(());
        };

        if let Some(total) = self.streaminfo.total_samples {
            if total.get() != self.samples_read {
                warn!(
                    "stream ended after {} of {} samples",
                    self.samples_read,
                    total.get()
                );
                return Ok(());
            }
        }

        match self.streaminfo.md5 {
            Some(expected) if md5.compute().0 != expected => Err(Error::Md5Mismatch),
            _ => Ok(()),
        }
    }
}

impl<R> Metadata for Decoder<R> {
    fn channel_count(&self) -> u8 {
        self.streaminfo.channel_count()
    }

    fn sample_rate(&self) -> u32 {
        self.streaminfo.sample_rate()
    }

    fn bits_per_sample(&self) -> u32 {
        self.streaminfo.bits_per_sample()
    }

    fn total_samples(&self) -> Option<u64> {
        self.streaminfo.total_samples()
    }

    fn md5(&self) -> Option<&[u8; 16]> {
        self.streaminfo.md5()
    }
}

impl<R: Read> Iterator for Decoder<R> {
    type Item = Result<Frame, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_frame().transpose()
    }
}

/// Decodes a single frame from the given reader
///
/// The reader must be positioned at the frame's sync code
/// and is left positioned just past its CRC-16.
///
/// # Errors
///
/// Returns an error if the frame is invalid,
/// its CRC-16 doesn't match, or an I/O error occurs.
pub fn decode_frame<R: Read>(reader: R, streaminfo: &Streaminfo) -> Result<Frame, Error> {
    use crate::crc::{Checksum, Crc16, CrcReader};
    use crate::stereo::decorrelate;
    use crate::stream::FrameHeader;
    use crate::subframe::read_subframe;
    use bitstream_io::{BigEndian, BitRead, BitReader};

    let mut crc16_reader: CrcReader<_, Crc16> = CrcReader::new(reader);
    let header = FrameHeader::read(crc16_reader.by_ref(), streaminfo)?;
    let position = header.sample_position(streaminfo);
    let block_size = header.block_size as usize;

    trace!(
        "frame at sample {position}: {} samples, {:?}",
        header.block_size, header.channel_assignment
    );

    let mut reader = BitReader::endian(crc16_reader.by_ref(), BigEndian);

    let mut channels = (0..header.channel_assignment.count())
        .map(|_| vec![0; block_size])
        .collect::<Vec<_>>();

    for (subframe, channel) in channels.iter_mut().enumerate() {
        read_subframe(
            &mut reader,
            header
                .channel_assignment
                .subframe_bits(header.bits_per_sample, subframe),
            channel,
        )?;
    }

    reader.byte_align();
    reader.skip(16)?; // CRC-16 checksum

    if !crc16_reader.into_checksum().valid() {
        return Err(Error::Crc16Mismatch);
    }

    if let [subframe0, subframe1] = channels.as_mut_slice() {
        decorrelate(header.channel_assignment, subframe0, subframe1);
    }

    Ok(Frame::from_channels(
        channels
            .into_iter()
            .map(|channel| channel.into_iter().map(|s| s as i32)),
        block_size,
        header.bits_per_sample,
        header.sample_rate,
        position,
    ))
}

/// Consumes bytes up to and including the next frame sync code
///
/// A sync is `0xFF` followed by `0xF8` or `0xF9`,
/// for fixed and variable blocking respectively.
/// Returns the total bytes consumed along with the sync's two bytes,
/// or `None` if the stream ends first.
pub(crate) fn skip_to_sync<R: Read>(reader: R) -> Result<Option<(u64, [u8; 2])>, Error> {
    let mut previous = None;
    for (consumed, byte) in (1..).zip(reader.bytes()) {
        let byte = byte?;
        if previous == Some(0xFF) && byte & 0xFE == 0xF8 {
            return Ok(Some((consumed, [0xFF, byte])));
        }
        previous = Some(byte);
    }

    Ok(None)
}
