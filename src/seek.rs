// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For locating samples in FLAC streams without a SEEKTABLE
//!
//! Frames carry their own position in their headers,
//! so a frame found anywhere in the stream tells us
//! which side of it a given sample lies.
//! We binary-search the stream's bytes for frames,
//! then decode linearly once the range is small enough.

use crate::Error;
use crate::audio::Frame;
use crate::decode::{Decoder, skip_to_sync};
use crate::metadata::{Metadata, Streaminfo};
use log::{debug, trace};
use std::io::{BufReader, Read, Seek, SeekFrom};

/// A FLAC decoder which can seek to any sample
pub struct SeekableDecoder<R> {
    decoder: Decoder<R>,
    // offset of the first frame
    frames_start: u64,
    // total length of the stream, in bytes
    frames_end: u64,
    search_threshold: u64,
}

impl<R: Read + Seek> SeekableDecoder<R> {
    /// Default size of byte range at which searching
    /// switches to linear decoding
    pub const SEARCH_THRESHOLD: u64 = 100_000;

    /// Builds a new seekable decoder from the given stream
    ///
    /// This assumes the stream is positioned at the start
    /// of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial FLAC metadata is invalid
    /// or an I/O error occurs.
    pub fn new(reader: R) -> Result<Self, Error> {
        let mut decoder = Decoder::new(reader)?;
        let reader = decoder.get_mut();
        let frames_start = reader.stream_position()?;
        let frames_end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(frames_start))?;

        Ok(Self {
            decoder,
            frames_start,
            frames_end,
            search_threshold: Self::SEARCH_THRESHOLD,
        })
    }

    /// Assigns the byte range size at which searching
    /// switches to linear decoding
    pub fn search_threshold(self, search_threshold: u64) -> Self {
        Self {
            search_threshold,
            ..self
        }
    }

    /// Returns the stream's STREAMINFO block
    #[inline]
    pub fn streaminfo(&self) -> &Streaminfo {
        self.decoder.streaminfo()
    }

    /// Returns the underlying reader
    #[inline]
    pub fn into_inner(self) -> R {
        self.decoder.into_inner()
    }

    /// Reads the next whole FLAC frame
    ///
    /// After a seek, this continues with the frame
    /// following the one returned.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs when reading
    /// the stream, or if the stream data is invalid.
    #[inline]
    pub fn read_frame(&mut self) -> Result<Option<Frame>, Error> {
        self.decoder.read_frame()
    }

    /// Returns the frame containing the given sample
    ///
    /// The frame's `sample_position()` is at or before `target`,
    /// so the caller may need to skip some of its leading samples.
    /// MD5 verification of the stream is no longer possible
    /// after seeking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSeek`] if `target` is beyond
    /// the end of the stream, an error if the frames being
    /// decoded linearly are invalid, or an I/O error.
    pub fn seek(&mut self, target: u64) -> Result<Frame, Error> {
        if self.decoder.total_samples().is_some_and(|total| target >= total) {
            return Err(Error::InvalidSeek);
        }

        self.decoder.disable_md5();

        let (mut start, mut end) = (self.frames_start, self.frames_end);

        while end.saturating_sub(start) > self.search_threshold {
            let middle = start + (end - start) / 2;

            match self.next_frame(middle)? {
                Some((offset, frame)) if frame.sample_position() <= target => {
                    debug!(
                        "probe at byte {middle} found sample {} at byte {offset}",
                        frame.sample_position()
                    );
                    if target < frame.sample_position() + frame.pcm_frames() as u64 {
                        debug!("seek to sample {target} found frame at byte {offset}");
                        return Ok(frame);
                    }
                    // the following frame starts where this one ends
                    start = self.decoder.get_mut().stream_position()?;
                }
                Some((offset, frame)) => {
                    debug!(
                        "probe at byte {middle} found sample {} at byte {offset}",
                        frame.sample_position()
                    );
                    end = middle;
                }
                None => {
                    debug!("probe at byte {middle} found no frame");
                    end = middle;
                }
            }
        }

        self.decoder.get_mut().seek(SeekFrom::Start(start))?;

        loop {
            match self.decoder.read_frame()? {
                Some(frame) if target < frame.sample_position() + frame.pcm_frames() as u64 => {
                    debug!(
                        "seek to sample {target} found frame at sample {}",
                        frame.sample_position()
                    );
                    break Ok(frame);
                }
                Some(_) => { /* keep decoding */ }
                None => break Err(Error::InvalidSeek),
            }
        }
    }

    /// Finds the first decodable frame at or after the given offset
    ///
    /// Returns the frame's offset and the frame itself,
    /// leaving the reader positioned after the frame.
    fn next_frame(&mut self, mut offset: u64) -> Result<Option<(u64, Frame)>, Error> {
        while let Some(candidate) = find_sync(self.decoder.get_mut(), offset)? {
            self.decoder.get_mut().seek(SeekFrom::Start(candidate))?;

            match self.decoder.decode_frame() {
                Ok(frame) => return Ok(Some((candidate, frame))),
                Err(err) if err.is_recoverable() => {
                    trace!("no frame at byte {candidate}: {err}");
                    offset = candidate + 2;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(None)
    }
}

impl<R> Metadata for SeekableDecoder<R> {
    fn channel_count(&self) -> u8 {
        self.decoder.channel_count()
    }

    fn sample_rate(&self) -> u32 {
        self.decoder.sample_rate()
    }

    fn bits_per_sample(&self) -> u32 {
        self.decoder.bits_per_sample()
    }

    fn total_samples(&self) -> Option<u64> {
        self.decoder.total_samples()
    }

    fn md5(&self) -> Option<&[u8; 16]> {
        self.decoder.md5()
    }
}

/// Returns the offset of the next frame sync at or after `offset`
fn find_sync<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Option<u64>, Error> {
    reader.seek(SeekFrom::Start(offset))?;

    Ok(skip_to_sync(BufReader::new(reader))?.map(|(consumed, _)| offset + consumed - 2))
}
