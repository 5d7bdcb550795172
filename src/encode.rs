// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For encoding PCM samples to FLAC files

use crate::Error;
use crate::metadata::{Streaminfo, write_streaminfo};
use crate::stream::{BlockingStrategy, ChannelAssignment};
use crate::subframe::Subframe;
use log::debug;
use std::io::{Seek, Write};
use std::num::NonZero;

/// How a 2 channel stream's channels are stored
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum StereoMode {
    /// Left and right are stored as-is
    #[default]
    Independent,
    /// Left and the difference are stored
    LeftSide,
    /// The difference and right are stored
    SideRight,
    /// The average and the difference are stored
    MidSide,
    /// Whichever of the others is smallest, per frame
    Smallest,
}

/// FLAC encoding options
#[derive(Copy, Clone, Debug)]
pub struct EncodingOptions {
    block_size: u16,
    stereo: StereoMode,
    verbatim_only: bool,
    max_partition_order: u32,
}

impl EncodingOptions {
    /// Assigns new block size to options
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockSize`] if the block size is 0.
    pub fn block_size(self, block_size: u16) -> Result<Self, Error> {
        match block_size {
            0 => Err(Error::InvalidBlockSize),
            block_size => Ok(Self { block_size, ..self }),
        }
    }

    /// Assigns stereo mode to options
    ///
    /// Stereo modes other than [`StereoMode::Independent`]
    /// only apply to 2 channel streams.
    pub fn stereo(self, stereo: StereoMode) -> Self {
        Self { stereo, ..self }
    }

    /// Stores every subframe uncompressed
    pub fn verbatim_only(self) -> Self {
        Self {
            verbatim_only: true,
            ..self
        }
    }

    /// Assigns largest residual partition order to try
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPartitionOrder`] if the order exceeds 15.
    pub fn max_partition_order(self, max_partition_order: u32) -> Result<Self, Error> {
        match max_partition_order {
            0..=crate::residual::MAX_PARTITION_ORDER => Ok(Self {
                max_partition_order,
                ..self
            }),
            _ => Err(Error::InvalidPartitionOrder),
        }
    }
}

impl Default for EncodingOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            stereo: StereoMode::default(),
            verbatim_only: false,
            max_partition_order: 8,
        }
    }
}

/// A FLAC encoder
pub struct Encoder<W: Write + Seek> {
    writer: W,
    // where our fLaC tag starts
    start: u64,
    options: EncodingOptions,
    streaminfo: Streaminfo,
    frame_number: u64,
    samples_written: u64,
    // unencoded remainder of a partial block, one buffer per channel
    pending: Vec<Vec<i32>>,
    md5: md5::Context,
    finalized: bool,
}

impl<W: Write + Seek> Encoder<W> {
    /// Creates new encoder with the given parameters
    ///
    /// `sample_rate` must be less than 1048576 (a 20 bit field).
    ///
    /// `bits_per_sample` must be between 1 and 32.
    ///
    /// `channels` must be between 1 and 8.
    ///
    /// `total_samples`, if known, must fit in a 36 bit field.
    ///
    /// Note that if `total_samples` is indicated,
    /// the number written *must* be equal to that value
    /// or an error will occur when writing or finalizing the stream.
    ///
    /// # Errors
    ///
    /// Returns I/O error if unable to write initial
    /// metadata blocks.
    /// Returns error if any of the encoding parameters are invalid.
    pub fn new(
        mut writer: W,
        options: EncodingOptions,
        sample_rate: u32,
        bits_per_sample: u32,
        channels: NonZero<u8>,
        total_samples: Option<NonZero<u64>>,
    ) -> Result<Self, Error> {
        let streaminfo = Streaminfo {
            minimum_block_size: options.block_size,
            maximum_block_size: options.block_size,
            minimum_frame_size: None,
            maximum_frame_size: None,
            sample_rate: (0..=Streaminfo::MAX_SAMPLE_RATE)
                .contains(&sample_rate)
                .then_some(sample_rate)
                .ok_or(Error::InvalidSampleRate)?,
            bits_per_sample: (1..=32)
                .contains(&bits_per_sample)
                .then_some(bits_per_sample)
                .ok_or(Error::InvalidBitsPerSample)?,
            channels: (1..=Streaminfo::MAX_CHANNELS)
                .contains(&channels.get())
                .then_some(channels)
                .ok_or(Error::ExcessiveChannels)?,
            total_samples: match total_samples {
                Some(samples) if samples.get() > Streaminfo::MAX_TOTAL_SAMPLES => {
                    return Err(Error::ExcessiveTotalSamples);
                }
                total_samples => total_samples,
            },
            md5: None,
        };

        if options.stereo != StereoMode::Independent && channels.get() != 2 {
            return Err(Error::InvalidStereoMode);
        }

        let start = writer.stream_position()?;
        write_streaminfo(&streaminfo, writer.by_ref())?;

        Ok(Self {
            writer,
            start,
            options,
            pending: vec![Vec::new(); usize::from(channels.get())],
            streaminfo,
            frame_number: 0,
            samples_written: 0,
            md5: md5::Context::new(),
            finalized: false,
        })
    }

    /// Returns the stream's STREAMINFO as currently known
    pub fn streaminfo(&self) -> &Streaminfo {
        &self.streaminfo
    }

    /// Encodes PCM samples, one slice per channel
    ///
    /// Channels may be any length, so long as they're all the same.
    /// Depending on the encoder's chosen block size,
    /// this may encode zero or more FLAC frames to disk
    /// and hold on to any remainder for the next call.
    ///
    /// # Errors
    ///
    /// Returns an I/O error from the underlying stream,
    /// or if the samples' parameters are not a match
    /// for the encoder's.
    pub fn encode(&mut self, channels: &[&[i32]]) -> Result<(), Error> {
        if channels.len() != self.pending.len() {
            return Err(Error::ChannelsMismatch);
        }
        let Some(len) = channels.first().map(|c| c.len()) else {
            return Ok(());
        };
        if channels.iter().any(|c| c.len() != len) {
            return Err(Error::SamplesLengthMismatch);
        }

        let bits_per_sample = self.streaminfo.bits_per_sample;
        let (min, max) = (
            -(1i64 << (bits_per_sample - 1)),
            (1i64 << (bits_per_sample - 1)) - 1,
        );
        if channels
            .iter()
            .flat_map(|c| c.iter())
            .any(|s| !(min..=max).contains(&i64::from(*s)))
        {
            return Err(Error::SampleOutOfRange);
        }

        if self.samples_written + (self.pending[0].len() + len) as u64
            > self
                .streaminfo
                .total_samples
                .map(|s| s.get())
                .unwrap_or(Streaminfo::MAX_TOTAL_SAMPLES)
        {
            return Err(Error::ExcessiveTotalSamples);
        }

        for (pending, channel) in self.pending.iter_mut().zip(channels) {
            pending.extend_from_slice(channel);
        }

        let block_size = usize::from(self.options.block_size);
        while self.pending[0].len() >= block_size {
            let block = self
                .pending
                .iter()
                .map(|p| p[0..block_size].to_vec())
                .collect::<Vec<_>>();
            self.encode_block(&block)?;
            for pending in self.pending.iter_mut() {
                pending.drain(0..block_size);
            }
        }

        Ok(())
    }

    fn encode_block(&mut self, block: &[Vec<i32>]) -> Result<(), Error> {
        let channels = block.iter().map(|c| c.as_slice()).collect::<Vec<_>>();

        let size = encode_frame(
            self.writer.by_ref(),
            &self.options,
            &self.streaminfo,
            self.frame_number,
            &channels,
        )?;

        self.frame_number += 1;

        // only samples which made it to disk count toward totals
        let bytes_per_sample = self.streaminfo.bits_per_sample.div_ceil(8) as usize;
        let len = channels.first().map(|c| c.len()).unwrap_or(0);
        let mut bytes = Vec::with_capacity(len * channels.len() * bytes_per_sample);
        for i in 0..len {
            for channel in &channels {
                bytes.extend_from_slice(&channel[i].to_le_bytes()[0..bytes_per_sample]);
            }
        }
        self.md5.consume(&bytes);
        self.samples_written += len as u64;

        // update minimum and maximum frame size values
        if let s @ Some(size) = u32::try_from(size)
            .ok()
            .filter(|size| *size <= Streaminfo::MAX_FRAME_SIZE)
            .and_then(NonZero::new)
        {
            match &mut self.streaminfo.minimum_frame_size {
                Some(min_size) => {
                    *min_size = size.min(*min_size);
                }
                min_size @ None => {
                    *min_size = s;
                }
            }

            match &mut self.streaminfo.maximum_frame_size {
                Some(max_size) => {
                    *max_size = size.max(*max_size);
                }
                max_size @ None => {
                    *max_size = s;
                }
            }
        }

        Ok(())
    }

    fn finalize_inner(&mut self) -> Result<(), Error> {
        use std::io::SeekFrom;

        if !self.finalized {
            self.finalized = true;

            if !self.pending[0].is_empty() {
                let block = std::mem::take(&mut self.pending);
                self.encode_block(&block)?;
            }

            match self.streaminfo.total_samples {
                Some(expected) => {
                    if expected.get() != self.samples_written {
                        return Err(Error::SampleCountMismatch);
                    }
                }
                None => {
                    self.streaminfo.total_samples = NonZero::new(self.samples_written);
                }
            }

            self.streaminfo.md5 =
                Some(std::mem::replace(&mut self.md5, md5::Context::new()).compute().0);

            debug!(
                "finalized {} samples in {} frames, frame sizes {:?} to {:?}",
                self.samples_written,
                self.frame_number,
                self.streaminfo.minimum_frame_size,
                self.streaminfo.maximum_frame_size,
            );

            self.writer.seek(SeekFrom::Start(self.start))?;
            write_streaminfo(&self.streaminfo, self.writer.by_ref())?;
            self.writer.seek(SeekFrom::End(0))?;
            self.writer.flush()?;
        }

        Ok(())
    }

    /// Attempt to finalize stream
    ///
    /// It is necessary to finalize the FLAC encoder
    /// so that it will write any partially unwritten samples
    /// to the stream and update the STREAMINFO block
    /// with its final values.
    ///
    /// Dropping the encoder will attempt to finalize the stream
    /// automatically, but will ignore any errors that may occur.
    pub fn finalize(mut self) -> Result<(), Error> {
        self.finalize_inner()
    }
}

impl<W: Write + Seek> Drop for Encoder<W> {
    fn drop(&mut self) {
        let _ = self.finalize_inner();
    }
}

/// Encodes one whole frame of samples, one slice per channel
///
/// Frames are numbered by `frame_number` using the fixed
/// blocking strategy.  Returns the size of the frame in bytes.
///
/// # Errors
///
/// Returns an error if the channels don't match the stream,
/// if the block is empty or too large, or on I/O error.
pub fn encode_frame<W: Write>(
    writer: W,
    options: &EncodingOptions,
    streaminfo: &Streaminfo,
    frame_number: u64,
    channels: &[&[i32]],
) -> Result<u64, Error> {
    write_frame(
        writer,
        options,
        streaminfo,
        BlockingStrategy::Fixed,
        frame_number,
        channels,
    )
}

/// Encodes one whole frame of samples, one slice per channel,
/// using the variable blocking strategy
///
/// Frames are numbered by `sample_number`,
/// the absolute index of the frame's first sample,
/// so each frame may have a different block size.
/// Returns the size of the frame in bytes.
///
/// # Errors
///
/// Returns an error if the channels don't match the stream,
/// if the block is empty or too large, or on I/O error.
pub fn encode_variable_frame<W: Write>(
    writer: W,
    options: &EncodingOptions,
    streaminfo: &Streaminfo,
    sample_number: u64,
    channels: &[&[i32]],
) -> Result<u64, Error> {
    write_frame(
        writer,
        options,
        streaminfo,
        BlockingStrategy::Variable,
        sample_number,
        channels,
    )
}

fn write_frame<W: Write>(
    writer: W,
    options: &EncodingOptions,
    streaminfo: &Streaminfo,
    blocking_strategy: BlockingStrategy,
    number: u64,
    channels: &[&[i32]],
) -> Result<u64, Error> {
    use crate::Counter;
    use crate::crc::{Checksum, Crc16, CrcWriter};
    use crate::stream::FrameHeader;
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    if channels.len() != usize::from(streaminfo.channels.get()) {
        return Err(Error::ChannelsMismatch);
    }
    let block_size = channels.first().map(|c| c.len()).unwrap_or(0);
    if channels.iter().any(|c| c.len() != block_size) {
        return Err(Error::SamplesLengthMismatch);
    }
    if !(1..=65536).contains(&block_size) {
        return Err(Error::InvalidBlockSize);
    }

    let (channel_assignment, subframes) = analyze_frame(options, streaminfo, channels)?;

    let mut w: CrcWriter<_, Crc16> = CrcWriter::new(Counter::new(writer));

    FrameHeader {
        blocking_strategy,
        block_size: block_size as u32,
        sample_rate: streaminfo.sample_rate,
        channel_assignment,
        bits_per_sample: streaminfo.bits_per_sample,
        number,
    }
    .write(&mut w)?;

    {
        let mut w = BitWriter::endian(&mut w, BigEndian);
        for (i, subframe) in subframes.iter().enumerate() {
            subframe.write(
                &mut w,
                channel_assignment.subframe_bits(streaminfo.bits_per_sample, i),
            )?;
        }
        w.byte_align()?;
    }

    let crc16 = w.checksum().checksum();
    w.write_all(&crc16.to_be_bytes())?;

    Ok(w.into_writer().count)
}

fn analyze_frame(
    options: &EncodingOptions,
    streaminfo: &Streaminfo,
    channels: &[&[i32]],
) -> Result<(ChannelAssignment, Vec<Subframe>), Error> {
    use crate::stereo::correlate;

    let bits_per_sample = streaminfo.bits_per_sample;
    let block_size = channels[0].len();

    let analyze = |assignment: ChannelAssignment, samples: &[Vec<i64>]| {
        let subframes = samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                Subframe::analyze(
                    s,
                    assignment.subframe_bits(bits_per_sample, i),
                    options.verbatim_only,
                    options.max_partition_order,
                )
            })
            .collect::<Vec<_>>();
        let bits = subframes
            .iter()
            .enumerate()
            .map(|(i, s)| s.bits(assignment.subframe_bits(bits_per_sample, i), block_size))
            .sum::<u64>();
        (assignment, subframes, bits)
    };

    let assignments: &[ChannelAssignment] = match (channels, options.stereo) {
        (_, StereoMode::Independent) => &[],
        ([_, _], _) if bits_per_sample == 32 => &[],
        ([_, _], StereoMode::LeftSide) => &[ChannelAssignment::LeftSide],
        ([_, _], StereoMode::SideRight) => &[ChannelAssignment::SideRight],
        ([_, _], StereoMode::MidSide) => &[ChannelAssignment::MidSide],
        ([_, _], StereoMode::Smallest) => &[
            ChannelAssignment::Independent(2),
            ChannelAssignment::LeftSide,
            ChannelAssignment::SideRight,
            ChannelAssignment::MidSide,
        ],
        _ => return Err(Error::InvalidStereoMode),
    };

    match assignments {
        [] => {
            let samples = channels
                .iter()
                .map(|c| c.iter().copied().map(i64::from).collect::<Vec<_>>())
                .collect::<Vec<_>>();
            let (assignment, subframes, _) = analyze(
                ChannelAssignment::Independent(channels.len() as u8),
                &samples,
            );
            Ok((assignment, subframes))
        }
        assignments => assignments
            .iter()
            .map(|assignment| {
                analyze(
                    *assignment,
                    correlate(*assignment, channels[0], channels[1]).as_slice(),
                )
            })
            .min_by_key(|(_, _, bits)| *bits)
            .map(|(assignment, subframes, _)| (assignment, subframes))
            .ok_or(Error::InvalidStereoMode),
    }
}
