/// A decoded FLAC frame's PCM samples
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    // all samples, stacked by channel
    samples: Vec<i32>,

    // total number of channels
    channels: usize,

    // total length of each channel in samples
    channel_len: usize,

    // bits-per-sample
    bits_per_sample: u32,

    // sample rate, in Hz
    sample_rate: u32,

    // absolute index of the frame's first sample
    sample_position: u64,
}

impl Frame {
    /// Builds frame from channels of equal length
    pub(crate) fn from_channels<C, I>(
        channels: C,
        channel_len: usize,
        bits_per_sample: u32,
        sample_rate: u32,
        sample_position: u64,
    ) -> Self
    where
        C: IntoIterator<Item = I>,
        I: IntoIterator<Item = i32>,
    {
        let samples = channels.into_iter().flatten().collect::<Vec<_>>();

        Self {
            channels: samples.len().checked_div(channel_len).unwrap_or(0),
            samples,
            channel_len,
            bits_per_sample,
            sample_rate,
            sample_position,
        }
    }

    /// Returns PCM frame count
    #[inline]
    pub fn pcm_frames(&self) -> usize {
        self.channel_len
    }

    /// Returns channel count
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Returns bits-per-sample
    #[inline]
    pub fn bits_per_sample(&self) -> u32 {
        self.bits_per_sample
    }

    /// Returns sample rate, in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the absolute index of the frame's first sample
    #[inline]
    pub fn sample_position(&self) -> u64 {
        self.sample_position
    }

    /// Returns bytes-per-sample
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample.div_ceil(8) as usize
    }

    /// Returns the given channel's samples
    ///
    /// # Panics
    ///
    /// Panics if the channel is out of range.
    pub fn channel(&self, index: usize) -> &[i32] {
        &self.samples[index * self.channel_len..(index + 1) * self.channel_len]
    }

    /// Iterates over all channels
    #[inline]
    pub fn channels(&self) -> impl Iterator<Item = &[i32]> {
        self.samples.chunks_exact(self.channel_len.max(1))
    }

    /// Iterates over any samples in interleaved order
    pub fn iter(&self) -> impl Iterator<Item = i32> {
        (0..self.samples.len()).map(|i| {
            let (sample, channel) = (i / self.channels, i % self.channels);
            self.samples[channel * self.channel_len + sample]
        })
    }

    /// Appends interleaved samples as signed, little-endian,
    /// byte-aligned values
    ///
    /// This is the layout a stream's MD5 sum is calculated over.
    pub fn to_le_bytes(&self, buf: &mut Vec<u8>) {
        let bytes_per_sample = self.bytes_per_sample();
        buf.reserve(self.samples.len() * bytes_per_sample);
        for sample in self.iter() {
            buf.extend_from_slice(&sample.to_le_bytes()[0..bytes_per_sample]);
        }
    }
}

#[cfg(test)]
mod test {
    use super::Frame;

    #[test]
    fn test_frame() {
        let frame = Frame::from_channels([vec![1, 2, 3], vec![-1, -2, -3]], 3, 16, 44100, 4096);
        assert_eq!(frame.pcm_frames(), 3);
        assert_eq!(frame.channel_count(), 2);
        assert_eq!(frame.channel(0), &[1, 2, 3]);
        assert_eq!(frame.channel(1), &[-1, -2, -3]);
        assert_eq!(frame.channels().count(), 2);
        assert_eq!(frame.iter().collect::<Vec<_>>(), [1, -1, 2, -2, 3, -3]);
        assert_eq!(frame.sample_position(), 4096);

        let mut bytes = vec![];
        frame.to_le_bytes(&mut bytes);
        assert_eq!(bytes, [1, 0, 0xFF, 0xFF, 2, 0, 0xFE, 0xFF, 3, 0, 0xFD, 0xFF]);
    }

    #[test]
    fn test_24bit_bytes() {
        let frame = Frame::from_channels([vec![-2, 0x123456]], 2, 24, 96000, 0);
        let mut bytes = vec![];
        frame.to_le_bytes(&mut bytes);
        assert_eq!(bytes, [0xFE, 0xFF, 0xFF, 0x56, 0x34, 0x12]);
    }
}
