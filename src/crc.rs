// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Running checksums over the bytes of a FLAC frame
//!
//! Frame headers end with a CRC-8 of the header's bytes
//! and whole frames end with a CRC-16 of the frame's bytes.
//! [`CrcReader`] and [`CrcWriter`] wrap a byte stream
//! and update their checksum with every byte that passes through,
//! so bit-level readers and writers layered on top of them
//! get checksumming for free.
//!
//! Because neither CRC is reflected nor XORed on output,
//! running a checksum's own big-endian bytes through it
//! leaves a residue of zero, which is what [`Checksum::valid`] checks.

/// A checksum updated one byte at a time
pub trait Checksum: Default {
    /// The finished checksum value
    type Output;

    /// Updates checksum with the given bytes
    fn update(&mut self, bytes: &[u8]);

    /// Whether the checksum's residue is zero
    ///
    /// This is the case once the stored checksum has itself
    /// been run through the calculation.
    fn valid(&self) -> bool;

    /// Returns current checksum value
    fn checksum(&self) -> Self::Output;
}

const fn crc8_table() -> [u8; 256] {
    let mut table = [0; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn crc16_table() -> [u16; 256] {
    let mut table = [0; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const CRC8: [u8; 256] = crc8_table();
const CRC16: [u16; 256] = crc16_table();

/// CRC-8 with polynomial x⁸ + x² + x + 1, used by frame headers
#[derive(Copy, Clone, Debug, Default)]
pub struct Crc8(u8);

impl Checksum for Crc8 {
    type Output = u8;

    fn update(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = CRC8[usize::from(self.0 ^ b)];
        }
    }

    fn valid(&self) -> bool {
        self.0 == 0
    }

    fn checksum(&self) -> u8 {
        self.0
    }
}

/// CRC-16 with polynomial x¹⁶ + x¹⁵ + x² + 1, used by whole frames
#[derive(Copy, Clone, Debug, Default)]
pub struct Crc16(u16);

impl Checksum for Crc16 {
    type Output = u16;

    fn update(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = (self.0 << 8) ^ CRC16[usize::from((self.0 >> 8) as u8 ^ b)];
        }
    }

    fn valid(&self) -> bool {
        self.0 == 0
    }

    fn checksum(&self) -> u16 {
        self.0
    }
}

/// A reader which checksums all the bytes read from it
pub struct CrcReader<R, C> {
    reader: R,
    checksum: C,
}

impl<R, C: Checksum> CrcReader<R, C> {
    /// Wraps reader with a fresh checksum
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            checksum: C::default(),
        }
    }

    /// Returns checksum of bytes read so far
    pub fn checksum(&self) -> &C {
        &self.checksum
    }

    /// Consumes reader and returns its checksum
    pub fn into_checksum(self) -> C {
        self.checksum
    }
}

impl<R: std::io::Read, C: Checksum> std::io::Read for CrcReader<R, C> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf).inspect(|amt_read| {
            self.checksum.update(&buf[0..*amt_read]);
        })
    }
}

/// A writer which checksums all the bytes written to it
pub struct CrcWriter<W, C> {
    writer: W,
    checksum: C,
}

impl<W, C: Checksum> CrcWriter<W, C> {
    /// Wraps writer with a fresh checksum
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            checksum: C::default(),
        }
    }

    /// Returns checksum of bytes written so far
    pub fn checksum(&self) -> &C {
        &self.checksum
    }

    /// Consumes writer and returns the wrapped writer
    pub fn into_writer(self) -> W {
        self.writer
    }
}

impl<W: std::io::Write, C: Checksum> std::io::Write for CrcWriter<W, C> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf).inspect(|amt_written| {
            self.checksum.update(&buf[0..*amt_written]);
        })
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
