// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For partitioned Rice coding of prediction residuals
//!
//! | Bits | Field |
//! |-----:|-------|
//! | 2    | coding method (0 = 4-bit parameters, 1 = 5-bit parameters) |
//! | 4    | partition order |
//!
//! followed by 2ⁿ partitions, each with its own Rice parameter.
//! A partition whose parameter is all 1 bits is escaped:
//! it holds a 5-bit width and raw signed values of that width.
//!
//! The first partition is shorter than the rest by the
//! subframe's predictor order, since that many warm-up samples
//! are stored ahead of the residual.

use crate::Error;
use bitstream_io::{BitRead, BitWrite};

/// Largest partition order the format can express
pub const MAX_PARTITION_ORDER: u32 = 15;

/// Maps signed values to unsigned: 0, -1, 1, -2, 2 to 0, 1, 2, 3, 4
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`]
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Lengths of each residual partition
///
/// # Errors
///
/// Returns [`Error::InvalidPartitionOrder`] if the block size
/// is not evenly divided by 2ⁿ partitions or if the first
/// partition cannot hold the predictor's warm-up samples.
pub fn partition_lengths(
    block_size: usize,
    predictor_order: usize,
    partition_order: u32,
) -> Result<impl Iterator<Item = usize>, Error> {
    if partition_order > MAX_PARTITION_ORDER {
        return Err(Error::InvalidPartitionOrder);
    }

    let partitions = 1usize << partition_order;
    let partition_size = block_size / partitions;

    if block_size % partitions != 0 || partition_size < predictor_order {
        return Err(Error::InvalidPartitionOrder);
    }

    Ok((0..partitions).map(move |i| match i {
        0 => partition_size - predictor_order,
        _ => partition_size,
    }))
}

/// How one residual partition is coded
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Partition {
    /// Rice coded with the given parameter
    Rice(u32),
    /// Raw signed values of the given bit width
    Escaped(u32),
}

impl Partition {
    fn bits(&self, values: &[i64]) -> u64 {
        match self {
            Self::Rice(k) => values
                .iter()
                .map(|v| (zigzag_encode(*v) >> k) + 1 + u64::from(*k))
                .sum(),
            Self::Escaped(bits) => 5 + values.len() as u64 * u64::from(*bits),
        }
    }

    /// The cheapest coding for the given values
    fn best(values: &[i64], max_parameter: u32) -> Self {
        let escaped = Self::Escaped(
            values
                .iter()
                .map(|v| signed_bits(*v))
                .max()
                .unwrap_or_default(),
        );

        (0..=max_parameter)
            .map(Self::Rice)
            .chain(matches!(escaped, Self::Escaped(b) if b <= 31).then_some(escaped))
            .min_by_key(|p| p.bits(values))
            .unwrap_or(Self::Rice(0))
    }
}

/// Bits needed to hold value as two's complement
fn signed_bits(value: i64) -> u32 {
    match value {
        0 => 0,
        v if v < 0 => 65 - (!v).leading_zeros(),
        v => 65 - v.leading_zeros(),
    }
}

/// A subframe's prediction residual along with its coding parameters
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Residual {
    partition_order: u32,
    partitions: Vec<Partition>,
    values: Vec<i64>,
}

impl Residual {
    /// Builds residual with the cheapest partitioning
    /// of at most the given partition order
    ///
    /// `values` holds `block size - predictor order` residuals.
    pub fn new(values: Vec<i64>, predictor_order: usize, max_partition_order: u32) -> Self {
        let block_size = values.len() + predictor_order;

        let best = (0..=max_partition_order.min(MAX_PARTITION_ORDER))
            .filter_map(|order| {
                let lengths = partition_lengths(block_size, predictor_order, order).ok()?;
                let mut remaining = values.as_slice();
                let partitions = lengths
                    .map(|len| {
                        let (partition, rest) = remaining.split_at(len);
                        remaining = rest;
                        Partition::best(partition, 30)
                    })
                    .collect::<Vec<_>>();
                Some(Self {
                    partition_order: order,
                    partitions,
                    values: Vec::new(),
                })
            })
            .min_by_key(|r| r.bits_with(&values, predictor_order));

        match best {
            Some(residual) => Self { values, ..residual },
            None => Self {
                partition_order: 0,
                partitions: vec![Partition::Rice(0)],
                values,
            },
        }
    }

    /// Builds residual from explicit coding parameters
    ///
    /// # Errors
    ///
    /// Returns an error if the partition count does not
    /// match the partition order or the partition order
    /// does not fit the block size.
    pub fn with_partitions(
        values: Vec<i64>,
        predictor_order: usize,
        partition_order: u32,
        partitions: Vec<Partition>,
    ) -> Result<Self, Error> {
        let block_size = values.len() + predictor_order;
        if partition_lengths(block_size, predictor_order, partition_order)?.count()
            != partitions.len()
        {
            return Err(Error::InvalidPartitionOrder);
        }
        Ok(Self {
            partition_order,
            partitions,
            values,
        })
    }

    /// The residual values
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// The partition order
    pub fn partition_order(&self) -> u32 {
        self.partition_order
    }

    /// Each partition's coding
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    fn method(&self) -> u8 {
        match self.partitions.iter().any(|p| matches!(p, Partition::Rice(k) if *k >= 15)) {
            false => 0,
            true => 1,
        }
    }

    fn bits_with(&self, values: &[i64], predictor_order: usize) -> u64 {
        let parameter_bits = match self.method() {
            0 => 4,
            _ => 5,
        };
        let block_size = values.len() + predictor_order;
        let Ok(lengths) = partition_lengths(block_size, predictor_order, self.partition_order)
        else {
            return u64::MAX;
        };
        let mut remaining = values;
        2 + 4
            + self
                .partitions
                .iter()
                .zip(lengths)
                .map(|(p, len)| {
                    let (partition, rest) = remaining.split_at(len);
                    remaining = rest;
                    parameter_bits + p.bits(partition)
                })
                .sum::<u64>()
    }

    /// Size of the coded residual, in bits
    pub fn bits(&self, predictor_order: usize) -> u64 {
        self.bits_with(&self.values, predictor_order)
    }

    /// Writes residual to the given writer
    ///
    /// # Errors
    ///
    /// Returns an error if the residual's partitioning is invalid,
    /// if a value does not fit its escaped width, or on I/O error.
    pub fn write<W: BitWrite + ?Sized>(
        &self,
        w: &mut W,
        predictor_order: usize,
    ) -> Result<(), Error> {
        let method = self.method();
        let escape = match method {
            0 => 0b1111,
            _ => 0b11111,
        };
        let parameter_bits = match method {
            0 => 4,
            _ => 5,
        };

        w.write::<2, u8>(method)?;
        w.write::<4, u32>(self.partition_order)?;

        let block_size = self.values.len() + predictor_order;
        let mut remaining = self.values.as_slice();

        for (partition, len) in self.partitions.iter().zip(partition_lengths(
            block_size,
            predictor_order,
            self.partition_order,
        )?) {
            let (values, rest) = remaining.split_at(len);
            remaining = rest;

            match partition {
                Partition::Rice(k) => {
                    w.write_var::<u32>(parameter_bits, *k)?;
                    for v in values {
                        write_rice(w, *k, *v)?;
                    }
                }
                Partition::Escaped(bits) => {
                    w.write_var::<u32>(parameter_bits, escape)?;
                    w.write::<5, u32>(*bits)?;
                    if *bits > 0 {
                        for v in values {
                            w.write_signed_var::<i64>(*bits, *v)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Writes a single Rice-coded value
pub fn write_rice<W: BitWrite + ?Sized>(w: &mut W, parameter: u32, value: i64) -> Result<(), Error> {
    let unsigned = zigzag_encode(value);
    let quotient = u32::try_from(unsigned >> parameter).map_err(|_| Error::ResidualOverflow)?;
    w.write_unary::<1>(quotient)?;
    if parameter > 0 {
        w.write_var::<u64>(parameter, unsigned & ((1 << parameter) - 1))?;
    }
    Ok(())
}

/// Reads a single Rice-coded value
pub fn read_rice<R: BitRead + ?Sized>(r: &mut R, parameter: u32) -> Result<i64, Error> {
    let quotient = u64::from(r.read_unary::<1>()?);
    let remainder = match parameter {
        0 => 0,
        k => r.read_var::<u64>(k)?,
    };
    quotient
        .checked_shl(parameter)
        .filter(|q| q >> parameter == quotient)
        .map(|q| zigzag_decode(q | remainder))
        .ok_or(Error::ResidualOverflow)
}

/// Reads a subframe's residual into `residual`
///
/// `residual` must hold exactly `block size - predictor order` values.
///
/// # Errors
///
/// Returns an error if the coding method is reserved,
/// if the partition order doesn't fit the block size,
/// or if an I/O error occurs.
pub fn read_residual<R: BitRead + ?Sized>(
    r: &mut R,
    predictor_order: usize,
    residual: &mut [i64],
) -> Result<(), Error> {
    let (parameter_bits, escape) = match r.read::<2, u8>()? {
        0 => (4, 0b1111),
        1 => (5, 0b11111),
        _ => return Err(Error::InvalidCodingMethod),
    };
    let partition_order = r.read::<4, u32>()?;

    let mut remaining = residual;

    for len in partition_lengths(remaining.len() + predictor_order, predictor_order, partition_order)? {
        let (partition, rest) = std::mem::take(&mut remaining).split_at_mut(len);
        remaining = rest;

        match r.read_var::<u32>(parameter_bits)? {
            parameter if parameter == escape => match r.read::<5, u32>()? {
                0 => partition.fill(0),
                bits => {
                    for v in partition.iter_mut() {
                        *v = r.read_signed_var(bits)?;
                    }
                }
            },
            parameter => {
                for v in partition.iter_mut() {
                    *v = read_rice(r, parameter)?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::{
        Partition, Residual, partition_lengths, read_residual, read_rice, write_rice,
        zigzag_decode, zigzag_encode,
    };
    use crate::Error;
    use bitstream_io::{BigEndian, BitReader, BitWrite, BitWriter};

    #[test]
    fn test_zigzag() {
        assert_eq!(
            [0, -1, 1, -2, 2].map(zigzag_encode),
            [0, 1, 2, 3, 4]
        );

        for v in [0, 1, -1, i32::MAX as i64, i32::MIN as i64, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }

        for _ in 0..1000 {
            let v = fastrand::i64(..);
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn test_rice() {
        for k in 0..=30 {
            let values = (0..50)
                .map(|_| fastrand::i64(-(1 << 24)..(1 << 24)))
                .filter(|v| (super::zigzag_encode(*v) >> k) < 1 << 16)
                .chain([0, 1, -1])
                .collect::<Vec<_>>();

            let mut w = BitWriter::endian(vec![], BigEndian);
            for v in &values {
                write_rice(&mut w, k, *v).unwrap();
            }
            w.byte_align().unwrap();
            let bytes = w.into_writer();

            let mut r = BitReader::endian(bytes.as_slice(), BigEndian);
            for v in &values {
                assert_eq!(read_rice(&mut r, k).unwrap(), *v);
            }
        }
    }

    #[test]
    fn test_rice_bits() {
        // 5 with parameter 1 is zig-zag 10, quotient 5, remainder 0
        let mut w = BitWriter::endian(vec![], BigEndian);
        write_rice(&mut w, 1, 5).unwrap();
        w.write::<1, u8>(0).unwrap();
        assert_eq!(w.into_writer(), vec![0b00000_1_0_0]);
    }

    #[test]
    fn test_partition_lengths() {
        for block_size in [1, 16, 192, 576, 4096, 4608] {
            for order in 0..=4 {
                for partition_order in 0..=15 {
                    match partition_lengths(block_size, order, partition_order) {
                        Ok(lengths) => {
                            assert_eq!(block_size % (1 << partition_order), 0);
                            assert_eq!(lengths.sum::<usize>(), block_size - order);
                        }
                        Err(Error::InvalidPartitionOrder) => {
                            assert!(
                                block_size % (1 << partition_order) != 0
                                    || block_size >> partition_order < order
                            );
                        }
                        Err(_) => panic!("unexpected error"),
                    }
                }
            }
        }

        assert!(partition_lengths(4096, 0, 16).is_err());
        // orders too large to shift by
        assert!(partition_lengths(4096, 0, 64).is_err());
        assert!(partition_lengths(4096, 0, u32::MAX).is_err());
        assert!(partition_lengths(12, 0, 3).is_err());
        assert_eq!(partition_lengths(12, 2, 2).unwrap().collect::<Vec<_>>(), [1, 3, 3, 3]);
    }

    fn round_trip(residual: &Residual, predictor_order: usize) -> Vec<i64> {
        let mut w = BitWriter::endian(vec![], BigEndian);
        residual.write(&mut w, predictor_order).unwrap();
        let bits = residual.bits(predictor_order);
        w.byte_align().unwrap();
        let bytes = w.into_writer();
        assert_eq!(bytes.len() as u64, bits.div_ceil(8));

        let mut decoded = vec![0; residual.values().len()];
        read_residual(
            &mut BitReader::endian(bytes.as_slice(), BigEndian),
            predictor_order,
            &mut decoded,
        )
        .unwrap();
        decoded
    }

    #[test]
    fn test_residual() {
        for order in 0..=4 {
            for scale in [0, 1, 100, 1 << 12, 1 << 20, 1 << 30] {
                let values = (0..(4096 - order))
                    .map(|_| fastrand::i64(-scale..=scale))
                    .collect::<Vec<_>>();
                let residual = Residual::new(values.clone(), order, 8);
                assert_eq!(round_trip(&residual, order), values);
            }
        }
    }

    #[test]
    fn test_escaped_residual() {
        let values = vec![3, -4, 0, 1, -1, 2, 0];
        let residual = Residual::with_partitions(
            values.clone(),
            1,
            1,
            vec![Partition::Escaped(3), Partition::Rice(20)],
        )
        .unwrap();
        assert_eq!(round_trip(&residual, 1), values);

        let zeros = vec![0; 15];
        let residual =
            Residual::with_partitions(zeros.clone(), 1, 0, vec![Partition::Escaped(0)]).unwrap();
        assert_eq!(round_trip(&residual, 1), zeros);

        assert!(Residual::with_partitions(vec![0; 15], 1, 1, vec![Partition::Rice(0)]).is_err());
    }

    #[test]
    fn test_invalid_residual() {
        // coding method 2 is reserved
        let mut decoded = [0; 4];
        assert!(matches!(
            read_residual(
                &mut BitReader::endian(&[0b10_0000_00, 0, 0][..], BigEndian),
                0,
                &mut decoded
            ),
            Err(Error::InvalidCodingMethod)
        ));

        // 2 partitions don't divide a block of 5
        let mut decoded = [0; 5];
        assert!(matches!(
            read_residual(
                &mut BitReader::endian(&[0b00_0001_00, 0, 0][..], BigEndian),
                0,
                &mut decoded
            ),
            Err(Error::InvalidPartitionOrder)
        ));
    }
}
