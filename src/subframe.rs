// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For handling a single channel's subframe within a FLAC frame
//!
//! A subframe header looks like:
//!
//! | Bits | Field |
//! |-----:|-------|
//! | 1    | padding (0) |
//! | 6    | subframe type |
//! | 1+   | wasted bits-per-sample, unary coded |
//!
//! | Type | Meaning |
//! |-----:|---------|
//! | `000000` | CONSTANT |
//! | `000001` | VERBATIM |
//! | `001xxx` | FIXED, with order `xxx` from 0 to 4 |
//! | `1xxxxx` | LPC, with order `xxxxx` + 1 |
//!
//! Samples are `i64` throughout so that side channels,
//! which need one more bit than the stream, can be 33 bits wide.

use crate::Error;
use crate::residual::{Residual, read_residual};
use arrayvec::ArrayVec;
use bitstream_io::{BitRead, BitWrite, FromBitStream, ToBitStream};

/// Largest order of a FIXED subframe
pub const MAX_FIXED_ORDER: usize = 4;

/// Largest order of an LPC subframe
pub const MAX_LPC_ORDER: usize = 32;

/// The predictor coefficients of each FIXED subframe order
const FIXED_COEFFICIENTS: [&[i64]; MAX_FIXED_ORDER + 1] =
    [&[], &[1], &[2, -1], &[3, -3, 1], &[4, -6, 4, -1]];

/// A subframe header's type
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SubframeType {
    /// A single sample repeated for the whole block
    Constant,
    /// Uncompressed samples
    Verbatim,
    /// A fixed polynomial predictor of the given order
    Fixed(u8),
    /// A quantized linear predictor of the given order
    Lpc(u8),
}

/// A subframe header
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SubframeHeader {
    /// The subframe's type
    pub type_: SubframeType,
    /// Low bits which are zero in every sample and not stored
    pub wasted_bps: u32,
}

impl FromBitStream for SubframeHeader {
    type Error = Error;

    fn from_reader<R: BitRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        if r.read_bit()? {
            return Err(Error::InvalidSubframeHeader);
        }
        let type_ = match r.read::<6, u8>()? {
            0b000000 => SubframeType::Constant,
            0b000001 => SubframeType::Verbatim,
            v @ 0b001000..=0b001100 => SubframeType::Fixed(v - 0b001000),
            v @ 0b100000..=0b111111 => SubframeType::Lpc(v - 0b011111),
            _ => return Err(Error::InvalidSubframeHeader),
        };
        let wasted_bps = match r.read_bit()? {
            false => 0,
            true => r.read_unary::<1>()? + 1,
        };
        Ok(Self { type_, wasted_bps })
    }
}

impl ToBitStream for SubframeHeader {
    type Error = Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        w.write_bit(false)?;
        w.write::<6, u8>(match self.type_ {
            SubframeType::Constant => 0b000000,
            SubframeType::Verbatim => 0b000001,
            SubframeType::Fixed(order) => 0b001000 + order,
            SubframeType::Lpc(order) => 0b011111 + order,
        })?;
        match self.wasted_bps {
            0 => w.write_bit(false)?,
            wasted => {
                w.write_bit(true)?;
                w.write_unary::<1>(wasted - 1)?;
            }
        }
        Ok(())
    }
}

/// Reads one subframe and decodes it into `samples`
///
/// `samples` must be exactly the frame's block size
/// and `bits_per_sample` is the subframe's own width,
/// which is one more than the stream's for side channels.
///
/// # Errors
///
/// Returns an error if the subframe is invalid or an I/O error occurs.
pub fn read_subframe<R: BitRead + ?Sized>(
    r: &mut R,
    bits_per_sample: u32,
    samples: &mut [i64],
) -> Result<(), Error> {
    let header: SubframeHeader = r.parse()?;

    let effective_bps = bits_per_sample
        .checked_sub(header.wasted_bps)
        .filter(|bps| *bps > 0)
        .ok_or(Error::ExcessiveWastedBits)?;

    match header.type_ {
        SubframeType::Constant => {
            samples.fill(r.read_signed_var(effective_bps)?);
        }
        SubframeType::Verbatim => {
            for sample in samples.iter_mut() {
                *sample = r.read_signed_var(effective_bps)?;
            }
        }
        SubframeType::Fixed(order) => {
            let order = usize::from(order);
            read_warm_up(r, effective_bps, order, samples)?;
            read_residual(r, order, &mut samples[order..])?;
            restore(FIXED_COEFFICIENTS[order], 0, samples);
        }
        SubframeType::Lpc(order) => {
            let order = usize::from(order);
            read_warm_up(r, effective_bps, order, samples)?;
            let precision = match r.read::<4, u32>()? {
                0b1111 => return Err(Error::InvalidLpcPrecision),
                p => p + 1,
            };
            let shift = u32::try_from(r.read::<5, i8>()?).map_err(|_| Error::NegativeLpcShift)?;
            let mut coefficients = ArrayVec::<i64, MAX_LPC_ORDER>::new();
            for _ in 0..order {
                coefficients.push(r.read_signed_var(precision)?);
            }
            read_residual(r, order, &mut samples[order..])?;
            restore(&coefficients, shift, samples);
        }
    }

    if header.wasted_bps > 0 {
        for sample in samples.iter_mut() {
            *sample = sample.wrapping_shl(header.wasted_bps);
        }
    }

    Ok(())
}

fn read_warm_up<R: BitRead + ?Sized>(
    r: &mut R,
    bits_per_sample: u32,
    order: usize,
    samples: &mut [i64],
) -> Result<(), Error> {
    match samples.get_mut(0..order) {
        Some(warm_up) => {
            for sample in warm_up {
                *sample = r.read_signed_var(bits_per_sample)?;
            }
            Ok(())
        }
        None => Err(Error::InvalidSubframeHeader),
    }
}

fn predict(coefficients: &[i64], shift: u32, history: &[i64]) -> i64 {
    coefficients
        .iter()
        .zip(history.iter().rev())
        .fold(0i64, |sum, (c, s)| sum.wrapping_add(c.wrapping_mul(*s)))
        >> shift
}

/// Turns residuals following the warm-up samples into samples, in place
///
/// Each sample is its residual plus the dot product of the
/// coefficients and the preceding samples, most recent first,
/// arithmetic-shifted right by `shift`.
pub fn restore(coefficients: &[i64], shift: u32, samples: &mut [i64]) {
    for i in coefficients.len()..samples.len() {
        let prediction = predict(coefficients, shift, &samples[i - coefficients.len()..i]);
        samples[i] = samples[i].wrapping_add(prediction);
    }
}

/// Computes the residuals following the warm-up samples
///
/// This is the inverse of [`restore`].
pub fn residuals(coefficients: &[i64], shift: u32, samples: &[i64]) -> Vec<i64> {
    samples
        .windows(coefficients.len() + 1)
        .map(|window| {
            let (history, sample) = window.split_at(coefficients.len());
            sample[0].wrapping_sub(predict(coefficients, shift, history))
        })
        .collect()
}

/// A single channel's worth of encoded samples
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Subframe {
    /// A single sample for the whole block
    Constant {
        /// The sample value
        sample: i64,
    },
    /// Uncompressed samples
    Verbatim {
        /// Low zero bits removed from every sample
        wasted_bps: u32,
        /// Samples, shifted right by `wasted_bps`
        samples: Vec<i64>,
    },
    /// Fixed polynomial prediction
    Fixed {
        /// Low zero bits removed from every sample
        wasted_bps: u32,
        /// Predictor order's worth of initial samples
        warm_up: ArrayVec<i64, MAX_FIXED_ORDER>,
        /// Prediction residual
        residual: Residual,
    },
    /// Quantized linear prediction
    Lpc {
        /// Low zero bits removed from every sample
        wasted_bps: u32,
        /// Predictor order's worth of initial samples
        warm_up: ArrayVec<i64, MAX_LPC_ORDER>,
        /// Bits per coefficient, from 1 to 15
        precision: u32,
        /// Right shift applied to each prediction, from 0 to 15
        shift: u32,
        /// Quantized predictor coefficients, most recent sample first
        coefficients: ArrayVec<i64, MAX_LPC_ORDER>,
        /// Prediction residual
        residual: Residual,
    },
}

impl Subframe {
    /// Picks the smallest encoding of the given samples
    ///
    /// Blocks of identical samples become CONSTANT.
    /// Otherwise any wasted low bits are removed and the
    /// smallest of VERBATIM and each FIXED order is chosen,
    /// unless `verbatim_only` is set.
    pub fn analyze(
        samples: &[i64],
        bits_per_sample: u32,
        verbatim_only: bool,
        max_partition_order: u32,
    ) -> Self {
        if let Some((first, rest)) = samples.split_first() {
            if rest.iter().all(|s| s == first) {
                return Self::Constant { sample: *first };
            }
        }

        if verbatim_only {
            return Self::Verbatim {
                wasted_bps: 0,
                samples: samples.to_vec(),
            };
        }

        let wasted_bps = samples
            .iter()
            .filter(|s| **s != 0)
            .map(|s| s.trailing_zeros())
            .min()
            .unwrap_or(0)
            .min(bits_per_sample - 1);
        let shifted = samples.iter().map(|s| s >> wasted_bps).collect::<Vec<_>>();

        let verbatim = Self::Verbatim {
            wasted_bps,
            samples: shifted.clone(),
        };

        (0..=MAX_FIXED_ORDER.min(shifted.len()))
            .map(|order| Self::Fixed {
                wasted_bps,
                warm_up: shifted[0..order].iter().copied().collect(),
                residual: Residual::new(
                    residuals(FIXED_COEFFICIENTS[order], 0, &shifted),
                    order,
                    max_partition_order,
                ),
            })
            .chain(std::iter::once(verbatim))
            .min_by_key(|subframe| subframe.bits(bits_per_sample, shifted.len()))
            .unwrap_or(Self::Verbatim {
                wasted_bps,
                samples: shifted,
            })
    }

    /// Builds an LPC subframe from quantized coefficients
    ///
    /// `coefficients` are ordered most recent sample first.
    ///
    /// # Errors
    ///
    /// Returns an error if the order, precision or shift
    /// is out of range, or if a coefficient doesn't fit
    /// in `precision` bits.
    pub fn lpc(
        samples: &[i64],
        precision: u32,
        shift: u32,
        coefficients: &[i64],
        max_partition_order: u32,
    ) -> Result<Self, Error> {
        let order = coefficients.len();
        if order == 0 || order > MAX_LPC_ORDER || order > samples.len() {
            return Err(Error::InvalidSubframeHeader);
        }
        if !(1..=15).contains(&precision)
            || coefficients
                .iter()
                .any(|c| *c < -(1 << (precision - 1)) || *c >= 1 << (precision - 1))
        {
            return Err(Error::InvalidLpcPrecision);
        }
        if shift > 15 {
            return Err(Error::NegativeLpcShift);
        }

        Ok(Self::Lpc {
            wasted_bps: 0,
            warm_up: samples[0..order].iter().copied().collect(),
            precision,
            shift,
            coefficients: coefficients.iter().copied().collect(),
            residual: Residual::new(
                residuals(coefficients, shift, samples),
                order,
                max_partition_order,
            ),
        })
    }

    fn header(&self) -> SubframeHeader {
        match self {
            Self::Constant { .. } => SubframeHeader {
                type_: SubframeType::Constant,
                wasted_bps: 0,
            },
            Self::Verbatim { wasted_bps, .. } => SubframeHeader {
                type_: SubframeType::Verbatim,
                wasted_bps: *wasted_bps,
            },
            Self::Fixed {
                wasted_bps,
                warm_up,
                ..
            } => SubframeHeader {
                type_: SubframeType::Fixed(warm_up.len() as u8),
                wasted_bps: *wasted_bps,
            },
            Self::Lpc {
                wasted_bps,
                coefficients,
                ..
            } => SubframeHeader {
                type_: SubframeType::Lpc(coefficients.len() as u8),
                wasted_bps: *wasted_bps,
            },
        }
    }

    /// Size of the encoded subframe, in bits
    pub fn bits(&self, bits_per_sample: u32, block_size: usize) -> u64 {
        let header = self.header();
        let header_bits = 8 + u64::from(header.wasted_bps);
        let effective_bps = u64::from(bits_per_sample.saturating_sub(header.wasted_bps));

        header_bits
            + match self {
                Self::Constant { .. } => effective_bps,
                Self::Verbatim { .. } => effective_bps * block_size as u64,
                Self::Fixed {
                    warm_up, residual, ..
                } => effective_bps * warm_up.len() as u64 + residual.bits(warm_up.len()),
                Self::Lpc {
                    warm_up,
                    precision,
                    coefficients,
                    residual,
                    ..
                } => {
                    effective_bps * warm_up.len() as u64
                        + 4
                        + 5
                        + u64::from(*precision) * coefficients.len() as u64
                        + residual.bits(coefficients.len())
                }
            }
    }

    /// Writes subframe to the given writer
    ///
    /// `bits_per_sample` is the subframe's own width,
    /// which is one more than the stream's for side channels.
    ///
    /// # Errors
    ///
    /// Returns an error if a sample does not fit
    /// its bit width or an I/O error occurs.
    pub fn write<W: BitWrite + ?Sized>(&self, w: &mut W, bits_per_sample: u32) -> Result<(), Error> {
        let header = self.header();
        let effective_bps = bits_per_sample
            .checked_sub(header.wasted_bps)
            .filter(|bps| *bps > 0)
            .ok_or(Error::ExcessiveWastedBits)?;

        w.build(&header)?;

        match self {
            Self::Constant { sample } => {
                w.write_signed_var(effective_bps, *sample)?;
            }
            Self::Verbatim { samples, .. } => {
                for sample in samples {
                    w.write_signed_var(effective_bps, *sample)?;
                }
            }
            Self::Fixed {
                warm_up, residual, ..
            } => {
                for sample in warm_up {
                    w.write_signed_var(effective_bps, *sample)?;
                }
                residual.write(w, warm_up.len())?;
            }
            Self::Lpc {
                warm_up,
                precision,
                shift,
                coefficients,
                residual,
                ..
            } => {
                for sample in warm_up {
                    w.write_signed_var(effective_bps, *sample)?;
                }
                w.write::<4, u32>(precision - 1)?;
                w.write::<5, i8>(*shift as i8)?;
                for coefficient in coefficients {
                    w.write_signed_var(*precision, *coefficient)?;
                }
                residual.write(w, coefficients.len())?;
            }
        }

        Ok(())
    }
}
