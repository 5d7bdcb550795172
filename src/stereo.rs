// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For stereo channel decorrelation
//!
//! A 2 channel frame may store its channels as one of:
//!
//! | Assignment | Subframe 0 | Subframe 1 |
//! |------------|------------|------------|
//! | independent | left | right |
//! | left-side | left | left - right |
//! | side-right | left - right | right |
//! | mid-side | (left + right) >> 1 | left - right |
//!
//! The side channel needs one more bit than the stream's
//! bits-per-sample, which is why samples are handled as `i64`
//! until they are decorrelated.

use crate::stream::ChannelAssignment;

/// Restores left and right channels in place from a frame's subframes
///
/// Both slices must be the same length.
/// Independent channels are left untouched.
pub fn decorrelate(assignment: ChannelAssignment, subframe0: &mut [i64], subframe1: &mut [i64]) {
    debug_assert_eq!(subframe0.len(), subframe1.len());

    match assignment {
        ChannelAssignment::Independent(_) => { /* nothing to do */ }
        ChannelAssignment::LeftSide => {
            for (left, side) in subframe0.iter().zip(subframe1.iter_mut()) {
                *side = left.wrapping_sub(*side);
            }
        }
        ChannelAssignment::SideRight => {
            for (side, right) in subframe0.iter_mut().zip(subframe1.iter()) {
                *side = side.wrapping_add(*right);
            }
        }
        ChannelAssignment::MidSide => {
            for (mid, side) in subframe0.iter_mut().zip(subframe1.iter_mut()) {
                let right = mid.wrapping_sub(*side >> 1);
                *mid = right.wrapping_add(*side);
                *side = right;
            }
        }
    }
}

/// Converts left and right channels into a frame's two subframes
///
/// This is the inverse of [`decorrelate`].
pub fn correlate(assignment: ChannelAssignment, left: &[i32], right: &[i32]) -> [Vec<i64>; 2] {
    debug_assert_eq!(left.len(), right.len());

    let pairs = left
        .iter()
        .zip(right)
        .map(|(l, r)| (i64::from(*l), i64::from(*r)));

    match assignment {
        ChannelAssignment::Independent(_) => [
            left.iter().copied().map(i64::from).collect(),
            right.iter().copied().map(i64::from).collect(),
        ],
        ChannelAssignment::LeftSide => [
            left.iter().copied().map(i64::from).collect(),
            pairs.map(|(l, r)| l - r).collect(),
        ],
        ChannelAssignment::SideRight => [
            pairs.map(|(l, r)| l - r).collect(),
            right.iter().copied().map(i64::from).collect(),
        ],
        ChannelAssignment::MidSide => [
            pairs.clone().map(|(l, r)| (l + r) >> 1).collect(),
            pairs.map(|(l, r)| l - r).collect(),
        ],
    }
}
