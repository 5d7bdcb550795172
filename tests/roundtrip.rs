// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use flac_seek::Error;
use flac_seek::decode::Decoder;
use flac_seek::encode::{EncodingOptions, Encoder, StereoMode};
use flac_seek::metadata::Metadata;
use std::io::Cursor;
use std::num::NonZero;

fn encode(options: EncodingOptions, bits_per_sample: u32, channels: &[Vec<i32>]) -> Vec<u8> {
    let mut flac = Cursor::new(vec![]);
    let mut encoder = Encoder::new(
        &mut flac,
        options,
        44100,
        bits_per_sample,
        NonZero::new(channels.len() as u8).unwrap(),
        None,
    )
    .unwrap();
    encoder
        .encode(&channels.iter().map(|c| c.as_slice()).collect::<Vec<_>>())
        .unwrap();
    encoder.finalize().unwrap();
    flac.into_inner()
}

fn decode(flac: &[u8]) -> Vec<Vec<i32>> {
    let decoder = Decoder::new(flac).unwrap();
    let mut channels = vec![vec![]; usize::from(decoder.channel_count())];
    for frame in decoder {
        let frame = frame.unwrap();
        for (output, channel) in channels.iter_mut().zip(frame.channels()) {
            output.extend_from_slice(channel);
        }
    }
    channels
}

fn noise(bits_per_sample: u32, len: usize) -> Vec<i32> {
    let (min, max) = (
        -(1i64 << (bits_per_sample - 1)),
        (1i64 << (bits_per_sample - 1)) - 1,
    );
    (0..len)
        .map(|_| fastrand::i64(min..=max) as i32)
        .collect()
}

fn sine(bits_per_sample: u32, len: usize, step: f64) -> Vec<i32> {
    let amplitude = ((1i64 << (bits_per_sample - 1)) - 1) as f64 * 0.8;
    (0..len)
        .map(|i| ((i as f64 * step).sin() * amplitude).round() as i32)
        .collect()
}

#[test]
fn test_random_roundtrip() {
    for bits_per_sample in [8, 12, 16, 20, 24, 32] {
        for channel_count in 1..=8 {
            let channels = (0..channel_count)
                .map(|c| match c % 2 {
                    0 => noise(bits_per_sample, 3000),
                    _ => sine(bits_per_sample, 3000, 0.01 * (c + 1) as f64),
                })
                .collect::<Vec<_>>();

            let flac = encode(
                EncodingOptions::default().block_size(1024).unwrap(),
                bits_per_sample,
                &channels,
            );
            assert_eq!(decode(&flac), channels);
        }
    }
}

#[test]
fn test_block_sizes() {
    let channels = vec![sine(16, 5000, 0.02), sine(16, 5000, 0.03)];

    for block_size in [1, 16, 192, 576, 1000, 4096, 4608, 65535] {
        let flac = encode(
            EncodingOptions::default()
                .block_size(block_size)
                .unwrap()
                .stereo(StereoMode::Smallest),
            16,
            &channels,
        );
        assert_eq!(decode(&flac), channels);
    }
}

#[test]
fn test_stereo_modes() {
    for bits_per_sample in [8, 16, 24, 32] {
        let (min, max) = (
            i32::MIN >> (32 - bits_per_sample),
            i32::MAX >> (32 - bits_per_sample),
        );
        let left = sine(bits_per_sample, 10000, 0.05);
        let right = left
            .iter()
            .zip(noise(4, 10000))
            .map(|(l, n)| l.saturating_add(n).clamp(min, max))
            .collect::<Vec<_>>();
        let channels = vec![left, right];

        for stereo in [
            StereoMode::Independent,
            StereoMode::LeftSide,
            StereoMode::SideRight,
            StereoMode::MidSide,
            StereoMode::Smallest,
        ] {
            let flac = encode(EncodingOptions::default().stereo(stereo), bits_per_sample, &channels);
            assert_eq!(decode(&flac), channels);
        }
    }
}

#[test]
fn test_verbatim_only() {
    let channels = vec![sine(16, 4096, 0.05)];
    let verbatim = encode(EncodingOptions::default().verbatim_only(), 16, &channels);
    let compressed = encode(EncodingOptions::default(), 16, &channels);
    assert_eq!(decode(&verbatim), channels);
    assert_eq!(decode(&compressed), channels);
    assert!(compressed.len() < verbatim.len());
}

#[test]
fn test_mid_side_lengths() {
    let left = vec![100, 200, 300, 400];
    let right = vec![100, 200, 300, 400];
    let channels = vec![left.clone(), right.clone()];

    let independent = encode(EncodingOptions::default(), 16, &channels);
    let mid_side = encode(
        EncodingOptions::default().stereo(StereoMode::MidSide),
        16,
        &channels,
    );

    assert_eq!(decode(&independent), channels);
    assert_eq!(decode(&mid_side), channels);
    assert_ne!(independent.len(), mid_side.len());
    assert!(mid_side.len() < independent.len());
}

#[test]
fn test_streaminfo() {
    let channels = vec![noise(24, 10000), noise(24, 10000), noise(24, 10000)];
    let flac = encode(EncodingOptions::default(), 24, &channels);
    let decoder = Decoder::new(flac.as_slice()).unwrap();

    assert_eq!(decoder.channel_count(), 3);
    assert_eq!(decoder.bits_per_sample(), 24);
    assert_eq!(decoder.sample_rate(), 44100);
    assert_eq!(decoder.total_samples(), Some(10000));
    assert_eq!(
        decoder.duration(),
        Some(std::time::Duration::from_nanos(226_757_369))
    );

    let mut md5 = md5::Context::new();
    for i in 0..10000 {
        for channel in &channels {
            md5.consume(&channel[i].to_le_bytes()[0..3]);
        }
    }
    assert_eq!(decoder.md5(), Some(&md5.compute().0));
}

#[test]
fn test_end_of_stream() {
    let channels = vec![sine(16, 8192, 0.01)];
    let flac = encode(EncodingOptions::default(), 16, &channels);

    // clean end at a frame boundary
    let mut decoder = Decoder::new(flac.as_slice()).unwrap();
    assert!(decoder.read_frame().unwrap().is_some());
    assert!(decoder.read_frame().unwrap().is_some());
    assert!(decoder.read_frame().unwrap().is_none());

    // stream cut off partway through its final frame
    let mut decoder = Decoder::new(&flac[0..flac.len() - 10]).unwrap();
    assert!(decoder.read_frame().unwrap().is_some());
    assert!(matches!(decoder.read_frame(), Err(Error::UnexpectedEof)));
}
