// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use flac_seek::decode::Decoder;
use flac_seek::encode::{EncodingOptions, Encoder, StereoMode};
use flac_seek::{Error, ErrorKind};
use std::io::Cursor;
use std::num::NonZero;

// fLaC tag, block header and STREAMINFO
const METADATA_LEN: usize = 4 + 4 + 34;

fn stream() -> Vec<u8> {
    let left = (0..5000)
        .map(|i| ((i as f64 * 0.03).sin() * 20000.0) as i32)
        .collect::<Vec<_>>();
    let right = left
        .iter()
        .map(|l| l / 2 + fastrand::i32(-50..50))
        .collect::<Vec<_>>();

    let mut flac = Cursor::new(vec![]);
    let mut encoder = Encoder::new(
        &mut flac,
        EncodingOptions::default()
            .block_size(1024)
            .unwrap()
            .stereo(StereoMode::Smallest),
        44100,
        16,
        NonZero::new(2).unwrap(),
        None,
    )
    .unwrap();
    encoder.encode(&[&left, &right]).unwrap();
    encoder.finalize().unwrap();
    flac.into_inner()
}

fn decode_all(flac: &[u8]) -> Result<usize, Error> {
    Decoder::new(flac)?
        .map(|frame| frame.map(|f| f.pcm_frames()))
        .sum()
}

#[test]
fn test_file_corruption() {
    let flac = stream();

    // ensure stream is okay
    assert_eq!(decode_all(&flac).unwrap(), 5000);

    // flip random bits outside the metadata block area
    for _ in 0..200 {
        let mut flac = flac.clone();
        let len = flac.len();
        flac[fastrand::usize(METADATA_LEN..len)] ^= 1 << fastrand::u32(0..8);

        assert!(decode_all(&flac).is_err());
    }
}

#[test]
fn test_header_corruption() {
    let flac = stream();

    // every bit of the first frame's sync code and header fields
    for bit in 0..32 {
        let mut flac = flac.clone();
        flac[METADATA_LEN + bit / 8] ^= 0x80 >> (bit % 8);

        let err = Decoder::new(flac.as_slice())
            .unwrap()
            .read_frame()
            .unwrap_err();

        assert!(err.is_recoverable());
        assert_ne!(err.kind(), ErrorKind::Io);
    }
}

#[test]
fn test_crc16_recovery() {
    let flac = stream();

    // find the second frame by decoding the first
    let mut cursor = Cursor::new(flac.as_slice());
    let mut decoder = Decoder::new(&mut cursor).unwrap();
    decoder.read_frame().unwrap().unwrap();
    let second = cursor.position() as usize;

    // corrupt the first frame's CRC-16
    let mut corrupted = flac.clone();
    corrupted[second - 1] ^= 0x01;

    let mut decoder = Decoder::new(corrupted.as_slice()).unwrap();
    assert!(matches!(decoder.read_frame(), Err(Error::Crc16Mismatch)));

    // the remaining frames are still decodable
    let mut remaining = 0;
    while let Some(frame) = decoder.read_frame().unwrap() {
        remaining += frame.pcm_frames();
    }
    assert_eq!(remaining, 5000 - 1024);
}

#[test]
fn test_crc8_recovery() {
    let samples = (0..5000)
        .map(|i| ((i as f64 * 0.02).sin() * 12000.0) as i32)
        .collect::<Vec<_>>();

    let mut flac = Cursor::new(vec![]);
    let mut encoder = Encoder::new(
        &mut flac,
        EncodingOptions::default().block_size(1024).unwrap(),
        44100,
        16,
        NonZero::new(1).unwrap(),
        None,
    )
    .unwrap();
    encoder.encode(&[&samples]).unwrap();
    encoder.finalize().unwrap();
    let mut flac = flac.into_inner();

    // sync, block size and sample rate, channels and bps,
    // frame number, then the header's CRC-8
    assert_eq!(
        &flac[METADATA_LEN..METADATA_LEN + 5],
        &[0xFF, 0xF8, 0xA9, 0x08, 0x00]
    );
    flac[METADATA_LEN + 5] ^= 0x01;

    let mut decoder = Decoder::new(flac.as_slice()).unwrap();
    assert!(matches!(decoder.read_frame(), Err(Error::Crc8Mismatch)));

    // the remaining frames are found by their sync codes,
    // though a false sync in the bad frame's data may fail first
    let mut recovered = vec![];
    for _ in 0..100 {
        match decoder.read_frame() {
            Ok(Some(frame)) => recovered.extend_from_slice(frame.channel(0)),
            Ok(None) => break,
            Err(err) => assert!(err.is_recoverable()),
        }
    }
    assert_eq!(recovered, &samples[1024..]);
}
