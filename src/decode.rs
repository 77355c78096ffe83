// SPDX-License-Identifier: Apache-2.0

//! LIDAR UDP packet decoder (C1).
//!
//! Turns one UDP datagram into a batch of [`PolarPoint`] returns. The wire
//! format is a fixed-size Pandar40P-compatible packet: a short header, a body
//! of per-ring return blocks, and a CRC-checked tail (§6.1.1). Framed the way
//! `TransportHeaderSlice` frames an SMS packet: checked length up front, then
//! unchecked offset math once the slice is known to be long enough.

use std::fmt;

use crc16::{State, CCITT_FALSE};

use crate::polar::PolarPoint;

/// Maximum ring count accepted from a packet header.
pub const MAX_RINGS: u8 = 40;

const START_PATTERN: u8 = 0xEE;
const HEADER_LEN: usize = 10;
const RETURN_LEN: usize = 10;
const TAIL_LEN: usize = 6;

/// Errors produced while decoding a single LIDAR packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Slice shorter than the minimum header length.
    UnexpectedEndOfSlice(usize),
    /// First byte did not match the expected start pattern.
    StartPattern(u8),
    /// `ring_count` exceeded [`MAX_RINGS`].
    InvalidRingCount(u8),
    /// Declared length does not match the slice actually received.
    LengthMismatch { expected: usize, actual: usize },
    /// CRC over header+body did not match the trailing CRC field.
    CrcMismatch { expected: u16, actual: u16 },
}

impl std::error::Error for DecodeError {}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEndOfSlice(len) => {
                write!(f, "unexpected end of slice: {len}")
            }
            DecodeError::StartPattern(b) => write!(f, "unexpected start pattern: 0x{b:02X}"),
            DecodeError::InvalidRingCount(n) => write!(f, "invalid ring count: {n}"),
            DecodeError::LengthMismatch { expected, actual } => {
                write!(f, "length mismatch: expected {expected}, got {actual}")
            }
            DecodeError::CrcMismatch { expected, actual } => {
                write!(f, "crc mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")
            }
        }
    }
}

/// A decoded packet: the returns it carried plus the sensor it claims to
/// belong to and the packet-local timestamp base.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    /// Sensor id carried in the packet header, used to route multi-sensor
    /// UDP streams that share a port.
    pub sensor_id: u16,
    /// Returns for this packet only, one per (ring, return) pair.
    pub points: Vec<PolarPoint>,
    /// Packet-local timestamp, nanoseconds.
    pub t_ns: u64,
}

/// Decode one UDP datagram into a [`DecodedPacket`].
///
/// Malformed packets (§4.1, §7) are reported as `Err` and must be dropped by
/// the caller with a counter increment; this function never panics on
/// attacker- or corruption-controlled input.
pub fn decode_packet(buf: &[u8]) -> Result<DecodedPacket, DecodeError> {
    if buf.len() < HEADER_LEN + TAIL_LEN {
        return Err(DecodeError::UnexpectedEndOfSlice(buf.len()));
    }

    if buf[0] != START_PATTERN {
        return Err(DecodeError::StartPattern(buf[0]));
    }

    let ring_count = buf[2];
    if ring_count == 0 || ring_count > MAX_RINGS {
        return Err(DecodeError::InvalidRingCount(ring_count));
    }

    let returns_per_ring = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    let azimuth_start_deg = u16::from_be_bytes([buf[5], buf[6]]) as f32 / 100.0;
    let sensor_id = u16::from_be_bytes([buf[7], buf[8]]);
    let _flags = buf[9];

    let body_len = ring_count as usize * returns_per_ring * RETURN_LEN;
    let expected_len = HEADER_LEN + body_len + TAIL_LEN;
    if buf.len() != expected_len {
        return Err(DecodeError::LengthMismatch {
            expected: expected_len,
            actual: buf.len(),
        });
    }

    let crc_computed = State::<CCITT_FALSE>::calculate(&buf[..HEADER_LEN + body_len]);
    let tail = &buf[HEADER_LEN + body_len..];
    let t_ns_low = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]) as u64;
    let crc_declared = u16::from_be_bytes([tail[4], tail[5]]);
    if crc_declared != crc_computed {
        return Err(DecodeError::CrcMismatch {
            expected: crc_declared,
            actual: crc_computed,
        });
    }

    let mut points = Vec::with_capacity(ring_count as usize * returns_per_ring);
    for ring in 0..ring_count {
        for i in 0..returns_per_ring {
            let off = HEADER_LEN + (ring as usize * returns_per_ring + i) * RETURN_LEN;
            let block = &buf[off..off + RETURN_LEN];
            let azimuth_offset_deg = u16::from_be_bytes([block[0], block[1]]) as f32 / 100.0;
            let elevation_deg = i16::from_be_bytes([block[2], block[3]]) as f32 / 100.0;
            let distance_mm = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
            let intensity = block[8];

            let azimuth_deg = (azimuth_start_deg + azimuth_offset_deg).rem_euclid(360.0);

            points.push(PolarPoint {
                ring,
                azimuth_deg,
                elevation_deg,
                distance_m: distance_mm as f32 / 1000.0,
                intensity,
                t_ns: t_ns_low,
            });
        }
    }

    Ok(DecodedPacket {
        sensor_id,
        points,
        t_ns: t_ns_low,
    })
}
