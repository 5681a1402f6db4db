// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ZCL frame header encode/decode (`spec.md` §4.8).

use crate::error::{Error, Result};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameControl: u8 {
        /// 0 = entire profile wide, 1 = cluster specific.
        const CLUSTER_SPECIFIC    = 0b0000_0001;
        const MANUFACTURER_SPECIFIC = 0b0000_0100;
        /// 0 = client to server, 1 = server to client.
        const DIRECTION_SERVER    = 0b0000_1000;
        const DISABLE_DEFAULT_RESPONSE = 0b0001_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZclHeader {
    pub frame_control: FrameControl,
    pub manufacturer_code: Option<u16>,
    pub sequence_number: u8,
    pub command_id: u8,
}

impl ZclHeader {
    pub fn direction(&self) -> Direction {
        if self.frame_control.contains(FrameControl::DIRECTION_SERVER) {
            Direction::ServerToClient
        } else {
            Direction::ClientToServer
        }
    }

    pub fn is_cluster_specific(&self) -> bool {
        self.frame_control.contains(FrameControl::CLUSTER_SPECIFIC)
    }
}

/// A decoded ZCL frame: header plus the remaining command payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ZclFrame {
    pub header: ZclHeader,
    pub payload: Vec<u8>,
}

pub fn decode_header(bytes: &[u8]) -> Result<(ZclHeader, usize)> {
    let fc_byte = *bytes.get(0).ok_or_else(|| Error::Decode("zcl: empty frame".into()))?;
    let frame_control = FrameControl::from_bits_truncate(fc_byte);
    let mut pos = 1;

    let manufacturer_code = if frame_control.contains(FrameControl::MANUFACTURER_SPECIFIC) {
        let bytes = bytes
            .get(pos..pos + 2)
            .ok_or_else(|| Error::Decode("zcl: truncated manufacturer code".into()))?;
        pos += 2;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    } else {
        None
    };

    let sequence_number = *bytes
        .get(pos)
        .ok_or_else(|| Error::Decode("zcl: truncated sequence number".into()))?;
    pos += 1;
    let command_id = *bytes
        .get(pos)
        .ok_or_else(|| Error::Decode("zcl: truncated command id".into()))?;
    pos += 1;

    Ok((
        ZclHeader {
            frame_control,
            manufacturer_code,
            sequence_number,
            command_id,
        },
        pos,
    ))
}

pub fn decode_frame(bytes: &[u8]) -> Result<ZclFrame> {
    let (header, consumed) = decode_header(bytes)?;
    Ok(ZclFrame {
        header,
        payload: bytes[consumed..].to_vec(),
    })
}

pub fn encode_frame(frame: &ZclFrame) -> Vec<u8> {
    let mut buf = vec![frame.header.frame_control.bits()];
    if let Some(code) = frame.header.manufacturer_code {
        buf.extend_from_slice(&code.to_le_bytes());
    }
    buf.push(frame.header.sequence_number);
    buf.push(frame.header.command_id);
    buf.extend_from_slice(&frame.payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_frame_without_manufacturer_code() {
        let frame = ZclFrame {
            header: ZclHeader {
                frame_control: FrameControl::CLUSTER_SPECIFIC,
                manufacturer_code: None,
                sequence_number: 5,
                command_id: 0x0a,
            },
            payload: vec![1, 2, 3],
        };
        let encoded = encode_frame(&frame);
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn roundtrips_with_manufacturer_code() {
        let frame = ZclFrame {
            header: ZclHeader {
                frame_control: FrameControl::CLUSTER_SPECIFIC | FrameControl::MANUFACTURER_SPECIFIC,
                manufacturer_code: Some(0x1037),
                sequence_number: 9,
                command_id: 0x01,
            },
            payload: vec![],
        };
        let encoded = encode_frame(&frame);
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded.header.manufacturer_code, Some(0x1037));
    }

    #[test]
    fn direction_bit_reads_server_to_client() {
        let (header, _) = decode_header(&[FrameControl::DIRECTION_SERVER.bits(), 1, 2]).unwrap();
        assert_eq!(header.direction(), Direction::ServerToClient);
    }

    #[test]
    fn truncated_header_is_a_decode_error() {
        assert!(decode_header(&[FrameControl::MANUFACTURER_SPECIFIC.bits()]).is_err());
    }
}
