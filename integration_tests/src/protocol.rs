//! Host side of the firmware protocol.
//!
//! Frame layout, CRC and response decoding come from the firmware library so
//! the two ends cannot drift apart.

#![allow(dead_code)]

pub use nrf24_recon_firmware::commands::types::{CommandId, Response, ResponseStatus, StatusReport};
pub use nrf24_recon_firmware::radio::DataRate;

use nrf24_recon_firmware::commands::decode_response;
use nrf24_recon_firmware::commands::parser::{calculate_crc, FRAME_OVERHEAD};
use nrf24_recon_firmware::config::protocol::PROTOCOL_VERSION;

/// Build a command frame (without COBS encoding).
/// Format: [version: u8][cmd_id: u8][length: u16 LE][payload][crc16: u16 LE]
pub fn build_command_payload(cmd_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(FRAME_OVERHEAD + payload.len());

    data.push(PROTOCOL_VERSION);
    data.push(cmd_id);
    data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    data.extend_from_slice(payload);

    let checksum = calculate_crc(&data);
    data.extend_from_slice(&checksum.to_le_bytes());

    data
}

/// COBS encode (corncobs includes zero delimiter).
pub fn cobs_encode(data: &[u8]) -> Vec<u8> {
    let mut encoded = vec![0u8; corncobs::max_encoded_len(data.len())];
    let len = corncobs::encode_buf(data, &mut encoded);
    encoded.truncate(len);
    encoded
}

/// Build a complete COBS-encoded command frame.
pub fn build_command(cmd_id: CommandId, payload: &[u8]) -> Vec<u8> {
    cobs_encode(&build_command_payload(cmd_id as u8, payload))
}

/// SniffStart payload
pub fn sniff_start_payload(
    min_channel: u8,
    max_channel: u8,
    scan_time_ms: u16,
    rate: DataRate,
    rpd_filter: bool,
) -> Vec<u8> {
    let mut payload = vec![min_channel, max_channel];
    payload.extend_from_slice(&scan_time_ms.to_le_bytes());
    payload.push(rate as u8);
    payload.push(rpd_filter as u8);
    payload
}

/// FindChannel payload
pub fn find_channel_payload(rate: DataRate, min_channel: u8, max_channel: u8, address: &[u8]) -> Vec<u8> {
    let mut payload = vec![rate as u8, min_channel, max_channel];
    payload.extend_from_slice(address);
    payload
}

/// Decode a frame read off the wire (delimiter already stripped).
pub fn parse_frame(mut frame: Vec<u8>) -> anyhow::Result<Response> {
    // corncobs expects the zero delimiter
    frame.push(0x00);
    let mut decoded = vec![0u8; frame.len()];
    let len = corncobs::decode_buf(&frame, &mut decoded)
        .map_err(|e| anyhow::anyhow!("COBS decode error: {:?}", e))?;
    decoded.truncate(len);

    decode_response(&decoded).map_err(|status| anyhow::anyhow!("Bad response frame: {:?}", status))
}

/// Address bytes as uppercase hex
pub fn hex(address: &[u8]) -> String {
    address.iter().map(|b| format!("{:02X}", b)).collect()
}
