//! Device communication client.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use serialport::SerialPort;

use crate::protocol::{
    build_command, build_command_payload, cobs_encode, find_channel_payload, parse_frame,
    sniff_start_payload, CommandId, DataRate, Response,
};

/// Find available data ports by scanning ttyACM devices and testing with GetVersion.
pub fn find_data_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    let mut data_ports = Vec::new();

    for port_info in ports {
        // USB Serial JTAG enumerates as a CDC-ACM device
        if !port_info.port_name.contains("ttyACM") {
            continue;
        }

        if let Ok(mut client) = DeviceClient::new(&port_info.port_name, 115200) {
            client.set_timeout(Duration::from_millis(500));
            if let Ok(Response::Version { .. }) = client.send_command(CommandId::GetVersion, &[]) {
                data_ports.push(port_info.port_name.clone());
            }
        }
    }

    Ok(data_ports)
}

/// Resolve a port argument - returns the port path if not "auto", otherwise auto-detects.
pub fn resolve_port(port_arg: &str) -> Result<String> {
    if port_arg != "auto" {
        return Ok(port_arg.to_string());
    }
    match find_data_ports()?.into_iter().next() {
        Some(port) => Ok(port),
        None => anyhow::bail!("No data port found - ensure device is connected"),
    }
}

/// Client for communicating with the recon firmware.
///
/// Unsolicited notifications that arrive while waiting for a command reply
/// are queued and handed out by `next_notification`.
pub struct DeviceClient {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    notifications: VecDeque<Response>,
}

impl DeviceClient {
    /// Create a new device client.
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(Self {
            port,
            timeout: Duration::from_secs(2),
            notifications: VecDeque::new(),
        })
    }

    /// Set the response timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Clear any pending data in the serial buffer.
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        self.notifications.clear();
        Ok(())
    }

    /// Send a command and wait for its reply.
    pub fn send_command(&mut self, cmd_id: CommandId, payload: &[u8]) -> Result<Response> {
        let frame = build_command(cmd_id, payload);
        self.exchange(&frame)
    }

    /// Send a raw command with custom command ID (for testing invalid commands).
    pub fn send_raw_command(&mut self, cmd_id: u8, payload: &[u8]) -> Result<Response> {
        let frame = cobs_encode(&build_command_payload(cmd_id, payload));
        self.exchange(&frame)
    }

    /// Send already-encoded bytes and wait for the reply.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<Response> {
        self.exchange(bytes)
    }

    pub fn sniff_start(
        &mut self,
        min_channel: u8,
        max_channel: u8,
        scan_time_ms: u16,
        rate: DataRate,
        rpd_filter: bool,
    ) -> Result<Response> {
        let payload = sniff_start_payload(min_channel, max_channel, scan_time_ms, rate, rpd_filter);
        self.send_command(CommandId::SniffStart, &payload)
    }

    pub fn sniff_stop(&mut self) -> Result<Response> {
        self.send_command(CommandId::SniffStop, &[])
    }

    pub fn status(&mut self) -> Result<Response> {
        self.send_command(CommandId::GetStatus, &[])
    }

    /// Seed the device store with an address from an earlier run.
    pub fn add_known(&mut self, address: &[u8; 5]) -> Result<Response> {
        self.send_command(CommandId::AddKnown, address)
    }

    pub fn find_channel(
        &mut self,
        rate: DataRate,
        min_channel: u8,
        max_channel: u8,
        address: &[u8],
    ) -> Result<Response> {
        let payload = find_channel_payload(rate, min_channel, max_channel, address);
        self.send_command(CommandId::FindChannel, &payload)
    }

    /// Next unsolicited notification, waiting up to `timeout`.
    pub fn next_notification(&mut self, timeout: Duration) -> Result<Option<Response>> {
        if let Some(response) = self.notifications.pop_front() {
            return Ok(Some(response));
        }
        match self.read_frame(timeout)? {
            Some(frame) => Ok(Some(parse_frame(frame)?)),
            None => Ok(None),
        }
    }

    fn exchange(&mut self, frame: &[u8]) -> Result<Response> {
        self.port.write_all(frame)?;
        self.port.flush()?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(frame) = self.read_frame(remaining)? else {
                anyhow::bail!("Timeout waiting for response");
            };
            match parse_frame(frame)? {
                notification @ Response::AddressConfirmed { .. } => {
                    self.notifications.push_back(notification);
                }
                response => return Ok(response),
            }
        }
    }

    /// Read bytes until zero delimiter. `None` on timeout.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut data = Vec::new();
        let mut buf = [0u8; 1];
        let start = Instant::now();

        while start.elapsed() < timeout {
            match self.port.read(&mut buf) {
                Ok(1) => {
                    if buf[0] == 0x00 {
                        if !data.is_empty() {
                            return Ok(Some(data));
                        }
                    } else {
                        data.push(buf[0]);
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }
}
