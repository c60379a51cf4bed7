//! Drive a discovery session on the device and keep the durable record of
//! confirmed addresses on the host.
//!
//! Loads the address file, seeds the device with it (the device store lives
//! in RAM and starts empty after every boot), starts discovery, appends
//! every newly confirmed address the device reports, and prints a status
//! line periodically.

mod device;
mod protocol;

use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;

use nrf24_recon_firmware::config::sniff_defaults;
use nrf24_recon_firmware::sniffer::address::NetAddress;
use nrf24_recon_firmware::sniffer::confirmed::{ConfirmedList, Insert};
use nrf24_recon_firmware::store::{AddressStore, FileStore};

use device::{resolve_port, DeviceClient};
use protocol::{hex, DataRate, Response, ResponseStatus};

/// Host-side record; larger than the device list so nothing is lost
const HOST_CAPACITY: usize = 4096;

#[derive(Parser)]
#[command(name = "sniff-monitor")]
#[command(about = "Run nRF24 address discovery and record confirmed addresses")]
struct Args {
    /// Serial port for the device (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Lowest channel to scan
    #[arg(long, default_value_t = sniff_defaults::MIN_CHANNEL)]
    min_channel: u8,

    /// Highest channel to scan
    #[arg(long, default_value_t = sniff_defaults::MAX_CHANNEL)]
    max_channel: u8,

    /// Dwell time per channel in milliseconds
    #[arg(long, default_value_t = sniff_defaults::SCAN_TIME_MS as u16)]
    scan_time: u16,

    /// Data rate: 0 = 1 Mbps, 1 = 2 Mbps, 2 = 250 kbps
    #[arg(long, default_value_t = 1)]
    rate: u8,

    /// Keep captures received while the power detector is inactive
    #[arg(long)]
    no_rpd: bool,

    /// Confirmed address file
    #[arg(short, long, default_value = sniff_defaults::ADDRESS_FILE)]
    file: String,

    /// Stop after this many seconds (runs until killed when omitted)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Seconds between status lines
    #[arg(long, default_value = "10")]
    status_every: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let rate = DataRate::from_u8(args.rate)
        .ok_or_else(|| anyhow::anyhow!("rate must be 0, 1 or 2, got {}", args.rate))?;

    let mut store = FileStore::new(&args.file);
    let mut known: ConfirmedList<HOST_CAPACITY> = ConfirmedList::new();
    let report = store
        .load(&mut known)
        .map_err(|e| anyhow::anyhow!("cannot open {}: {:?}", args.file, e))?;
    println!(
        "{} {} addresses loaded from {} ({} lines skipped)",
        "Store:".bold(),
        report.loaded,
        store.path().display(),
        report.skipped
    );

    let port = resolve_port(&args.port)?;
    let mut device = DeviceClient::new(&port, args.baud)?;
    std::thread::sleep(Duration::from_secs(1));
    device.clear_buffer()?;
    // Scan sweeps can hold the radio task for a while
    device.set_timeout(Duration::from_secs(10));

    let mut seeded = 0usize;
    for address in known.as_slice() {
        match device.add_known(address)? {
            Response::Ack { .. } => seeded += 1,
            Response::Error {
                status: ResponseStatus::StorageError,
                ..
            } => {
                println!(
                    "{} device store full after {} addresses, the rest may be re-confirmed",
                    "WARN".yellow(),
                    seeded
                );
                break;
            }
            other => anyhow::bail!("device refused known address {}: {:?}", hex(address), other),
        }
    }
    println!("{} {} known addresses sent to the device", "Seed:".bold(), seeded);

    match device.sniff_start(args.min_channel, args.max_channel, args.scan_time, rate, !args.no_rpd)? {
        Response::Ack { .. } => println!(
            "{} channels {}..={}, {} ms per channel",
            "Discovery started:".green().bold(),
            args.min_channel,
            args.max_channel,
            args.scan_time
        ),
        other => anyhow::bail!("device refused to start: {:?}", other),
    }

    let started = Instant::now();
    let mut last_status = Instant::now();
    let mut new_here = 0usize;

    loop {
        if let Some(limit) = args.duration {
            if started.elapsed() >= Duration::from_secs(limit) {
                break;
            }
        }

        if let Some(Response::AddressConfirmed { address }) =
            device.next_notification(Duration::from_millis(500))?
        {
            match record(&mut known, &mut store, &address)? {
                Insert::Added => {
                    new_here += 1;
                    println!("{} {}", "CONFIRMED".green().bold(), hex(&address));
                }
                Insert::AlreadyKnown => println!("{} {} (known)", "confirmed".dimmed(), hex(&address)),
                Insert::Full => println!("{} {} not recorded, host list full", "WARN".yellow(), hex(&address)),
            }
        }

        if last_status.elapsed() >= Duration::from_secs(args.status_every) {
            last_status = Instant::now();
            if let Response::Status(report) = device.status()? {
                println!(
                    "ch {:>3} | confirmed {} (+{}) | testing {} | last {}",
                    report.channel.map_or("-".to_string(), |c| c.to_string()),
                    report.total_confirmed,
                    report.new_confirmed,
                    report.testing.map_or("-".to_string(), |a| hex(&a)),
                    report.last_sniffed.map_or("-".to_string(), |a| hex(&a)),
                );
            }
        }
    }

    device.sniff_stop()?;
    // Confirmations flushed by the final wrap-up
    while let Some(response) = device.next_notification(Duration::from_millis(200))? {
        if let Response::AddressConfirmed { address } = response {
            if record(&mut known, &mut store, &address)? == Insert::Added {
                new_here += 1;
                println!("{} {}", "CONFIRMED".green().bold(), hex(&address));
            }
        }
    }
    store.close();

    println!("{} {} new addresses recorded", "Done:".bold(), new_here);
    Ok(())
}

/// Write a reported address to the file, then count it as known.
///
/// Fails when the file write fails, leaving `known` untouched.
fn record(
    known: &mut ConfirmedList<HOST_CAPACITY>,
    store: &mut FileStore,
    address: &NetAddress,
) -> anyhow::Result<Insert> {
    if known.contains(address) {
        return Ok(Insert::AlreadyKnown);
    }
    if known.is_full() {
        return Ok(Insert::Full);
    }
    store
        .append(address)
        .map_err(|e| anyhow::anyhow!("cannot append to {}: {:?}", store.path().display(), e))?;
    Ok(known.insert(address))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: NetAddress = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE];

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sniff-monitor-{}-{}.txt", name, std::process::id()))
    }

    #[test]
    fn test_record_writes_before_counting() {
        let path = temp_path("record");
        let _ = std::fs::remove_file(&path);
        let mut store = FileStore::new(&path);
        let mut known: ConfirmedList<HOST_CAPACITY> = ConfirmedList::new();
        store.load(&mut known).unwrap();

        assert_eq!(record(&mut known, &mut store, &PEER).unwrap(), Insert::Added);
        assert_eq!(record(&mut known, &mut store, &PEER).unwrap(), Insert::AlreadyKnown);
        store.close();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "AABBCCDDEE\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_record_failed_write_is_an_error() {
        // Never loaded, so the append cannot reach the file
        let mut store = FileStore::new(temp_path("unopened"));
        let mut known: ConfirmedList<HOST_CAPACITY> = ConfirmedList::new();

        assert!(record(&mut known, &mut store, &PEER).is_err());
        assert!(known.is_empty());
    }
}
