//! Command line front end that runs sweeps and dumps the spectrum.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{info, warn};
use rtlscan_engine::{
    EstimatorConfig, Extent, LocalDevice, ScanConfig, Scanner, SpectrumStore, WindowFunction, estimate_ppm,
};
use rtlscan_messages::{
    DEFAULT_PORT, Decibels, DeviceDescriptor, Hertz, StatusEvent, SweepRange, Timestamp, TunerIdentity, TunerType,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "rtlscan")]
#[command(about = "Sweep an RTL-SDR across a frequency range and record the spectrum")]
pub struct Args {
    /// Start frequency in MHz
    #[arg(short, long, required_unless_present = "calibrate")]
    pub start: Option<f64>,

    /// End frequency in MHz
    #[arg(short, long, required_unless_present = "calibrate")]
    pub end: Option<f64>,

    /// Number of sweeps
    #[arg(long, default_value_t = 1)]
    pub sweeps: u32,

    /// Gain in dB
    #[arg(short, long, default_value_t = 0.0)]
    pub gain: f32,

    /// Dwell time per step in seconds
    #[arg(short, long, default_value_t = 0.1)]
    pub dwell: f64,

    /// FFT bins per capture
    #[arg(short, long, default_value_t = 1024)]
    pub fft: u32,

    /// Up/down converter local oscillator in MHz
    #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub lo: f64,

    /// Local device index
    #[arg(short, long, default_value_t = 0, conflicts_with = "remote")]
    pub index: u32,

    /// rtl_tcp server as host[:port]
    #[arg(short, long)]
    pub remote: Option<String>,

    /// Pause between sweeps in seconds
    #[arg(long, default_value_t = 0.0)]
    pub delay: f64,

    /// Frequency correction in ppm
    #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub calibration: f64,

    /// Measure the frequency correction against a carrier at this MHz
    #[arg(long)]
    pub calibrate: Option<f64>,

    /// FFT window: bartlett, blackman, hamming or hanning
    #[arg(long, default_value_t = WindowFunction::Hamming)]
    pub window: WindowFunction,

    /// Average all sweeps into one instead of keeping each
    #[arg(long)]
    pub average: bool,

    /// Report levels above this many dB
    #[arg(long, allow_negative_numbers = true)]
    pub alert: Option<f32>,

    /// Write the spectrum as JSON
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Args {
    /// The sweep range, at least one MHz wide.
    pub fn range(&self) -> Result<SweepRange> {
        if let Some(reference) = self.calibrate {
            return SweepRange::calibration(reference, self.dwell, self.fft).context("Invalid calibration sweep");
        }
        let (Some(start), Some(mut end)) = (self.start, self.end) else {
            bail!("Start and end frequencies are required");
        };
        // Only widen a valid range; an inverted one is reported as such
        if end >= start && end - 1.0 < start {
            end = start + 1.0;
        }
        SweepRange::new(start, end, self.dwell, self.fft).context("Invalid sweep")
    }

    pub fn device(&self) -> Result<DeviceDescriptor> {
        let mut device = match &self.remote {
            Some(remote) => {
                let (host, port) = parse_remote(remote)?;
                DeviceDescriptor::remote(host, port)
            }
            None => DeviceDescriptor::local(self.index),
        };
        device.gain = Decibels(self.gain);
        device.lo_offset = Hertz::mhz(self.lo);
        device.calibration_ppm = self.calibration;
        Ok(device)
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            estimator: EstimatorConfig {
                window: self.window,
                ..EstimatorConfig::default()
            },
            retain: !self.average,
            alert_level: self.alert,
            ..ScanConfig::default()
        }
    }
}

/// Check a local device index against the attached dongles and snap the
/// gain to the nearest value the dongle supports.
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub fn check_local(device: &mut DeviceDescriptor, devices: &[LocalDevice]) -> Result<()> {
    let TunerIdentity::Local(index) = device.identity else {
        return Ok(());
    };
    if devices.is_empty() {
        bail!("No devices found");
    }
    let Some(found) = devices.iter().find(|found| found.index == index) else {
        let mut message = format!("Device not found ({} devices in total):", devices.len());
        for found in devices {
            message.push_str(&format!("\n\t{}: {}", found.index, found.name));
        }
        bail!(message);
    };
    let gain = found.nearest_gain(device.gain);
    if gain != device.gain {
        info!("Gain {} not supported by {}, using {}", device.gain, found.name, gain);
    }
    device.gain = gain;
    Ok(())
}

/// Split `host[:port]`, defaulting the port.
pub fn parse_remote(remote: &str) -> Result<(String, u16)> {
    let (host, port) = match remote.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.starts_with('[') => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid port in '{remote}'"))?;
            (host, port)
        }
        _ => (remote, DEFAULT_PORT),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        bail!("Invalid hostname in '{remote}'");
    }
    Ok((host.to_string(), port))
}

/// Everything written to the output file.
#[derive(Debug, Serialize)]
pub struct ScanReport<'a> {
    pub version: u32,
    pub start: f64,
    pub stop: f64,
    pub dwell: f64,
    pub nfft: u32,
    pub device: String,
    pub gain: f32,
    pub lo: f64,
    pub calibration: f64,
    pub tuner: String,
    pub time: Option<Timestamp>,
    pub extent: Option<Extent>,
    pub spectrum: &'a SpectrumStore,
}

pub fn write_report(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report).context("Cannot serialize spectrum")?;
    writer.flush().with_context(|| format!("Cannot write {}", path.display()))?;
    Ok(())
}

pub fn run(args: &Args) -> Result<()> {
    let range = args.range()?;
    #[allow(unused_mut)]
    let mut device = args.device()?;
    #[cfg(feature = "hardware")]
    check_local(&mut device, &rtlscan_engine::list_devices())?;
    print_settings(&range, &device);

    let mut scanner = Scanner::new(args.scan_config())?;
    let is_calibration = args.calibrate.is_some();
    let sweeps = if is_calibration { 1 } else { args.sweeps.max(1) };
    let mut tuner = TunerType::Unknown;

    for sweep in 1..=sweeps {
        if sweeps > 1 {
            println!("Sweep {sweep} of {sweeps}");
        }
        let events = scanner.start_sweep(device.clone(), range.clone(), is_calibration)?;
        for event in events {
            match event {
                StatusEvent::Starting => println!("Starting"),
                StatusEvent::TunerInfo(found) => tuner = found,
                StatusEvent::Progress(percent) => {
                    print!("\r{percent:.1}%");
                    std::io::stdout().flush()?;
                }
                StatusEvent::Warning(message) => warn!("{message}"),
                StatusEvent::Alert { freq, level } => println!("\rAlert: {level:.1} dB at {freq:.4} MHz"),
                StatusEvent::Error(message) => {
                    println!();
                    return Err(anyhow!("Sweep failed: {message}"));
                }
                StatusEvent::Stopped | StatusEvent::Finished { .. } => println!("\r100.0%"),
                _ => {}
            }
        }
        scanner.wait();

        if sweep < sweeps && args.delay > 0.0 {
            thread::sleep(Duration::from_secs_f64(args.delay));
        }
    }

    let store = scanner.store();
    let extent = store.extent();
    print_summary(&store, extent.as_ref());

    if let Some(reference) = args.calibrate {
        match estimate_ppm(&store, reference) {
            Some(ppm) => println!("Calibration: {ppm:.2} ppm"),
            None => bail!("No signal found near {reference} MHz"),
        }
    }

    if let Some(path) = &args.output {
        let report = ScanReport {
            version: 1,
            start: range.start_mhz(),
            stop: range.stop_mhz(),
            dwell: range.dwell(),
            nfft: range.fft_bins(),
            device: device.identity.to_string(),
            gain: device.gain.as_db(),
            lo: device.lo_offset.as_mhz(),
            calibration: device.calibration_ppm,
            tuner: tuner.to_string(),
            time: store.first_timestamp(),
            extent,
            spectrum: &store,
        };
        write_report(path, &report)?;
        info!("Spectrum written to {}", path.display());
    }

    println!("Done");
    Ok(())
}

fn print_settings(range: &SweepRange, device: &DeviceDescriptor) {
    println!("{} - {}MHz", range.start_mhz(), range.stop_mhz());
    println!("{}dB Gain", device.gain.as_db());
    println!("{}s Dwell", range.dwell());
    println!("{} FFT points", range.fft_bins());
    println!("{}MHz LO", device.lo_offset.as_mhz());
    match &device.identity {
        TunerIdentity::Remote { host, port } => println!("{host}:{port}"),
        TunerIdentity::Local(index) => println!("Device {index}"),
    }
}

fn print_summary(store: &SpectrumStore, extent: Option<&Extent>) {
    let Some(extent) = extent else {
        println!("No data");
        return;
    };
    println!("{} sweeps, {} points", store.len(), store.count_points());
    println!("{:.4} - {:.4}MHz, {:.1} - {:.1}dB", extent.f_min, extent.f_max, extent.l_min, extent.l_max);
    if let Some((freq, level, _)) = extent.peak {
        println!("Peak {level:.1}dB at {freq:.4}MHz");
    }
}
