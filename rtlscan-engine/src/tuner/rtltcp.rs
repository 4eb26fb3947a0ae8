//! Client for the rtl_tcp network protocol.
//!
//! Wire format:
//! - on connect the server sends a 12 byte header: `"RTL0"`, the tuner type
//!   (u32, big-endian) and the number of gain steps (u32, big-endian)
//! - commands are 5 bytes: opcode (u8) then parameter (i32, big-endian)
//! - samples stream continuously as interleaved unsigned 8 bit I/Q pairs
//!
//! The server never stops streaming, so a background thread discards
//! whatever arrives while nobody is reading ("bucket mode"). The read path
//! switches bucket mode off for exactly as long as a read is in flight.

use log::{debug, info, warn};
use num_complex::Complex;
use rtlscan_messages::{Decibels, Hertz, TunerType};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{Tuner, gain_tenths, hz_to_u32};
use crate::error::{Result, TunerError};
use crate::lock;

/// Header prefix sent by rtl_tcp ("RTL" followed by a version byte).
pub const MAGIC: &[u8; 3] = b"RTL";
pub const HANDSHAKE_LEN: usize = 12;
const DRAIN_CHUNK: usize = 4096;

/// rtl_tcp command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    SetFrequency = 0x1,
    SetSampleRate = 0x2,
    SetGainMode = 0x3,
    SetGain = 0x4,
}

/// Connection tuning for [`RtlTcp`].
#[derive(Debug, Clone)]
pub struct RtlTcpOptions {
    pub connect_timeout: Duration,
    /// How long to wait for the 12 byte header before giving up on it.
    pub handshake_timeout: Duration,
    /// A read that makes no progress for this long fails.
    pub io_timeout: Duration,
    /// Stream discarded after every retune while the tuner settles.
    pub settle: Duration,
    /// Socket poll period; bounds how long the drain thread holds the socket.
    pub poll_interval: Duration,
}

impl Default for RtlTcpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(5),
            settle: Duration::from_millis(100),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Build a 5 byte command packet.
pub fn encode_command(opcode: Opcode, param: i32) -> [u8; 5] {
    let mut packet = [0u8; 5];
    packet[0] = opcode as u8;
    packet[1..].copy_from_slice(&param.to_be_bytes());
    packet
}

/// Extract the tuner type from a server header.
pub fn parse_handshake(header: &[u8]) -> Result<TunerType> {
    if header.len() < HANDSHAKE_LEN {
        return Err(TunerError::Protocol(format!(
            "short handshake ({} of {HANDSHAKE_LEN} bytes)",
            header.len()
        )));
    }
    if !header.starts_with(MAGIC) {
        return Err(TunerError::Protocol("handshake is missing the RTL magic".into()));
    }
    let code = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    Ok(TunerType::from_code(code))
}

/// Convert interleaved unsigned 8 bit I/Q to complex samples in [-1, 1].
pub fn samples_from_bytes(raw: &[u8]) -> Vec<Complex<f32>> {
    raw.chunks_exact(2)
        .map(|iq| {
            Complex::new(
                (f32::from(iq[0]) - 127.5) / 127.5,
                (f32::from(iq[1]) - 127.5) / 127.5,
            )
        })
        .collect()
}

/// Read exactly `len` bytes, tolerating fragmented delivery and poll
/// timeouts. Fails if no byte arrives for `timeout`.
pub fn read_full<R: Read>(reader: &mut R, len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    let mut last_progress = Instant::now();

    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {filled} of {len} bytes"),
                ));
            }
            Ok(n) => {
                filled += n;
                last_progress = Instant::now();
            }
            Err(e) if is_poll_timeout(&e) => {
                if last_progress.elapsed() >= timeout {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data for {timeout:?} ({filled} of {len} bytes)"),
                    ));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(buf)
}

fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// State shared between the read path and the drain thread.
struct Shared {
    /// Claim on the socket's receive side.
    reader: Mutex<TcpStream>,
    /// Discard incoming data; off while a read is in flight.
    bucket: AtomicBool,
    cancel: AtomicBool,
    /// Why the drain thread gave up, if it did.
    fault: Mutex<Option<String>>,
    park: Mutex<()>,
    wake: Condvar,
}

impl Shared {
    fn set_bucket(&self, on: bool) {
        self.bucket.store(on, Ordering::SeqCst);
        self.wake.notify_all();
    }
}

/// A connection to an rtl_tcp server.
pub struct RtlTcp {
    writer: TcpStream,
    shared: Arc<Shared>,
    drain: Option<JoinHandle<()>>,
    tuner: TunerType,
    warning: Option<String>,
    sample_rate: Hertz,
    options: RtlTcpOptions,
}

impl std::fmt::Debug for RtlTcp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtlTcp")
            .field("peer", &self.writer.peer_addr().ok())
            .field("tuner", &self.tuner)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl RtlTcp {
    /// Connect, read the header and start draining the sample stream.
    pub fn connect(host: &str, port: u16, options: RtlTcpOptions) -> Result<Self> {
        info!("Connecting to rtl_tcp at {host}:{port}");
        let stream = open_stream(host, port, options.connect_timeout)?;

        stream
            .set_read_timeout(Some(options.handshake_timeout))
            .map_err(|e| TunerError::Connect(format!("{host}:{port}: {e}")))?;
        let header = read_handshake(&stream)
            .map_err(|e| TunerError::Connect(format!("{host}:{port}: handshake failed: {e}")))?;

        let (tuner, warning) = match parse_handshake(&header) {
            Ok(tuner) => {
                info!("rtl_tcp tuner: {tuner}");
                (tuner, None)
            }
            Err(e) => {
                warn!("{host}:{port}: {e}, tuner type unknown");
                (TunerType::Unknown, Some(e.to_string()))
            }
        };

        let setup = |e: io::Error| TunerError::Connect(format!("{host}:{port}: {e}"));
        stream.set_read_timeout(Some(options.poll_interval)).map_err(setup)?;
        let writer = stream.try_clone().map_err(setup)?;

        let shared = Arc::new(Shared {
            reader: Mutex::new(stream),
            bucket: AtomicBool::new(true),
            cancel: AtomicBool::new(false),
            fault: Mutex::new(None),
            park: Mutex::new(()),
            wake: Condvar::new(),
        });

        let drain_shared = Arc::clone(&shared);
        let poll = options.poll_interval;
        let drain = thread::Builder::new()
            .name("rtltcp-drain".into())
            .spawn(move || drain_loop(&drain_shared, poll))
            .map_err(setup)?;

        Ok(Self {
            writer,
            shared,
            drain: Some(drain),
            tuner,
            warning,
            sample_rate: Hertz(0.0),
            options,
        })
    }

    fn send_command(&mut self, opcode: Opcode, param: i32) -> Result<()> {
        debug!("rtl_tcp command {opcode:?} {param}");
        self.writer.write_all(&encode_command(opcode, param))?;
        Ok(())
    }

    /// Read exactly `samples` I/Q pairs (`2 * samples` bytes) of raw stream.
    pub fn read_raw(&mut self, samples: usize) -> Result<Vec<u8>> {
        self.read_bytes(samples * 2)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if let Some(fault) = lock(&self.shared.fault).clone() {
            return Err(TunerError::TransientIo(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                fault,
            )));
        }

        self.shared.set_bucket(false);
        let result = {
            let mut reader = lock(&self.shared.reader);
            read_full(&mut *reader, len, self.options.io_timeout)
        };
        self.shared.set_bucket(true);

        Ok(result?)
    }

    /// Stop the drain thread, then tear the socket down.
    fn shutdown(&mut self) {
        let Some(drain) = self.drain.take() else {
            return;
        };
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if drain.join().is_err() {
            warn!("rtl_tcp drain thread panicked");
        }
        // The drain thread no longer touches the socket, so this cannot race a read
        if let Err(e) = self.writer.shutdown(Shutdown::Both) {
            debug!("rtl_tcp shutdown: {e}");
        }
    }
}

impl Tuner for RtlTcp {
    fn set_sample_rate(&mut self, rate: Hertz) -> Result<()> {
        let hz = hz_to_u32(rate)?;
        self.send_command(Opcode::SetSampleRate, hz as i32)?;
        self.sample_rate = rate;
        Ok(())
    }

    fn set_gain(&mut self, gain: Decibels) -> Result<()> {
        self.send_command(Opcode::SetGainMode, 1)?;
        self.send_command(Opcode::SetGain, gain_tenths(gain))
    }

    fn set_center_freq(&mut self, freq: Hertz) -> Result<()> {
        let hz = hz_to_u32(freq)?;
        self.send_command(Opcode::SetFrequency, hz as i32)?;

        // Throw away the retuning transient
        let fluff = (self.sample_rate.as_hz() * 2.0 * self.options.settle.as_secs_f64()) as usize;
        if fluff > 0 {
            self.read_bytes(fluff)?;
        }
        Ok(())
    }

    fn read_samples(&mut self, count: usize) -> Result<Vec<Complex<f32>>> {
        let raw = self.read_raw(count)?;
        Ok(samples_from_bytes(&raw))
    }

    fn tuner_type(&self) -> TunerType {
        self.tuner
    }

    fn open_warning(&self) -> Option<String> {
        self.warning.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for RtlTcp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_stream(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| TunerError::Connect(format!("{host}:{port}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream
                    .set_nodelay(true)
                    .map_err(|e| TunerError::Connect(format!("{addr}: {e}")))?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(TunerError::Connect(match last_error {
        Some(e) => format!("{host}:{port}: {e}"),
        None => format!("{host}:{port}: no address found"),
    }))
}

/// Read up to the header length; stops early on EOF or when the server
/// stays silent for the handshake timeout.
fn read_handshake(mut stream: &TcpStream) -> io::Result<Vec<u8>> {
    let mut header = vec![0u8; HANDSHAKE_LEN];
    let mut filled = 0;
    while filled < HANDSHAKE_LEN {
        match stream.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if is_poll_timeout(&e) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    header.truncate(filled);
    Ok(header)
}

fn drain_loop(shared: &Shared, poll: Duration) {
    let mut scratch = [0u8; DRAIN_CHUNK];
    let mut discarded = 0u64;

    while !shared.cancel.load(Ordering::SeqCst) {
        if !shared.bucket.load(Ordering::SeqCst) {
            let park = lock(&shared.park);
            let _ = shared
                .wake
                .wait_timeout_while(park, poll, |_| {
                    !shared.bucket.load(Ordering::SeqCst) && !shared.cancel.load(Ordering::SeqCst)
                })
                .unwrap_or_else(PoisonError::into_inner);
            continue;
        }

        let result = {
            let mut reader = lock(&shared.reader);
            // A read may have been requested while we waited for the socket
            if !shared.bucket.load(Ordering::SeqCst) {
                continue;
            }
            reader.read(&mut scratch)
        };

        match result {
            Ok(0) => {
                warn!("rtl_tcp server closed the connection");
                *lock(&shared.fault) = Some("connection closed by server".into());
                break;
            }
            Ok(n) => discarded += n as u64,
            Err(e) if is_poll_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("rtl_tcp drain failed: {e}");
                *lock(&shared.fault) = Some(e.to_string());
                break;
            }
        }
    }

    debug!("rtl_tcp drain stopped, {discarded} bytes discarded");
}
