use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use num_complex::Complex;
use rtlscan_engine::sweep::StepPlan;
use rtlscan_engine::{
    ChannelSink, EngineError, ScanConfig, Scanner, SweepConfig, SweepController, SweepOutcome, Tuner, TunerError,
    TunerOpener,
};
use rtlscan_messages::{Decibels, DeviceDescriptor, Hertz, StatusEvent, SweepRange, SweepState, TunerType};

// Scripted tuner backend

#[derive(Debug, Clone, Copy)]
enum Fault {
    Transient,
    Programming,
    Empty,
}

#[derive(Default)]
struct Script {
    opens: AtomicUsize,
    closes: AtomicUsize,
    /// Outcome of each read in order; `None` or an exhausted queue succeeds.
    reads: Mutex<VecDeque<Option<Fault>>>,
    /// Outcome of each open in order; an exhausted queue succeeds.
    open_failures: Mutex<VecDeque<Option<TunerError>>>,
    tuned: Mutex<Vec<f64>>,
    read_delay: Option<Duration>,
    warning: Option<String>,
}

impl Script {
    fn with_reads(reads: Vec<Option<Fault>>) -> Arc<Self> {
        Arc::new(Self {
            reads: Mutex::new(reads.into()),
            ..Self::default()
        })
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct ScriptedOpener(Arc<Script>);

impl TunerOpener for ScriptedOpener {
    fn open(&self, _device: &DeviceDescriptor) -> Result<Box<dyn Tuner>, TunerError> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(Some(e)) = self.0.open_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok(Box::new(ScriptedTuner(Arc::clone(&self.0))))
    }
}

struct ScriptedTuner(Arc<Script>);

impl Tuner for ScriptedTuner {
    fn set_sample_rate(&mut self, _rate: Hertz) -> Result<(), TunerError> {
        Ok(())
    }

    fn set_gain(&mut self, _gain: Decibels) -> Result<(), TunerError> {
        Ok(())
    }

    fn set_center_freq(&mut self, freq: Hertz) -> Result<(), TunerError> {
        self.0.tuned.lock().unwrap().push(freq.as_hz());
        Ok(())
    }

    fn read_samples(&mut self, count: usize) -> Result<Vec<Complex<f32>>, TunerError> {
        if let Some(delay) = self.0.read_delay {
            thread::sleep(delay);
        }
        match self.0.reads.lock().unwrap().pop_front().flatten() {
            Some(Fault::Transient) => Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "usb hiccup").into()),
            Some(Fault::Programming) => Err(TunerError::Programming("bad argument".into())),
            Some(Fault::Empty) => Ok(Vec::new()),
            None => Ok(vec![Complex::new(0.5, 0.0); count]),
        }
    }

    fn tuner_type(&self) -> TunerType {
        TunerType::R820T
    }

    fn open_warning(&self) -> Option<String> {
        self.0.warning.clone()
    }

    fn close(&mut self) -> Result<(), TunerError> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Helpers

fn range() -> SweepRange {
    SweepRange::new(100.0, 101.0, 0.001, 256).unwrap()
}

fn fast_config() -> ScanConfig {
    ScanConfig {
        sweep: SweepConfig {
            retry_delay: Duration::from_millis(1),
            max_retries: None,
        },
        ..ScanConfig::default()
    }
}

fn scanner(script: &Arc<Script>, config: ScanConfig) -> Scanner {
    Scanner::with_opener(config, Arc::new(ScriptedOpener(Arc::clone(script)))).unwrap()
}

fn run_sweep(script: &Arc<Script>, config: ScanConfig) -> (Scanner, Vec<StatusEvent>) {
    let mut scanner = scanner(script, config);
    let events: Vec<StatusEvent> = scanner
        .start_sweep(DeviceDescriptor::default(), range(), false)
        .unwrap()
        .collect();
    scanner.wait();
    (scanner, events)
}

fn data_freqs(events: &[StatusEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            StatusEvent::Data { freq, .. } => Some(*freq),
            _ => None,
        })
        .collect()
}

fn expected_freqs() -> Vec<f64> {
    StepPlan::new(&DeviceDescriptor::default(), &range()).frequencies().collect()
}

// Tests

#[test]
fn test_sweep_event_sequence() {
    let script = Script::with_reads(Vec::new());
    let (scanner, events) = run_sweep(&script, fast_config());

    assert!(matches!(events[0], StatusEvent::Starting));
    assert!(matches!(events[1], StatusEvent::StepCount(7)));
    assert!(matches!(events[2], StatusEvent::TunerInfo(TunerType::R820T)));
    assert!(matches!(events[3], StatusEvent::Progress(p) if p == 0.0));
    assert!(matches!(events.last(), Some(StatusEvent::Finished { is_calibration: false })));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let processed = events
        .iter()
        .filter(|e| matches!(e, StatusEvent::Processed { .. }))
        .count();
    assert_eq!(processed, 7);

    assert_eq!(scanner.state(), None);
    assert_eq!(script.opens(), 1);
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_data_frequencies_step_by_half_bandwidth() {
    let script = Script::with_reads(Vec::new());
    let (_, events) = run_sweep(&script, fast_config());

    let freqs = data_freqs(&events);
    assert_eq!(freqs, expected_freqs());
    assert_eq!(freqs[0], 99_750_000.0);
    for pair in freqs.windows(2) {
        assert!(pair[1] > pair[0]);
        assert_eq!(pair[1] - pair[0], 250_000.0);
    }
    // Tuned without a converter in front
    assert_eq!(*script.tuned.lock().unwrap(), freqs);
}

#[test]
fn test_lo_offset_shifts_tuning_only() {
    let script = Script::with_reads(Vec::new());
    let mut scanner = scanner(&script, fast_config());
    let device = DeviceDescriptor {
        lo_offset: Hertz::mhz(-50.0),
        ..DeviceDescriptor::default()
    };
    let events: Vec<StatusEvent> = scanner.start_sweep(device, range(), false).unwrap().collect();
    scanner.wait();

    let freqs = data_freqs(&events);
    let tuned = script.tuned.lock().unwrap().clone();
    assert_eq!(freqs, expected_freqs());
    for (tuned, nominal) in tuned.iter().zip(&freqs) {
        assert_eq!(*tuned, nominal - 50_000_000.0);
    }
}

#[test]
fn test_transient_errors_reopen_and_retry_same_step() {
    let transient = Some(Fault::Transient);
    let script = Script::with_reads(vec![None, transient, transient, transient]);
    let (_, events) = run_sweep(&script, fast_config());

    // One initial open plus one reopen per failure
    assert_eq!(script.opens(), 4);
    assert_eq!(data_freqs(&events), expected_freqs());

    let retries: Vec<(f64, u32)> = events
        .iter()
        .filter_map(|event| match event {
            StatusEvent::Retrying { freq, attempt, .. } => Some((*freq, *attempt)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(100_000_000.0, 1), (100_000_000.0, 2), (100_000_000.0, 3)]);
    assert!(matches!(events.last(), Some(StatusEvent::Finished { .. })));
}

#[test]
fn test_failed_reopen_is_retried() {
    let script = Arc::new(Script {
        reads: Mutex::new(vec![Some(Fault::Transient)].into()),
        open_failures: Mutex::new(
            vec![
                None,
                Some(TunerError::Connect("refused".into())),
                Some(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into()),
            ]
            .into(),
        ),
        ..Script::default()
    });
    let (_, events) = run_sweep(&script, fast_config());

    assert_eq!(script.opens(), 4);
    assert_eq!(data_freqs(&events), expected_freqs());
    assert!(matches!(events.last(), Some(StatusEvent::Finished { .. })));
}

#[test]
fn test_retry_cap_ends_sweep() {
    let transient = Some(Fault::Transient);
    let script = Script::with_reads(vec![transient; 10]);
    let mut config = fast_config();
    config.sweep.max_retries = Some(2);
    let (mut scanner, events) = run_sweep(&script, config);

    assert!(data_freqs(&events).is_empty());
    match events.last() {
        Some(StatusEvent::Error(message)) => assert_eq!(message, "Giving up after 2 retries"),
        other => panic!("expected Error, got {other:?}"),
    }
    assert_eq!(scanner.wait(), None);
}

#[test]
fn test_programming_error_is_fatal() {
    let script = Script::with_reads(vec![None, Some(Fault::Programming)]);
    let (_, events) = run_sweep(&script, fast_config());

    assert_eq!(data_freqs(&events).len(), 1);
    assert!(matches!(events.last(), Some(StatusEvent::Error(m)) if m == "bad argument"));
    assert_eq!(script.opens(), 1);
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_empty_capture_is_fatal() {
    let script = Script::with_reads(vec![Some(Fault::Empty)]);
    let (_, events) = run_sweep(&script, fast_config());

    assert!(data_freqs(&events).is_empty());
    assert!(matches!(events.last(), Some(StatusEvent::Error(m)) if m == "No samples returned"));
}

#[test]
fn test_open_failure_is_fatal() {
    let script = Arc::new(Script {
        open_failures: Mutex::new(vec![Some(TunerError::Connect("no device".into()))].into()),
        ..Script::default()
    });
    let (_, events) = run_sweep(&script, fast_config());

    assert_eq!(events.len(), 3);
    assert!(matches!(events[2], StatusEvent::Error(ref m) if m.contains("no device")));
}

#[test]
fn test_stop_ends_with_stopped() {
    let script = Arc::new(Script {
        read_delay: Some(Duration::from_millis(10)),
        ..Script::default()
    });
    let mut scanner = scanner(&script, fast_config());
    let wide = SweepRange::new(100.0, 120.0, 0.001, 256).unwrap();
    let mut stream = scanner.start_sweep(DeviceDescriptor::default(), wide, false).unwrap();

    loop {
        let event = stream.recv_timeout(Duration::from_secs(5)).unwrap();
        if matches!(event, StatusEvent::Data { .. }) {
            break;
        }
    }
    scanner.stop_sweep();

    let rest: Vec<StatusEvent> = stream.collect();
    assert!(matches!(rest.last(), Some(StatusEvent::Stopped)));
    assert!(data_freqs(&rest).len() < 80);
    assert_eq!(scanner.wait(), Some(SweepOutcome::Stopped));
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_second_sweep_rejected_while_running() {
    let script = Arc::new(Script {
        read_delay: Some(Duration::from_millis(10)),
        ..Script::default()
    });
    let mut scanner = scanner(&script, fast_config());
    let _stream = scanner.start_sweep(DeviceDescriptor::default(), range(), false).unwrap();

    let second = scanner.start_sweep(DeviceDescriptor::default(), range(), false);
    assert!(matches!(second, Err(EngineError::SweepRunning)));
    assert!(scanner.is_running());

    scanner.stop_sweep();
    assert_eq!(scanner.wait(), Some(SweepOutcome::Stopped));
    assert!(!scanner.is_running());
}

#[test]
fn test_restart_right_after_stream_ends() {
    let script = Script::with_reads(Vec::new());
    let mut scanner = scanner(&script, fast_config());
    let narrow = SweepRange::new(100.0, 100.1, 0.0001, 64).unwrap();

    for sweep in 0..200 {
        let stream = scanner
            .start_sweep(DeviceDescriptor::default(), narrow.clone(), false)
            .unwrap_or_else(|e| panic!("sweep {sweep} rejected: {e}"));
        let last = stream.last();
        assert!(matches!(last, Some(StatusEvent::Finished { .. })), "sweep {sweep}");
        assert!(!scanner.is_running(), "sweep {sweep}");
    }
    assert_eq!(scanner.wait(), Some(SweepOutcome::Finished));
    assert_eq!(script.opens(), 200);
}

#[test]
fn test_stop_while_reopening() {
    let failures = (0..10_000)
        .map(|i| (i > 0).then(|| TunerError::Connect("connection refused".into())))
        .collect::<Vec<_>>();
    let script = Arc::new(Script {
        reads: Mutex::new(vec![Some(Fault::Transient)].into()),
        open_failures: Mutex::new(failures.into()),
        ..Script::default()
    });
    let config = ScanConfig {
        sweep: SweepConfig {
            retry_delay: Duration::from_millis(5),
            max_retries: None,
        },
        ..ScanConfig::default()
    };
    let mut scanner = scanner(&script, config);
    let mut stream = scanner.start_sweep(DeviceDescriptor::default(), range(), false).unwrap();

    loop {
        let event = stream.recv_timeout(Duration::from_secs(5)).unwrap();
        if matches!(event, StatusEvent::Retrying { .. }) {
            break;
        }
    }
    thread::sleep(Duration::from_millis(20));
    scanner.stop_sweep();

    let rest: Vec<StatusEvent> = stream.collect();
    assert!(matches!(rest.last(), Some(StatusEvent::Stopped)));
    assert!(data_freqs(&rest).is_empty());
    assert_eq!(scanner.wait(), Some(SweepOutcome::Stopped));
    assert!(script.opens() > 1);
    assert!(script.opens() < 10_000);
    // Only the first handle was ever opened successfully
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_invalid_device_rejected() {
    let script = Script::with_reads(Vec::new());
    let mut scanner = scanner(&script, fast_config());
    let device = DeviceDescriptor {
        bandwidth: Hertz(0.0),
        ..DeviceDescriptor::default()
    };
    let result = scanner.start_sweep(device, range(), false);
    assert!(matches!(result, Err(EngineError::InvalidSweep(_))));
    assert_eq!(script.opens(), 0);
}

#[test]
fn test_store_accumulates_within_range() {
    let script = Script::with_reads(Vec::new());
    let (scanner, _) = run_sweep(&script, fast_config());

    let store = scanner.store();
    assert_eq!(store.len(), 1);
    let extent = store.extent().unwrap();
    assert!(extent.f_min >= 100.0);
    assert!(extent.f_max < 101.0);
    // Captures overlap, so the sweep is covered end to end
    assert!(extent.f_min < 100.01);
    assert!(extent.f_max > 100.99);
}

#[test]
fn test_retained_and_averaged_sweeps() {
    let script = Script::with_reads(Vec::new());
    let mut scanner = scanner(&script, fast_config());
    for _ in 0..2 {
        scanner.start_sweep(DeviceDescriptor::default(), range(), false).unwrap().for_each(drop);
        scanner.wait();
        // Sweeps are keyed by the second they started in
        thread::sleep(Duration::from_millis(1100));
    }
    assert_eq!(scanner.store().len(), 2);

    let mut config = fast_config();
    config.retain = false;
    let mut averaging = Scanner::with_opener(config, Arc::new(ScriptedOpener(Arc::clone(&script)))).unwrap();
    for _ in 0..2 {
        averaging.start_sweep(DeviceDescriptor::default(), range(), false).unwrap().for_each(drop);
        averaging.wait();
        thread::sleep(Duration::from_millis(1100));
    }
    assert_eq!(averaging.store().len(), 1);

    averaging.clear_store();
    assert!(averaging.store().is_empty());
}

#[test]
fn test_alert_above_level() {
    let script = Script::with_reads(Vec::new());
    let mut config = fast_config();
    config.alert_level = Some(-300.0);
    let (_, events) = run_sweep(&script, config);
    assert!(events.iter().any(|e| matches!(e, StatusEvent::Alert { .. })));

    let mut config = fast_config();
    config.alert_level = Some(100.0);
    let (_, events) = run_sweep(&script, config);
    assert!(!events.iter().any(|e| matches!(e, StatusEvent::Alert { .. })));
}

#[test]
fn test_calibration_sweep_ignores_ppm() {
    let script = Script::with_reads(Vec::new());
    let mut scanner = scanner(&script, fast_config());
    let device = DeviceDescriptor {
        calibration_ppm: 50.0,
        ..DeviceDescriptor::default()
    };
    let cal = SweepRange::calibration(100.5, 0.001, 256).unwrap();
    let events: Vec<StatusEvent> = scanner.start_sweep(device, cal, true).unwrap().collect();
    scanner.wait();

    assert!(matches!(events.last(), Some(StatusEvent::Finished { is_calibration: true })));
    let first = events.iter().find_map(|event| match event {
        StatusEvent::Processed { freq, slice, .. } => Some((*freq, slice.clone())),
        _ => None,
    });
    let (freq, slice) = first.unwrap();
    // Bins start exactly half the sample rate below the capture centre
    assert_eq!(slice.min_freq(), Some(freq / 1e6 - 1.0));
}

#[test]
fn test_controller_runs_on_caller_thread() {
    let script = Arc::new(Script {
        warning: Some("short handshake".into()),
        ..Script::default()
    });
    let (sink, event_rx) = ChannelSink::unbounded();
    let controller = SweepController::new(
        DeviceDescriptor::default(),
        range(),
        false,
        SweepConfig::default(),
        Arc::new(ScriptedOpener(Arc::clone(&script))),
        Arc::new(sink),
    )
    .with_timestamp(42.0);
    assert_eq!(controller.state(), SweepState::Starting);

    assert_eq!(controller.run(), SweepOutcome::Finished);
    let events: Vec<StatusEvent> = event_rx.drain().collect();
    assert!(matches!(&events[2], StatusEvent::Warning(m) if m == "short handshake"));
    assert!(matches!(events[3], StatusEvent::TunerInfo(TunerType::R820T)));
    assert!(
        events
            .iter()
            .all(|e| !matches!(e, StatusEvent::Data { timestamp, .. } if *timestamp != 42.0))
    );
}

#[test]
fn test_dropped_receiver_stops_sweep() {
    let script = Script::with_reads(Vec::new());
    let (sink, event_rx) = ChannelSink::unbounded();
    drop(event_rx);
    let controller = SweepController::new(
        DeviceDescriptor::default(),
        SweepRange::new(100.0, 200.0, 0.001, 256).unwrap(),
        false,
        SweepConfig::default(),
        Arc::new(ScriptedOpener(Arc::clone(&script))),
        Arc::new(sink),
    );
    assert_eq!(controller.run(), SweepOutcome::Stopped);
    assert_eq!(script.tuned.lock().unwrap().len(), 1);
}
