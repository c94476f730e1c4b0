//! Multi-threaded stress tests for the pipe synchronizer.
//!
//! Run with tracing:
//! ```bash
//! RUST_LOG=msgpipe=debug cargo test --features tracing --test pipe_stress -- --nocapture
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

use minstant::Instant;
use rand::Rng;

use msgpipe::{Direction, OpenMode, Pipe, PipeConfig, PipeError, PipeObserver};

static INIT_TRACING: Once = Once::new();

/// Initialize tracing for tests (only once).
fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        msgpipe::init_tracing();
    });
}

/// Polls `condition` until it holds or five seconds pass.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..5000 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// One completed stay inside a direction's critical section.
#[derive(Debug, Clone, Copy)]
struct Interval {
    direction: Direction,
    enter_seq: u64,
    exit_seq: u64,
    held: Duration,
}

/// Records every critical section and the peak number of concurrent holders.
#[derive(Default)]
struct SectionRecorder {
    seq: AtomicU64,
    inside: [AtomicUsize; 2],
    peak: [AtomicUsize; 2],
    open: Mutex<[Option<(u64, Instant)>; 2]>,
    intervals: Mutex<Vec<Interval>>,
}

const fn slot(direction: Direction) -> usize {
    match direction {
        Direction::Read => 0,
        Direction::Write => 1,
    }
}

impl PipeObserver for SectionRecorder {
    fn on_enter(&self, direction: Direction) {
        let i = slot(direction);
        let now = self.inside[i].fetch_add(1, Ordering::SeqCst) + 1;
        self.peak[i].fetch_max(now, Ordering::SeqCst);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.open.lock().unwrap()[i] = Some((seq, Instant::now()));
    }

    fn on_exit(&self, direction: Direction) {
        let i = slot(direction);
        let exit_seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let (enter_seq, entered) = self.open.lock().unwrap()[i]
            .take()
            .expect("exit without enter");
        self.intervals.lock().unwrap().push(Interval {
            direction,
            enter_seq,
            exit_seq,
            held: entered.elapsed(),
        });
        self.inside[i].fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn test_conservation_under_contention() {
    init_test_tracing();

    let pipe = Pipe::new(PipeConfig::default()).unwrap();
    let writers: Vec<_> = (0..3)
        .map(|_| {
            let session = pipe.open(OpenMode::WriteOnly).unwrap();
            thread::spawn(move || {
                let mut rng = rand::rng();
                let mut sent = 0u64;
                for _ in 0..200 {
                    let len = rng.random_range(21..=64);
                    let message: Vec<u8> = (0..len).map(|_| rng.random_range(b'A'..=b'Z')).collect();
                    sent += session.write(&message).unwrap() as u64;
                }
                sent
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let session = pipe.open(OpenMode::ReadOnly).unwrap();
            let token = session.cancel_token();
            let handle = thread::spawn(move || {
                let mut buf = [0u8; 16];
                let mut received = 0u64;
                loop {
                    match session.read(&mut buf) {
                        Ok(n) => {
                            assert!(n > 0 && n <= buf.len());
                            received += n as u64;
                        }
                        Err(PipeError::Interrupted) => return received,
                        Err(e) => panic!("unexpected read error: {e}"),
                    }
                }
            });
            (token, handle)
        })
        .collect();

    // Snapshots taken mid-run always balance.
    for _ in 0..50 {
        let stats = pipe.stats();
        assert!(stats.is_conserved(), "{stats:?}");
        assert!(stats.occupancy <= stats.capacity);
        thread::sleep(Duration::from_millis(1));
    }

    let sent: u64 = writers.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(eventually(|| pipe.stats().occupancy == 0));

    let mut received = 0u64;
    for (token, handle) in readers {
        token.cancel();
        received += handle.join().unwrap();
    }

    let stats = pipe.stats();
    assert_eq!(stats.bytes_written, sent);
    assert_eq!(stats.bytes_read, received);
    assert_eq!(sent, received);
    assert_eq!(stats.writes, 600);
    assert!(stats.is_conserved());
    assert_eq!(stats.active_sessions, 0);
    assert!(!stats.storage_live);
}

#[test]
fn test_critical_sections_never_overlap() {
    init_test_tracing();

    let recorder = Arc::new(SectionRecorder::default());
    let config = PipeConfig::default()
        .with_capacity(32)
        .with_copy_delay(Duration::from_micros(200));
    let pipe = Pipe::with_observer(config, recorder.clone()).unwrap();

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let session = pipe.open(OpenMode::WriteOnly).unwrap();
            thread::spawn(move || {
                for _ in 0..100 {
                    session.write(&[b'x'; 12]).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let session = pipe.open(OpenMode::ReadOnly).unwrap();
            let token = session.cancel_token();
            let handle = thread::spawn(move || {
                let mut buf = [0u8; 7];
                while session.read(&mut buf).is_ok() {}
            });
            (token, handle)
        })
        .collect();

    for handle in writers {
        handle.join().unwrap();
    }
    assert!(eventually(|| pipe.stats().occupancy == 0));
    for (token, handle) in readers {
        token.cancel();
        handle.join().unwrap();
    }

    assert_eq!(recorder.peak[slot(Direction::Read)].load(Ordering::SeqCst), 1);
    assert_eq!(recorder.peak[slot(Direction::Write)].load(Ordering::SeqCst), 1);

    let intervals = recorder.intervals.lock().unwrap().clone();
    for direction in [Direction::Read, Direction::Write] {
        let mut own: Vec<_> = intervals
            .iter()
            .filter(|interval| interval.direction == direction)
            .collect();
        own.sort_by_key(|interval| interval.enter_seq);
        for pair in own.windows(2) {
            assert!(
                pair[1].enter_seq > pair[0].exit_seq,
                "{direction} sections overlap: {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    let writes = intervals
        .iter()
        .filter(|interval| interval.direction == Direction::Write)
        .count();
    assert_eq!(writes, 200);

    let held: Duration = intervals.iter().map(|interval| interval.held).sum();
    assert!(held >= Duration::from_micros(200) * 200);
}

#[test]
fn test_messages_never_interleave() {
    init_test_tracing();

    // Each writer repeats one letter in fixed-size messages. Any maximal run of
    // a letter in the read stream must then be a whole number of messages.
    const WRITERS: [(u8, usize); 3] = [(b'A', 10), (b'B', 13), (b'C', 17)];
    const MESSAGES: usize = 40;

    let config = PipeConfig::default()
        .with_capacity(64)
        .with_copy_delay(Duration::from_micros(100));
    let pipe = Pipe::new(config).unwrap();
    let reader = pipe.open(OpenMode::ReadOnly).unwrap();

    let writers: Vec<_> = WRITERS
        .iter()
        .map(|&(letter, len)| {
            let session = pipe.open(OpenMode::WriteOnly).unwrap();
            thread::spawn(move || {
                let message = vec![letter; len];
                for _ in 0..MESSAGES {
                    session.write(&message).unwrap();
                }
            })
        })
        .collect();

    let expected: usize = WRITERS.iter().map(|&(_, len)| len * MESSAGES).sum();
    let mut stream = Vec::with_capacity(expected);
    let mut buf = [0u8; 16];
    while stream.len() < expected {
        let n = reader.read(&mut buf).unwrap();
        stream.extend_from_slice(&buf[..n]);
    }

    for handle in writers {
        handle.join().unwrap();
    }
    assert_eq!(stream.len(), expected);

    for run in stream.chunk_by(|a, b| a == b) {
        let (_, len) = WRITERS
            .iter()
            .find(|&&(letter, _)| letter == run[0])
            .expect("unknown byte in stream");
        assert_eq!(
            run.len() % len,
            0,
            "run of {} '{}' bytes splits a message",
            run.len(),
            run[0] as char
        );
    }
}

#[test]
fn test_reader_and_writer_progress_concurrently() {
    init_test_tracing();

    // Capacity smaller than the total payload forces the two directions to
    // hand off repeatedly through the data and space signals.
    let pipe = Pipe::new(PipeConfig::default().with_capacity(8)).unwrap();
    let writer = pipe.open(OpenMode::WriteOnly).unwrap();
    let reader = pipe.open(OpenMode::ReadOnly).unwrap();

    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let expected = payload.clone();
    let producer = thread::spawn(move || {
        for chunk in payload.chunks(8) {
            writer.write(chunk).unwrap();
        }
    });

    let mut received = Vec::with_capacity(expected.len());
    let mut buf = [0u8; 5];
    while received.len() < expected.len() {
        let n = reader.read(&mut buf).unwrap();
        received.extend_from_slice(&buf[..n]);
    }
    producer.join().unwrap();

    assert_eq!(received, expected);
    let stats = pipe.stats();
    assert!(!stats.reader_waiting);
    assert!(!stats.writer_waiting);
}
