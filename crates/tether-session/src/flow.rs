//! Render-side backpressure.
//!
//! Output is written to the renderer as it arrives. Only every chunk that
//! pushes the running byte count past `chunk_threshold` is tracked: its
//! completion comes back through a [`RenderReceipt`]. Too many tracked writes
//! in flight pause the host; draining back to the low watermark resumes it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::session::SessionConsumer;

const DEFAULT_HIGH_WATERMARK: usize = 5;
const DEFAULT_LOW_WATERMARK: usize = 2;
const DEFAULT_CHUNK_THRESHOLD: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditConfig {
    pub high_watermark: usize,
    pub low_watermark: usize,
    /// Bytes accumulated before a chunk is tracked.
    pub chunk_threshold: usize,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRoute {
    FastPath,
    /// Write with a completion receipt; `pause` asks the host to stop.
    Tracked { pause: bool },
}

#[derive(Debug)]
pub struct RenderCredit {
    config: CreditConfig,
    outstanding: usize,
    accumulated: usize,
    remote_paused: bool,
}

impl RenderCredit {
    pub fn new(config: CreditConfig) -> Self {
        Self {
            config,
            outstanding: 0,
            accumulated: 0,
            remote_paused: false,
        }
    }

    pub fn on_chunk(&mut self, len: usize) -> ChunkRoute {
        self.accumulated = self.accumulated.saturating_add(len);
        if self.accumulated <= self.config.chunk_threshold {
            return ChunkRoute::FastPath;
        }
        self.accumulated = 0;
        self.outstanding += 1;
        let pause = self.outstanding > self.config.high_watermark && !self.remote_paused;
        if pause {
            self.remote_paused = true;
        }
        ChunkRoute::Tracked { pause }
    }

    /// Returns true when the host should be resumed.
    pub fn on_complete(&mut self) -> bool {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.remote_paused && self.outstanding <= self.config.low_watermark {
            self.remote_paused = false;
            return true;
        }
        false
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn remote_paused(&self) -> bool {
        self.remote_paused
    }
}

/// Where pause/resume requests go. See [`SessionHandle::flow_signal`].
///
/// [`SessionHandle::flow_signal`]: crate::session::SessionHandle::flow_signal
pub trait FlowSignal: Send + Sync {
    fn pause_remote(&self);
    fn resume_remote(&self);
}

/// The renderer.
pub trait RenderSink: Send {
    fn write(&mut self, chunk: &str);

    /// Writes `chunk` and completes `receipt` once it has been rendered.
    fn write_tracked(&mut self, chunk: &str, receipt: RenderReceipt);

    fn close(&mut self) {}
}

/// Completion token for a tracked write. Dropping it counts as completion.
pub struct RenderReceipt {
    credit: Arc<Mutex<RenderCredit>>,
    signal: Arc<dyn FlowSignal>,
    settled: bool,
}

impl RenderReceipt {
    pub fn complete(mut self) {
        self.settle();
    }

    fn settle(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let resume = self.credit.lock().on_complete();
        if resume {
            debug!(target: "tether::session", "render backlog drained; resuming host");
            self.signal.resume_remote();
        }
    }
}

impl Drop for RenderReceipt {
    fn drop(&mut self) {
        self.settle();
    }
}

/// Session consumer that writes into a [`RenderSink`] under render credit.
pub struct CreditedConsumer<S> {
    sink: S,
    credit: Arc<Mutex<RenderCredit>>,
    signal: Arc<dyn FlowSignal>,
}

impl<S: RenderSink> CreditedConsumer<S> {
    pub fn new(sink: S, signal: Arc<dyn FlowSignal>, config: CreditConfig) -> Self {
        Self {
            sink,
            credit: Arc::new(Mutex::new(RenderCredit::new(config))),
            signal,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.credit.lock().outstanding()
    }
}

impl<S: RenderSink> SessionConsumer for CreditedConsumer<S> {
    fn on_data(&mut self, chunk: &str) {
        let route = self.credit.lock().on_chunk(chunk.len());
        match route {
            ChunkRoute::FastPath => self.sink.write(chunk),
            ChunkRoute::Tracked { pause } => {
                if pause {
                    debug!(target: "tether::session", "render backlog high; pausing host");
                    self.signal.pause_remote();
                }
                let receipt = RenderReceipt {
                    credit: self.credit.clone(),
                    signal: self.signal.clone(),
                    settled: false,
                };
                self.sink.write_tracked(chunk, receipt);
            }
        }
    }

    fn on_close(&mut self) {
        self.sink.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSignal {
        pauses: AtomicUsize,
        resumes: AtomicUsize,
    }

    impl FlowSignal for CountingSignal {
        fn pause_remote(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        fn resume_remote(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct HoldingSink {
        written: usize,
        receipts: Vec<RenderReceipt>,
        closed: bool,
    }

    impl RenderSink for HoldingSink {
        fn write(&mut self, _chunk: &str) {
            self.written += 1;
        }

        fn write_tracked(&mut self, _chunk: &str, receipt: RenderReceipt) {
            self.written += 1;
            self.receipts.push(receipt);
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn large_chunk() -> String {
        "x".repeat(DEFAULT_CHUNK_THRESHOLD + 1)
    }

    #[test]
    fn small_chunks_take_fast_path_until_threshold() {
        let mut credit = RenderCredit::new(CreditConfig::default());
        for _ in 0..9 {
            assert_eq!(credit.on_chunk(10_000), ChunkRoute::FastPath);
        }
        assert_eq!(credit.on_chunk(10_000), ChunkRoute::FastPath);
        assert_eq!(credit.on_chunk(1), ChunkRoute::Tracked { pause: false });
        assert_eq!(credit.outstanding(), 1);
        assert_eq!(credit.on_chunk(10), ChunkRoute::FastPath);
    }

    #[test]
    fn completion_floor_is_zero() {
        let mut credit = RenderCredit::new(CreditConfig::default());
        assert!(!credit.on_complete());
        assert_eq!(credit.outstanding(), 0);
    }

    #[test]
    fn pause_and_resume_fire_once_per_crossing() {
        let signal = Arc::new(CountingSignal::default());
        let mut consumer = CreditedConsumer::new(
            HoldingSink::default(),
            signal.clone(),
            CreditConfig::default(),
        );
        let chunk = large_chunk();

        for _ in 0..6 {
            consumer.on_data(&chunk);
        }
        assert_eq!(consumer.outstanding(), 6);
        assert_eq!(signal.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(signal.resumes.load(Ordering::SeqCst), 0);

        consumer.on_data(&chunk);
        assert_eq!(signal.pauses.load(Ordering::SeqCst), 1);

        let mut receipts: Vec<_> = consumer.sink.receipts.drain(..).collect();
        for receipt in receipts.drain(..5) {
            receipt.complete();
        }
        assert_eq!(consumer.outstanding(), 2);
        assert_eq!(signal.resumes.load(Ordering::SeqCst), 1);

        drop(receipts);
        assert_eq!(consumer.outstanding(), 0);
        assert_eq!(signal.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(signal.pauses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn six_tracked_then_four_completions() {
        let signal = Arc::new(CountingSignal::default());
        let mut consumer = CreditedConsumer::new(
            HoldingSink::default(),
            signal.clone(),
            CreditConfig::default(),
        );
        let chunk = large_chunk();
        for _ in 0..6 {
            consumer.on_data(&chunk);
        }
        let mut receipts: Vec<_> = consumer.sink.receipts.drain(..).collect();
        for _ in 0..3 {
            receipts.pop();
        }
        assert_eq!(signal.resumes.load(Ordering::SeqCst), 0);
        receipts.pop();
        assert_eq!(consumer.outstanding(), 2);
        assert_eq!(signal.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(signal.resumes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_reaches_sink() {
        let signal = Arc::new(CountingSignal::default());
        let mut consumer =
            CreditedConsumer::new(HoldingSink::default(), signal, CreditConfig::default());
        consumer.on_data("hi");
        consumer.on_close();
        assert_eq!(consumer.sink.written, 1);
        assert!(consumer.sink.closed);
    }
}
