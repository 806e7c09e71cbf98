use std::io::{self, Write};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tether_session::{RenderReceipt, RenderSink};
use tracing::{debug, warn};

enum RenderJob {
    Chunk(String),
    Tracked(String, RenderReceipt),
}

/// Writes session output to a terminal from a dedicated thread.
///
/// Receipts for tracked writes are completed after the write has been flushed.
/// Closing or dropping the sink only stops the queue; the thread drains what
/// is left and exits, and [`RenderWorker::join`] waits for that.
pub struct TerminalSink {
    jobs: Option<Sender<RenderJob>>,
}

/// The thread behind a [`TerminalSink`].
pub struct RenderWorker {
    thread: JoinHandle<()>,
}

impl TerminalSink {
    pub fn spawn<W>(writer: W) -> io::Result<(Self, RenderWorker)>
    where
        W: Write + Send + 'static,
    {
        let (jobs, queue) = unbounded::<RenderJob>();
        let thread = thread::Builder::new()
            .name("tether-render".into())
            .spawn(move || {
                let mut writer = writer;
                for job in queue {
                    let result = match job {
                        RenderJob::Chunk(chunk) => write_chunk(&mut writer, &chunk),
                        RenderJob::Tracked(chunk, receipt) => {
                            let result = write_chunk(&mut writer, &chunk);
                            receipt.complete();
                            result
                        }
                    };
                    if let Err(err) = result {
                        warn!(target: "tether::app", error = %err, "terminal write failed");
                    }
                }
                debug!(target: "tether::app", "render thread finished");
            })?;
        Ok((Self { jobs: Some(jobs) }, RenderWorker { thread }))
    }

    fn submit(&self, job: RenderJob) {
        if let Some(jobs) = &self.jobs {
            if jobs.send(job).is_err() {
                warn!(target: "tether::app", "render thread gone; dropping output");
            }
        }
    }
}

impl RenderWorker {
    /// Blocks until every queued write has been flushed. Only returns once
    /// the sink has been closed or dropped.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!(target: "tether::app", "render thread panicked");
        }
    }
}

fn write_chunk<W: Write>(writer: &mut W, chunk: &str) -> io::Result<()> {
    writer.write_all(chunk.as_bytes())?;
    writer.flush()
}

impl RenderSink for TerminalSink {
    fn write(&mut self, chunk: &str) {
        self.submit(RenderJob::Chunk(chunk.to_string()));
    }

    fn write_tracked(&mut self, chunk: &str, receipt: RenderReceipt) {
        self.submit(RenderJob::Tracked(chunk.to_string(), receipt));
    }

    fn close(&mut self) {
        self.jobs = None;
    }
}
