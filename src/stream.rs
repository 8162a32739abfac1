//! Streaming progress: observe a run's events as a `Stream`.
//!
//! ## Why a stream as well as the sink trait?
//!
//! A presentation layer that already lives in async code (a web handler, a
//! TUI event loop) wants to `select!` over progress alongside its own
//! events rather than implement a trait. [`progress_channel`] gives it a
//! sink to hand to the orchestrator and a [`ProgressStream`] to poll. The
//! stream ends once the sink and every clone of it have been dropped.

use crate::progress::{ProgressEvent, ProgressSink};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A boxed stream of progress events.
pub type ProgressStream = BoxStream<'static, ProgressEvent>;

/// Sink half of [`progress_channel`].
#[derive(Clone)]
pub struct ChannelProgress {
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressSink for ChannelProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        // The receiver going away only means nobody is watching any more.
        let _ = self.tx.send(event.clone());
    }
}

/// Create a connected sink/stream pair.
///
/// # Example
/// ```rust,no_run
/// use edgequake_doctools::{progress_channel, Orchestrator, PipelineConfig, PipelineRun};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::new(PipelineConfig::default());
/// let mut run = PipelineRun::new();
/// run.load(std::fs::read("scan.pdf")?, "scan.pdf")?;
///
/// let (sink, mut events) = progress_channel();
/// let watcher = tokio::spawn(async move {
///     while let Some(ev) = events.next().await {
///         eprintln!("{:>3}% {}", ev.percent, ev.status_text);
///     }
/// });
/// let result = orchestrator.extract(&mut run, &sink).await?;
/// drop(sink);
/// watcher.await?;
/// println!("{}", result.text());
/// # Ok(())
/// # }
/// ```
pub fn progress_channel() -> (ChannelProgress, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelProgress { tx },
        UnboundedReceiverStream::new(rx).boxed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressTracker, Stage};

    #[tokio::test]
    async fn stream_yields_events_in_order_and_ends() {
        let (sink, events) = progress_channel();
        {
            let tracker = ProgressTracker::start(&sink, "Starting");
            tracker.report(Stage::Encoding, "Encoding", 50.0);
            tracker.finish();
        }
        drop(sink);

        let collected: Vec<ProgressEvent> = events.collect().await;
        let percents: Vec<u8> = collected.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0, 50, 100]);
        assert_eq!(collected.last().map(|e| e.stage), Some(Stage::Done));
    }
}
