use std::time::Duration;

use tokio::sync::watch;

/// Sending half of a cooperative cancellation signal.
///
/// The process owns one for the watcher and the supervisor, and the supervisor owns one per
/// tenant pipeline.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Signals every subscribed receiver.
    ///
    /// Fails only when no receiver is left, which callers may ignore.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiving half of a cancellation signal.
pub type ShutdownRx = watch::Receiver<()>;

/// Outcome of a wait that can be interrupted by a shutdown signal.
#[derive(Debug)]
pub enum ShutdownResult<T, I> {
    Ok(T),
    Shutdown(I),
}

impl<T, I> ShutdownResult<T, I> {
    pub fn should_shutdown(&self) -> bool {
        matches!(self, ShutdownResult::Shutdown(_))
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}

/// Returns whether a shutdown was signalled since the receiver last observed one.
///
/// A dropped sender counts as a shutdown so orphaned workers always stop.
pub fn is_shutdown_requested(shutdown_rx: &ShutdownRx) -> bool {
    shutdown_rx.has_changed().unwrap_or(true)
}

/// Sleeps for `duration` unless a shutdown is signalled first.
pub async fn sleep_or_shutdown(
    duration: Duration,
    shutdown_rx: &mut ShutdownRx,
) -> ShutdownResult<(), ()> {
    tokio::select! {
        biased;

        _ = shutdown_rx.changed() => ShutdownResult::Shutdown(()),
        _ = tokio::time::sleep(duration) => ShutdownResult::Ok(()),
    }
}
