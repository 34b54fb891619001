#![forbid(unsafe_code)]

use crate::error::Error;
use flume::Sender;
use tokio::signal::unix::{SignalKind, signal};

/// Operator requests delivered as process signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGUSR1: log the statistics of every component.
    DumpStatistics,
    /// SIGUSR2: drop every cached segment.
    ClearCaches,
    /// SIGTERM or Ctrl-C.
    Terminate,
}

/// Listens for signals until a termination request, forwarding each as a
/// [`SignalEvent`]. The termination event is the last one sent.
pub async fn wait_for_signal(signal_event: &Sender<SignalEvent>) -> Result<(), Error> {
    let mut sigusr1 = signal(SignalKind::user_defined1()).map_err(Error::SignalHandler)?;
    let mut sigusr2 = signal(SignalKind::user_defined2()).map_err(Error::SignalHandler)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::SignalHandler)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::SignalHandler)?;

    loop {
        let event = tokio::select! {
            _ = sigusr1.recv() => SignalEvent::DumpStatistics,
            _ = sigusr2.recv() => SignalEvent::ClearCaches,
            _ = sigterm.recv() => SignalEvent::Terminate,
            _ = sigint.recv() => SignalEvent::Terminate,
        };
        signal_event.send_async(event).await?;
        if event == SignalEvent::Terminate {
            return Ok(());
        }
    }
}
