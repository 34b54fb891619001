#![forbid(unsafe_code)]

use crate::signals::SignalEvent;
use flume::SendError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),

    #[error("Failed to send signal event: {0}")]
    SendSignal(#[from] SendError<SignalEvent>),

    #[error("Invalid configuration: {0}")]
    Config(#[from] config::Error),

    #[error("Failed to start edge core: {0}")]
    Core(#[from] edgecore::Error),

    #[error("Failed to write output: {0}")]
    Output(#[source] io::Error),
}
