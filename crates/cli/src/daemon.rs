#![forbid(unsafe_code)]

use crate::cli::Cli;
use crate::error::Error;
use crate::signals::{SignalEvent, wait_for_signal};
use config::Config;
use edgecore::clock::SystemClock;
use edgecore::prefetch::SharedNetworkQuality;
use edgecore::segment_cache::FsSegmentBackend;
use edgecore::{CoreStatistics, EdgeCore, Services};
use flume::{Receiver, bounded};
use humansize::{BINARY, format_size};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Configuration file (or environment alone) plus command line overrides.
pub fn load_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = match &cli.conffile {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    if let Some(dir) = &cli.cache_dir {
        config.segment_cache.l2_path = dir.clone();
    }
    Ok(config)
}

pub fn dump_config(config: &Config, mut out: impl Write) -> Result<(), Error> {
    let rendered = config.to_toml_string()?;
    out.write_all(rendered.as_bytes()).map_err(Error::Output)
}

/// Run the edge core until SIGTERM or Ctrl-C.
pub async fn serve(cli: &Cli, config: Config) -> Result<(), Error> {
    let services = Services {
        backend: Arc::new(FsSegmentBackend::new(&cli.archive)),
        network_quality: Arc::new(SharedNetworkQuality::default()),
        clock: Arc::new(SystemClock),
    };
    let core = EdgeCore::start(config, services).await?;
    info!(archive = %cli.archive.display(), "serving segments");

    let cancel = CancellationToken::new();
    let (events_tx, events_rx) = bounded(8);
    let signals = tokio::spawn(async move { wait_for_signal(&events_tx).await });

    tokio::join!(
        core.run_until(cancel.clone()),
        handle_events(&core, &events_rx, &cancel)
    );
    core.shutdown().await;

    match signals.await {
        Ok(result) => result,
        Err(err) => {
            warn!(%err, "signal listener did not finish cleanly");
            Ok(())
        }
    }
}

async fn handle_events(
    core: &EdgeCore,
    events: &Receiver<SignalEvent>,
    cancel: &CancellationToken,
) {
    loop {
        match events.recv_async().await {
            Ok(SignalEvent::DumpStatistics) => log_statistics(&core.statistics()),
            Ok(SignalEvent::ClearCaches) => {
                core.clear_all_cache().await;
                info!("segment caches cleared on request");
            }
            Ok(SignalEvent::Terminate) => {
                info!("termination requested");
                break;
            }
            Err(_) => {
                error!("signal listener stopped, shutting down");
                break;
            }
        }
    }
    cancel.cancel();
}

fn log_statistics(stats: &CoreStatistics) {
    let segments = &stats.segments;
    info!(
        l1_hits = segments.l1_hits,
        l2_hits = segments.l2_hits,
        misses = segments.misses,
        coalesced = segments.coalesced,
        hit_rate = segments.hit_rate,
        backend_failures = segments.backend_failures,
        write_failures = segments.write_failures,
        l1 = %format_size(segments.l1_bytes, BINARY),
        l2 = %format_size(segments.l2_bytes, BINARY),
        "segment cache"
    );
    let devices = &stats.devices;
    info!(
        devices = devices.device_count,
        online = devices.online,
        busy = devices.busy,
        offline = devices.offline,
        active_tasks = devices.active_tasks,
        avg_cpu_pct = devices.avg_cpu_pct,
        avg_gpu_pct = devices.avg_gpu_pct,
        "edge devices"
    );
    let preload = &stats.preload;
    info!(
        loading = preload.loading,
        completed = preload.completed,
        failed = preload.failed,
        cancelled = preload.cancelled,
        suppressed = preload.suppressed,
        dropped = preload.dropped,
        "preloads"
    );
    let inference = &stats.inference;
    info!(
        hits = inference.hits,
        misses = inference.misses,
        hit_rate = inference.hit_rate,
        evictions = inference.evictions,
        size = inference.size,
        "inference cache"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::ffi::OsStr;

    #[test]
    fn cache_dir_overrides_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let conffile = dir.path().join("edged.toml");
        std::fs::write(&conffile, "[prefetch]\nworkers = 3\n").unwrap();
        let cache_dir = dir.path().join("segments");

        let cli = Cli::try_parse_from([
            OsStr::new("edged"),
            OsStr::new("--conffile"),
            conffile.as_os_str(),
            OsStr::new("--cache-dir"),
            cache_dir.as_os_str(),
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.prefetch.workers, 3);
        assert_eq!(config.segment_cache.l2_path, cache_dir);
    }

    #[test]
    fn dumped_configuration_is_toml() {
        let mut out = Vec::new();
        dump_config(&Config::new(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[segment_cache]"));
        assert!(text.contains("[prefetch.horizons]"));
    }
}
