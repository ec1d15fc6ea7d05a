mod cli;
mod config;
mod connection;
mod feed;
mod generator;
mod rate_table;
mod registry;
mod server;
mod service;
mod timer;
mod watchdog;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use rates_core::protocol_doc::to_html;
use rates_core::{DetectConfig, DumpWriter};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::cli::Args;
use crate::feed::{ReplayConfig, ReplayFeed, UpstreamFault};
use crate::generator::{GeneratorConfig, SyntheticFeed};
use crate::server::{RateServer, RunOutcome};
use crate::service::RateService;
use crate::watchdog::IdleWatchdog;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(msg) = args.validate() {
        error!("{msg}");
        return ExitCode::from(2);
    }

    if args.print_protocol {
        return match service::server_speaker() {
            Ok(speaker) => {
                println!("{}", to_html(&speaker.summaries()));
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        }) {
            error!("Cannot install Ctrl+C handler: {e}");
            return ExitCode::FAILURE;
        }
    }

    match run(&args, shutdown) {
        Ok(RunOutcome::Shutdown) => ExitCode::SUCCESS,
        Ok(RunOutcome::Idle(_)) => ExitCode::from(config::EXIT_IDLE),
        Err(e) => {
            if let Some(fault) = e.downcast_ref::<UpstreamFault>() {
                error!("{fault}");
                return ExitCode::from(config::EXIT_CANNOT_CONNECT);
            }
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, shutdown: Arc<AtomicBool>) -> anyhow::Result<RunOutcome> {
    let detect = DetectConfig::default();

    // источник открываем первым: при ошибке не оставляем пустой дампфайл
    let replay = match &args.replay {
        Some(path) => Some(ReplayFeed::connect(
            &ReplayConfig {
                path: path.clone(),
                from: args.replay_from,
                speed: args.replay_speed,
                discard_ooo: args.discard_ooo,
                detect,
            },
            shutdown.clone(),
        )?),
        None => None,
    };

    let mut service = RateService::new()
        .context("protocol tables")?
        .discard_out_of_order(args.discard_ooo);
    if let Some(path) = &args.dumpfile {
        let sink = DumpWriter::open_with_preference(path, &detect, args.codec)
            .with_context(|| format!("open dumpfile {}", path.display()))?;
        info!(
            "Recording to {} ({})",
            path.display(),
            sink.codec().unwrap_or(args.codec)
        );
        service = service.with_sink(sink);
    }

    let mut feed_thread = None;
    let mut server = match replay {
        Some(feed) => {
            let service = service.with_upstream(Box::new(feed.lookup()));
            let (rx, handle) = feed.into_parts();
            feed_thread = Some(handle);
            RateServer::bind(args.bind, service, shutdown.clone())?.with_feed(rx)
        }
        None => {
            let instruments = config::load_instruments(args.instruments_file.as_deref())
                .context("load instruments")?;
            info!("Offline mode: {} instruments", instruments.len());
            RateServer::bind(args.bind, service, shutdown.clone())?
                .with_synthetic(SyntheticFeed::new(GeneratorConfig::default()), &instruments)
        }
    };
    if args.idle_secs > 0 {
        server = server.with_watchdog(IdleWatchdog::new(Duration::from_secs(args.idle_secs)));
    }

    let outcome = server.run();

    shutdown.store(true, Ordering::Relaxed);
    if let Some(handle) = feed_thread {
        if handle.join().is_err() {
            warn!("Replay thread panicked");
        }
    }
    outcome
}
