//! Точка входа `rates-client`.
//!
//! Жизненный цикл:
//! - парсинг CLI и сборка запроса (подписка, подписка на всё, снимок)
//! - TCP-подключение и отправка регистрационных сообщений
//! - печать курсов до Ctrl+C, закрытия соединения или конца снимка

mod cli;
mod instruments;
mod tcp;

use std::sync::{Arc, atomic::AtomicBool, atomic::Ordering};

use clap::Parser;
use log::info;

use crate::instruments::Request;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let shutdown = Arc::new(AtomicBool::new(false));

    // Ctrl+C => ставим shutdown=true
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
            info!("shutting down...");
        })?;
    }

    let args = cli::Args::parse();
    args.validate()?;

    let request = instruments::request_from_args(&args)?;
    info!("Starting rates-client: server={}, request={request:?}", args.server);

    let speaker = tcp::client_speaker()?;
    let mut stream = tcp::connect(args.server_socket_addr()?)?;
    tcp::send_request(&mut stream, &speaker, &request)?;

    let wait_txn = match request {
        Request::Snapshot(txnid) => Some(txnid),
        _ => None,
    };
    let mut printer = tcp::Printer::new(std::io::stdout().lock(), wait_txn);
    let rates = tcp::run_session(stream, &speaker, &mut printer, shutdown)?;

    info!("received {rates} rates");
    Ok(())
}
