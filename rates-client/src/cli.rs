use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser};

/// Rates Client - подписка на курсы rate-server.
///
/// Отправляет регистрационные сообщения и печатает приходящие курсы,
/// пока не придёт Ctrl+C (или маркер конца транзакции в `--snapshot`).
#[derive(Parser, Debug, Clone)]
#[command(name = "rates-client", version, about)]
#[command(
    group(
        ArgGroup::new("selection")
            .required(false)
            .multiple(false)
            .args(["instruments_file", "instruments", "all"])
    )
)]
pub(crate) struct Args {
    /// TCP адрес rate-server, например 127.0.0.1:5970
    #[arg(long, default_value = "127.0.0.1:5970")]
    pub(crate) server: String,

    /// Файл инструментов (по одному на строку, # - комментарий)
    #[arg(long)]
    pub(crate) instruments_file: Option<PathBuf>,

    /// Инструменты строкой, например "EUR/USD, USD/JPY"
    #[arg(long)]
    pub(crate) instruments: Option<String>,

    /// Подписаться на все инструменты
    #[arg(long)]
    pub(crate) all: bool,

    /// Запросить текущие курсы один раз и выйти
    #[arg(long)]
    pub(crate) snapshot: bool,
}

impl Args {
    pub(crate) fn validate(&self) -> Result<()> {
        if !self.server.contains(':') {
            bail!("--server must look like HOST:PORT (got: {})", self.server);
        }

        let selected = self.instruments_file.is_some() || self.instruments.is_some() || self.all;
        if !selected && !self.snapshot {
            bail!("nothing to do: give --instruments, --instruments-file, --all or --snapshot");
        }
        if selected && self.snapshot {
            bail!("--snapshot does not subscribe; drop the instrument selection");
        }

        if let Some(path) = &self.instruments_file {
            let md = std::fs::metadata(path)
                .with_context(|| format!("instruments file not found: {path:?}"))?;
            if !md.is_file() {
                bail!("--instruments-file must point to a file: {path:?}");
            }
        }
        Ok(())
    }

    pub(crate) fn server_socket_addr(&self) -> std::io::Result<SocketAddr> {
        self.server.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
        })
    }
}
