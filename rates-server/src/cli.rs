use clap::Parser;
use rates_core::Codec;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config;

/// Rate Server - раздаёт курсы по TCP построчным протоколом.
///
/// Источник курсов: повтор дампфайла (`--replay`) или синтетический
/// генератор (`--offline`).
#[derive(Parser, Debug, Clone)]
#[command(name = "rates-server", version, about)]
pub(crate) struct Args {
    /// TCP bind address, например 0.0.0.0:5970
    #[arg(long, default_value = config::BIND_ADDR)]
    pub(crate) bind: SocketAddr,

    /// Дописывать принятые тики в дампфайл
    #[arg(long)]
    pub(crate) dumpfile: Option<PathBuf>,

    /// Формат для нового (или почти пустого) дампфайла
    #[arg(long, default_value_t = Codec::default())]
    pub(crate) codec: Codec,

    /// Синтетические курсы вместо внешнего источника
    #[arg(
        long,
        conflicts_with = "replay",
        required_unless_present_any = ["replay", "print_protocol"]
    )]
    pub(crate) offline: bool,

    /// Повторять дампфайл как внешний источник (`-` - stdin)
    #[arg(long)]
    pub(crate) replay: Option<PathBuf>,

    /// Начать повтор с этого времени (мс с эпохи)
    #[arg(long, requires = "replay")]
    pub(crate) replay_from: Option<i64>,

    /// Множитель скорости повтора; 0 - без пауз
    #[arg(long, default_value_t = 1.0)]
    pub(crate) replay_speed: f64,

    /// Отбрасывать тики со временем раньше последнего по инструменту
    #[arg(long)]
    pub(crate) discard_ooo: bool,

    /// Таймаут тишины источника в секундах; 0 - не следить
    #[arg(long, default_value_t = config::IDLE_SECS)]
    pub(crate) idle_secs: u64,

    /// Инструменты для offline-режима (по одному на строку, # - комментарий)
    #[arg(long)]
    pub(crate) instruments_file: Option<PathBuf>,

    /// Напечатать описание протоколов в HTML и выйти
    #[arg(long)]
    pub(crate) print_protocol: bool,
}

impl Args {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.replay_speed.is_finite() || self.replay_speed < 0.0 {
            return Err(format!(
                "--replay-speed must be a non-negative number, got {}",
                self.replay_speed
            ));
        }
        if self.instruments_file.is_some() && !self.offline {
            return Err("--instruments-file only applies with --offline".to_string());
        }
        Ok(())
    }
}
