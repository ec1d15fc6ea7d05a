//! Сторож тишины источника.
//!
//! Таймер тишины перезапускается на каждом принятом тике. Если он
//! сработал, смотрим на часы рынка: в выходные тишина нормальна и
//! таймер взводится заново, в остальное время сервер останавливается
//! с [`IdleFault`].

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use std::time::Duration;
use thiserror::Error;

/// Рынок открывается в воскресенье в 15:00 (местное время)
const OPEN_HOUR: u32 = 15;
/// Рынок закрывается в пятницу в 17:00
const CLOSE_HOUR: u32 = 17;

/// Источник замолчал в торговое время
#[derive(Debug, Error)]
#[error("no ticks received for {} seconds outside the weekend window", .idle.as_secs())]
pub(crate) struct IdleFault {
    pub(crate) idle: Duration,
}

/// Окно выходных `(close, open)` вокруг ближайшего открытия рынка.
///
/// open - ближайшее воскресенье 15:00 (если воскресенье уже после
/// 15:00, то следующее), close - пятница 17:00 перед ним.
pub(crate) fn weekend_window(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let days_to_sunday = (7 - now.weekday().num_days_from_sunday()) % 7;
    let mut open = at_hour(now.date() + TimeDelta::days(i64::from(days_to_sunday)), OPEN_HOUR);
    if open < now {
        open += TimeDelta::days(7);
    }
    let close = at_hour(open.date() - TimeDelta::days(2), CLOSE_HOUR);
    (close, open)
}

/// Рынок закрыт (строго внутри окна выходных)
pub(crate) fn market_closed(now: NaiveDateTime) -> bool {
    let (close, open) = weekend_window(now);
    close < now && now < open
}

fn at_hour(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdleDecision {
    /// Выходные: взвести таймер заново
    Rearm,
    /// Торговое время: остановиться
    Fault,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct IdleWatchdog {
    timeout: Duration,
}

impl IdleWatchdog {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Решение по сработавшему таймеру
    pub(crate) fn on_alarm(&self, now: NaiveDateTime) -> IdleDecision {
        if market_closed(now) {
            IdleDecision::Rearm
        } else {
            IdleDecision::Fault
        }
    }

    pub(crate) fn fault(&self) -> IdleFault {
        IdleFault { idle: self.timeout }
    }
}
