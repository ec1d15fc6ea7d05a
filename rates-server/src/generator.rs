//! Синтетические курсы для offline-режима.
//!
//! Каждый инструмент получает свой таймер. По срабатыванию берём
//! последний курс из таблицы (или стартовый), сдвигаем bid и ask на
//! случайное число шагов и отдаём тик в `ingest`.

use crate::rate_table::Quote;
use rand::Rng;
use rates_core::Tick;
use rates_core::price::float_to_scaled;
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct GeneratorConfig {
    /// Стартовые цены для инструмента без курса
    pub(crate) start_bid: f64,
    pub(crate) start_ask: f64,
    /// Шаг цены
    pub(crate) step: f64,
    /// Сдвиг за тик: от -max_steps до +max_steps шагов
    pub(crate) max_steps: i64,
    /// Пауза между тиками: равномерно от 0 до max_delay
    pub(crate) max_delay: Duration,
    /// Минимальная допустимая цена (масштабированная)
    pub(crate) min_price: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            start_bid: 70.00,
            start_ask: 70.01,
            step: 0.01,
            max_steps: 2,
            max_delay: Duration::from_secs(1),
            min_price: 1,
        }
    }
}

/// Генераторы по инструментам
pub(crate) struct SyntheticFeed {
    cfg: GeneratorConfig,
    active: BTreeSet<String>,
}

impl SyntheticFeed {
    pub(crate) fn new(cfg: GeneratorConfig) -> Self {
        Self {
            cfg,
            active: BTreeSet::new(),
        }
    }

    /// true, если генератор для инструмента ещё не был запущен
    pub(crate) fn start(&mut self, symbol: &str) -> bool {
        self.active.insert(symbol.to_string())
    }

    /// Останавливает генератор; таймер отменяет вызывающий
    pub(crate) fn stop(&mut self, symbol: &str) -> bool {
        self.active.remove(symbol)
    }

    pub(crate) fn is_active(&self, symbol: &str) -> bool {
        self.active.contains(symbol)
    }

    pub(crate) fn active(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(String::as_str)
    }

    pub(crate) fn next_delay(&self) -> Duration {
        let mut rng = rand::rng();
        self.cfg.max_delay.mul_f64(rng.random_range(0.0..1.0))
    }

    /// Следующий тик: предыдущий курс со случайным сдвигом
    pub(crate) fn next_tick(&self, symbol: &str, prev: Option<Quote>, now_ms: i64) -> Tick {
        let (bid, ask) = match prev {
            Some(q) if q.bid > 0 && q.ask > 0 => (q.bid, q.ask),
            _ => (
                float_to_scaled(self.cfg.start_bid),
                float_to_scaled(self.cfg.start_ask),
            ),
        };

        let mut rng = rand::rng();
        let steps = rng.random_range(-self.cfg.max_steps..=self.cfg.max_steps);
        let delta = steps * float_to_scaled(self.cfg.step);

        let bid = (bid + delta).max(self.cfg.min_price);
        let ask = (ask + delta).max(bid + 1);
        Tick::new(now_ms, symbol, bid, ask)
    }
}
