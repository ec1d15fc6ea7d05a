//! Источник тиков (upstream).
//!
//! Источник работает в своём потоке и никогда не трогает состояние
//! сервера: тики уходят в цикл событий через ограниченный канал.
//! Здесь реализован повтор дампфайла; живой источник подключается так же.

use crate::config::FEED_QUEUE_CAPACITY;
use crate::rate_table::Quote;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use log::{error, info};
use rates_core::{BoxedSource, DetectConfig, DumpError, DumpFile, Tick, open_dump};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, atomic::AtomicBool, atomic::Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Шаг ожидания в потоке источника (проверка shutdown между шагами)
const PACE_STEP: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub(crate) enum FeedEvent {
    Tick(Tick),
    /// Источник исчерпан
    Finished { replayed: u64, discarded: u64 },
}

/// Не удалось подключиться к источнику
#[derive(Debug, Error)]
#[error("cannot connect to upstream feed {name}: {cause}")]
pub(crate) struct UpstreamFault {
    pub(crate) name: String,
    #[source]
    pub(crate) cause: DumpError,
}

/// Разовый запрос курса у источника (для `getrate` по неизвестному инструменту)
pub(crate) trait RateLookup {
    fn fetch(&self, symbol: &str) -> Option<Quote>;
}

/// Последние курсы, которые видел поток источника
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    rates: Arc<Mutex<HashMap<String, Quote>>>,
}

impl Snapshot {
    fn update(&self, tick: &Tick) {
        let mut rates = match self.rates.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(), // продолжаем, несмотря на poison
        };
        let quote = Quote {
            timestamp: tick.update,
            bid: tick.bid,
            ask: tick.ask,
        };
        match rates.get_mut(&tick.symbol) {
            Some(q) => *q = quote,
            None => {
                rates.insert(tick.symbol.clone(), quote);
            }
        }
    }
}

impl RateLookup for Snapshot {
    fn fetch(&self, symbol: &str) -> Option<Quote> {
        let rates = match self.rates.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        rates.get(symbol).copied()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ReplayConfig {
    /// Дампфайл (`-` - stdin, `*.gz` - gzip)
    pub(crate) path: PathBuf,
    /// Начать с первой записи, у которой arrival >= from
    pub(crate) from: Option<i64>,
    /// Множитель скорости; 0 - без пауз
    pub(crate) speed: f64,
    pub(crate) discard_ooo: bool,
    pub(crate) detect: DetectConfig,
}

/// Запущенный повтор дампфайла
pub(crate) struct ReplayFeed {
    rx: Receiver<FeedEvent>,
    snapshot: Snapshot,
    handle: thread::JoinHandle<()>,
}

impl ReplayFeed {
    /// Открывает дампфайл и запускает поток повтора.
    /// Ошибка открытия или поиска стартовой записи - [`UpstreamFault`].
    pub(crate) fn connect(
        cfg: &ReplayConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, UpstreamFault> {
        let name = cfg.path.display().to_string();
        let fault = |cause: DumpError| UpstreamFault {
            name: name.clone(),
            cause,
        };

        let mut dump = open_dump(&cfg.path, &cfg.detect)
            .map_err(fault)?
            .filtered(cfg.discard_ooo);
        if let Some(from) = cfg.from {
            let index = dump.find_time(from).map_err(fault)?;
            dump.seek(index).map_err(fault)?;
            info!("Replay of {name} starts at record {index}");
        }
        info!("Replaying {name} ({}) at speed {}", dump.codec(), cfg.speed);

        let (tx, rx) = crossbeam_channel::bounded(FEED_QUEUE_CAPACITY);
        let snapshot = Snapshot::default();
        let handle = {
            let snapshot = snapshot.clone();
            let speed = cfg.speed;
            thread::spawn(move || {
                if let Err(e) = run_replay(dump, tx, snapshot, speed, shutdown) {
                    error!("Replay of {name} failed: {e}");
                }
            })
        };

        Ok(Self {
            rx,
            snapshot,
            handle,
        })
    }

    pub(crate) fn lookup(&self) -> Snapshot {
        self.snapshot.clone()
    }

    /// Разделяет на канал и поток; поток завершается сам, когда канал закрыт
    pub(crate) fn into_parts(self) -> (Receiver<FeedEvent>, thread::JoinHandle<()>) {
        (self.rx, self.handle)
    }
}

fn run_replay(
    mut dump: DumpFile<BoxedSource>,
    tx: Sender<FeedEvent>,
    snapshot: Snapshot,
    speed: f64,
    shutdown: Arc<AtomicBool>,
) -> Result<(), DumpError> {
    let mut pacer = Pacer::new(speed);
    let mut replayed = 0u64;

    while let Some(tick) = dump.next_tick()? {
        if !pacer.wait(tick.arrival, &shutdown) {
            return Ok(());
        }
        snapshot.update(&tick);
        if !send(&tx, FeedEvent::Tick(tick), &shutdown) {
            return Ok(());
        }
        replayed += 1;
    }

    let discarded = dump.discarded();
    info!("Replay of {} finished: {replayed} ticks, {discarded} discarded", dump.name());
    send(
        &tx,
        FeedEvent::Finished {
            replayed,
            discarded,
        },
        &shutdown,
    );
    Ok(())
}

// false - канал закрыт или пора останавливаться
fn send(tx: &Sender<FeedEvent>, ev: FeedEvent, shutdown: &AtomicBool) -> bool {
    let mut ev = ev;
    loop {
        match tx.send_timeout(ev, PACE_STEP) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if shutdown.load(Ordering::Relaxed) {
                    return false;
                }
                ev = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Темп повтора по arrival-меткам
struct Pacer {
    speed: f64,
    origin: Option<(i64, Instant)>,
}

impl Pacer {
    fn new(speed: f64) -> Self {
        Self {
            speed,
            origin: None,
        }
    }

    fn delay_for(&mut self, arrival: i64, now: Instant) -> Duration {
        if self.speed <= 0.0 {
            return Duration::ZERO;
        }
        let (first, started) = *self.origin.get_or_insert((arrival, now));
        let offset_ms = (arrival - first).max(0) as f64 / self.speed;
        let due = started + Duration::from_secs_f64(offset_ms / 1000.0);
        due.saturating_duration_since(now)
    }

    // ждём мелкими шагами; false - пришёл shutdown
    fn wait(&mut self, arrival: i64, shutdown: &AtomicBool) -> bool {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
            let left = self.delay_for(arrival, Instant::now());
            if left.is_zero() {
                return true;
            }
            thread::sleep(left.min(PACE_STEP));
        }
    }
}
