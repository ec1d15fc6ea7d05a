//! Однопоточный цикл событий сервера курсов.
//!
//! Один поток владеет сокетами, таймерами и состоянием сервиса. Каждая
//! итерация: ждём тики источника (не дольше [`LOOP_TICK`] и не дольше
//! ближайшего таймера), принимаем новые соединения, разбираем входящие
//! строки, выполняем сработавшие таймеры, запускаем генераторы для
//! новых инструментов и отправляем накопленный вывод.

use crate::config::{ConnId, FEED_QUEUE_CAPACITY, IDLE_LOOP_TICK, LOOP_TICK};
use crate::connection::{Connection, ReadStatus};
use crate::feed::FeedEvent;
use crate::generator::SyntheticFeed;
use crate::service::{Outbox, RateService};
use crate::timer::Timers;
use crate::watchdog::{IdleDecision, IdleFault, IdleWatchdog};
use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use rates_core::Tick;
use rates_core::tick::now_millis;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, atomic::AtomicBool, atomic::Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Чем закончилась работа цикла
#[derive(Debug)]
pub(crate) enum RunOutcome {
    Shutdown,
    Idle(IdleFault),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TimerKind {
    Idle,
    Synthetic(String),
}

/// Открытые соединения; через них сервис отправляет строки
#[derive(Default)]
struct Connections {
    map: BTreeMap<ConnId, Connection>,
}

impl Outbox for Connections {
    fn send_line(&mut self, conn: ConnId, line: &str) -> bool {
        self.map
            .get_mut(&conn)
            .is_some_and(|c| c.queue_line(line))
    }
}

pub(crate) struct RateServer {
    listener: TcpListener,
    service: RateService,
    conns: Connections,
    next_id: ConnId,
    timers: Timers<TimerKind>,
    feed: Option<Receiver<FeedEvent>>,
    synthetic: Option<SyntheticFeed>,
    watchdog: Option<IdleWatchdog>,
    clock: fn() -> NaiveDateTime,
    shutdown: Arc<AtomicBool>,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl RateServer {
    pub(crate) fn bind(
        addr: SocketAddr,
        service: RateService,
        shutdown: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("bind TCP listener {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("listener.set_nonblocking(true)")?;

        Ok(Self {
            listener,
            service,
            conns: Connections::default(),
            next_id: 1,
            timers: Timers::new(),
            feed: None,
            synthetic: None,
            watchdog: None,
            clock: local_now,
            shutdown,
        })
    }

    /// Тики от потока источника
    pub(crate) fn with_feed(mut self, rx: Receiver<FeedEvent>) -> Self {
        self.feed = Some(rx);
        self
    }

    /// Синтетические курсы; `instruments` запускаются сразу
    pub(crate) fn with_synthetic(mut self, synth: SyntheticFeed, instruments: &[String]) -> Self {
        for symbol in instruments {
            self.service.note_instrument(symbol);
        }
        self.synthetic = Some(synth);
        self
    }

    pub(crate) fn with_watchdog(mut self, watchdog: IdleWatchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub(crate) fn run(mut self) -> anyhow::Result<RunOutcome> {
        info!("Rate server listening on {}", self.local_addr()?);
        if let Some(w) = self.watchdog {
            self.timers.schedule(TimerKind::Idle, w.timeout());
        }

        let outcome = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested");
                break RunOutcome::Shutdown;
            }

            self.drain_feed();
            self.accept_new();
            self.poll_connections();
            if let Some(fault) = self.run_timers() {
                break RunOutcome::Idle(fault);
            }
            self.start_generators();
            self.flush_connections();
        };

        self.finish(outcome)
    }

    fn wait_timeout(&self) -> Duration {
        let tick = if self.feed.is_none() && self.conns.map.is_empty() {
            IDLE_LOOP_TICK
        } else {
            LOOP_TICK
        };
        match self.timers.next_deadline() {
            Some(at) => at.saturating_duration_since(Instant::now()).min(tick),
            None => tick,
        }
    }

    // ждём тик источника или истечения короткого интервала, потом разгребаем очередь
    fn drain_feed(&mut self) {
        let timeout = self.wait_timeout();
        let Some(rx) = self.feed.as_ref() else {
            thread::sleep(timeout);
            return;
        };

        let first = match rx.recv_timeout(timeout) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) => return,
            Err(RecvTimeoutError::Disconnected) => {
                info!("Upstream feed closed");
                self.feed = None;
                return;
            }
        };

        let mut events = vec![first];
        events.extend(rx.try_iter().take(FEED_QUEUE_CAPACITY));
        for ev in events {
            match ev {
                FeedEvent::Tick(tick) => self.ingest(&tick),
                FeedEvent::Finished {
                    replayed,
                    discarded,
                } => info!("Upstream feed finished: {replayed} ticks, {discarded} discarded at source"),
            }
        }
    }

    fn ingest(&mut self, tick: &Tick) {
        let Some(stats) = self.service.ingest(tick, &mut self.conns) else {
            return;
        };
        if stats.not_empty() {
            debug!("{} {}: {stats}", tick.symbol, tick.update);
        }
        if let Some(w) = self.watchdog {
            self.timers.schedule(TimerKind::Idle, w.timeout());
        }
    }

    fn accept_new(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = self.next_id;
                    self.next_id += 1;
                    match Connection::new(id, stream, peer) {
                        Ok(conn) => {
                            info!("conn {id}: accepted from {peer}");
                            self.conns.map.insert(id, conn);
                        }
                        Err(e) => warn!("conn {id}: setup failed: {e}"),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept error: {e}");
                    break;
                }
            }
        }
    }

    fn poll_connections(&mut self) {
        let ids: Vec<ConnId> = self.conns.map.keys().copied().collect();
        for id in ids {
            let Some(conn) = self.conns.map.get_mut(&id) else {
                continue;
            };
            let status = match conn.read_available() {
                Ok(st) => st,
                Err(e) => {
                    warn!("conn {id}: read error: {e}");
                    ReadStatus::Eof
                }
            };
            let lines = conn.take_lines();

            for line in lines {
                self.service.handle_line(id, &line, &mut self.conns);
            }
            if status == ReadStatus::Eof {
                if let Some(conn) = self.conns.map.get_mut(&id) {
                    conn.close();
                }
            }
        }
    }

    fn run_timers(&mut self) -> Option<IdleFault> {
        for key in self.timers.pop_due(Instant::now()) {
            match key {
                TimerKind::Idle => {
                    let Some(w) = self.watchdog else {
                        continue;
                    };
                    match w.on_alarm((self.clock)()) {
                        IdleDecision::Rearm => {
                            error!(
                                "No ticks for {}s, market is closed; waiting",
                                w.timeout().as_secs()
                            );
                            self.timers.schedule(TimerKind::Idle, w.timeout());
                        }
                        IdleDecision::Fault => {
                            let fault = w.fault();
                            error!("{fault}; shutting down");
                            return Some(fault);
                        }
                    }
                }
                TimerKind::Synthetic(symbol) => self.synthetic_tick(&symbol),
            }
        }
        None
    }

    fn synthetic_tick(&mut self, symbol: &str) {
        let Some(synth) = self.synthetic.as_ref() else {
            return;
        };
        if !synth.is_active(symbol) {
            return;
        }
        let tick = synth.next_tick(symbol, self.service.quote(symbol), now_millis());
        let delay = synth.next_delay();

        self.ingest(&tick);
        self.timers
            .schedule(TimerKind::Synthetic(symbol.to_string()), delay);
    }

    // хук "новый инструмент": в offline-режиме запускает генератор
    fn start_generators(&mut self) {
        let fresh = self.service.take_new_instruments();
        let Some(synth) = self.synthetic.as_mut() else {
            return;
        };
        for symbol in fresh {
            if synth.start(&symbol) {
                info!("Starting synthetic feed for {symbol}");
                let delay = synth.next_delay();
                self.timers.schedule(TimerKind::Synthetic(symbol), delay);
            }
        }
    }

    fn stop_generators(&mut self) {
        let Some(synth) = self.synthetic.as_mut() else {
            return;
        };
        let active: Vec<String> = synth.active().map(str::to_string).collect();
        for symbol in active {
            synth.stop(&symbol);
            self.timers.cancel(&TimerKind::Synthetic(symbol));
        }
    }

    fn flush_connections(&mut self) {
        let mut gone = Vec::new();
        for (id, conn) in self.conns.map.iter_mut() {
            if let Err(e) = conn.flush() {
                warn!("conn {id}: write error: {e}");
                conn.close();
            }
            if conn.is_closing() {
                gone.push(*id);
            }
        }
        for id in gone {
            if let Some(conn) = self.conns.map.remove(&id) {
                info!(
                    "conn {id}: closing {} ({} bytes unsent)",
                    conn.peer(),
                    conn.pending_output()
                );
            }
            self.service.disconnect(id);
        }
    }

    fn finish(mut self, outcome: RunOutcome) -> anyhow::Result<RunOutcome> {
        self.stop_generators();
        self.flush_connections();
        let ids: Vec<ConnId> = self.conns.map.keys().copied().collect();
        for id in ids {
            self.service.disconnect(id);
        }

        info!(
            "Stopped: {} instruments, {}, {} out-of-order ticks discarded",
            self.service.instrument_count(),
            self.service.totals(),
            self.service.discarded()
        );
        self.service.close().context("closing dumpfile")?;
        Ok(outcome)
    }
}
