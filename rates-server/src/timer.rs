use std::time::{Duration, Instant};

/// Таймеры цикла событий, не больше одного на ключ.
///
/// Повторное планирование по тому же ключу отменяет прежний срок.
#[derive(Debug)]
pub(crate) struct Timers<K> {
    pending: Vec<(Instant, K)>,
}

impl<K: PartialEq + Clone> Timers<K> {
    pub(crate) fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    pub(crate) fn schedule(&mut self, key: K, delay: Duration) {
        self.schedule_at(key, Instant::now() + delay);
    }

    pub(crate) fn schedule_at(&mut self, key: K, at: Instant) {
        self.cancel(&key);
        self.pending.push((at, key));
    }

    /// true, если таймер был
    pub(crate) fn cancel(&mut self, key: &K) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(_, k)| k != key);
        self.pending.len() != before
    }

    /// Снимает все таймеры со сроком не позже `now`, по порядку сроков
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = Vec::new();
        self.pending.retain(|(at, k)| {
            if *at <= now {
                due.push((*at, k.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        due.into_iter().map(|(_, k)| k).collect()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|(at, _)| *at).min()
    }
}
