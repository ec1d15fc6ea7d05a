use crate::config::ConnId;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Итог рассылки одного курса
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BroadcastStats {
    pub(crate) sent: usize,
    pub(crate) dropped: usize,
}

impl fmt::Display for BroadcastStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sent={} dropped={}", self.sent, self.dropped)
    }
}

impl BroadcastStats {
    pub(crate) fn not_empty(&self) -> bool {
        self.sent + self.dropped > 0
    }

    pub(crate) fn add(&mut self, other: BroadcastStats) {
        self.sent += other.sent;
        self.dropped += other.dropped;
    }
}

/// Подписки соединений: по инструментам и глобальные ("все").
///
/// Живёт только в потоке цикла событий, поэтому без блокировок.
#[derive(Debug, Default)]
pub(crate) struct Subscriptions {
    by_symbol: HashMap<String, BTreeSet<ConnId>>,
    all: BTreeSet<ConnId>,
}

impl Subscriptions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// true, если подписка новая
    pub(crate) fn subscribe(&mut self, conn: ConnId, symbol: &str) -> bool {
        self.by_symbol
            .entry(symbol.to_string())
            .or_default()
            .insert(conn)
    }

    /// true, если подписка была. Отсутствующая подписка - не ошибка.
    pub(crate) fn unsubscribe(&mut self, conn: ConnId, symbol: &str) -> bool {
        let Some(set) = self.by_symbol.get_mut(symbol) else {
            return false;
        };
        let removed = set.remove(&conn);
        if set.is_empty() {
            self.by_symbol.remove(symbol);
        }
        removed
    }

    pub(crate) fn subscribe_all(&mut self, conn: ConnId) -> bool {
        self.all.insert(conn)
    }

    /// Снимает глобальную подписку и все подписки по инструментам.
    /// Возвращает, сколько подписок снято.
    pub(crate) fn unsubscribe_all(&mut self, conn: ConnId) -> usize {
        let mut removed = usize::from(self.all.remove(&conn));
        self.by_symbol.retain(|_, set| {
            if set.remove(&conn) {
                removed += 1;
            }
            !set.is_empty()
        });
        removed
    }

    pub(crate) fn is_global(&self, conn: ConnId) -> bool {
        self.all.contains(&conn)
    }

    /// Инструменты, на которые подписано соединение (по алфавиту)
    pub(crate) fn subscriptions_of(&self, conn: ConnId) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .by_symbol
            .iter()
            .filter(|(_, set)| set.contains(&conn))
            .map(|(s, _)| s.as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// Кому слать курс по `symbol`: подписчики инструмента и глобальные
    pub(crate) fn notify_set(&self, symbol: &str) -> BTreeSet<ConnId> {
        let mut set = self.all.clone();
        if let Some(subs) = self.by_symbol.get(symbol) {
            set.extend(subs.iter().copied());
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let mut s = Subscriptions::new();
        assert!(s.subscribe(1, "EUR/USD"));
        assert!(!s.subscribe(1, "EUR/USD"));
        assert_eq!(s.subscriptions_of(1), vec!["EUR/USD"]);
    }

    #[test]
    fn unsubscribe_of_non_member_is_a_noop() {
        let mut s = Subscriptions::new();
        s.subscribe(1, "EUR/USD");

        assert!(!s.unsubscribe(2, "EUR/USD"));
        assert!(!s.unsubscribe(1, "USD/JPY"));
        assert_eq!(s.subscriptions_of(1), vec!["EUR/USD"]);
        assert_eq!(s.notify_set("EUR/USD").into_iter().collect::<Vec<_>>(), vec![1]);

        assert!(s.unsubscribe(1, "EUR/USD"));
        assert!(s.notify_set("EUR/USD").is_empty());
    }

    #[test]
    fn notify_set_is_symbol_subscribers_plus_global() {
        let mut s = Subscriptions::new();
        s.subscribe(1, "EUR/USD");
        s.subscribe(2, "USD/JPY");
        s.subscribe_all(3);
        s.subscribe(3, "EUR/USD");

        let eur: Vec<ConnId> = s.notify_set("EUR/USD").into_iter().collect();
        assert_eq!(eur, vec![1, 3]);
        let gbp: Vec<ConnId> = s.notify_set("GBP/USD").into_iter().collect();
        assert_eq!(gbp, vec![3]);
    }

    #[test]
    fn unsubscribe_all_cleans_everything_even_if_never_subscribed() {
        let mut s = Subscriptions::new();
        assert_eq!(s.unsubscribe_all(7), 0);

        s.subscribe(7, "EUR/USD");
        s.subscribe(7, "USD/JPY");
        s.subscribe(8, "USD/JPY");
        s.subscribe_all(7);

        assert_eq!(s.unsubscribe_all(7), 3);
        assert!(!s.is_global(7));
        assert!(s.subscriptions_of(7).is_empty());
        assert_eq!(s.subscriptions_of(8), vec!["USD/JPY"]);
        assert!(s.notify_set("EUR/USD").is_empty());
    }

    #[test]
    fn subscriptions_are_listed_sorted() {
        let mut s = Subscriptions::new();
        s.subscribe(1, "USD/JPY");
        s.subscribe(1, "AUD/USD");
        s.subscribe(1, "EUR/USD");
        assert_eq!(s.subscriptions_of(1), vec!["AUD/USD", "EUR/USD", "USD/JPY"]);
    }

    #[test]
    fn broadcast_stats_display() {
        let mut st = BroadcastStats::default();
        assert!(!st.not_empty());
        st.add(BroadcastStats { sent: 2, dropped: 1 });
        assert!(st.not_empty());
        assert_eq!(st.to_string(), "sent=2 dropped=1");
    }
}
