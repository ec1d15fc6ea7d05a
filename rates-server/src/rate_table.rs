use std::collections::BTreeMap;

/// Последний курс по инструменту
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Quote {
    /// update-метка, мс
    pub(crate) timestamp: i64,
    pub(crate) bid: i64,
    pub(crate) ask: i64,
}

/// Таблица последних курсов. Итерация - по имени инструмента.
#[derive(Debug, Default)]
pub(crate) struct RateTable {
    rates: BTreeMap<String, Quote>,
}

impl RateTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, symbol: &str) -> Option<Quote> {
        self.rates.get(symbol).copied()
    }

    pub(crate) fn insert(&mut self, symbol: &str, quote: Quote) {
        match self.rates.get_mut(symbol) {
            Some(q) => *q = quote,
            None => {
                self.rates.insert(symbol.to_string(), quote);
            }
        }
    }

    pub(crate) fn symbols(&self) -> impl Iterator<Item = &str> {
        self.rates.keys().map(String::as_str)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, Quote)> {
        self.rates.iter().map(|(s, q)| (s.as_str(), *q))
    }

    pub(crate) fn len(&self) -> usize {
        self.rates.len()
    }
}
