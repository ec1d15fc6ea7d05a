use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::warn;

/// Приводит пару к виду `BASE/QUOTE`.
///
/// Допускаются пробелы вокруг кодов и `/`; коды - ровно три заглавные
/// латинские буквы. Разбирается только начало строки, хвост игнорируется.
/// Для некорректного ввода возвращает пустую строку.
pub fn normalize_pair(raw: &str) -> String {
    let s = raw.trim_start();
    let Some((base, rest)) = take_ccy(s) else {
        return String::new();
    };
    let Some(rest) = rest.trim_start().strip_prefix('/') else {
        return String::new();
    };
    match take_ccy(rest.trim_start()) {
        Some((quote, _)) => format!("{base}/{quote}"),
        None => String::new(),
    }
}

fn take_ccy(s: &str) -> Option<(&str, &str)> {
    let code = s.get(..3)?;
    code.bytes()
        .all(|b| b.is_ascii_uppercase())
        .then(|| (code, &s[3..]))
}

/// Чтение списка инструментов: по одному на строку, `#` - комментарий.
/// Результат отсортирован и без повторов.
pub fn read_instruments<R: io::Read>(reader: R) -> io::Result<Vec<String>> {
    let mut set = BTreeSet::new();
    let buf = BufReader::new(reader);

    for line in buf.lines() {
        let line = line?;
        let Some(raw) = strip_comment(&line) else {
            continue;
        };
        match normalize_pair(&raw.to_ascii_uppercase()) {
            pair if pair.is_empty() => warn!("Skipping invalid instrument {raw:?}"),
            pair => {
                set.insert(pair);
            }
        }
    }

    Ok(set.into_iter().collect())
}

/// Чтение инструментов из файла
pub fn read_instruments_from_path(path: impl AsRef<Path>) -> io::Result<Vec<String>> {
    let f = File::open(path)?;
    read_instruments(f)
}

fn strip_comment(line: &str) -> Option<&str> {
    // "EUR/USD # comment"
    let s = line.split('#').next().unwrap_or("").trim();
    (!s.is_empty()).then_some(s)
}

/// Список через запятую: `"eur/usd, USD/JPY, ,eur/usd"`.
/// Невалидные элементы отбрасываются, результат отсортирован и уникален.
pub fn parse_instruments_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| normalize_pair(&part.to_ascii_uppercase()))
        .filter(|p| !p.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn normalize_pair_accepts_spacing_and_ignores_tail() {
        assert_eq!(normalize_pair("EUR/USD"), "EUR/USD");
        assert_eq!(normalize_pair("  EUR / USD  "), "EUR/USD");
        assert_eq!(normalize_pair("EUR/USDX"), "EUR/USD");
        assert_eq!(normalize_pair("USD/JPY "), "USD/JPY");
    }

    #[test]
    fn normalize_pair_rejects_malformed_input() {
        for bad in ["", "EURUSD", "eur/usd", "EU/USD", "EUR/US", "EUR-USD", "/USD", "ÉUR/USD"] {
            assert_eq!(normalize_pair(bad), "", "{bad:?}");
        }
    }

    #[test]
    fn parse_instruments_csv_normalizes_sorts_and_dedups() {
        let got = parse_instruments_csv(" usd/jpy, EUR/USD, ,eur / usd ,bogus,, ");
        assert_eq!(got, vec!["EUR/USD", "USD/JPY"]);
        assert!(parse_instruments_csv(" , ,").is_empty());
    }

    #[test]
    fn read_instruments_skips_comments_and_invalid_lines() {
        let input = "\
usd/cad
# header
  EUR/USD   # majors
xau/usd
EURUSD
EUR/USD
";
        let got = read_instruments(Cursor::new(input)).unwrap();
        assert_eq!(got, vec!["EUR/USD", "USD/CAD", "XAU/USD"]);
    }

    #[test]
    fn read_instruments_from_path_reads_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"gbp/usd\n#x\nGBP/USD\n").unwrap();

        let got = read_instruments_from_path(f.path()).unwrap();
        assert_eq!(got, vec!["GBP/USD"]);
    }

    #[test]
    fn read_instruments_propagates_read_error() {
        struct FailingReader {
            inner: Cursor<Vec<u8>>,
            fail_after: usize,
            read_total: usize,
        }

        impl Read for FailingReader {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.read_total >= self.fail_after {
                    return Err(io::Error::other("boom"));
                }
                let to_read = buf.len().min(self.fail_after - self.read_total);
                let n = self.inner.read(&mut buf[..to_read])?;
                self.read_total += n;
                Ok(n)
            }
        }

        let reader = FailingReader {
            inner: Cursor::new(b"eur/usd\nusd/jpy\n".to_vec()),
            fail_after: 10,
            read_total: 0,
        };
        let err = read_instruments(reader).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
