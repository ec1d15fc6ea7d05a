//! Дампфайл: append-only лог тиков фиксированного размера.
//!
//! Заголовка нет, формат определяется по первым записям
//! ([`crate::codec::detect_codec`]). Запись `i` лежит по смещению
//! `i * record_size`.
//!
//! Метка `arrival` монотонна по всему файлу, поэтому по ней можно
//! искать бинарным поиском ([`DumpFile::find_time`]). Метки `update`
//! иногда приходят не по порядку; в режиме фильтрации такие записи
//! пропускаются ([`DumpFile::filtered`]).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::codec::{Codec, DetectConfig, detect_codec};
use crate::constants::HEAD_CACHE_SIZE;
use crate::error::{DumpError, FormatError};
use crate::gzfile::GzFile;
use crate::lookahead::HeadReader;
use crate::tick::Tick;

/// Источник байт дампфайла
pub trait DumpSource: Read + Seek {
    /// Длина несжатых данных в байтах
    fn data_len(&mut self) -> io::Result<u64>;
}

impl DumpSource for File {
    fn data_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl DumpSource for GzFile {
    fn data_len(&mut self) -> io::Result<u64> {
        Ok(self.len())
    }
}

impl<R: Read> DumpSource for HeadReader<R> {
    fn data_len(&mut self) -> io::Result<u64> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "length of a stream is unknown",
        ))
    }
}

impl<T: AsRef<[u8]>> DumpSource for Cursor<T> {
    fn data_len(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().as_ref().len() as u64)
    }
}

impl<S: DumpSource + ?Sized> DumpSource for Box<S> {
    fn data_len(&mut self) -> io::Result<u64> {
        (**self).data_len()
    }
}

/// Источник, выбранный по пути (файл, gzip, stdin)
pub type BoxedSource = Box<dyn DumpSource + Send>;

/// Читает начало источника для автоопределения, не сдвигая позицию
pub fn detect_source<S: Read + Seek>(src: &mut S, cfg: &DetectConfig) -> io::Result<Option<Codec>> {
    let pos = src.stream_position()?;
    src.seek(SeekFrom::Start(0))?;
    let mut head = Vec::with_capacity(2 * Codec::MAX_RECORD_SIZE);
    src.by_ref()
        .take((2 * Codec::MAX_RECORD_SIZE) as u64)
        .read_to_end(&mut head)?;
    src.seek(SeekFrom::Start(pos))?;
    Ok(detect_codec(&head, cfg))
}

/// Открывает дампфайл по пути: `-` - stdin, `*.gz` - gzip, иначе обычный файл
pub fn open_dump(path: impl AsRef<Path>, cfg: &DetectConfig) -> Result<DumpFile<BoxedSource>, DumpError> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let src: BoxedSource = if name == "-" {
        Box::new(HeadReader::new(io::stdin(), HEAD_CACHE_SIZE))
    } else if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("gz")) {
        Box::new(GzFile::open(path)?)
    } else {
        Box::new(File::open(path)?)
    };
    DumpFile::detect(src, name, cfg)
}

/// Чтение дампфайла.
///
/// Итерация через [`Iterator`] декодирует записи; ошибка декодирования
/// или обрезанная запись завершают итерацию ошибкой, чистый EOF - `None`.
pub struct DumpFile<S> {
    src: S,
    name: String,
    codec: Codec,
    record: Vec<u8>,
    discard_ooo: bool,
    last_update: HashMap<String, i64>,
    discarded: u64,
}

impl<S: DumpSource> DumpFile<S> {
    /// Открыть с известным форматом
    pub fn with_codec(src: S, name: impl Into<String>, codec: Codec) -> Self {
        Self {
            src,
            name: name.into(),
            codec,
            record: vec![0; codec.record_size()],
            discard_ooo: false,
            last_update: HashMap::new(),
            discarded: 0,
        }
    }

    /// Открыть с автоопределением формата
    pub fn detect(mut src: S, name: impl Into<String>, cfg: &DetectConfig) -> Result<Self, DumpError> {
        let codec = detect_source(&mut src, cfg)?.ok_or(FormatError::Undetectable)?;
        Ok(Self::with_codec(src, name, codec))
    }

    /// Включает отбрасывание тиков, пришедших не по порядку (по инструменту)
    pub fn filtered(mut self, discard_ooo: bool) -> Self {
        self.discard_ooo = discard_ooo;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Сколько записей было пропущено фильтром
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Число записей по размеру источника
    pub fn record_count(&mut self) -> Result<u64, DumpError> {
        let len = self
            .src
            .data_len()
            .map_err(|_| DumpError::UnknownLength(self.name.clone()))?;
        Ok(len / self.codec.record_size() as u64)
    }

    /// Индекс текущей записи
    pub fn tell(&mut self) -> Result<u64, DumpError> {
        let position = self.src.stream_position()?;
        let size = self.codec.record_size();
        if position % size as u64 != 0 {
            return Err(DumpError::Misaligned {
                position,
                record_size: size,
            });
        }
        Ok(position / size as u64)
    }

    /// Перейти к записи `index`; сбрасывает состояние фильтра
    pub fn seek(&mut self, index: u64) -> Result<(), DumpError> {
        self.src
            .seek(SeekFrom::Start(index * self.codec.record_size() as u64))?;
        self.last_update.clear();
        Ok(())
    }

    pub fn rewind(&mut self) -> Result<(), DumpError> {
        self.seek(0)
    }

    /// Следующая запись без декодирования и без фильтра
    pub fn next_raw(&mut self) -> Result<Option<&[u8]>, DumpError> {
        if self.read_record()? {
            Ok(Some(&self.record))
        } else {
            Ok(None)
        }
    }

    /// Следующий тик (с учётом фильтра, если он включён)
    pub fn next_tick(&mut self) -> Result<Option<Tick>, DumpError> {
        loop {
            if !self.read_record()? {
                return Ok(None);
            }
            let tick = self.codec.decode(&self.record)?;
            if !self.discard_ooo {
                return Ok(Some(tick));
            }

            match self.last_update.get_mut(&tick.symbol) {
                Some(last) if tick.update < *last => {
                    self.discarded += 1;
                    continue;
                }
                Some(last) => *last = tick.update,
                None => {
                    self.last_update.insert(tick.symbol.clone(), tick.update);
                }
            }
            return Ok(Some(tick));
        }
    }

    /// Первая запись. Позиция чтения не меняется, фильтр сбрасывается как при [`Self::seek`].
    pub fn first_tick(&mut self) -> Result<Option<Tick>, DumpError> {
        self.peek_at(0)
    }

    /// Последняя запись. Позиция чтения не меняется, фильтр сбрасывается как при [`Self::seek`].
    pub fn last_tick(&mut self) -> Result<Option<Tick>, DumpError> {
        match self.record_count()? {
            0 => Ok(None),
            n => self.peek_at(n - 1),
        }
    }

    /// Метки update первой и последней записей
    pub fn extents(&mut self) -> Result<Option<(i64, i64)>, DumpError> {
        Ok(match (self.first_tick()?, self.last_tick()?) {
            (Some(a), Some(b)) => Some((a.update, b.update)),
            _ => None,
        })
    }

    /// Индекс первой записи с `arrival >= target`.
    ///
    /// Возвращает 0, если `target` не позже первой записи, и `n`, если
    /// `target` не раньше последней. Иначе - бинарный поиск по arrival
    /// (они не убывают), по одной записи на шаг. Позиция чтения не меняется.
    pub fn find_time(&mut self, target: i64) -> Result<u64, DumpError> {
        let n = self.record_count()?;
        if n == 0 {
            return Ok(0);
        }

        let orig = self.src.stream_position()?;
        let found = self.bisect(target, n);
        self.src.seek(SeekFrom::Start(orig))?;
        found
    }

    fn bisect(&mut self, target: i64, n: u64) -> Result<u64, DumpError> {
        let first = self.arrival_at(0)?;
        if target <= first {
            return Ok(0);
        }
        let last = self.arrival_at(n - 1)?;
        if target >= last {
            return Ok(n);
        }

        // инвариант: arrival[lo] < target <= arrival[hi]
        let (mut lo, mut hi) = (0u64, n - 1);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if target <= self.arrival_at(mid)? {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        Ok(hi)
    }

    fn arrival_at(&mut self, index: u64) -> Result<i64, DumpError> {
        self.src
            .seek(SeekFrom::Start(index * self.codec.record_size() as u64))?;
        if !self.read_record()? {
            return Err(DumpError::TruncatedRecord {
                index,
                got: 0,
                expected: self.codec.record_size(),
            });
        }
        Ok(self.codec.arrival_of(&self.record)?)
    }

    fn peek_at(&mut self, index: u64) -> Result<Option<Tick>, DumpError> {
        self.last_update.clear();
        let orig = self.src.stream_position()?;
        self.src
            .seek(SeekFrom::Start(index * self.codec.record_size() as u64))?;
        let tick = match self.read_record() {
            Ok(true) => self.codec.decode(&self.record).map(Some).map_err(DumpError::from),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        };
        self.src.seek(SeekFrom::Start(orig))?;
        tick
    }

    // true - запись прочитана целиком, false - чистый EOF
    fn read_record(&mut self) -> Result<bool, DumpError> {
        let size = self.record.len();
        let mut got = 0;
        while got < size {
            match self.src.read(&mut self.record[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match got {
            0 => Ok(false),
            n if n == size => Ok(true),
            n => {
                let end = self.src.stream_position()?;
                Err(DumpError::TruncatedRecord {
                    index: (end - n as u64) / size as u64,
                    got: n,
                    expected: size,
                })
            }
        }
    }

    /// Итератор по сырым записям (без фильтра)
    pub fn raw_records(&mut self) -> RawRecords<'_, S> {
        RawRecords { dump: self }
    }

    pub fn into_inner(self) -> S {
        self.src
    }
}

impl<S: DumpSource> Iterator for DumpFile<S> {
    type Item = Result<Tick, DumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_tick().transpose()
    }
}

/// Сырые записи дампфайла; используется для замеров и перекодирования
pub struct RawRecords<'a, S> {
    dump: &'a mut DumpFile<S>,
}

impl<S: DumpSource> Iterator for RawRecords<'_, S> {
    type Item = Result<Vec<u8>, DumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.dump
            .next_raw()
            .map(|r| r.map(<[u8]>::to_vec))
            .transpose()
    }
}

/// Запись в дампфайл (только дописывание в конец).
///
/// Если файл уже есть и не пуст, формат определяется по нему, а
/// обрезанная последняя запись срезается. Для нового файла формат
/// выбирается при первой записи.
pub struct DumpWriter {
    file: File,
    path: PathBuf,
    codec: Option<Codec>,
    preferred: Codec,
    written: u64,
    last_arrival: Option<i64>,
}

impl DumpWriter {
    pub fn open_for_append(path: impl AsRef<Path>, cfg: &DetectConfig) -> Result<Self, DumpError> {
        Self::open_with_preference(path, cfg, Codec::default())
    }

    /// Как [`Self::open_for_append`], но `preferred` используется для
    /// нового файла (и для файла, где меньше двух записей)
    pub fn open_with_preference(
        path: impl AsRef<Path>,
        cfg: &DetectConfig,
        preferred: Codec,
    ) -> Result<Self, DumpError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut writer = Self {
            file,
            path,
            codec: None,
            preferred,
            written: 0,
            last_arrival: None,
        };

        let len = writer.file.metadata()?.len();
        if len > 0 {
            let codec = writer.detect_existing(len, cfg)?;
            let size = codec.record_size() as u64;
            if len % size != 0 {
                warn!(
                    "Truncated data present in dumpfile {}; truncating.",
                    writer.path.display()
                );
                writer.file.set_len(len - len % size)?;
            }
            writer.codec = Some(codec);
            writer.last_arrival = writer.read_last_arrival(codec)?;
        }
        Ok(writer)
    }

    fn read_last_arrival(&mut self, codec: Codec) -> Result<Option<i64>, DumpError> {
        let size = codec.record_size() as u64;
        let len = self.file.metadata()?.len();
        if len < size {
            return Ok(None);
        }
        let mut record = vec![0; size as usize];
        self.file.seek(SeekFrom::Start(len - size))?;
        self.file.read_exact(&mut record)?;
        Ok(Some(codec.arrival_of(&record)?))
    }

    fn detect_existing(&mut self, len: u64, cfg: &DetectConfig) -> Result<Codec, DumpError> {
        self.file.seek(SeekFrom::Start(0))?;
        if let Some(codec) = detect_source(&mut self.file, cfg)? {
            return Ok(codec);
        }

        // слишком короткий файл: одна запись в предпочтительном формате
        let size = self.preferred.record_size();
        if len < 2 * size as u64 && len >= size as u64 {
            let mut record = vec![0; size];
            self.file.seek(SeekFrom::Start(0))?;
            self.file.read_exact(&mut record)?;
            if self.preferred.decode(&record).is_ok() {
                return Ok(self.preferred);
            }
        }
        Err(FormatError::Undetectable.into())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Формат файла (None, пока ничего не записано в новый файл)
    pub fn codec(&self) -> Option<Codec> {
        self.codec
    }

    /// Сколько записей дописано с момента открытия
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Время прихода последней записи в файле (None для пустого)
    pub fn last_arrival(&self) -> Option<i64> {
        self.last_arrival
    }

    /// Дописывает один тик, синхронно
    pub fn append(&mut self, tick: &Tick) -> Result<(), DumpError> {
        let codec = *self.codec.get_or_insert(self.preferred);
        let bytes = codec.encode(tick)?;
        self.file.write_all(&bytes)?;
        self.written += 1;
        self.last_arrival = Some(tick.arrival);
        Ok(())
    }

    /// Закрывает файл и удаляет его, если он пуст. Возвращает true, если удалён.
    pub fn close_remove_empty(self) -> io::Result<bool> {
        let empty = self.file.metadata()?.len() == 0;
        let path = self.path;
        drop(self.file);
        if empty {
            fs::remove_file(&path)?;
        }
        Ok(empty)
    }
}
