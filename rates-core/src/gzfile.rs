//! Сжатые (gzip) дампфайлы.
//!
//! Размер несжатых данных берём из трейлера gzip (поле ISIZE, последние
//! 4 байта, little-endian, по модулю 2^32), без распаковки. Seek назад
//! переоткрывает файл и пропускает данные вперёд.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::GzDecoder;

/// Поток распакованных данных gzip-файла с поддержкой seek
pub struct GzFile {
    path: PathBuf,
    decoder: GzDecoder<BufReader<File>>,
    pos: u64,
    len: u64,
}

impl GzFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = uncompressed_len(&path)?;
        let decoder = GzDecoder::new(BufReader::new(File::open(&path)?));
        Ok(Self {
            path,
            decoder,
            pos: 0,
            len,
        })
    }

    /// Длина распакованных данных по трейлеру
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.decoder = GzDecoder::new(BufReader::new(File::open(&self.path)?));
        self.pos = 0;
        Ok(())
    }
}

/// Читает ISIZE из трейлера gzip
pub fn uncompressed_len(path: &Path) -> io::Result<u64> {
    let mut f = File::open(path)?;
    if f.metadata()?.len() < 4 {
        return Ok(0);
    }
    f.seek(SeekFrom::End(-4))?;
    Ok(f.read_u32::<LittleEndian>()? as u64)
}

impl Read for GzFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.decoder.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for GzFile {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target = match from {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;

        if target < self.pos {
            self.reopen()?;
        }
        let skip = target - self.pos;
        let skipped = io::copy(&mut (&mut self.decoder).take(skip), &mut io::sink())?;
        self.pos += skipped;
        Ok(self.pos)
    }
}
