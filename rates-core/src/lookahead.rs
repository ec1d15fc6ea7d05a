//! Чтение несикаемого потока (stdin) с кэшем первых байт.
//!
//! Кэшируются первые `capacity` байт. Seek разрешён только внутрь
//! кэша или на текущую реальную позицию чтения; всё остальное -
//! ошибка "not seekable". Этого хватает, чтобы подсмотреть заголовок
//! потока для автоопределения формата и вернуться в начало.

use std::io::{self, Read, Seek, SeekFrom};

/// Обёртка над `Read` с ограниченным кэшем начала потока
pub struct HeadReader<R> {
    inner: R,
    head: Vec<u8>,
    capacity: usize,
    /// логическая позиция
    pos: u64,
    /// сколько реально прочитано из `inner`
    real_pos: u64,
}

impl<R: Read> HeadReader<R> {
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            head: Vec::with_capacity(capacity),
            capacity,
            pos: 0,
            real_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read_real(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if self.head.len() < self.capacity {
            let keep = n.min(self.capacity - self.head.len());
            self.head.extend_from_slice(&buf[..keep]);
        }
        self.real_pos += n as u64;
        self.pos = self.real_pos;
        Ok(n)
    }
}

impl<R: Read> Read for HeadReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.real_pos {
            return self.read_real(buf);
        }

        let start = self.pos as usize;
        if start >= self.head.len() {
            return Err(io::Error::other("head overflow of non-seekable stream"));
        }
        let n = buf.len().min(self.head.len() - start);
        buf[..n].copy_from_slice(&self.head[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read> Seek for HeadReader<R> {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target = match from {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(_) => None,
        };
        match target {
            Some(t) if t <= self.head.len() as u64 || t == self.real_pos => {
                self.pos = t;
                Ok(t)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is not seekable",
            )),
        }
    }
}
