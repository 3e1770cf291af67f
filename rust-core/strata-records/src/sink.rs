// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Byte sinks
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The destination a `RecordWriter` appends framed chunks to. A sink must
// accept bytes and honour the three flush levels; reporting its position is
// optional, but a sink that cannot do so needs the writer's `assumed_pos`.

use std::fs::File;
use std::io::{self, Cursor, Seek, Write};

// ---------------------------------------------------------------------------
// FlushType
// ---------------------------------------------------------------------------

/// How far a flush pushes buffered data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushType {
    /// Hand every pending chunk to the sink. Survives nothing beyond the
    /// writer object itself.
    FromObject,

    /// Additionally flush the sink's own buffers so the data survives this
    /// process crashing.
    FromProcess,

    /// Additionally force the data to stable storage so it survives the
    /// operating system or machine crashing.
    FromMachine,
}

// ---------------------------------------------------------------------------
// ByteSink
// ---------------------------------------------------------------------------

/// Destination for chunk bytes.
pub trait ByteSink {
    /// Append all of `data`.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push buffered bytes out as far as `flush_type` requires.
    fn flush(&mut self, flush_type: FlushType) -> io::Result<()>;

    /// Current write offset, or `None` for sinks that cannot tell.
    fn position(&mut self) -> io::Result<Option<u64>>;

    /// Release the sink. The default flushes process buffers.
    fn close(&mut self) -> io::Result<()> {
        self.flush(FlushType::FromProcess)
    }
}

impl ByteSink for File {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(self, data)
    }

    fn flush(&mut self, flush_type: FlushType) -> io::Result<()> {
        match flush_type {
            FlushType::FromObject => Ok(()),
            FlushType::FromProcess => Write::flush(self),
            FlushType::FromMachine => {
                Write::flush(self)?;
                self.sync_all()
            }
        }
    }

    fn position(&mut self) -> io::Result<Option<u64>> {
        self.stream_position().map(Some)
    }
}

impl ByteSink for Cursor<Vec<u8>> {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(self, data)
    }

    fn flush(&mut self, _flush_type: FlushType) -> io::Result<()> {
        Ok(())
    }

    fn position(&mut self) -> io::Result<Option<u64>> {
        Ok(Some(Cursor::position(self)))
    }
}

impl ByteSink for Vec<u8> {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self, _flush_type: FlushType) -> io::Result<()> {
        Ok(())
    }

    fn position(&mut self) -> io::Result<Option<u64>> {
        Ok(Some(self.len() as u64))
    }
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_all(data)
    }

    fn flush(&mut self, flush_type: FlushType) -> io::Result<()> {
        (**self).flush(flush_type)
    }

    fn position(&mut self) -> io::Result<Option<u64>> {
        (**self).position()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

// ---------------------------------------------------------------------------
// SequentialSink
// ---------------------------------------------------------------------------

/// Adapter for append-only destinations (pipes, sockets, compressors) that
/// implement [`Write`] but cannot report an offset.
///
/// Writers over such a sink must be given `assumed_pos`.
#[derive(Debug)]
pub struct SequentialSink<W: Write> {
    inner: W,
}

impl<W: Write> SequentialSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ByteSink for SequentialSink<W> {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)
    }

    fn flush(&mut self, flush_type: FlushType) -> io::Result<()> {
        match flush_type {
            FlushType::FromObject => Ok(()),
            FlushType::FromProcess | FlushType::FromMachine => self.inner.flush(),
        }
    }

    fn position(&mut self) -> io::Result<Option<u64>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_tracks_length() {
        let mut sink: Vec<u8> = Vec::new();
        ByteSink::write_all(&mut sink, b"abc").unwrap();
        assert_eq!(ByteSink::position(&mut sink).unwrap(), Some(3));
    }

    #[test]
    fn test_cursor_sink_reports_cursor_position() {
        let mut sink = Cursor::new(vec![0u8; 10]);
        sink.set_position(4);
        ByteSink::write_all(&mut sink, b"xy").unwrap();
        assert_eq!(ByteSink::position(&mut sink).unwrap(), Some(6));
        assert_eq!(&sink.get_ref()[4..6], b"xy");
    }

    #[test]
    fn test_sequential_sink_has_no_position() {
        let mut sink = SequentialSink::new(Vec::new());
        ByteSink::write_all(&mut sink, b"hello").unwrap();
        ByteSink::flush(&mut sink, FlushType::FromMachine).unwrap();
        assert_eq!(ByteSink::position(&mut sink).unwrap(), None);
        assert_eq!(sink.into_inner(), b"hello");
    }

    #[test]
    fn test_file_sink_flush_levels() {
        let mut file = tempfile::tempfile().unwrap();
        ByteSink::write_all(&mut file, b"0123456789").unwrap();
        for flush_type in [FlushType::FromObject, FlushType::FromProcess, FlushType::FromMachine] {
            ByteSink::flush(&mut file, flush_type).unwrap();
        }
        assert_eq!(ByteSink::position(&mut file).unwrap(), Some(10));
        ByteSink::close(&mut file).unwrap();
    }
}
