//! Buffered byte streams.
//!
//! [`InStream`] / [`OutStream`] are capability traits with one method each;
//! implementations decide what a "read" means (socket recv, file read,
//! memory copy). [`StreamReader`] / [`StreamWriter`] add the user-buffer
//! state machine on top. Methods take `&self` so one full-duplex stream can
//! back a reader and a writer at the same time.

use std::cell::RefCell;
use std::fmt;

/// Read/write errors surfaced by streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The stream was closed (e.g. the peer disconnected, end of file).
    #[error("stream closed")]
    Closed,
    /// Error at the I/O layer.
    #[error("i/o error")]
    Io,
}

/// Byte source capability.
pub trait InStream {
    /// Name for logging, e.g. `tcp://127.0.0.1:3456`.
    fn name(&self) -> &str {
        "n/a"
    }

    /// Read some bytes into `buf`. Returns the number of bytes read (> 0).
    fn do_read(&self, buf: &mut [u8]) -> Result<usize, StreamError>;
}

/// Byte sink capability.
pub trait OutStream {
    fn name(&self) -> &str {
        "n/a"
    }

    /// Write the whole buffer or fail.
    fn do_write(&self, buf: &[u8]) -> Result<(), StreamError>;
}

/// Stream with no input: reading always reports [`StreamError::Closed`].
pub struct DummyInStream;

impl InStream for DummyInStream {
    fn do_read(&self, _buf: &mut [u8]) -> Result<usize, StreamError> {
        Err(StreamError::Closed)
    }
}

/// Stream that rejects every write with [`StreamError::Closed`].
pub struct DummyOutStream;

impl OutStream for DummyOutStream {
    fn do_write(&self, _buf: &[u8]) -> Result<(), StreamError> {
        Err(StreamError::Closed)
    }
}

/// In-memory sink collecting everything written. Test helper for checking
/// serializer output.
#[derive(Default)]
pub struct MemOutStream {
    data: RefCell<Vec<u8>>,
}

impl MemOutStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.data.borrow_mut())
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.data.borrow()).into_owned()
    }
}

impl OutStream for MemOutStream {
    fn do_write(&self, buf: &[u8]) -> Result<(), StreamError> {
        self.data.borrow_mut().extend_from_slice(buf);
        Ok(())
    }
}

/// Buffered reader with a caller-supplied buffer.
///
/// Invariant: `begin <= end <= buf.len()`; `buf[begin..end]` is the
/// currently available (read but unconsumed) window.
pub struct StreamReader<'a> {
    stream: &'a dyn InStream,
    buf: &'a mut [u8],
    begin: usize,
    end: usize,
    last_error: Option<StreamError>,
}

impl<'a> StreamReader<'a> {
    pub fn new(buf: &'a mut [u8], stream: &'a dyn InStream) -> Self {
        Self {
            stream,
            buf,
            begin: 0,
            end: 0,
            last_error: None,
        }
    }

    /// Like [`StreamReader::new`] but with `available` bytes already loaded
    /// at the start of the buffer (in-memory parsing).
    pub fn with_available(buf: &'a mut [u8], stream: &'a dyn InStream, available: usize) -> Self {
        assert!(available <= buf.len());
        Self {
            stream,
            buf,
            begin: 0,
            end: available,
            last_error: None,
        }
    }

    pub fn stream(&self) -> &dyn InStream {
        self.stream
    }

    /// False once the underlying stream reported closed or an I/O error.
    pub fn is_good(&self) -> bool {
        self.last_error.is_none()
    }

    pub fn last_error(&self) -> Option<StreamError> {
        self.last_error
    }

    /// The currently buffered, unconsumed bytes.
    pub fn available(&self) -> &[u8] {
        &self.buf[self.begin..self.end]
    }

    /// Return the available window, reading from the stream if it is empty.
    pub fn available_or_read(&mut self) -> Result<&[u8], StreamError> {
        if self.begin == self.end {
            let n = self.read_into_start()?;
            self.begin = 0;
            self.end = n;
        }
        Ok(&self.buf[self.begin..self.end])
    }

    /// Like [`StreamReader::available_or_read`], but consumes the returned
    /// bytes.
    pub fn drain_or_read(&mut self) -> Result<&[u8], StreamError> {
        if self.begin == self.end {
            let n = self.read_into_start()?;
            self.begin = 0;
            self.end = n;
        }
        let (b, e) = (self.begin, self.end);
        self.begin = self.end;
        Ok(&self.buf[b..e])
    }

    /// Consume `n` bytes of the available window.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.end - self.begin);
        self.begin += n;
    }

    /// Compact the unconsumed bytes to the buffer head, then append one read
    /// from the stream. Keeps partially assembled tokens contiguous across
    /// the refill.
    pub fn refill_available(&mut self) -> Result<&[u8], StreamError> {
        if self.begin != 0 {
            self.buf.copy_within(self.begin..self.end, 0);
            self.end -= self.begin;
            self.begin = 0;
        }
        if self.end == self.buf.len() {
            // Buffer is full of unconsumed bytes; nothing to refill.
            return Ok(&self.buf[self.begin..self.end]);
        }
        match self.stream.do_read(&mut self.buf[self.end..]) {
            Ok(n) => {
                self.end += n;
                Ok(&self.buf[self.begin..self.end])
            }
            Err(e) => {
                self.last_error = Some(e);
                self.begin = self.end;
                Err(e)
            }
        }
    }

    /// Read one byte from the available window without a bounds check.
    #[inline]
    pub fn read_char_unchecked(&mut self) -> u8 {
        debug_assert!(self.begin != self.end);
        let ch = self.buf[self.begin];
        self.begin += 1;
        ch
    }

    /// Index of the next unconsumed byte within the buffer. Streaming
    /// tokenizers use this together with [`StreamReader::buffer`] to track
    /// token boundaries across refills.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.begin
    }

    /// Index one past the last buffered byte.
    #[inline]
    pub fn buffered_end(&self) -> usize {
        self.end
    }

    /// Raw view of buffered bytes `[from, to)`.
    pub fn buffer(&self, from: usize, to: usize) -> &[u8] {
        &self.buf[from..to]
    }

    /// Read a typed value, refilling until `size_of::<T>` bytes are
    /// contiguous. The buffer position must satisfy `T`'s alignment.
    pub fn read_value<T: Copy>(&mut self) -> Result<T, StreamError> {
        let size = std::mem::size_of::<T>();
        assert!(size <= self.buf.len());

        while self.end - self.begin < size {
            if self.begin != 0 {
                self.buf.copy_within(self.begin..self.end, 0);
                self.end -= self.begin;
                self.begin = 0;
            }
            match self.stream.do_read(&mut self.buf[self.end..]) {
                Ok(n) => self.end += n,
                Err(e) => {
                    self.last_error = Some(e);
                    return Err(e);
                }
            }
        }

        let ptr = self.buf[self.begin..].as_ptr();
        debug_assert_eq!(ptr as usize % std::mem::align_of::<T>(), 0);
        self.begin += size;
        Ok(unsafe { std::ptr::read(ptr as *const T) })
    }

    fn read_into_start(&mut self) -> Result<usize, StreamError> {
        match self.stream.do_read(self.buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.last_error = Some(e);
                Err(e)
            }
        }
    }
}

/// Buffered writer with a caller-supplied buffer. Flushes when the buffer
/// fills and on drop.
pub struct StreamWriter<'a> {
    stream: &'a dyn OutStream,
    buf: &'a mut [u8],
    written: usize,
    last_error: Option<StreamError>,
}

impl<'a> StreamWriter<'a> {
    pub fn new(buf: &'a mut [u8], stream: &'a dyn OutStream) -> Self {
        assert!(!buf.is_empty());
        Self {
            stream,
            buf,
            written: 0,
            last_error: None,
        }
    }

    pub fn is_good(&self) -> bool {
        self.last_error.is_none()
    }

    pub fn last_error(&self) -> Option<StreamError> {
        self.last_error
    }

    /// Buffer `bytes`, flushing whenever the buffer fills.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let mut rest = bytes;
        while !rest.is_empty() {
            let room = self.buf.len() - self.written;
            let n = rest.len().min(room);
            self.buf[self.written..self.written + n].copy_from_slice(&rest[..n]);
            self.written += n;
            rest = &rest[n..];
            if !rest.is_empty() {
                self.flush()?;
            }
        }
        Ok(())
    }

    pub fn write_str_bytes(&mut self, s: &str) -> Result<(), StreamError> {
        self.write_bytes(s.as_bytes())
    }

    /// Push buffered bytes into the underlying stream.
    pub fn flush(&mut self) -> Result<(), StreamError> {
        let n = self.written;
        self.written = 0;
        if n == 0 {
            return Ok(());
        }
        match self.stream.do_write(&self.buf[..n]) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.last_error = Some(e);
                Err(e)
            }
        }
    }
}

impl fmt::Write for StreamWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

impl Drop for StreamWriter<'_> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Feeds a byte string in bounded chunks, then reports closed.
    pub(crate) struct ChunkInStream {
        data: Vec<u8>,
        offset: Cell<usize>,
    }

    impl ChunkInStream {
        pub(crate) fn new(data: &[u8]) -> Self {
            Self {
                data: data.to_vec(),
                offset: Cell::new(0),
            }
        }
    }

    impl InStream for ChunkInStream {
        fn do_read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
            let offset = self.offset.get();
            if offset >= self.data.len() {
                return Err(StreamError::Closed);
            }
            let n = buf.len().min(self.data.len() - offset);
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            self.offset.set(offset + n);
            Ok(n)
        }
    }

    #[test]
    fn drain_or_read_consumes() {
        let stream = ChunkInStream::new(b"abcdef");
        let mut buf = [0u8; 4];
        let mut reader = StreamReader::new(&mut buf, &stream);

        let chunk = reader.drain_or_read().unwrap().to_vec();
        assert_eq!(chunk, b"abcd");
        assert!(reader.available().is_empty());

        let chunk = reader.drain_or_read().unwrap().to_vec();
        assert_eq!(chunk, b"ef");
    }

    #[test]
    fn refill_preserves_unread_bytes() {
        let stream = ChunkInStream::new(b"0123456789");
        let mut buf = [0u8; 6];
        let mut reader = StreamReader::new(&mut buf, &stream);

        reader.available_or_read().unwrap();
        reader.advance(4); // leave "45" unread
        let window = reader.refill_available().unwrap().to_vec();
        assert_eq!(&window[..2], b"45");
        assert!(window.len() > 2);
    }

    #[test]
    fn read_value_spans_reads() {
        // Typed reads require the buffer to satisfy the type's alignment.
        #[repr(align(8))]
        struct AlignedBuf([u8; 8]);

        let bytes: Vec<u8> = 0x1122334455667788u64.to_le_bytes().to_vec();
        let stream = ChunkInStream::new(&bytes);
        let mut buf = AlignedBuf([0u8; 8]);
        let mut reader = StreamReader::new(&mut buf.0, &stream);
        let value: u64 = reader.read_value().unwrap();
        assert_eq!(value, 0x1122334455667788);
    }

    #[test]
    fn reader_reports_closed() {
        let stream = DummyInStream;
        let mut buf = [0u8; 8];
        let mut reader = StreamReader::new(&mut buf, &stream);
        assert_eq!(reader.available_or_read(), Err(StreamError::Closed));
        assert!(!reader.is_good());
    }

    #[test]
    fn writer_buffers_and_flushes() {
        let sink = MemOutStream::new();
        let mut buf = [0u8; 4];
        {
            let mut writer = StreamWriter::new(&mut buf, &sink);
            writer.write_bytes(b"hello, stream").unwrap();
            // Not everything has been flushed yet; drop finishes the job.
        }
        assert_eq!(sink.contents(), "hello, stream");
    }

    #[test]
    fn writer_surfaces_errors() {
        let sink = DummyOutStream;
        let mut buf = [0u8; 4];
        let mut writer = StreamWriter::new(&mut buf, &sink);
        // Fits in the buffer: no error yet.
        writer.write_bytes(b"abc").unwrap();
        assert!(writer.is_good());
        assert_eq!(writer.flush(), Err(StreamError::Closed));
        assert!(!writer.is_good());
    }
}
