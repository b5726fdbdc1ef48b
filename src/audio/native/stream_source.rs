use parking_lot::{Condvar, Mutex};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// How far the download may run ahead of the decoder.
const MAX_READ_AHEAD: usize = 8 * 1024 * 1024;

struct StreamBuffer {
    /// Every byte downloaded so far; retained so the decoder can seek back.
    data: Vec<u8>,
    position: usize,
    finished: bool,
    error: Option<String>,
    /// Set when playback is torn down; unblocks both ends.
    closed: bool,
}

struct Shared {
    buffer: Mutex<StreamBuffer>,
    changed: Condvar,
}

/// Create the two ends of an in-memory download buffer.
pub fn stream_buffer() -> (StreamReader, StreamWriter) {
    let shared = Arc::new(Shared {
        buffer: Mutex::new(StreamBuffer {
            data: Vec::with_capacity(1024 * 1024),
            position: 0,
            finished: false,
            error: None,
            closed: false,
        }),
        changed: Condvar::new(),
    });
    (
        StreamReader {
            shared: Arc::clone(&shared),
        },
        StreamWriter { shared },
    )
}

/// Blocking, seekable reader over bytes still arriving from the network.
pub struct StreamReader {
    shared: Arc<Shared>,
}

impl StreamReader {
    pub fn closer(&self) -> StreamCloser {
        StreamCloser {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.buffer.lock();

        while state.position >= state.data.len()
            && !state.finished
            && state.error.is_none()
            && !state.closed
        {
            self.shared.changed.wait(&mut state);
        }

        // Not `Interrupted`: symphonia retries that kind forever.
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed"));
        }
        if let Some(ref err) = state.error {
            return Err(io::Error::new(io::ErrorKind::Other, err.clone()));
        }

        let available = state.data.len().saturating_sub(state.position);
        if available == 0 {
            return Ok(0);
        }

        let n = buf.len().min(available);
        let start = state.position;
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        state.position += n;
        self.shared.changed.notify_all();
        Ok(n)
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.shared.buffer.lock();

        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => state.position as i64 + offset,
            SeekFrom::End(offset) => state.data.len() as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }

        state.position = target as usize;
        Ok(state.position as u64)
    }
}

impl symphonia::core::io::MediaSource for StreamReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        let state = self.shared.buffer.lock();
        state.finished.then_some(state.data.len() as u64)
    }
}

/// Closes the buffer from outside the decode thread.
#[derive(Clone)]
pub struct StreamCloser {
    shared: Arc<Shared>,
}

impl StreamCloser {
    pub fn close(&self) {
        self.shared.buffer.lock().closed = true;
        self.shared.changed.notify_all();
    }
}

#[derive(Debug)]
pub struct StreamClosed;

/// Download end of the buffer. Never blocks; callers back off while
/// [`StreamWriter::has_room`] is false.
pub struct StreamWriter {
    shared: Arc<Shared>,
}

impl StreamWriter {
    pub fn has_room(&self) -> bool {
        let state = self.shared.buffer.lock();
        state.closed || state.data.len().saturating_sub(state.position) < MAX_READ_AHEAD
    }

    pub fn write_bytes(&self, data: &[u8]) -> Result<(), StreamClosed> {
        let mut state = self.shared.buffer.lock();
        if state.closed {
            return Err(StreamClosed);
        }
        state.data.extend_from_slice(data);
        self.shared.changed.notify_all();
        Ok(())
    }

    pub fn finish(&self) {
        self.shared.buffer.lock().finished = true;
        self.shared.changed.notify_all();
    }

    pub fn set_error(&self, error: String) {
        {
            let mut state = self.shared.buffer.lock();
            state.error = Some(error);
            state.finished = true;
        }
        self.shared.changed.notify_all();
    }
}
