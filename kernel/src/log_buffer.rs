//! Kernel log ring buffer
//!
//! Captures formatted log output into a fixed-size ring so the monitor and
//! tests can read back what the kernel said. When the ring is full the
//! oldest bytes are dropped.

use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

/// Size of the log ring buffer (32 KB).
const LOG_BUFFER_SIZE: usize = 32 * 1024;

struct LogRing {
    bytes: [u8; LOG_BUFFER_SIZE],
    /// Read index (oldest byte)
    head: usize,
    /// Write index
    tail: usize,
}

impl LogRing {
    const fn new() -> Self {
        Self {
            bytes: [0; LOG_BUFFER_SIZE],
            head: 0,
            tail: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        let next_tail = (self.tail + 1) % LOG_BUFFER_SIZE;
        if next_tail == self.head {
            // Buffer full, drop oldest byte
            self.head = (self.head + 1) % LOG_BUFFER_SIZE;
        }
        self.bytes[self.tail] = byte;
        self.tail = next_tail;
    }

    fn contents(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut i = self.head;
        while i != self.tail {
            out.push(self.bytes[i]);
            i = (i + 1) % LOG_BUFFER_SIZE;
        }
        out
    }
}

static LOG_RING: Mutex<LogRing> = Mutex::new(LogRing::new());

/// Capture a chunk of text into the ring.
pub fn capture(text: &str) {
    let mut ring = LOG_RING.lock();
    for &b in text.as_bytes() {
        ring.push(b);
    }
}

/// Read everything currently in the ring without consuming it.
pub fn read_all() -> String {
    let bytes = LOG_RING.lock().contents();
    String::from_utf8_lossy(&bytes).into_owned()
}
