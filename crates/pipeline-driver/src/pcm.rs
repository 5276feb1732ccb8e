//! PCM transfer from playable messages into hardware buffers.
//!
//! Bytes are copied straight from the message into the buffer's spare region. There is no
//! staging buffer and no format conversion; the message must already be in the configured
//! stream format.

use crate::host::HwBuffer;

/// Copies message PCM into hardware buffers and keeps a running byte count.
#[derive(Debug, Default)]
pub struct PcmTransfer {
    bytes_written: u64,
}

impl PcmTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy as much of `src` as fits into `buf`.
    ///
    /// Returns the number of bytes consumed; `src[consumed..]` must go into the next buffer.
    pub fn transfer(&mut self, src: &[u8], buf: &mut HwBuffer) -> usize {
        let n = src.len().min(buf.remaining());
        buf.spare_mut()[..n].copy_from_slice(&src[..n]);
        buf.commit(n);
        self.bytes_written += n as u64;
        n
    }

    /// Write up to `bytes` zero bytes into `buf`. Returns the number written.
    pub fn fill_silence(&mut self, bytes: usize, buf: &mut HwBuffer) -> usize {
        let n = bytes.min(buf.remaining());
        buf.spare_mut()[..n].fill(0);
        buf.commit(n);
        self.bytes_written += n as u64;
        n
    }

    /// Total bytes written into hardware buffers.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
