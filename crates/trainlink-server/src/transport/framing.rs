//! Byte-stream to frame reassembly.
//!
//! Serial and TCP reads return arbitrary chunks: a frame may arrive split
//! across reads or glued to its neighbors, and after noise or a mid-frame
//! connect the buffer may start inside a frame.  The splitter resynchronizes
//! on the known marker bytes:
//!
//! * TMCC markers imply a fixed frame length (4 or 10 bytes).
//! * A PDI frame runs from SOP to the first unescaped EOP.
//!
//! Bytes that cannot start a frame are discarded one at a time until a
//! marker appears.

use tracing::{debug, trace};
use trainlink_core::protocol::frame::tmcc_frame_len;
use trainlink_core::protocol::pdi::{PDI_EOP, PDI_SOP, PDI_STF};

/// A PDI frame larger than this is garbage; drop the SOP and resync.
const MAX_PDI_FRAME: usize = 512;

/// Incremental frame splitter over an unaligned byte stream.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
    /// Bytes discarded while hunting for a marker, for diagnostics.
    discarded: u64,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes dropped during resynchronization so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Clears any partial frame, e.g. after a reconnect.
    pub fn reset(&mut self) {
        if !self.buf.is_empty() {
            trace!("dropping {} buffered bytes on reset", self.buf.len());
            self.discarded += self.buf.len() as u64;
            self.buf.clear();
        }
    }

    /// Feeds a chunk of raw bytes and returns every complete frame now
    /// available, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            // Hunt for a frame-starting marker.
            let skip = self
                .buf
                .iter()
                .position(|&b| is_frame_start(b))
                .unwrap_or(self.buf.len());
            if skip > 0 {
                debug!("discarding {skip} unframed bytes");
                self.discarded += skip as u64;
                self.buf.drain(..skip);
            }
            if self.buf.is_empty() {
                break;
            }

            let marker = self.buf[0];
            let frame_end = if marker == PDI_SOP {
                match self.pdi_frame_end() {
                    PdiScan::Complete(end) => end,
                    PdiScan::Incomplete => break,
                    PdiScan::Oversized => {
                        // Never saw EOP within bounds; the SOP was noise.
                        self.discarded += 1;
                        self.buf.drain(..1);
                        continue;
                    }
                }
            } else {
                // tmcc_frame_len is total for every frame-start marker
                // that is not PDI_SOP.
                let len = tmcc_frame_len(marker).unwrap_or(0);
                if len == 0 || self.buf.len() < len {
                    if len == 0 {
                        self.discarded += 1;
                        self.buf.drain(..1);
                        continue;
                    }
                    break;
                }
                len
            };

            frames.push(self.buf.drain(..frame_end).collect());
        }

        frames
    }

    /// Scans for the end of a PDI frame starting at `buf[0]`.
    fn pdi_frame_end(&self) -> PdiScan {
        let mut escaped = false;
        for (i, &b) in self.buf.iter().enumerate().skip(1) {
            if i > MAX_PDI_FRAME {
                return PdiScan::Oversized;
            }
            if escaped {
                escaped = false;
            } else if b == PDI_STF {
                escaped = true;
            } else if b == PDI_EOP {
                return PdiScan::Complete(i + 1);
            }
        }
        if self.buf.len() > MAX_PDI_FRAME {
            PdiScan::Oversized
        } else {
            PdiScan::Incomplete
        }
    }
}

enum PdiScan {
    Complete(usize),
    Incomplete,
    Oversized,
}

fn is_frame_start(b: u8) -> bool {
    b == PDI_SOP || tmcc_frame_len(b).is_some()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
