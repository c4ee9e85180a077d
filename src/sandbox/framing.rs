//! Multiplexed output stream decoding
//!
//! Container output arrives as a sequence of frames:
//!
//! ```text
//! +------+---------+------------------+-----------------+
//! | tag  | 3 bytes | length (u32, BE) | payload         |
//! +------+---------+------------------+-----------------+
//!   0      1..4      4..8               8..8+length
//! ```
//!
//! The tag selects the origin stream (1 = stdout, 2 = stderr). Bytes 1..4 are
//! padding. A trailing frame whose header or payload is cut short is dropped.
//! Decoding stops once a combined payload budget is spent.

/// Size of a frame header in bytes
pub const HEADER_LEN: usize = 8;

/// Origin stream of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamKind {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl StreamKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// Output split back into its origin streams
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// A partial trailing frame was discarded
    pub truncated: bool,
    /// Payload beyond the capture budget was discarded
    pub capped: bool,
}

impl DemuxedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Split a multiplexed buffer into stdout and stderr, keeping at most `limit`
/// payload bytes across both streams.
///
/// Payloads are concatenated as raw bytes, so a UTF-8 sequence split across
/// two frames survives. Frames with unknown tags and stdin frames are skipped.
pub fn decode(buf: &[u8], limit: usize) -> DemuxedOutput {
    let mut out = DemuxedOutput::default();
    let mut offset = 0;
    let mut budget = limit;

    while offset < buf.len() {
        let Some(header) = buf.get(offset..offset + HEADER_LEN) else {
            out.truncated = true;
            break;
        };
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let start = offset + HEADER_LEN;
        let Some(payload) = start.checked_add(len).and_then(|end| buf.get(start..end)) else {
            out.truncated = true;
            break;
        };

        let target = match StreamKind::from_tag(header[0]) {
            Some(StreamKind::Stdout) => &mut out.stdout,
            Some(StreamKind::Stderr) => &mut out.stderr,
            Some(StreamKind::Stdin) | None => {
                offset = start + len;
                continue;
            }
        };
        if payload.len() > budget {
            target.extend_from_slice(&payload[..budget]);
            out.capped = true;
            break;
        }
        target.extend_from_slice(payload);
        budget -= payload.len();

        offset = start + len;
    }

    out
}

/// Append `payload` to `out` as one or more frames of the given kind.
pub fn encode_frame(kind: StreamKind, payload: &[u8], out: &mut Vec<u8>) {
    for chunk in payload.chunks(u32::MAX as usize) {
        out.push(kind as u8);
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        out.extend_from_slice(chunk);
    }
}
