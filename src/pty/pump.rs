//! Output pump
//!
//! Blocking read loop over the PTY master. Each read is decoded as UTF-8
//! (invalid sequences become U+FFFD), whitespace-only text is dropped and
//! long text is truncated before it is handed to the delivery callback.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Appended to output that was cut at the character limit
pub const TRUNCATION_MARKER: &str = "\n... (truncated)";

/// Read and forwarding limits for one pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    /// Bytes requested per read
    pub read_buffer_size: usize,
    /// Characters forwarded per chunk before truncation
    pub max_output_chars: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            max_output_chars: 4000,
        }
    }
}

/// Why a pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The master reported end of file
    Eof,
    /// Reading the master failed; on Linux this is EIO once the child is gone
    ReadError(ErrorKind),
    /// The owning session was retired
    Stopped,
    /// The delivery side went away
    SinkClosed,
}

/// Incremental UTF-8 decoder.
///
/// A multi-byte sequence split across two reads is held back until the rest
/// arrives instead of being replaced.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, keeping an incomplete trailing sequence for the next call
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        let mut out = String::with_capacity(data.len());
        let mut rest = data.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still held back, lossily
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    /// Number of bytes waiting for the rest of their sequence
    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Turn decoded output into the text to forward.
///
/// Returns `None` for whitespace-only text. Text longer than `max_chars`
/// characters is cut to `max_chars` and gets [`TRUNCATION_MARKER`].
pub fn prepare_chunk(text: &str, max_chars: usize) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Some(format!("{}{}", &text[..cut], TRUNCATION_MARKER)),
        None => Some(text.to_string()),
    }
}

/// Run the pump until the reader fails, hits EOF, `stop` is raised or
/// `deliver` returns `false`.
///
/// Blocks the calling thread; run it on a dedicated thread per session.
pub fn run_pump<R, F>(
    mut reader: R,
    limits: OutputLimits,
    stop: &AtomicBool,
    mut deliver: F,
) -> PumpExit
where
    R: Read,
    F: FnMut(String) -> bool,
{
    let mut buffer = vec![0u8; limits.read_buffer_size.max(1)];
    let mut decoder = Utf8Decoder::new();

    let exit = loop {
        if stop.load(Ordering::Acquire) {
            return PumpExit::Stopped;
        }

        let n = match reader.read(&mut buffer) {
            Ok(0) => break PumpExit::Eof,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "PTY read failed, ending pump");
                break PumpExit::ReadError(e.kind());
            }
        };

        // Output read after retirement belongs to a dead session
        if stop.load(Ordering::Acquire) {
            return PumpExit::Stopped;
        }

        let text = decoder.decode(&buffer[..n]);
        if let Some(chunk) = prepare_chunk(&text, limits.max_output_chars) {
            if !deliver(chunk) {
                return PumpExit::SinkClosed;
            }
        }
    };

    if !stop.load(Ordering::Acquire) {
        let tail = decoder.finish();
        if let Some(chunk) = prepare_chunk(&tail, limits.max_output_chars) {
            if !deliver(chunk) {
                return PumpExit::SinkClosed;
            }
        }
    }

    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// Reader that hands out fixed chunks, then fails with the given error
    struct ScriptedReader {
        chunks: Vec<Vec<u8>>,
        end: ErrorKind,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Err(io::Error::new(self.end, "scripted end"));
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    fn collect(reader: impl Read, limits: OutputLimits) -> (Vec<String>, PumpExit) {
        let stop = AtomicBool::new(false);
        let mut out = Vec::new();
        let exit = run_pump(reader, limits, &stop, |chunk| {
            out.push(chunk);
            true
        });
        (out, exit)
    }

    #[test]
    fn test_prepare_chunk_passes_short_text_unchanged() {
        let text = "Thinking...\r\nDone.\r\n";
        assert_eq!(prepare_chunk(text, 4000).as_deref(), Some(text));
    }

    #[test]
    fn test_prepare_chunk_at_limit_is_unchanged() {
        let text = "x".repeat(4000);
        assert_eq!(prepare_chunk(&text, 4000), Some(text));
    }

    #[test]
    fn test_prepare_chunk_truncates_past_limit() {
        let text = "y".repeat(4001);
        let chunk = prepare_chunk(&text, 4000).unwrap();
        assert!(chunk.ends_with(TRUNCATION_MARKER));
        assert_eq!(chunk.chars().count(), 4000 + TRUNCATION_MARKER.chars().count());
        assert!(chunk.starts_with(&"y".repeat(4000)));
    }

    #[test]
    fn test_prepare_chunk_counts_characters_not_bytes() {
        let text = "é".repeat(3);
        assert_eq!(prepare_chunk(&text, 3), Some(text.clone()));
        assert_eq!(
            prepare_chunk(&text, 2),
            Some(format!("éé{}", TRUNCATION_MARKER))
        );
    }

    #[test]
    fn test_prepare_chunk_drops_whitespace() {
        assert_eq!(prepare_chunk("\n   \n", 4000), None);
        assert_eq!(prepare_chunk("", 4000), None);
        assert_eq!(prepare_chunk("\r\n\t", 4000), None);
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        let text = decoder.decode(b"ok \xff\xfe done");
        assert_eq!(text, "ok \u{FFFD}\u{FFFD} done");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_decoder_joins_split_sequence() {
        let bytes = "naïve ✓".as_bytes();
        // Split inside the three-byte check mark
        let split = bytes.len() - 1;
        let mut decoder = Utf8Decoder::new();

        let first = decoder.decode(&bytes[..split]);
        assert_eq!(first, "naïve ");
        assert_eq!(decoder.pending_len(), 2);

        let second = decoder.decode(&bytes[split..]);
        assert_eq!(second, "✓");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_decoder_finish_flushes_lossily() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"abc\xe2\x9c"), "abc");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_pump_forwards_until_eof() {
        let (out, exit) = collect(
            Cursor::new(b"hello from agent\r\n".to_vec()),
            OutputLimits::default(),
        );
        assert_eq!(exit, PumpExit::Eof);
        assert_eq!(out, vec!["hello from agent\r\n".to_string()]);
    }

    #[test]
    fn test_pump_reads_in_buffer_sized_pieces() {
        let limits = OutputLimits {
            read_buffer_size: 4,
            max_output_chars: 4000,
        };
        let (out, _) = collect(Cursor::new(b"abcdefghij".to_vec()), limits);
        assert_eq!(out, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_pump_skips_whitespace_chunks() {
        let reader = ScriptedReader {
            chunks: vec![b"\n   \n".to_vec(), b"real output".to_vec(), b"\r\n".to_vec()],
            end: ErrorKind::Other,
        };
        let (out, exit) = collect(reader, OutputLimits::default());
        assert_eq!(out, vec!["real output".to_string()]);
        assert_eq!(exit, PumpExit::ReadError(ErrorKind::Other));
    }

    #[test]
    fn test_pump_survives_invalid_utf8() {
        let reader = ScriptedReader {
            chunks: vec![b"bad \xc3\x28 byte".to_vec(), b"still running".to_vec()],
            end: ErrorKind::BrokenPipe,
        };
        let (out, exit) = collect(reader, OutputLimits::default());
        assert_eq!(out, vec!["bad \u{FFFD}( byte", "still running"]);
        assert_eq!(exit, PumpExit::ReadError(ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_pump_truncates_long_reads() {
        let limits = OutputLimits {
            read_buffer_size: 64,
            max_output_chars: 10,
        };
        let (out, _) = collect(Cursor::new(vec![b'z'; 20]), limits);
        assert_eq!(out, vec![format!("{}{}", "z".repeat(10), TRUNCATION_MARKER)]);
    }

    #[test]
    fn test_pump_flushes_held_bytes_at_eof() {
        let (out, exit) = collect(
            Cursor::new(b"tail \xe2\x9c".to_vec()),
            OutputLimits::default(),
        );
        assert_eq!(exit, PumpExit::Eof);
        assert_eq!(out, vec!["tail ".to_string(), "\u{FFFD}".to_string()]);
    }

    #[test]
    fn test_pump_stops_when_flag_raised() {
        let stop = AtomicBool::new(true);
        let mut delivered = 0;
        let exit = run_pump(
            Cursor::new(b"ignored".to_vec()),
            OutputLimits::default(),
            &stop,
            |_| {
                delivered += 1;
                true
            },
        );
        assert_eq!(exit, PumpExit::Stopped);
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_pump_ends_when_sink_closes() {
        let stop = AtomicBool::new(false);
        let reader = ScriptedReader {
            chunks: vec![b"one".to_vec(), b"two".to_vec()],
            end: ErrorKind::Other,
        };
        let exit = run_pump(reader, OutputLimits::default(), &stop, |_| false);
        assert_eq!(exit, PumpExit::SinkClosed);
    }
}
