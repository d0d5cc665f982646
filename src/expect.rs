// Drive an interactive byte stream: write a line, then wait until a pattern shows up in
// what comes back. Works over anything Read + Write so the SSH shell channel and the
// tests share the same code.

use std::io::{self, ErrorKind, Read, Write};
use std::mem;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;

const READ_BUF_SIZE: usize = 1024;

// Sleep between reads when the stream has nothing for us
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ExpectError {
    #[error("timed out after {}s waiting for '{pattern}'", .after.as_secs())]
    Timeout {
        pattern: String,
        after: Duration,
        seen: String,
    },

    #[error("stream closed while waiting for '{pattern}'")]
    Eof { pattern: String, seen: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct Expect<S> {
    stream: S,
    // decoded output not yet consumed by a match
    buffer: String,
    // trailing bytes of a UTF-8 char split across reads
    pending: Vec<u8>,
}

impl<S: Read + Write> Expect<S> {
    pub fn new(stream: S) -> Expect<S> {
        Expect {
            stream,
            buffer: String::new(),
            pending: Vec::new(),
        }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\n")?;
        self.stream.flush()
    }

    /// Read until `pattern` matches. Returns the text before the match and discards the
    /// match itself; anything after it stays buffered for the next call.
    pub fn expect(&mut self, pattern: &Regex, timeout: Duration) -> Result<String, ExpectError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            if let Some(m) = pattern.find(&self.buffer) {
                let before = self.buffer[..m.start()].to_string();
                self.buffer.drain(..m.end());
                return Ok(before);
            }
            if Instant::now() >= deadline {
                return Err(ExpectError::Timeout {
                    pattern: pattern.to_string(),
                    after: timeout,
                    seen: mem::take(&mut self.buffer),
                });
            }
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    return Err(ExpectError::Eof {
                        pattern: pattern.to_string(),
                        seen: mem::take(&mut self.buffer),
                    });
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    self.decode_pending();
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn decode_pending(&mut self) {
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // incomplete char at the end, wait for the rest of it
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            // really invalid, take it all lossily
            Err(_) => self.pending.len(),
        };
        self.buffer
            .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
        self.pending.drain(..valid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    // Hands out one chunk per read, then WouldBlock forever
    struct Scripted {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        eof: bool,
    }

    impl Scripted {
        fn new(chunks: &[&[u8]]) -> Scripted {
            Scripted {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                written: Vec::new(),
                eof: false,
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if self.eof => Ok(0),
                None => Err(io::Error::new(ErrorKind::WouldBlock, "no data")),
            }
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn prompt() -> Regex {
        Regex::new(r"\[PROMPT\]\$ ").unwrap()
    }

    #[test]
    fn test_returns_text_before_match() {
        let mut e = Expect::new(Scripted::new(&[b"hello\r\n", b"world\r\n[PROMPT]$ rest"]));
        let before = e.expect(&prompt(), Duration::from_secs(1)).unwrap();
        assert_eq!(before, "hello\r\nworld\r\n");
        // what followed the prompt is kept for next time
        let again = Regex::new("rest").unwrap();
        assert_eq!(e.expect(&again, Duration::from_secs(1)).unwrap(), "");
    }

    #[test]
    fn test_send_line_appends_newline() {
        let mut e = Expect::new(Scripted::new(&[]));
        e.send_line("echo RETCODE:$?").unwrap();
        assert_eq!(e.get_mut().written, b"echo RETCODE:$?\n");
    }

    #[test]
    fn test_timeout_keeps_what_was_seen() {
        let mut e = Expect::new(Scripted::new(&[b"still loading"]));
        match e.expect(&prompt(), Duration::from_millis(50)) {
            Err(ExpectError::Timeout { seen, .. }) => assert_eq!(seen, "still loading"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_eof() {
        let mut s = Scripted::new(&[b"logout\r\n"]);
        s.eof = true;
        let mut e = Expect::new(s);
        assert!(matches!(
            e.expect(&prompt(), Duration::from_secs(1)),
            Err(ExpectError::Eof { .. })
        ));
    }

    #[test]
    fn test_utf8_split_across_reads() {
        // 'é' is 0xC3 0xA9
        let mut e = Expect::new(Scripted::new(&[b"caf\xC3", b"\xA9 [PROMPT]$ "]));
        assert_eq!(e.expect(&prompt(), Duration::from_secs(1)).unwrap(), "café ");
    }
}
