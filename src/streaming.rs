use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Stateful UTF-8 decoder for a chunked response body
///
/// Bytes of a character split across two chunks are held back until the
/// rest arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default, Clone)]
pub struct Utf8StreamDecoder {
    /// Bytes of an incomplete trailing character
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, returning all text that is complete so far
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    // valid_up_to always marks a char boundary
                    out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            rest = &rest[valid..];
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// End of stream: a dangling partial character becomes U+FFFD
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

/// Collapses double-escaped math delimiters (`\\(` to `\(`, likewise for
/// `)`, `[` and `]`) across chunk boundaries
///
/// A trailing `\` or `\\` is carried into the next chunk, so the output of
/// all pushes plus `finish` equals normalizing the whole concatenation.
#[derive(Debug, Default, Clone)]
pub struct DelimiterNormalizer {
    carry: String,
}

impl DelimiterNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.push_str(text);

        let chars: Vec<char> = input.chars().collect();
        let mut out = String::with_capacity(input.len());
        let mut i = 0;

        while i < chars.len() {
            if chars[i] == '\\' {
                let remaining = chars.len() - i;
                let undecided = remaining == 1 || (remaining == 2 && chars[i + 1] == '\\');
                if undecided {
                    self.carry = chars[i..].iter().collect();
                    break;
                }
                if chars[i + 1] == '\\' && is_math_delimiter(chars[i + 2]) {
                    out.push('\\');
                    out.push(chars[i + 2]);
                    i += 3;
                    continue;
                }
            }
            out.push(chars[i]);
            i += 1;
        }

        out
    }

    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.carry)
    }
}

fn is_math_delimiter(c: char) -> bool {
    matches!(c, '(' | ')' | '[' | ']')
}

/// Normalize a complete text in one go
pub fn fix_math_delimiters(text: &str) -> String {
    let mut normalizer = DelimiterNormalizer::new();
    let mut out = normalizer.push(text);
    out.push_str(&normalizer.finish());
    out
}

/// Drain state of the typewriter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Nothing pending, no step scheduled
    Empty,
    /// A step is scheduled at `next_due`
    Draining { next_due: Instant },
}

/// Paced FIFO buffer between the decoder and the rendered message
///
/// Text pushed in is revealed one character per `interval`. The drain stops
/// by itself once the buffer empties; a later push restarts it, and pushing
/// while draining never schedules a second drain.
#[derive(Debug, Clone)]
pub struct Typewriter {
    /// Characters not yet revealed, in arrival order
    pending: VecDeque<char>,
    state: DrainState,
    interval: Duration,
}

impl Typewriter {
    pub fn new(interval: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            state: DrainState::Empty,
            interval,
        }
    }

    /// Append text, starting the drain if it was idle
    pub fn push(&mut self, text: &str, now: Instant) {
        self.pending.extend(text.chars());
        if self.state == DrainState::Empty && !self.pending.is_empty() {
            self.state = DrainState::Draining { next_due: now };
        }
    }

    /// Reveal every character whose step is due at `now`
    pub fn drain_due(&mut self, now: Instant) -> String {
        let mut out = String::new();

        while let DrainState::Draining { next_due } = self.state {
            if next_due > now {
                break;
            }
            match self.pending.pop_front() {
                Some(c) => out.push(c),
                None => {
                    self.state = DrainState::Empty;
                    break;
                }
            }
            self.state = if self.pending.is_empty() {
                DrainState::Empty
            } else {
                DrainState::Draining {
                    next_due: next_due + self.interval,
                }
            };
        }

        out
    }

    /// Reveal everything at once, bypassing the pacing
    pub fn flush(&mut self) -> String {
        self.state = DrainState::Empty;
        self.pending.drain(..).collect()
    }

    /// Drop all pending text, returning how many characters were discarded
    pub fn clear(&mut self) -> usize {
        self.state = DrainState::Empty;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            DrainState::Empty => None,
            DrainState::Draining { next_due } => Some(next_due),
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn decoder_joins_character_split_across_chunks() {
        let bytes = "café ☕".as_bytes();
        // split inside the 3-byte cup
        let cut = bytes.len() - 2;
        let mut decoder = Utf8StreamDecoder::new();
        let mut text = decoder.decode(&bytes[..cut]);
        assert_eq!(text, "café ");
        text.push_str(&decoder.decode(&bytes[cut..]));
        text.push_str(&decoder.finish());
        assert_eq!(text, "café ☕");
    }

    #[test]
    fn decoder_handles_one_byte_chunks() {
        let source = "ñandú ∑ 🎉";
        let mut decoder = Utf8StreamDecoder::new();
        let mut text = String::new();
        for byte in source.as_bytes() {
            text.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        text.push_str(&decoder.finish());
        assert_eq!(text, source);
    }

    #[test]
    fn decoder_replaces_invalid_and_dangling_bytes() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{fffd}b");
        assert_eq!(decoder.decode(b"\xe2\x98"), "");
        assert_eq!(decoder.finish(), "\u{fffd}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn normalizer_collapses_all_four_delimiters() {
        assert_eq!(
            fix_math_delimiters(r"\\(a\\) and \\[b\\]"),
            r"\(a\) and \[b\]"
        );
        assert_eq!(fix_math_delimiters(r"\\x \(y\)"), r"\\x \(y\)");
    }

    #[test]
    fn normalizer_is_chunk_boundary_safe() {
        let mut normalizer = DelimiterNormalizer::new();
        let mut out = normalizer.push(r"\\");
        assert_eq!(out, "");
        out.push_str(&normalizer.push(r"(x)\\)"));
        out.push_str(&normalizer.finish());
        assert_eq!(out, r"\(x)\)");
    }

    #[test]
    fn normalizer_matches_whole_text_for_every_split() {
        let source = r"a \\\(b\\) c\\ \\[d\\]\\";
        let expected = fix_math_delimiters(source);
        let chars: Vec<char> = source.chars().collect();
        for cut in 0..=chars.len() {
            let (head, tail): (String, String) = (
                chars[..cut].iter().collect(),
                chars[cut..].iter().collect(),
            );
            let mut normalizer = DelimiterNormalizer::new();
            let mut out = normalizer.push(&head);
            out.push_str(&normalizer.push(&tail));
            out.push_str(&normalizer.finish());
            assert_eq!(out, expected, "split at {cut}");
        }
    }

    #[test]
    fn typewriter_reveals_one_char_per_interval() {
        let t0 = Instant::now();
        let mut typewriter = Typewriter::new(ms(12));
        typewriter.push("abc", t0);

        assert_eq!(typewriter.drain_due(t0), "a");
        assert_eq!(typewriter.drain_due(t0 + ms(5)), "");
        assert_eq!(typewriter.next_deadline(), Some(t0 + ms(12)));
        assert_eq!(typewriter.drain_due(t0 + ms(24)), "bc");
        assert_eq!(typewriter.state(), DrainState::Empty);
        assert_eq!(typewriter.next_deadline(), None);
    }

    #[test]
    fn push_while_draining_keeps_schedule() {
        let t0 = Instant::now();
        let mut typewriter = Typewriter::new(ms(10));
        typewriter.push("ab", t0);
        assert_eq!(typewriter.drain_due(t0), "a");
        typewriter.push("c", t0 + ms(3));
        assert_eq!(typewriter.next_deadline(), Some(t0 + ms(10)));
        assert_eq!(typewriter.drain_due(t0 + ms(10)), "b");
        assert_eq!(typewriter.drain_due(t0 + ms(20)), "c");
    }

    #[test]
    fn push_after_empty_restarts_drain() {
        let t0 = Instant::now();
        let mut typewriter = Typewriter::new(ms(10));
        typewriter.push("a", t0);
        assert_eq!(typewriter.drain_due(t0), "a");
        assert_eq!(typewriter.state(), DrainState::Empty);

        let later = t0 + ms(500);
        typewriter.push("b", later);
        assert_eq!(typewriter.next_deadline(), Some(later));
        assert_eq!(typewriter.drain_due(later), "b");
    }

    #[test]
    fn flush_and_clear_empty_the_buffer() {
        let t0 = Instant::now();
        let mut typewriter = Typewriter::new(ms(10));
        typewriter.push("hello", t0);
        assert_eq!(typewriter.drain_due(t0), "h");
        assert_eq!(typewriter.flush(), "ello");
        assert!(typewriter.is_empty());

        typewriter.push("xyz", t0);
        assert_eq!(typewriter.clear(), 3);
        assert_eq!(typewriter.drain_due(t0 + ms(100)), "");
    }
}
