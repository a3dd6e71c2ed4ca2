//! Engine output sanitization.
//!
//! The rendering engine prints absolute paths into its status lines. Before
//! any of that text reaches an observer it is rewritten so that local
//! home-directory paths never leave the host:
//!
//! 1. `File ready at ...` lines collapse to [`FILE_READY_MESSAGE`].
//! 2. `movie file written in ...` lines collapse to [`MOVIE_WRITTEN_MESSAGE`].
//! 3. Any remaining `X:\Users\...` path is replaced by [`PATH_PLACEHOLDER`].
//!
//! Sanitization works on whatever chunk the runner hands over, which is not
//! line-aligned. A status line or path split across two chunks is not
//! matched. Chunks are 8 KiB by default, far longer than any engine status
//! line, so this only happens when a line straddles a read boundary.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

/// Replacement for a "file ready" status line.
pub const FILE_READY_MESSAGE: &str = "File ready!";

/// Replacement for a "movie file written" status line.
pub const MOVIE_WRITTEN_MESSAGE: &str = "Movie file generated.";

/// Replacement for a leaked home-directory path.
pub const PATH_PLACEHOLDER: &str = "...";

// `.` stops at `\n`, so the status patterns eat the rest of their line only.
static FILE_READY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)File ready at.*").expect("valid file-ready pattern"));

static MOVIE_WRITTEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)movie file written in.*").expect("valid movie-written pattern")
});

static USER_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)[a-z]:[\\/]+Users[\\/]+[^'"\s]+"#).expect("valid user-path pattern")
});

/// Sanitize one chunk of decoded engine output.
///
/// Returns the input unchanged (borrowed) when nothing matched.
pub fn sanitize(chunk: &str) -> Cow<'_, str> {
    let mut text = Cow::Borrowed(chunk);
    replace_in(&mut text, &FILE_READY, FILE_READY_MESSAGE);
    replace_in(&mut text, &MOVIE_WRITTEN, MOVIE_WRITTEN_MESSAGE);
    replace_in(&mut text, &USER_PATH, PATH_PLACEHOLDER);
    text
}

fn replace_in(text: &mut Cow<'_, str>, pattern: &Regex, replacement: &str) {
    let replaced = match pattern.replace_all(&**text, NoExpand(replacement)) {
        Cow::Owned(replaced) => replaced,
        Cow::Borrowed(_) => return,
    };
    *text = Cow::Owned(replaced);
}

/// Decodes a byte stream chunk by chunk.
///
/// Invalid bytes become U+FFFD. A multi-byte character cut off at the end of
/// a chunk is held back (at most three bytes) and completed by the next
/// chunk instead of being reported as invalid.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk of bytes.
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
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush bytes still held back at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}
