// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Multi-line JSON reassembly.
//!
//! Pretty-printed JSON objects arrive as several physical lines. The
//! accumulator tracks brace/bracket depth with a string-literal-aware,
//! escape-aware scanner; once the depth returns to zero the buffered
//! lines are flushed as one logical line joined with `\n`. Lines that do
//! not open an object pass through untouched.

/// Upper bound on the accumulation buffer. A stream that opens an object
/// and never closes it must not grow memory without bound; past this the
/// buffer is flushed as-is and falls back to plain-text normalization.
const MAX_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// The line accumulator. One instance per consumer; state survives
/// between lines of the same logical document.
#[derive(Debug, Default)]
pub struct JsonReassembler {
    buffer: String,
    depth: i32,
    in_object: bool,
    in_string: bool,
    escaped: bool,
}

impl JsonReassembler {
    /// Creates an idle accumulator.
    #[must_use]
    pub fn new() -> JsonReassembler {
        JsonReassembler::default()
    }

    /// Feeds one physical line. Returns a logical line when one is
    /// complete: either the input itself (no accumulation active or
    /// started) or the flushed multi-line document.
    #[must_use]
    pub fn push(&mut self, line: &str) -> Option<String> {
        if !self.in_object {
            if !line.trim_start().starts_with('{') {
                return Some(line.to_owned());
            }
            self.in_object = true;
            self.depth = 0;
            self.in_string = false;
            self.escaped = false;
            self.buffer.clear();
            self.scan(line);
            self.buffer.push_str(line);
        } else {
            self.scan("\n");
            self.scan(line);
            self.buffer.push('\n');
            self.buffer.push_str(line);
        }

        if self.depth <= 0 || self.buffer.len() > MAX_BUFFER_BYTES {
            self.in_object = false;
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    /// True while a document is being accumulated.
    #[must_use]
    pub fn accumulating(&self) -> bool {
        self.in_object
    }

    /// Flushes a partially accumulated document, if any. Called when the
    /// input stream ends mid-object.
    #[must_use]
    pub fn take_pending(&mut self) -> Option<String> {
        if self.in_object && !self.buffer.is_empty() {
            self.in_object = false;
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    fn scan(&mut self, text: &str) {
        for c in text.chars() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.in_string = false;
                }
                continue;
            }
            match c {
                '"' => self.in_string = true,
                '{' | '[' => self.depth += 1,
                '}' | ']' => self.depth -= 1,
                _ => {}
            }
        }
    }
}
