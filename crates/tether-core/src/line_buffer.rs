//! Splits a stream of text chunks into lines.

/// One line produced by [`LineBuffer::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line content without its terminator.
    pub text: String,
    /// False for a trailing fragment that is still waiting for its terminator.
    pub is_full_line: bool,
}

impl Line {
    /// A terminated line.
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_full_line: true,
        }
    }

    /// An unterminated fragment.
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_full_line: false,
        }
    }
}

/// Accumulates chunks until a terminator is seen.
///
/// A trailing fragment is reported as a partial line after every chunk,
/// each time with everything accumulated so far, and is reported exactly once
/// as a full line when its terminator arrives. `\r\n` counts as a single
/// terminator even when the two characters arrive in different chunks.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    terminators: Vec<char>,
    pending: String,
    skip_lf: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(['\n', '\r'])
    }
}

impl LineBuffer {
    /// Creates a buffer splitting on the given terminator characters.
    pub fn new(terminators: impl IntoIterator<Item = char>) -> Self {
        let mut terminators: Vec<char> = terminators.into_iter().collect();
        if terminators.is_empty() {
            terminators.push('\n');
        }
        Self {
            terminators,
            pending: String::new(),
            skip_lf: false,
        }
    }

    /// Feeds one chunk and returns the lines it completes, plus the trailing
    /// fragment (if any) as a partial line.
    pub fn feed(&mut self, data: &str) -> Vec<Line> {
        let mut lines = Vec::new();

        for ch in data.chars() {
            if self.skip_lf {
                self.skip_lf = false;
                if ch == '\n' {
                    continue;
                }
            }
            if self.terminators.contains(&ch) {
                lines.push(Line::full(std::mem::take(&mut self.pending)));
                self.skip_lf = ch == '\r' && self.terminators.contains(&'\n');
            } else {
                self.pending.push(ch);
            }
        }

        if !self.pending.is_empty() {
            lines.push(Line::partial(self.pending.clone()));
        }
        lines
    }

    /// The unterminated fragment currently buffered.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Drops any buffered fragment.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.skip_lf = false;
    }
}
