// src/job/output.rs

//! Bounded output capture.

/// Keeps at most `limit` bytes of output: the first half verbatim, and a
/// rolling window of the most recent bytes as the second half.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    limit: usize,
    head: String,
    tail: String,
    dropped: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(2),
            head: String::new(),
            tail: String::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        let half = self.limit / 2;
        let mut rest = chunk;

        if self.dropped == 0 && self.tail.is_empty() && self.head.len() < half {
            let room = half - self.head.len();
            let split = floor_char_boundary(rest, room.min(rest.len()));
            self.head.push_str(&rest[..split]);
            rest = &rest[split..];
        }

        if rest.is_empty() {
            return;
        }

        self.tail.push_str(rest);
        let keep = self.limit - half;
        if self.tail.len() > keep {
            let cut = ceil_char_boundary(&self.tail, self.tail.len() - keep);
            self.dropped += cut;
            self.tail.drain(..cut);
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    pub fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contents(&self) -> String {
        if self.dropped == 0 {
            return format!("{}{}", self.head, self.tail);
        }
        format!(
            "{}\n... [{} bytes truncated] ...\n{}",
            self.head, self.dropped, self.tail
        )
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
