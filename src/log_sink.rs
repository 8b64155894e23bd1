use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_LOG_LINES: usize = 25;

/// Bounded display buffer for encoder output.
///
/// Keeps the most recent `capacity` lines; older lines are dropped. Clones
/// share the same buffer, so the session can write while the API reads.
#[derive(Debug, Clone)]
pub struct LogSink {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_LINES)
    }
}

impl LogSink {
    /// `capacity` is clamped to at least one line.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "encoder", "{line}");

        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The most recent `max_lines` lines, oldest first.
    pub fn snapshot(&self, max_lines: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(max_lines);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}
