use std::{collections::VecDeque, fmt};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    NotStarted,
    Starting,
    Running,
    /// Exit code, `None` when the process was killed by a signal.
    Exited(Option<i32>),
    Failed(String),
}

impl ProcessState {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited(_) | Self::Failed(_))
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not-started"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Exited(Some(code)) => write!(f, "exited({code})"),
            Self::Exited(None) => f.write_str("exited(signal)"),
            Self::Failed(error) => write!(f, "failed({error})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Events the supervised process reports to whoever resolves its startup.
/// `Exited` and `Error` are each sent at most once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    ReadyMarker(OutputStream),
    Exited(Option<i32>),
    Error(String),
}

/// Last `capacity` output lines of both streams, oldest first.
#[derive(Debug)]
pub struct OutputTail {
    capacity: usize,
    lines: VecDeque<(OutputStream, String)>,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    pub fn push(&mut self, stream: OutputStream, line: String) {
        if self.capacity == 0 {
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back((stream, line));
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|(stream, line)| format!("[{}] {}", stream.as_label(), line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_most_recent_lines() {
        let mut tail = OutputTail::new(2);
        tail.push(OutputStream::Stdout, "one".into());
        tail.push(OutputStream::Stderr, "two".into());
        tail.push(OutputStream::Stdout, "three".into());

        assert_eq!(tail.len(), 2);
        assert_eq!(tail.render(), "[stderr] two\n[stdout] three");
    }

    #[test]
    fn zero_capacity_tail_stays_empty() {
        let mut tail = OutputTail::new(0);
        tail.push(OutputStream::Stdout, "dropped".into());
        assert!(tail.is_empty());
    }

    #[test]
    fn terminal_and_live_states_are_disjoint() {
        for state in [
            ProcessState::NotStarted,
            ProcessState::Starting,
            ProcessState::Running,
            ProcessState::Exited(Some(0)),
            ProcessState::Failed("spawn".into()),
        ] {
            assert!(!(state.is_live() && state.is_terminal()), "{state}");
        }
        assert_eq!(ProcessState::Exited(None).to_string(), "exited(signal)");
    }
}
