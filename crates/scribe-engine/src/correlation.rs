//! Matching tool results to the tool calls they answer.
//!
//! The runtime does not put a call id on every result. Resolution therefore
//! tries the id first and then falls back to the most recently opened call
//! that is still running.

#[derive(Clone, Debug)]
struct Entry {
    call_id: Option<String>,
    part_index: usize,
    resolved: bool,
}

/// How a result found its call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    ById(usize),
    Fallback(usize),
}

impl Resolution {
    /// Index of the matched part within the message.
    pub fn part_index(self) -> usize {
        match self {
            Self::ById(i) | Self::Fallback(i) => i,
        }
    }
}

/// Tool calls of the in-progress message, in the order they were opened.
#[derive(Clone, Debug, Default)]
pub struct CorrelationTable {
    entries: Vec<Entry>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, call_id: Option<String>, part_index: usize) {
        self.entries.push(Entry {
            call_id: call_id.filter(|id| !id.is_empty()),
            part_index,
            resolved: false,
        });
    }

    /// Find the part a result belongs to and mark it resolved. `None` means
    /// the result is undeliverable.
    pub fn resolve(&mut self, call_id: Option<&str>) -> Option<Resolution> {
        if let Some(id) = call_id {
            if let Some(entry) = self
                .entries
                .iter_mut()
                .find(|e| e.call_id.as_deref() == Some(id))
            {
                entry.resolved = true;
                return Some(Resolution::ById(entry.part_index));
            }
        }

        let entry = self.entries.iter_mut().rev().find(|e| !e.resolved)?;
        entry.resolved = true;
        Some(Resolution::Fallback(entry.part_index))
    }

    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| !e.resolved).count()
    }
}
