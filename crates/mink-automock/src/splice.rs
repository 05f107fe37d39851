//! Byte-range edits against an immutable source text.
//!
//! Edits are recorded, not applied: [`SourceEdits::finish`] renders the
//! result in one pass. Range edits may not overlap each other, which keeps the
//! outcome independent of the order they were recorded in.

use std::ops::Range;

use crate::error::{AutomockError, AutomockResult};

#[derive(Debug, Clone)]
struct RangeEdit {
    start: usize,
    end: usize,
    replacement: String,
}

#[derive(Debug, Clone)]
struct Insertion {
    at: usize,
    text: String,
}

/// A run of original text that survives unchanged in the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMapping {
    /// Byte range in the original source
    pub original: Range<usize>,
    /// Byte range in the rendered output
    pub generated: Range<usize>,
}

/// Recorded edits over a source string
#[derive(Debug, Clone)]
pub struct SourceEdits<'s> {
    source: &'s str,
    /// Sorted by start
    edits: Vec<RangeEdit>,
    /// Sorted by position, stable for equal positions
    insertions: Vec<Insertion>,
    appended: String,
}

impl<'s> SourceEdits<'s> {
    /// Start editing `source`
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            edits: Vec::new(),
            insertions: Vec::new(),
            appended: String::new(),
        }
    }

    /// Original text
    pub fn source(&self) -> &'s str {
        self.source
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty() && self.insertions.is_empty() && self.appended.is_empty()
    }

    /// Delete `start..end`
    pub fn remove(&mut self, start: usize, end: usize) -> AutomockResult<&mut Self> {
        self.overwrite(start, end, "")
    }

    /// Replace `start..end` with `text`.
    ///
    /// An empty range behaves like [`SourceEdits::insert`].
    pub fn overwrite(&mut self, start: usize, end: usize, text: &str) -> AutomockResult<&mut Self> {
        self.check_range(start, end)?;
        if start == end {
            return self.insert(start, text);
        }
        if let Some(existing) = self
            .edits
            .iter()
            .find(|edit| start < edit.end && edit.start < end)
        {
            return Err(AutomockError::EditOverlap {
                start,
                end,
                existing_start: existing.start,
                existing_end: existing.end,
            });
        }
        if let Some(insertion) = self
            .insertions
            .iter()
            .find(|insertion| start < insertion.at && insertion.at < end)
        {
            return Err(AutomockError::EditOverlap {
                start,
                end,
                existing_start: insertion.at,
                existing_end: insertion.at,
            });
        }
        let index = self.edits.partition_point(|edit| edit.start < start);
        self.edits.insert(
            index,
            RangeEdit {
                start,
                end,
                replacement: text.to_string(),
            },
        );
        Ok(self)
    }

    /// Insert `text` at `at`. Insertions at the same position keep their
    /// recording order.
    pub fn insert(&mut self, at: usize, text: &str) -> AutomockResult<&mut Self> {
        self.check_range(at, at)?;
        if let Some(existing) = self
            .edits
            .iter()
            .find(|edit| edit.start < at && at < edit.end)
        {
            return Err(AutomockError::EditOverlap {
                start: at,
                end: at,
                existing_start: existing.start,
                existing_end: existing.end,
            });
        }
        let index = self.insertions.partition_point(|insertion| insertion.at <= at);
        self.insertions.insert(
            index,
            Insertion {
                at,
                text: text.to_string(),
            },
        );
        Ok(self)
    }

    /// Add `text` after the end of the source
    pub fn append(&mut self, text: &str) -> &mut Self {
        self.appended.push_str(text);
        self
    }

    /// Unchanged segments of the original and where they land in the output
    pub fn mappings(&self) -> Vec<SegmentMapping> {
        self.render().1
    }

    /// Render the edited text
    pub fn finish(&self) -> String {
        self.render().0
    }

    fn check_range(&self, start: usize, end: usize) -> AutomockResult<()> {
        let len = self.source.len();
        if start > end
            || end > len
            || !self.source.is_char_boundary(start)
            || !self.source.is_char_boundary(end)
        {
            return Err(AutomockError::EditOutOfBounds { start, end, len });
        }
        Ok(())
    }

    fn render(&self) -> (String, Vec<SegmentMapping>) {
        let mut out = String::with_capacity(self.source.len() + self.appended.len());
        let mut mappings = Vec::new();
        let mut cursor = 0;
        let mut insertions = self.insertions.iter().peekable();

        let mut copy = |out: &mut String, from: usize, to: usize| {
            if from < to {
                let generated_start = out.len();
                out.push_str(&self.source[from..to]);
                mappings.push(SegmentMapping {
                    original: from..to,
                    generated: generated_start..out.len(),
                });
            }
        };

        for edit in &self.edits {
            while let Some(insertion) = insertions.next_if(|i| i.at <= edit.start) {
                copy(&mut out, cursor, insertion.at);
                cursor = insertion.at;
                out.push_str(&insertion.text);
            }
            copy(&mut out, cursor, edit.start);
            out.push_str(&edit.replacement);
            cursor = edit.end;
        }
        for insertion in insertions {
            copy(&mut out, cursor, insertion.at);
            cursor = insertion.at;
            out.push_str(&insertion.text);
        }
        copy(&mut out, cursor, self.source.len());
        out.push_str(&self.appended);

        (out, mappings)
    }
}

impl std::fmt::Display for SourceEdits<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.finish())
    }
}
