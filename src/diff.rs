//! Sentence-level diff between the text before and after a rewrite.
//!
//! The alignment is a plain longest-common-subsequence over sentences with an
//! O(n·m) table. Inputs are chat-sized messages, so the quadratic table is
//! not a concern.

use crate::text::split_sentences;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Equal,
    Added,
    Removed,
}

impl RunKind {
    fn marker(self) -> &'static str {
        match self {
            RunKind::Equal => "  ",
            RunKind::Removed => "- ",
            RunKind::Added => "+ ",
        }
    }
}

/// A maximal span of same-kind sentences, joined with single spaces.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EditRun {
    #[serde(rename = "type")]
    pub kind: RunKind,
    pub text: String,
}

impl EditRun {
    fn new(kind: RunKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

impl fmt::Display for EditRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.marker(), self.text)
    }
}

/// Split both texts into sentences and align them.
pub fn sentence_diff(old_text: &str, new_text: &str) -> Vec<EditRun> {
    let old = split_sentences(old_text);
    let new = split_sentences(new_text);
    align(&old, &new)
}

/// Align two sentence sequences into a merged edit script.
///
/// When neither side's next sentence is part of a longer common subsequence
/// the old side is consumed first, so a replaced sentence always shows up as
/// `removed` followed by `added`.
pub fn align<S: AsRef<str>>(old: &[S], new: &[S]) -> Vec<EditRun> {
    let (n, m) = (old.len(), new.len());

    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i].as_ref() == new[j].as_ref() {
                1 + lcs[i + 1][j + 1]
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut raw = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i].as_ref() == new[j].as_ref() {
            raw.push(EditRun::new(RunKind::Equal, old[i].as_ref()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            raw.push(EditRun::new(RunKind::Removed, old[i].as_ref()));
            i += 1;
        } else {
            raw.push(EditRun::new(RunKind::Added, new[j].as_ref()));
            j += 1;
        }
    }
    raw.extend(old[i..].iter().map(|s| EditRun::new(RunKind::Removed, s.as_ref())));
    raw.extend(new[j..].iter().map(|s| EditRun::new(RunKind::Added, s.as_ref())));

    coalesce(raw)
}

/// Merge adjacent runs of the same kind.
fn coalesce(raw: Vec<EditRun>) -> Vec<EditRun> {
    let mut merged: Vec<EditRun> = Vec::with_capacity(raw.len());
    for run in raw {
        match merged.last_mut() {
            Some(last) if last.kind == run.kind => {
                last.text.push(' ');
                last.text.push_str(&run.text);
            }
            _ => merged.push(run),
        }
    }
    merged
}

/// Render a script as terminal lines: `  ` equal, `- ` removed, `+ ` added.
pub fn render_plain(script: &[EditRun]) -> String {
    script
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub equal: usize,
    pub added: usize,
    pub removed: usize,
}

impl DiffStats {
    pub fn of(script: &[EditRun]) -> Self {
        script.iter().fold(Self::default(), |mut stats, run| {
            match run.kind {
                RunKind::Equal => stats.equal += 1,
                RunKind::Added => stats.added += 1,
                RunKind::Removed => stats.removed += 1,
            }
            stats
        })
    }

    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}
