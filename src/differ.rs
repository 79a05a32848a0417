//! Diff engine interface and the default line-based implementation.
//!
//! A patch produced by [`LineDiffEngine`] is an edit script over lines, one
//! operation per line of text:
//!
//! ```text
//! =3              keep three base lines
//! -"old line\n"   drop a base line (must match)
//! +"new line\n"   emit a new line
//! ```
//!
//! Line contents are JSON string literals so any UTF-8 text, including lines without
//! a trailing newline, survives exactly. Base lines left over after the last
//! operation are kept, which makes the empty patch the identity.

use crate::error::{ChainError, Result};
use async_trait::async_trait;
use similar::{capture_diff_slices, Algorithm, DiffOp};

#[async_trait]
pub trait DiffEngine: Send + Sync {
    /// Patch turning `old` into `new`. Fails with [`ChainError::NoDifferences`] when
    /// the inputs are identical.
    async fn diff(&self, old: &[u8], new: &[u8]) -> Result<String>;

    async fn patch(&self, base: &[u8], patch: &str) -> Result<Vec<u8>>;

    /// Single patch equivalent to applying `first` then `second`.
    async fn combine(&self, first: &str, second: &str) -> Result<String>;
}

/// Diff that treats identical inputs as the empty patch.
pub async fn diff_or_empty(engine: &dyn DiffEngine, old: &[u8], new: &[u8]) -> Result<String> {
    match engine.diff(old, new).await {
        Ok(patch) => Ok(patch),
        Err(ChainError::NoDifferences) => Ok(String::new()),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Edit {
    Keep,
    Delete(String),
    Insert(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LineDiffEngine;

fn split_lines(bytes: &[u8]) -> Result<Vec<&str>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ChainError::DiffError(format!("state is not valid UTF-8: {}", e)))?;
    Ok(text.split_inclusive('\n').collect())
}

/// Myers edit script between two line lists, in linear space. Runs without a deadline
/// so every node derives the same patch for the same states.
fn edit_script(old: &[&str], new: &[&str]) -> Vec<Edit> {
    let deleted = |index: usize, len: usize| {
        old[index..index + len]
            .iter()
            .map(|line| Edit::Delete(line.to_string()))
    };
    let inserted = |index: usize, len: usize| {
        new[index..index + len]
            .iter()
            .map(|line| Edit::Insert(line.to_string()))
    };

    let mut edits = Vec::with_capacity(old.len().max(new.len()));
    for op in capture_diff_slices(Algorithm::Myers, old, new) {
        match op {
            DiffOp::Equal { len, .. } => edits.extend(std::iter::repeat(Edit::Keep).take(len)),
            DiffOp::Delete {
                old_index, old_len, ..
            } => edits.extend(deleted(old_index, old_len)),
            DiffOp::Insert {
                new_index, new_len, ..
            } => edits.extend(inserted(new_index, new_len)),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                edits.extend(deleted(old_index, old_len));
                edits.extend(inserted(new_index, new_len));
            }
        }
    }
    edits
}

fn encode(edits: &[Edit]) -> Result<String> {
    // trailing keeps are implicit
    let end = edits
        .iter()
        .rposition(|e| *e != Edit::Keep)
        .map_or(0, |p| p + 1);

    let mut out = String::new();
    let mut keeps = 0usize;
    for edit in &edits[..end] {
        if *edit == Edit::Keep {
            keeps += 1;
            continue;
        }
        if keeps > 0 {
            out.push_str(&format!("={}\n", keeps));
            keeps = 0;
        }
        let (sign, line) = match edit {
            Edit::Delete(line) => ('-', line),
            Edit::Insert(line) => ('+', line),
            Edit::Keep => continue,
        };
        let literal = serde_json::to_string(line)
            .map_err(|e| ChainError::DiffError(format!("cannot encode line: {}", e)))?;
        out.push(sign);
        out.push_str(&literal);
        out.push('\n');
    }
    Ok(out)
}

fn decode(patch: &str) -> Result<Vec<Edit>> {
    let mut edits = Vec::new();
    for (n, line) in patch.lines().enumerate() {
        let malformed = |why: String| ChainError::DiffError(format!("patch line {}: {}", n + 1, why));
        match line.split_at_checked(1) {
            Some(("=", count)) => {
                let count: usize = count.parse().map_err(|e| malformed(format!("{}", e)))?;
                edits.extend(std::iter::repeat(Edit::Keep).take(count));
            }
            Some((sign @ ("-" | "+"), literal)) => {
                let text: String =
                    serde_json::from_str(literal).map_err(|e| malformed(format!("{}", e)))?;
                edits.push(if sign == "-" {
                    Edit::Delete(text)
                } else {
                    Edit::Insert(text)
                });
            }
            _ => return Err(malformed(format!("unrecognized operation {:?}", line))),
        }
    }
    Ok(edits)
}

fn apply(base: &[&str], edits: Vec<Edit>) -> Result<String> {
    let mut out = String::new();
    let mut cursor = 0;
    for edit in edits {
        match edit {
            Edit::Keep | Edit::Delete(_) if cursor >= base.len() => {
                return Err(ChainError::DiffError(
                    "patch does not apply: base is too short".to_string(),
                ));
            }
            Edit::Keep => {
                out.push_str(base[cursor]);
                cursor += 1;
            }
            Edit::Delete(line) => {
                if base[cursor] != line {
                    return Err(ChainError::DiffError(format!(
                        "patch does not apply at line {}",
                        cursor + 1
                    )));
                }
                cursor += 1;
            }
            Edit::Insert(line) => out.push_str(&line),
        }
    }
    for line in &base[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

/// Composes two edit scripts: the first maps base to middle, the second middle to result.
fn compose(first: Vec<Edit>, second: Vec<Edit>) -> Result<Vec<Edit>> {
    let mut first = first.into_iter();
    let mut second = second.into_iter();
    let mut a = first.next();
    let mut b = second.next();
    let mut out = Vec::new();

    loop {
        match (a.take(), b.take()) {
            (None, None) => break,
            (left, Some(Edit::Insert(line))) => {
                out.push(Edit::Insert(line));
                a = left;
                b = second.next();
            }
            (Some(Edit::Delete(line)), right) => {
                out.push(Edit::Delete(line));
                a = first.next();
                b = right;
            }
            // both consume one middle line; a missing op is an implicit keep
            (left, right) => {
                match (left.unwrap_or(Edit::Keep), right.unwrap_or(Edit::Keep)) {
                    (Edit::Keep, Edit::Keep) => out.push(Edit::Keep),
                    (Edit::Keep, Edit::Delete(line)) => out.push(Edit::Delete(line)),
                    (Edit::Insert(line), Edit::Keep) => out.push(Edit::Insert(line)),
                    (Edit::Insert(inserted), Edit::Delete(deleted)) => {
                        if inserted != deleted {
                            return Err(ChainError::DiffError(
                                "patches do not compose: deleted line was never inserted"
                                    .to_string(),
                            ));
                        }
                    }
                    (l, r) => {
                        return Err(ChainError::DiffError(format!(
                            "patches do not compose: {:?} against {:?}",
                            l, r
                        )))
                    }
                }
                a = first.next();
                b = second.next();
            }
        }
    }
    Ok(out)
}

#[async_trait]
impl DiffEngine for LineDiffEngine {
    async fn diff(&self, old: &[u8], new: &[u8]) -> Result<String> {
        if old == new {
            return Err(ChainError::NoDifferences);
        }
        let old_lines = split_lines(old)?;
        let new_lines = split_lines(new)?;
        encode(&edit_script(&old_lines, &new_lines))
    }

    async fn patch(&self, base: &[u8], patch: &str) -> Result<Vec<u8>> {
        let lines = split_lines(base)?;
        Ok(apply(&lines, decode(patch)?)?.into_bytes())
    }

    async fn combine(&self, first: &str, second: &str) -> Result<String> {
        encode(&compose(decode(first)?, decode(second)?)?)
    }
}
