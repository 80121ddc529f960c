//! Minimal unified diff reader: enough to learn which files a patch touches
//! and to reject patches whose hunks do not add up.

use thiserror::Error;

/// Paths touched by one file section of a diff, with `a/` and `b/` stripped.
/// `old_path` is `None` for creations, `new_path` is `None` for deletions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
}

impl FileChange {
    /// Every path whose language must be checked.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        let new = match (&self.old_path, &self.new_path) {
            (Some(old), Some(new)) if old == new => None,
            (_, new) => new.as_deref(),
        };
        self.old_path.as_deref().into_iter().chain(new)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchParseError {
    #[error("patch contains no file changes")]
    Empty,
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
}

fn malformed(idx: usize, reason: &'static str) -> PatchParseError {
    PatchParseError::Malformed {
        line: idx + 1,
        reason,
    }
}

fn strip_side_prefix(path: &str) -> String {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_string()
}

fn parse_header_path(raw: &str) -> Option<String> {
    let path = raw.split('\t').next().unwrap_or(raw).trim_end();
    let path = path.trim_matches('"');
    if path == "/dev/null" {
        None
    } else {
        Some(strip_side_prefix(path))
    }
}

fn split_git_header(rest: &str) -> Option<(String, String)> {
    let split = rest.rfind(" b/")?;
    let (old, new) = (&rest[..split], &rest[split + 1..]);
    Some((
        strip_side_prefix(old.trim_matches('"')),
        strip_side_prefix(new.trim_matches('"')),
    ))
}

fn hunk_len(token: &str) -> Option<usize> {
    match token.split_once(',') {
        Some((start, len)) => {
            start.parse::<usize>().ok()?;
            len.parse().ok()
        }
        None => token.parse::<usize>().ok().map(|_| 1),
    }
}

fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let mut parts = line.strip_prefix("@@ ")?.split_whitespace();
    let old = hunk_len(parts.next()?.strip_prefix('-')?)?;
    let new = hunk_len(parts.next()?.strip_prefix('+')?)?;
    (parts.next()? == "@@").then_some((old, new))
}

pub fn parse_unified_diff(text: &str) -> Result<Vec<FileChange>, PatchParseError> {
    let mut files = Vec::new();
    let mut current: Option<FileChange> = None;
    // set between a `diff --git` line and its `---`/`+++` pair
    let mut in_git_header = false;
    let mut lines = text.lines().enumerate();

    while let Some((idx, line)) = lines.next() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            files.extend(current.take());
            let (old, new) = split_git_header(rest).ok_or(malformed(idx, "bad diff header"))?;
            current = Some(FileChange {
                old_path: Some(old),
                new_path: Some(new),
            });
            in_git_header = true;
        } else if line.starts_with("new file mode") {
            if let Some(change) = current.as_mut() {
                change.old_path = None;
            }
        } else if line.starts_with("deleted file mode") {
            if let Some(change) = current.as_mut() {
                change.new_path = None;
            }
        } else if let Some(path) = line.strip_prefix("rename from ") {
            if let Some(change) = current.as_mut() {
                change.old_path = Some(path.to_string());
            }
        } else if let Some(path) = line.strip_prefix("rename to ") {
            if let Some(change) = current.as_mut() {
                change.new_path = Some(path.to_string());
            }
        } else if let Some(old) = line.strip_prefix("--- ") {
            let Some((next_idx, next)) = lines.next() else {
                return Err(malformed(idx, "'---' without '+++'"));
            };
            let new = next
                .strip_prefix("+++ ")
                .ok_or(malformed(next_idx, "'---' without '+++'"))?;
            let change = FileChange {
                old_path: parse_header_path(old),
                new_path: parse_header_path(new),
            };
            if change.old_path.is_none() && change.new_path.is_none() {
                return Err(malformed(idx, "both sides are /dev/null"));
            }
            if !in_git_header {
                files.extend(current.take());
            }
            current = Some(change);
            in_git_header = false;
        } else if line.starts_with("@@") {
            if current.is_none() {
                return Err(malformed(idx, "hunk before file header"));
            }
            let (mut old_left, mut new_left) =
                parse_hunk_header(line).ok_or(malformed(idx, "bad hunk header"))?;
            while old_left > 0 || new_left > 0 {
                let Some((body_idx, body)) = lines.next() else {
                    return Err(malformed(idx, "truncated hunk"));
                };
                let overflow = malformed(body_idx, "hunk longer than its header");
                match body.as_bytes().first() {
                    Some(b' ') | None => {
                        old_left = old_left.checked_sub(1).ok_or(overflow.clone())?;
                        new_left = new_left.checked_sub(1).ok_or(overflow)?;
                    }
                    Some(b'-') => old_left = old_left.checked_sub(1).ok_or(overflow)?,
                    Some(b'+') => new_left = new_left.checked_sub(1).ok_or(overflow)?,
                    Some(b'\\') => {}
                    Some(_) => return Err(malformed(body_idx, "unexpected line in hunk")),
                }
            }
        }
    }
    files.extend(current.take());

    if files.is_empty() {
        Err(PatchParseError::Empty)
    } else {
        Ok(files)
    }
}
