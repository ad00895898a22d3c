//! Expansion of a standalone `*` word into the entries of the current directory.

use crate::error::ShellError;
use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::Path;

const WILDCARD: &str = "*";

/// Sorted, non-hidden entry names of `dir`.
fn visible_entries(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Replaces every standalone `*` word of `line` with the entries of `dir`.
///
/// A line without such a word is returned untouched. A directory with no visible
/// entry is an error, so the line is dropped rather than run with a literal `*`.
pub fn expand<'a>(line: &'a str, dir: &Path) -> Result<Cow<'a, str>, ShellError> {
    if !line.split_whitespace().any(|word| word == WILDCARD) {
        return Ok(Cow::Borrowed(line));
    }

    let entries = visible_entries(dir).map_err(ShellError::Expand)?;
    if entries.is_empty() {
        return Err(ShellError::Expand(io::Error::new(
            io::ErrorKind::NotFound,
            "no match",
        )));
    }
    let replacement = entries.join(" ");

    let expanded: Vec<&str> = line
        .split_whitespace()
        .map(|word| {
            if word == WILDCARD {
                replacement.as_str()
            } else {
                word
            }
        })
        .collect();
    Ok(Cow::Owned(expanded.join(" ")))
}
