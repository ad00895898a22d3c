//! Stage tokenizer: turns the text of one pipe stage into a [`PipeStage`].

use crate::command::{PipeStage, Position};
use crate::error::ParseError;

const REDIRECT_MARKER: &str = ">";

/// Strips one trailing line terminator (`\n` or `\r\n`).
pub fn trim_terminator(text: &str) -> &str {
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.strip_suffix('\r').unwrap_or(text)
}

/// Splits the stage text into words and pulls out the `> file` redirection.
///
/// The position is decided by the caller from the chain the stage belongs to.
pub fn tokenize_stage(text: &str, position: Position) -> Result<PipeStage, ParseError> {
    if text.contains('\0') {
        return Err(ParseError::NulByte);
    }
    let mut arguments = Vec::new();
    let mut redirect_target = None;

    let mut words = trim_terminator(text).split_whitespace();
    while let Some(word) = words.next() {
        if word != REDIRECT_MARKER {
            arguments.push(word.to_string());
            continue;
        }
        if redirect_target.is_some() {
            return Err(ParseError::MultipleRedirects);
        }
        let target = words.next().ok_or(ParseError::MissingRedirectTarget)?;
        if target == REDIRECT_MARKER {
            return Err(ParseError::MissingRedirectTarget);
        }
        redirect_target = Some(target.to_string());
    }

    let command = arguments.first().cloned().ok_or(ParseError::MissingCommand)?;
    Ok(PipeStage {
        command,
        arguments,
        position,
        redirect_target,
    })
}
