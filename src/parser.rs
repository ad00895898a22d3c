//! Line splitter: cuts a raw line into background groups on `&` and each group into
//! pipe stages on `|`.

use crate::command::{BackgroundGroup, Position};
use crate::error::ParseError;
use crate::lexer::{tokenize_stage, trim_terminator};

const BACKGROUND_SEPARATOR: char = '&';
const PIPE_SEPARATOR: char = '|';

/// Unparsed text of one `&`-delimited group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupText<'a> {
    pub group_index: usize,
    pub runs_in_background: bool,
    pub text: &'a str,
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// Partitions the line on `&`.
///
/// Every group but the text after the last `&` runs in the background. Blank groups
/// are dropped, so a trailing `&` leaves the line without a foreground unit.
pub fn split_background_groups(line: &str) -> Vec<GroupText<'_>> {
    let line = trim_terminator(line);
    let parts: Vec<&str> = line.split(BACKGROUND_SEPARATOR).collect();
    let last = parts.len() - 1;

    parts
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !is_blank(text))
        .enumerate()
        .map(|(group_index, (i, text))| GroupText {
            group_index,
            runs_in_background: i != last,
            text,
        })
        .collect()
}

/// Splits a group on `|`. A pipe with nothing on one of its sides is an error.
pub fn split_pipe_stages(text: &str) -> Result<Vec<&str>, ParseError> {
    let stages: Vec<&str> = text.split(PIPE_SEPARATOR).collect();
    if stages.len() > 1 && stages.iter().any(|s| is_blank(s)) {
        return Err(ParseError::EmptyPipeStage);
    }
    Ok(stages)
}

/// Tokenizes every stage of a group, assigning chain positions.
pub fn parse_group(group: &GroupText<'_>) -> Result<BackgroundGroup, ParseError> {
    let texts = split_pipe_stages(group.text)?;
    let len = texts.len();
    let stages = texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| tokenize_stage(text, Position::in_chain(i, len)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BackgroundGroup {
        group_index: group.group_index,
        runs_in_background: group.runs_in_background,
        stages,
    })
}

/// Parses a whole line. Each group succeeds or fails on its own.
pub fn parse_line(line: &str) -> Vec<Result<BackgroundGroup, ParseError>> {
    split_background_groups(line)
        .iter()
        .map(parse_group)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(line: &str) -> Vec<(&str, bool)> {
        split_background_groups(line)
            .into_iter()
            .map(|g| (g.text.trim(), g.runs_in_background))
            .collect()
    }

    #[test]
    fn no_ampersand_is_one_foreground_group() {
        assert_eq!(flags("ls -l\n"), vec![("ls -l", false)]);
    }

    #[test]
    fn trailing_text_is_the_foreground_unit() {
        assert_eq!(flags("a & b\n"), vec![("a", true), ("b", false)]);
    }

    #[test]
    fn trailing_ampersand_leaves_everything_in_background() {
        assert_eq!(
            flags("a & b & c &\n"),
            vec![("a", true), ("b", true), ("c", true)]
        );
        assert_eq!(flags("a & b & c & \n"), flags("a & b & c &"));
    }

    #[test]
    fn blank_groups_are_discarded() {
        let groups = split_background_groups("a & & b");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].group_index, 1);
        assert!(!groups[1].runs_in_background);
        assert!(split_background_groups("   \n").is_empty());
    }

    #[test]
    fn stages_get_chain_positions() {
        let group = parse_group(&GroupText {
            group_index: 0,
            runs_in_background: false,
            text: "echo x | cat | cat > out",
        })
        .unwrap();
        let positions: Vec<_> = group.stages.iter().map(|s| s.position).collect();
        assert_eq!(
            positions,
            vec![Position::First, Position::Middle, Position::Last]
        );
        assert_eq!(group.stages[2].redirect_target.as_deref(), Some("out"));
    }

    #[test]
    fn empty_pipe_stage_is_an_error() {
        assert_eq!(split_pipe_stages("ls |"), Err(ParseError::EmptyPipeStage));
        assert_eq!(split_pipe_stages("| ls"), Err(ParseError::EmptyPipeStage));
        assert_eq!(split_pipe_stages("a || b"), Err(ParseError::EmptyPipeStage));
    }

    #[test]
    fn bad_group_does_not_poison_the_line() {
        let parsed = parse_line("echo > & ls\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], Err(ParseError::MissingRedirectTarget));
        let ls = parsed[1].as_ref().unwrap();
        assert_eq!(ls.stages[0].command, "ls");
        assert_eq!(ls.stages[0].position, Position::None);
    }
}
