use log::debug;
use regex::{Regex, RegexBuilder};

use crate::error::{AutoModError, AutoModResult};
use crate::types::Rule;

/// Marker meaning "any sequence of characters, including none"
pub const WILDCARD_MARKER: char = '*';

/// Compiled size ceiling for a single rule pattern
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Result of compiling a rule pattern
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub matcher: Regex,
    pub is_wildcard: bool,
}

pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(WILDCARD_MARKER)
}

/// Compile a rule pattern into a case-insensitive search predicate.
///
/// With `treat_as_wildcard` set and a `*` present, the pattern is a wildcard
/// expression. Otherwise it is tried as a raw regular expression first and, if
/// that does not compile, as an escaped literal. Only the wildcard path yields
/// `is_wildcard = true`.
pub fn compile(pattern: &str, treat_as_wildcard: bool) -> AutoModResult<CompiledPattern> {
    compile_with_limit(pattern, treat_as_wildcard, PATTERN_SIZE_LIMIT)
}

fn compile_with_limit(
    pattern: &str,
    treat_as_wildcard: bool,
    size_limit: usize,
) -> AutoModResult<CompiledPattern> {
    if treat_as_wildcard && has_wildcard(pattern) {
        let source = wildcard_to_regex(pattern);
        let matcher = build(&source, size_limit).map_err(|e| AutoModError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        return Ok(CompiledPattern {
            matcher,
            is_wildcard: true,
        });
    }

    let matcher = match build(pattern, size_limit) {
        Ok(matcher) => matcher,
        Err(e) => {
            debug!("Pattern '{}' is not a valid regex ({}), matching literally", pattern, e);
            build(&regex::escape(pattern), size_limit).map_err(|e| AutoModError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?
        }
    };

    Ok(CompiledPattern {
        matcher,
        is_wildcard: false,
    })
}

/// Translate a wildcard expression: literals escaped, `*` becomes `.*`
pub fn wildcard_to_regex(pattern: &str) -> String {
    let mut source = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        if ch == WILDCARD_MARKER {
            source.push_str(".*");
        } else {
            let mut buf = [0u8; 4];
            source.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
        }
    }
    source
}

fn build(source: &str, size_limit: usize) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .size_limit(size_limit)
        .build()
}

/// Build a rule by compiling its pattern
pub fn build_rule(
    pattern: &str,
    message: &str,
    duration_minutes: Option<u32>,
    treat_as_wildcard: bool,
) -> AutoModResult<Rule> {
    let compiled = compile(pattern, treat_as_wildcard)?;
    Ok(Rule {
        pattern: pattern.to_string(),
        matcher: compiled.matcher,
        message: message.to_string(),
        duration_minutes,
        is_wildcard: compiled.is_wildcard,
    })
}
