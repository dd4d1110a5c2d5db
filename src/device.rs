//! Prompt recognition for terminal-emulating switch shells.
//!
//! A switch shell never says "done". The only reliable end-of-output marker is
//! the prompt it prints when it is ready for the next line, so completion
//! detection comes down to matching the trailing, not yet newline-terminated
//! text against a set of prompt patterns. Pagination markers (`--More--`) look
//! like prompts too and must be answered instead of treated as completion.

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::ConnectError;

/// Prompt patterns that cover the common switch families.
///
/// `name#`, `name>`, `name(config)#`, `<name>` and `[name]`. The name may
/// carry one space, as in ICX prompts like `ICX7150-24 Router#`.
pub const GENERIC_PROMPT_PATTERNS: &[&str] = &[
    r"^[^\s#>]+( [^\s#>]+)?(\([^)]*\))?[#>]\s*$",
    r"^(RBM_P|RBM_S)?<[^<>]+>\s*$",
    r"^(HRP_M|HRP_S)?\[[^\[\]]+\]\s*$",
];

/// Pagination markers that cover the common switch families.
pub const GENERIC_MORE_PATTERNS: &[&str] = &[
    r"\s*--\s*More\s*--\s*",
    r"\s*---- More ----\s*",
    r"\s*<--- More --->\s*",
    r"\s*---\(more.*\)---\s*",
];

/// Compiled prompt and pagination patterns for one device family.
#[derive(Debug, Clone)]
pub struct PromptMatcher {
    prompts: RegexSet,
    more: RegexSet,
}

impl PromptMatcher {
    /// Compiles prompt and pagination patterns.
    ///
    /// # Arguments
    ///
    /// * `prompts` - Regex patterns matching a complete shell prompt
    /// * `more` - Regex patterns matching a pagination marker; may be empty
    pub fn new<I, S>(prompts: I, more: I) -> Result<PromptMatcher, ConnectError>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = S>,
    {
        Ok(PromptMatcher {
            prompts: RegexSet::new(prompts)?,
            more: RegexSet::new(more)?,
        })
    }

    /// Matcher built from [`GENERIC_PROMPT_PATTERNS`] and [`GENERIC_MORE_PATTERNS`].
    pub fn generic() -> PromptMatcher {
        GENERIC_MATCHER.clone()
    }

    /// Checks if the trailing incomplete line is a shell prompt.
    pub fn is_prompt(&self, tail: &str) -> bool {
        let line = IGNORE_START_LINE.replace(tail, "");
        let matched = self.prompts.is_match(&line);
        trace!("Checking if tail is a prompt: '{:?}' -> {}", line, matched);
        matched
    }

    /// Checks if the trailing incomplete line is a pagination marker.
    pub fn is_more(&self, tail: &str) -> bool {
        !self.more.is_empty() && self.more.is_match(&IGNORE_START_LINE.replace(tail, ""))
    }

    /// Prompt regex sources, in declaration order.
    pub fn prompt_patterns(&self) -> &[String] {
        self.prompts.patterns()
    }

    /// Pagination regex sources, in declaration order.
    pub fn more_patterns(&self) -> &[String] {
        self.more.patterns()
    }
}

static GENERIC_MATCHER: Lazy<PromptMatcher> = Lazy::new(|| {
    match PromptMatcher::new(GENERIC_PROMPT_PATTERNS, GENERIC_MORE_PATTERNS) {
        Ok(matcher) => matcher,
        Err(err) => panic!("invalid generic prompt patterns: {err}"),
    }
});

/// Regex pattern for matching and removing control characters at the start of lines.
///
/// Carriage returns and backspace runs show up at the start of a line when a
/// switch erases a pagination marker or redraws the prompt.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );
