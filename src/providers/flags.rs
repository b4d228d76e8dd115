//! Argument rule tables.
//!
//! A provider lists its optional flags in emission order, each tagged with
//! the session kinds that accept it. Assembly walks the table and asks the
//! provider to render each permitted flag; anything the CLI would reject
//! for the current session kind is never rendered.

/// Session kinds a flag is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Support {
    pub fresh: bool,
    pub resume: bool,
}

impl Support {
    pub const BOTH: Self = Self {
        fresh: true,
        resume: true,
    };
    pub const FRESH_ONLY: Self = Self {
        fresh: true,
        resume: false,
    };

    #[must_use]
    pub const fn allows(self, resume: bool) -> bool {
        if resume { self.resume } else { self.fresh }
    }
}

/// One optional flag and where it may appear.
#[derive(Debug, Clone, Copy)]
pub struct FlagRule<F> {
    pub flag: F,
    pub support: Support,
}

impl<F> FlagRule<F> {
    pub const fn new(flag: F, support: Support) -> Self {
        Self { flag, support }
    }
}

/// Render every flag of `rules` allowed for this session kind, in order.
pub fn assemble<F: Copy>(
    rules: &[FlagRule<F>],
    resume: bool,
    mut render: impl FnMut(F) -> Vec<String>,
) -> Vec<String> {
    rules
        .iter()
        .filter(|rule| rule.support.allows(resume))
        .flat_map(|rule| render(rule.flag))
        .collect()
}

/// Append the prompt as the final positional argument, guarded with `--`
/// when it would otherwise parse as an option.
pub fn push_prompt(args: &mut Vec<String>, prompt: &str) {
    if prompt.starts_with('-') {
        args.push("--".to_string());
    }
    args.push(prompt.to_string());
}
