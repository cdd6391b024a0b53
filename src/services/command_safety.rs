//! Submission-time safety gate for the background executor.
//!
//! Adapted from a sibling `assess_command`/tokenizer risk classifier that
//! ranks a whole shell line into safe/confirm/block. This gate is binary
//! instead — just an allow-list basename check plus a per-argument
//! dangerous-token scan, so the three-tier classification collapses to
//! allow or reject, but the tokenizing/basename-normalization approach is
//! unchanged.

use crate::domain::error::ExecutorError;

/// Resolved basenames permitted as the executed command: compiler
/// toolchains, common shells, and the Claude CLI.
const ALLOWED_COMMANDS: &[&str] = &[
    "bash", "sh", "zsh", "cargo", "rustc", "gcc", "g++", "cc", "clang", "clang++", "make", "cmake",
    "python", "python3", "node", "npm", "npx", "go", "git", "claude",
];

/// Returns the resolved basename of a command path, lowercased.
fn basename(command: &str) -> String {
    command.rsplit('/').next().unwrap_or(command).to_lowercase()
}

/// Validate `command` against the fixed allow-list by basename.
pub fn check_command_allowed(command: &str) -> Result<(), ExecutorError> {
    let base = basename(command);
    if ALLOWED_COMMANDS.contains(&base.as_str()) {
        Ok(())
    } else {
        Err(ExecutorError::CommandNotAllowed(command.to_string()))
    }
}

/// Dangerous substrings rejected anywhere in a non-flag argument: shell
/// chaining, command substitution, and redirection.
const DANGEROUS_PATTERNS: &[&str] = &["&&", "||", "`", "$(", "|", ">", "<"];

/// Validate every positional argument (skipping ones starting with `-`)
/// against the dangerous-token list, plus bare leading `&` / trailing `;`.
pub fn check_args_safe(args: &[String]) -> Result<(), ExecutorError> {
    for arg in args {
        if arg.starts_with('-') {
            continue;
        }
        if arg.starts_with('&') || arg.ends_with(';') {
            return Err(ExecutorError::UnsafeArgument(arg.clone(), "shell control character".into()));
        }
        for pattern in DANGEROUS_PATTERNS {
            if arg.contains(pattern) {
                return Err(ExecutorError::UnsafeArgument(arg.clone(), format!("contains '{pattern}'")));
            }
        }
    }
    Ok(())
}

/// `modelName` must match `[A-Za-z0-9_\-:]+` when provided.
pub fn check_model_name(model: &str) -> Result<(), ExecutorError> {
    let valid = !model.is_empty()
        && model.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':'));
    if valid {
        Ok(())
    } else {
        Err(ExecutorError::InvalidModelName(model.to_string()))
    }
}

/// `maxTokens` must be a positive integer.
pub fn check_max_tokens(max_tokens: i64) -> Result<(), ExecutorError> {
    if max_tokens > 0 {
        Ok(())
    } else {
        Err(ExecutorError::InvalidMaxTokens(max_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_listed_basename_passes() {
        assert!(check_command_allowed("/usr/bin/cargo").is_ok());
        assert!(check_command_allowed("bash").is_ok());
    }

    #[test]
    fn unlisted_command_is_rejected() {
        assert!(matches!(check_command_allowed("sudo"), Err(ExecutorError::CommandNotAllowed(_))));
    }

    #[test]
    fn flags_are_exempt_from_the_scan() {
        assert!(check_args_safe(&["--flag=a&&b".to_string()]).is_ok());
    }

    #[test]
    fn command_chaining_in_an_argument_is_rejected() {
        let args = vec!["build".to_string(), "&& rm -rf /".to_string()];
        assert!(check_args_safe(&args).is_err());
    }

    #[test]
    fn command_substitution_is_rejected() {
        let args = vec!["$(whoami)".to_string()];
        assert!(matches!(check_args_safe(&args), Err(ExecutorError::UnsafeArgument(_, _))));
    }

    #[test]
    fn redirection_is_rejected() {
        assert!(check_args_safe(&["out.txt > /etc/passwd".to_string()]).is_err());
    }

    #[test]
    fn model_name_pattern_is_enforced() {
        assert!(check_model_name("claude-3-5-sonnet").is_ok());
        assert!(check_model_name("claude 3.5!").is_err());
    }

    #[test]
    fn max_tokens_must_be_positive() {
        assert!(check_max_tokens(1024).is_ok());
        assert!(check_max_tokens(0).is_err());
        assert!(check_max_tokens(-1).is_err());
    }
}
