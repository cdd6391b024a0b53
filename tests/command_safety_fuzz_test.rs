//! Testable property #9: the allow-list and argument scanner reject an
//! arbitrary command/argument, never silently admitting something outside
//! the fixed contract.

use coordination_runtime::domain::error::ExecutorError;
use coordination_runtime::services::command_safety::{check_args_safe, check_command_allowed};
use proptest::prelude::*;

const ALLOWED: &[&str] = &[
    "bash", "sh", "zsh", "cargo", "rustc", "gcc", "g++", "cc", "clang", "clang++", "make", "cmake",
    "python", "python3", "node", "npm", "npx", "go", "git", "claude",
];

proptest! {
    /// Any basename not on the fixed allow-list is rejected, regardless of
    /// what directory prefix or casing it is dressed up in.
    #[test]
    fn unlisted_basenames_are_always_rejected(name in "[a-zA-Z]{1,12}") {
        if !ALLOWED.contains(&name.to_lowercase().as_str()) {
            prop_assert!(matches!(check_command_allowed(&name), Err(ExecutorError::CommandNotAllowed(_))));
        }
    }

    /// A positional argument carrying a shell metacharacter is rejected no
    /// matter what harmless text surrounds it.
    #[test]
    fn arguments_containing_shell_metacharacters_are_rejected(
        prefix in "[a-zA-Z0-9_./ ]{0,10}",
        metachar in prop::sample::select(vec!["&&", "||", "`", "$(", "|", ">", "<"]),
        suffix in "[a-zA-Z0-9_./ ]{0,10}",
    ) {
        let arg = format!("{prefix}{metachar}{suffix}");
        prop_assert!(check_args_safe(&[arg]).is_err());
    }

    /// Flag-shaped arguments (leading `-`) are exempt from the scan even
    /// when they contain metacharacters, matching the existing contract.
    #[test]
    fn flag_arguments_are_never_scanned(body in "[a-zA-Z0-9=&|`$()<> ]{0,20}") {
        let arg = format!("-{body}");
        prop_assert!(check_args_safe(&[arg]).is_ok());
    }
}
