/// Clean an argument list before it is handed to a process spawn.
///
/// Each argument has embedded NUL bytes stripped and surrounding whitespace
/// trimmed; arguments left empty are dropped. The relative order of the
/// surviving arguments is preserved.
#[must_use]
pub fn sanitize_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .filter_map(|arg| {
            let stripped = arg.as_ref().replace('\0', "");
            let trimmed = stripped.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_null_and_whitespace() {
        let cleaned = sanitize_args(["  run ", "flow\0.json", "\0", "   ", "--config", "c.yaml\t"]);
        assert_eq!(cleaned, vec!["run", "flow.json", "--config", "c.yaml"]);
    }

    #[test]
    fn test_keeps_inner_whitespace_and_metacharacters() {
        let cleaned = sanitize_args(["a b", "$(whoami)", "x;y"]);
        assert_eq!(cleaned, vec!["a b", "$(whoami)", "x;y"]);
    }

    #[test]
    fn test_empty_input() {
        let cleaned = sanitize_args(Vec::<String>::new());
        assert!(cleaned.is_empty());
    }

    proptest! {
        #[test]
        fn prop_output_is_trimmed_nonempty_subsequence(
            args in proptest::collection::vec("[ \\t\\x00a-z]{0,8}", 0..12)
        ) {
            let cleaned = sanitize_args(&args);

            let expected: Vec<String> = args
                .iter()
                .map(|a| a.replace('\0', "").trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            prop_assert_eq!(&cleaned, &expected);

            for arg in &cleaned {
                prop_assert!(!arg.is_empty());
                prop_assert!(!arg.contains('\0'));
                prop_assert_eq!(arg.trim(), arg.as_str());
            }
        }

        #[test]
        fn prop_sanitize_is_idempotent(
            args in proptest::collection::vec("[ \\x00a-z-]{0,8}", 0..12)
        ) {
            let once = sanitize_args(&args);
            let twice = sanitize_args(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
