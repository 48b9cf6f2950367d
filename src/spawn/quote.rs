/**
 * Join an argument vector into a single shell command line, each argument
 * wrapped in single quotes. A quote character inside an argument becomes
 * the sequence `'\''` (close the quotes, escape one quote, reopen), so the
 * shell re-parses the line into exactly the original vector.
 */
pub fn quote_command_line<S: AsRef<str>>(arguments: &[S]) -> String {
    let mut line = String::new();

    for argument in arguments {
        if !line.is_empty() {
            line.push(' ');
        }
        line.push('\'');
        for ch in argument.as_ref().chars() {
            if ch == '\'' {
                line.push_str("'\\''");
            } else {
                line.push(ch);
            }
        }
        line.push('\'');
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rstest::rstest;

    /// Minimal POSIX-style splitter covering the constructs the quoter
    /// emits: single quotes and backslash escapes outside of them.
    fn shell_split(line: &str) -> Vec<String> {
        let mut arguments = Vec::new();
        let mut current = String::new();
        let mut started = false;
        let mut in_quotes = false;
        let mut chars = line.chars();

        while let Some(ch) = chars.next() {
            if in_quotes {
                if ch == '\'' {
                    in_quotes = false;
                } else {
                    current.push(ch);
                }
            } else {
                match ch {
                    '\'' => {
                        in_quotes = true;
                        started = true;
                    }
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            current.push(escaped);
                            started = true;
                        }
                    }
                    ' ' => {
                        if started {
                            arguments.push(std::mem::take(&mut current));
                            started = false;
                        }
                    }
                    other => {
                        current.push(other);
                        started = true;
                    }
                }
            }
        }
        if started {
            arguments.push(current);
        }

        arguments
    }

    #[rstest]
    #[case(&["ls", "-la"], "'ls' '-la'")]
    #[case(&["echo", "it's"], "'echo' 'it'\\''s'")]
    #[case(&[""], "''")]
    #[case(&["a b", "c"], "'a b' 'c'")]
    #[case(&["'"], "''\\'''")]
    fn test_quoting(#[case] arguments: &[&str], #[case] expected: &str) {
        assert_eq!(quote_command_line(arguments), expected);
    }

    #[rstest]
    #[case(vec!["ls".to_string(), "-la".to_string()])]
    #[case(vec!["".to_string(), "".to_string()])]
    #[case(vec!["don't".to_string(), "won't can't".to_string()])]
    #[case(vec!["''''".to_string()])]
    #[case(vec!["a\nb".to_string(), "$HOME".to_string(), "\\".to_string()])]
    fn test_round_trip(#[case] arguments: Vec<String>) {
        let line = quote_command_line(&arguments);
        assert_eq!(shell_split(&line), arguments);
    }

    #[test]
    fn test_round_trip_random_vectors() {
        let charset: Vec<char> =
            "abc '\"\\$`!*?\n\t{}()|;&<>~#".chars().collect();
        let mut rng = rand::rng();

        for _ in 0..200 {
            let argc = rng.random_range(1..6);
            let arguments: Vec<String> = (0..argc)
                .map(|_| {
                    let len = rng.random_range(0..12);
                    (0..len)
                        .map(|_| {
                            charset[rng.random_range(0..charset.len())]
                        })
                        .collect()
                })
                .collect();

            let line = quote_command_line(&arguments);
            assert_eq!(
                shell_split(&line),
                arguments,
                "failed for line: {line}"
            );
        }
    }
}
