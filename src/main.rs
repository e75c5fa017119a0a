use jqexec::cli;

fn main() {
    if let Err(e) = cli::run() {
        // Compile diagnostics have already been printed in full.
        if e.to_string() == "filter failed to compile" {
            std::process::exit(1);
        }
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use jqexec::cli::{Command, JqexecCli};

    #[test]
    fn eval_command_takes_file_and_timeout() {
        let cli = JqexecCli::parse_from([
            "jqexec",
            "eval",
            ".a",
            "data.json",
            "--timeout",
            "1.5",
            "--raw",
        ]);
        match cli.command() {
            Command::Eval {
                filter,
                file,
                on_pool,
                raw,
                eval,
            } => {
                assert_eq!(filter, ".a");
                assert_eq!(
                    file.as_ref().map(|p| p.to_string_lossy().into_owned()),
                    Some("data.json".into())
                );
                assert!(!on_pool);
                assert!(raw);
                assert_eq!(eval.timeout, Some(1.5));
                assert!(!eval.enable_env);
            }
            other => panic!("expected eval command, got {other:?}"),
        }
    }

    #[test]
    fn batch_command_requires_a_file() {
        assert!(JqexecCli::try_parse_from(["jqexec", "batch", "."]).is_err());
    }

    #[test]
    fn global_flags_apply_after_the_subcommand() {
        let cli = JqexecCli::try_parse_from(["jqexec", "render", "t.json", "--workers", "3", "--stats"]);
        assert!(cli.is_ok());
    }
}
