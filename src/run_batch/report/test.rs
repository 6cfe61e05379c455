use super::*;

pub mod fixtures {
    use super::*;

    pub fn fields<'a>(command: &'a str, output: &'a str) -> Fields<'a> {
        Fields {
            user: "alice",
            host: "web1",
            command,
            output,
        }
    }
}
use fixtures::*;

mod render {
    use super::*;

    #[test]
    fn default_template() {
        assert_eq!(
            "alice@web1 % uptime\nup 3 days\n",
            OutputFormat::default().render(&fields("uptime", "up 3 days")),
        );
    }

    #[test]
    fn custom_template() {
        let format = OutputFormat::new("${host} @ ${command}");
        assert_eq!("web1 @ uptime", format.render(&fields("uptime", "")));
    }

    #[test]
    fn escaped_newline_becomes_newline() {
        let format = OutputFormat::new(r"${host}\n${command}");
        assert_eq!("web1\nuptime", format.render(&fields("uptime", "")));
    }

    #[test]
    fn double_escaped_newline_passes_through() {
        let format = OutputFormat::new(r"${host} \\n ${command}");
        assert_eq!(r"web1 \\n uptime", format.render(&fields("uptime", "")));
    }

    #[test]
    fn output_is_inserted_verbatim() {
        let format = OutputFormat::new("${output}");
        assert_eq!(
            "line one\nline two \\n ${host}",
            format.render(&fields("cat", "line one\nline two \\n ${host}")),
        );
    }

    #[test]
    fn unknown_tokens_are_kept() {
        let format = OutputFormat::new("${host} ${shell} $HOME ${unterminated");
        assert_eq!(
            "web1 ${shell} $HOME ${unterminated",
            format.render(&fields("", "")),
        );
    }

    #[test]
    fn lone_backslash_is_kept() {
        let format = OutputFormat::new(r"C:\temp ${host}\");
        assert_eq!(r"C:\temp web1\", format.render(&fields("", "")));
    }

    #[test]
    fn backslash_command() {
        assert_eq!(
            "alice@web1 % echo \\\\\n\\\n",
            OutputFormat::default().render(&fields("echo \\\\", "\\")),
        );
    }
}

mod annotations {
    use super::*;

    #[test]
    fn command_failure_lines() {
        assert_eq!(
            "[error] Command failed ! (status = 127)",
            command_failure(Failure::Status(127)),
        );
        assert_eq!(
            "[error] Command timed out ! (after 30 seconds)",
            command_failure(Failure::TimedOut(Duration::from_secs(30))),
        );
    }

    #[test]
    fn mirror_failure_lines() {
        assert_eq!(
            "[error] rsync failed ! (status = 23)",
            mirror_failure(Failure::Status(23)),
        );
    }
}

mod summary {
    use super::*;

    #[test]
    fn lists_hosts_in_order() {
        let hosts = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(
            "[error] Command \"uptime\" failed on following hosts\n  b\n  a\n  b\n",
            summary("Command \"uptime\"", &hosts),
        );
    }
}

mod captured {
    use super::*;

    #[tokio::test]
    async fn keeps_streams_apart() {
        let mut captured = Captured::default();
        captured.stdout("out\n").await.unwrap();
        captured.stderr("err\n").await.unwrap();
        captured.stdout("more\n").await.unwrap();
        assert_eq!("out\nmore\n", captured.stdout_text());
        assert_eq!("err\n", captured.stderr_text());
    }

    #[test]
    fn write_appends() {
        let mut buffer = b"a".to_vec();
        _write(&mut buffer, "bc").unwrap();
        assert_eq!(b"abc".to_vec(), buffer);
    }
}

mod fail_fast {
    use super::*;

    #[test]
    fn names_command_and_host() {
        let err = Error::RemoteCommandFailure {
            host: "web1".to_string(),
            command: "false".to_string(),
            status: 1,
        };
        assert_eq!(
            "[error] Command \"false\" failed on host \"web1\"\n",
            fail_fast(&err),
        );

        let err = Error::SessionTimeout {
            host: "web1".to_string(),
            command: "sleep 60".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(
            "[error] Command \"sleep 60\" timed out on host \"web1\"\n",
            fail_fast(&err),
        );
    }

    #[test]
    fn other_errors_use_their_message() {
        let err = Error::StreamClosedUnexpectedly {
            host: "web1".to_string(),
            command: "uptime".to_string(),
        };
        assert_eq!(format!("[error] {err}\n"), fail_fast(&err));
    }
}
