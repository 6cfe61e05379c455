use super::*;
use crate::core::Secret;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub mod fixtures {
    use super::*;

    // A Transport that plays back canned chunks and records what the session writes. After the
    // script runs out it either reports end of stream or hangs forever.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        pub chunks: VecDeque<Vec<u8>>,
        pub written: Arc<Mutex<Vec<u8>>>,
        pub hang: bool,
        pub status: Option<i32>,
        pub fail_read: bool,
        pub killed: bool,
    }

    impl ScriptedTransport {
        pub fn new(chunks: &[&str]) -> Self {
            ScriptedTransport {
                chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                status: Some(0),
                ..Default::default()
            }
        }

        pub fn written(&self) -> String {
            String::from_utf8(self.written.lock().unwrap().clone()).unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if self.fail_read => Err(io::Error::other("expected")),
                None if self.hang => std::future::pending().await,
                None => Ok(0),
            }
        }

        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        async fn wait(&mut self) -> io::Result<Option<i32>> {
            Ok(self.status)
        }

        async fn kill(&mut self) -> io::Result<()> {
            self.killed = true;
            Ok(())
        }
    }

    pub fn credentials() -> Credentials {
        Credentials {
            login: Some(Secret::new("letmein")),
            elevation: Some(Secret::new("rootpw")),
        }
    }

    // Runs a session over `transport` with the default table and a ten second budget.
    pub async fn drive(
        transport: &mut ScriptedTransport,
        sentinel: bool,
    ) -> (Result<Outcome, SessionError>, State) {
        let table = PromptTable::default();
        let credentials = credentials();
        let mut session = Session::new(&table, &credentials, Duration::from_secs(10), sentinel);
        let result = session.drive(transport).await;
        (result, session.state())
    }
}
use fixtures::*;

mod drive {
    use super::*;

    #[tokio::test]
    async fn plain_output_uses_process_status() {
        let mut transport = ScriptedTransport::new(&["total 0\r\n", "done\r\n"]);
        transport.status = Some(23);
        let (result, state) = drive(&mut transport, false).await;
        assert_eq!(
            Outcome {
                status: 23,
                output: "total 0\ndone".to_string(),
            },
            result.unwrap(),
        );
        assert_eq!(State::Done, state);
        assert_eq!("", transport.written());
    }

    #[tokio::test]
    async fn sentinel_overrides_process_status() {
        let mut transport = ScriptedTransport::new(&[
            "/bin/sh: nope: command not found\n",
            "\n__VOLLEY_EXIT_STATUS__=127\n",
        ]);
        transport.status = Some(0);
        let (result, _) = drive(&mut transport, true).await;
        let outcome = result.unwrap();
        assert_eq!(127, outcome.status);
        assert_eq!("/bin/sh: nope: command not found", outcome.output);
    }

    #[tokio::test]
    async fn missing_sentinel_falls_back_to_process_status() {
        let refused = "ssh: connect to host nowhere port 22: Connection refused\r\n";
        let mut transport = ScriptedTransport::new(&[refused]);
        transport.status = Some(255);
        let (result, _) = drive(&mut transport, true).await;
        let outcome = result.unwrap();
        assert_eq!(255, outcome.status);
        assert!(outcome.output.contains("Connection refused"));
    }

    #[tokio::test]
    async fn answers_login_prompt() {
        let mut transport = ScriptedTransport::new(&[
            "alice@web1's password: ",
            "\r\n",
            "up 3 days\n\n__VOLLEY_EXIT_STATUS__=0\n",
        ]);
        let (result, state) = drive(&mut transport, true).await;
        assert_eq!("letmein\n", transport.written());
        assert_eq!("up 3 days", result.unwrap().output);
        assert_eq!(State::Done, state);
    }

    #[tokio::test]
    async fn answers_elevation_prompt_after_login() {
        let mut transport = ScriptedTransport::new(&[
            "Password: ",
            "[sudo] password for alice: ",
            "restarted\n__VOLLEY_EXIT_STATUS__=0\n",
        ]);
        let (result, _) = drive(&mut transport, true).await;
        assert_eq!("letmein\nrootpw\n", transport.written());
        let outcome = result.unwrap();
        assert_eq!("restarted", outcome.output);
        assert!(!outcome.output.contains("password"));
    }

    #[tokio::test]
    async fn prompt_split_across_reads() {
        let mut transport =
            ScriptedTransport::new(&["Enter passphrase for key '/home/a/.ssh/id'", ": ", "ok\n"]);
        let (result, _) = drive(&mut transport, false).await;
        assert_eq!("letmein\n", transport.written());
        assert_eq!("ok", result.unwrap().output);
    }

    #[tokio::test]
    async fn password_in_middle_of_output_is_not_a_prompt() {
        let mut transport = ScriptedTransport::new(&["password: hunter2 is weak\n"]);
        let (result, _) = drive(&mut transport, false).await;
        assert_eq!("", transport.written());
        assert_eq!("password: hunter2 is weak", result.unwrap().output);
    }

    #[tokio::test]
    async fn missing_secret_sends_empty_line() {
        let mut transport = ScriptedTransport::new(&["Password: ", "denied\n"]);
        let table = PromptTable::default();
        let credentials = Credentials::default();
        let result = Session::new(&table, &credentials, Duration::from_secs(10), false)
            .drive(&mut transport)
            .await;
        assert_eq!("\n", transport.written());
        assert_eq!("denied", result.unwrap().output);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_kills() {
        let mut transport = ScriptedTransport::new(&["starting...\n"]);
        transport.hang = true;
        let (result, state) = drive(&mut transport, true).await;
        assert!(matches!(result, Err(SessionError::Timeout)));
        assert_eq!(State::TimedOut, state);
        assert!(transport.killed);
    }

    #[tokio::test]
    async fn read_error_closes_stream() {
        let mut transport = ScriptedTransport::new(&["partial"]);
        transport.fail_read = true;
        let (result, state) = drive(&mut transport, true).await;
        assert!(matches!(result, Err(SessionError::StreamClosed)));
        assert_eq!(State::StreamClosed, state);
    }

    #[tokio::test]
    async fn signal_without_sentinel_closes_stream() {
        let mut transport = ScriptedTransport::new(&["partial"]);
        transport.status = None;
        let (result, state) = drive(&mut transport, true).await;
        assert!(matches!(result, Err(SessionError::StreamClosed)));
        assert_eq!(State::StreamClosed, state);
    }

    #[tokio::test]
    async fn custom_table() {
        let table = PromptTable::new(vec![
            (
                Trigger::Pattern(Regex::new(r"Token: $").unwrap()),
                Step::SendLogin,
            ),
            (Trigger::EndOfStream, Step::Finish),
        ]);
        let credentials = credentials();
        let mut transport = ScriptedTransport::new(&["Token: ", "welcome\n"]);
        let result = Session::new(&table, &credentials, Duration::from_secs(1), false)
            .drive(&mut transport)
            .await;
        assert_eq!("letmein\n", transport.written());
        assert_eq!("welcome", result.unwrap().output);
    }
}

mod strip_sentinel {
    use super::*;

    #[test]
    fn strips_last_sentinel() {
        let text = "a\n__VOLLEY_EXIT_STATUS__=1\nb\n\n__VOLLEY_EXIT_STATUS__=2\n";
        assert_eq!(
            Some(("a\n__VOLLEY_EXIT_STATUS__=1\nb".to_string(), 2)),
            strip_sentinel(text),
        );
    }

    #[test]
    fn keeps_text_after_sentinel_line() {
        let text = "out\n__VOLLEY_EXIT_STATUS__=0\nConnection to web1 closed.\n";
        assert_eq!(
            Some(("out\nConnection to web1 closed.".to_string(), 0)),
            strip_sentinel(text),
        );
    }

    #[test]
    fn ignores_sentinel_mid_line() {
        assert_eq!(None, strip_sentinel("echo __VOLLEY_EXIT_STATUS__=0\n"));
    }

    #[test]
    fn ignores_malformed_status() {
        assert_eq!(None, strip_sentinel("__VOLLEY_EXIT_STATUS__=abc\n"));
    }

    #[test]
    fn sentinel_only() {
        assert_eq!(
            Some((String::new(), 0)),
            strip_sentinel("\n__VOLLEY_EXIT_STATUS__=0\n"),
        );
    }
}

mod transition {
    use super::*;

    #[test]
    fn prompts_authenticate() {
        assert_eq!(
            State::Authenticated,
            transition(State::AwaitingPrompt, Step::SendLogin),
        );
        assert_eq!(
            State::Authenticated,
            transition(State::Authenticated, Step::SendElevation),
        );
    }

    #[test]
    fn terminal_states_stick() {
        assert_eq!(State::Done, transition(State::Done, Step::SendLogin));
        assert_eq!(State::TimedOut, transition(State::TimedOut, Step::Finish));
    }

    #[test]
    fn finish_and_abort() {
        assert_eq!(State::Done, transition(State::AwaitingPrompt, Step::Finish));
        assert_eq!(State::TimedOut, transition(State::Authenticated, Step::Abort));
    }
}

mod invocation {
    use super::*;
    use std::process::Command;

    fn remote(command: &str) -> Invocation {
        Invocation::Remote {
            program: "ssh".to_string(),
            args: vec!["-l".to_string(), "alice".to_string(), "web1".to_string()],
            command: command.to_string(),
        }
    }

    // Runs the remote script through a local shell, the way sshd would.
    fn run_remote_script(command: &str) -> (String, i32) {
        let script = remote_script(command).unwrap();
        let output = Command::new("/bin/sh").arg("-c").arg(script).output().unwrap();
        strip_sentinel(&String::from_utf8(output.stdout).unwrap()).unwrap()
    }

    #[test]
    fn argv_appends_remote_script() {
        let argv = remote("uptime").argv().unwrap();
        assert_eq!(&["ssh", "-l", "alice", "web1"], &argv[..4]);
        assert!(argv[4].starts_with("/bin/sh -c uptime;"));
        assert!(argv[4].contains(SENTINEL));
    }

    #[test]
    fn local_argv_is_unchanged() {
        let invocation = Invocation::Local {
            program: "rsync".to_string(),
            args: vec!["-av".to_string(), "src".to_string(), "dst".to_string()],
        };
        assert_eq!(vec!["rsync", "-av", "src", "dst"], invocation.argv().unwrap());
        assert!(!invocation.has_sentinel());
        assert_eq!("rsync -av src dst", invocation.display());
    }

    #[test]
    fn backslash_round_trips() {
        assert_eq!(("\\".to_string(), 0), run_remote_script("echo \\\\"));
    }

    #[test]
    fn pipes_and_quotes_behave_as_written() {
        assert_eq!(
            ("hello world".to_string(), 0),
            run_remote_script("echo 'hello world' | cat"),
        );
        assert_eq!(("it's".to_string(), 0), run_remote_script("echo \"it's\""));
    }

    #[test]
    fn reports_command_status() {
        assert_eq!((String::new(), 7), run_remote_script("exit 7"));
    }

    #[test]
    fn nul_bytes_are_rejected() {
        assert!(remote_script("echo \0").is_err());
    }
}
