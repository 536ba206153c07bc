//! The propagation engine is an external collaborator; the batch only needs
//! "run with these inputs and leave a ranked file at this path".

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::RunError;
use crate::model::format_weight;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct OntologyInputs {
    pub graph: PathBuf,
    pub disease: PathBuf,
}

/// Fully resolved engine inputs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    pub network: PathBuf,
    pub seeds: PathBuf,
    pub alpha: f64,
    pub beta: f64,
    pub restart_probability: f64,
    pub output: PathBuf,
    pub coexpression: Option<PathBuf>,
    pub differential_expression: Option<PathBuf>,
    pub ontology: Option<OntologyInputs>,
}

impl EngineInvocation {
    /// Engine command-line flags; optional sources appear only when set.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-p".into(),
            self.network.clone().into(),
            "-s".into(),
            self.seeds.clone().into(),
            "-x".into(),
            format_weight(self.alpha).into(),
            "-y".into(),
            format_weight(self.beta).into(),
            "-r".into(),
            format_weight(self.restart_probability).into(),
            "-o".into(),
            self.output.clone().into(),
        ];

        if let Some(path) = &self.coexpression {
            args.push("-c".into());
            args.push(path.clone().into());
        }
        if let Some(path) = &self.differential_expression {
            args.push("-de".into());
            args.push(path.clone().into());
        }
        if let Some(ontology) = &self.ontology {
            args.push("-a".into());
            args.push(ontology.graph.clone().into());
            args.push("-do".into());
            args.push(ontology.disease.clone().into());
        }

        args
    }
}

pub trait Engine: Send + Sync {
    /// Runs to completion. Success means the engine reported success; the
    /// caller still checks that the output file exists.
    fn run(&self, invocation: &EngineInvocation) -> Result<(), RunError>;
}

/// Runs the engine as a child process, e.g. `python main.py <flags>`.
#[derive(Debug, Clone)]
pub struct SubprocessEngine {
    program: PathBuf,
    prefix_args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl SubprocessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, invocation: &EngineInvocation) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.prefix_args)
            .args(invocation.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl Engine for SubprocessEngine {
    fn run(&self, invocation: &EngineInvocation) -> Result<(), RunError> {
        let started = Instant::now();
        debug!(
            program = %self.program.display(),
            args = ?invocation.to_args(),
            "starting engine"
        );

        let child = self
            .command(invocation)
            .spawn()
            .map_err(|err| RunError::EngineFailure {
                status: format!("failed to start {}: {err}", self.program.display()),
                stdout: String::new(),
                stderr: String::new(),
            })?;

        let captured = wait_with_deadline(child, self.timeout)?;
        let elapsed_ms = started.elapsed().as_millis();

        match captured.status {
            Some(status) if status.success() => {
                info!(
                    output = %invocation.output.display(),
                    elapsed_ms,
                    "engine finished"
                );
                Ok(())
            }
            Some(status) => Err(RunError::EngineFailure {
                status: status.to_string(),
                stdout: captured.stdout,
                stderr: captured.stderr,
            }),
            None => {
                warn!(elapsed_ms, "engine killed after timeout");
                Err(RunError::EngineFailure {
                    status: format!(
                        "timed out after {}s",
                        self.timeout.map(|value| value.as_secs()).unwrap_or_default()
                    ),
                    stdout: captured.stdout,
                    stderr: captured.stderr,
                })
            }
        }
    }
}

struct CapturedOutput {
    /// `None` when the process was killed at the deadline.
    status: Option<ExitStatus>,
    stdout: String,
    stderr: String,
}

fn wait_with_deadline(mut child: Child, timeout: Option<Duration>) -> Result<CapturedOutput, RunError> {
    // A full pipe stalls the child, so both are drained while polling.
    let stdout_reader = spawn_pipe_reader(child.stdout.take());
    let stderr_reader = spawn_pipe_reader(child.stderr.take());

    // Unrepresentable deadlines are treated as unbounded.
    let deadline = timeout.and_then(|value| Instant::now().checked_add(value));
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(Some(status)),
            Ok(None) => {}
            Err(err) => {
                stop_child(&mut child);
                break Err(RunError::io("failed to poll engine process", err));
            }
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            stop_child(&mut child);
            break Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    Ok(CapturedOutput {
        status: status?,
        stdout,
        stderr,
    })
}

fn stop_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_pipe_reader<R>(pipe: Option<R>) -> thread::JoinHandle<String>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> EngineInvocation {
        EngineInvocation {
            network: PathBuf::from("net.tsv"),
            seeds: PathBuf::from("seed.txt"),
            alpha: 1.0,
            beta: 0.25,
            restart_probability: 0.9,
            output: PathBuf::from("out/results_FULL.txt"),
            coexpression: None,
            differential_expression: None,
            ontology: None,
        }
    }

    fn as_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn base_args_carry_weights_in_tag_format() {
        let args = as_strings(invocation().to_args());
        assert_eq!(
            args,
            vec![
                "-p", "net.tsv", "-s", "seed.txt", "-x", "1.0", "-y", "0.25", "-r", "0.9", "-o",
                "out/results_FULL.txt",
            ]
        );
    }

    #[test]
    fn optional_sources_append_flag_pairs() {
        let mut invocation = invocation();
        invocation.coexpression = Some(PathBuf::from("coexp.tsv"));
        invocation.ontology = Some(OntologyInputs {
            graph: PathBuf::from("onto.txt"),
            disease: PathBuf::from("diso.txt"),
        });

        let args = as_strings(invocation.to_args());
        let tail = &args[12..];
        assert_eq!(tail, ["-c", "coexp.tsv", "-a", "onto.txt", "-do", "diso.txt"]);
        assert!(!args.contains(&"-de".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_failure_captures_stderr() {
        let engine = SubprocessEngine::new("sh").with_prefix_args(vec![
            "-c".to_string(),
            "echo 'network file unreadable' >&2; exit 3".to_string(),
            "engine".to_string(),
        ]);

        let err = engine.run(&invocation()).expect_err("engine should fail");
        match err {
            RunError::EngineFailure { stderr, status, .. } => {
                assert!(stderr.contains("network file unreadable"));
                assert!(status.contains('3'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_timeout_kills_engine() {
        let engine = SubprocessEngine::new("sh")
            .with_prefix_args(vec!["-c".to_string(), "exec sleep 5".to_string(), "engine".to_string()])
            .with_timeout(Some(Duration::from_millis(200)));

        let err = engine.run(&invocation()).expect_err("engine should time out");
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn huge_timeout_does_not_overflow_deadline() {
        let engine = SubprocessEngine::new("sh")
            .with_prefix_args(vec!["-c".to_string(), "exit 0".to_string(), "engine".to_string()])
            .with_timeout(Some(Duration::from_secs(u64::MAX)));

        engine.run(&invocation()).expect("engine should finish normally");
    }

    #[test]
    fn missing_program_is_an_engine_failure() {
        let engine = SubprocessEngine::new("definitely-not-a-real-engine-binary");
        let err = engine.run(&invocation()).expect_err("spawn should fail");
        assert_eq!(err.kind(), "engine_failure");
    }
}
