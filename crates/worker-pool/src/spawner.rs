//! The `Spawner` capability: how worker subprocesses come to exist
//!
//! Production uses [`CommandSpawner`], which launches the role's module
//! under the configured runtime with piped stdio. Tests use
//! [`ScriptedSpawner`], which runs an in-process scripted worker over
//! duplex pipes so the pool's full protocol can be exercised without
//! external binaries.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;

use crate::protocol::{ResultMetadata, TaskStatus, WireMessage};
use crate::PoolError;

/// Fully-resolved command for one worker subprocess.
#[derive(Debug, Clone)]
pub struct SpawnCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
}

impl SpawnCommand {
    /// `<runtime> -m <module> --instance-id <id> --protocol json_stdio --config <json>`
    pub fn worker(
        runtime: &str,
        module: &str,
        instance_id: &str,
        config_json: &str,
        env: HashMap<String, String>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            program: runtime.to_string(),
            args: vec![
                "-m".to_string(),
                module.to_string(),
                "--instance-id".to_string(),
                instance_id.to_string(),
                "--protocol".to_string(),
                "json_stdio".to_string(),
                "--config".to_string(),
                config_json.to_string(),
            ],
            env,
            working_dir,
        }
    }
}

/// Handle for signalling and reaping one spawned worker.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Exit code if the process has exited, without blocking.
    fn try_wait(&mut self) -> Result<Option<i32>, PoolError>;

    /// Block until the process exits.
    async fn wait(&mut self) -> Result<i32, PoolError>;

    /// Ask the process to stop (SIGTERM on unix). Best effort.
    fn terminate(&mut self);

    /// Force the process down (SIGKILL). Best effort.
    fn kill(&mut self);
}

pub struct SpawnedWorker {
    pub os_pid: Option<u32>,
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub handle: Box<dyn ProcessHandle>,
}

#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self, command: SpawnCommand) -> Result<SpawnedWorker, PoolError>;
}

/// Spawns real OS subprocesses with piped stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandSpawner;

#[async_trait]
impl Spawner for CommandSpawner {
    async fn spawn(&self, command: SpawnCommand) -> Result<SpawnedWorker, PoolError> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .current_dir(&command.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| PoolError::SpawnFailed(format!("{}: {e}", command.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::SpawnFailed("stdin pipe missing".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::SpawnFailed("stdout pipe missing".to_string()))?;
        let os_pid = child.id();

        Ok(SpawnedWorker {
            os_pid,
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            handle: Box::new(ChildHandle { child }),
        })
    }
}

struct ChildHandle {
    child: tokio::process::Child,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn try_wait(&mut self) -> Result<Option<i32>, PoolError> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }

    async fn wait(&mut self) -> Result<i32, PoolError> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // Safety: plain signal send to a child we own.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            return;
        }
        #[allow(unreachable_code)]
        {
            let _ = self.child.start_kill();
        }
    }

    fn kill(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// How a scripted worker behaves after launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerBehavior {
    /// Handshake, echo tasks back as completed, acknowledge heartbeats.
    Echo,
    /// Like `Echo`, but sleeps before each result.
    SlowEcho { delay_ms: u64 },
    /// Handshake, then report every task as failed.
    FailTasks,
    /// Never completes the handshake.
    Silent,
    /// Handshake, then ignores everything, including shutdown.
    Mute,
}

/// In-process worker double over duplex pipes.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedSpawner {
    pub behavior: WorkerBehavior,
}

impl ScriptedSpawner {
    pub fn new(behavior: WorkerBehavior) -> Self {
        Self { behavior }
    }
}

#[async_trait]
impl Spawner for ScriptedSpawner {
    async fn spawn(&self, _command: SpawnCommand) -> Result<SpawnedWorker, PoolError> {
        let (pool_stdin, worker_stdin) = tokio::io::duplex(64 * 1024);
        let (worker_stdout, pool_stdout) = tokio::io::duplex(64 * 1024);

        let (exit_tx, exit_rx) = watch::channel(false);
        let exit_tx = Arc::new(exit_tx);

        let behavior = self.behavior;
        let task_exit = exit_tx.clone();
        let task = tokio::spawn(async move {
            run_scripted_worker(behavior, worker_stdin, worker_stdout).await;
            let _ = task_exit.send(true);
        });

        Ok(SpawnedWorker {
            os_pid: None,
            stdin: Box::new(pool_stdin),
            stdout: Box::new(pool_stdout),
            handle: Box::new(ScriptedHandle {
                exit_tx,
                exit_rx,
                task: Some(task),
            }),
        })
    }
}

struct ScriptedHandle {
    exit_tx: Arc<watch::Sender<bool>>,
    exit_rx: watch::Receiver<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl ProcessHandle for ScriptedHandle {
    fn try_wait(&mut self) -> Result<Option<i32>, PoolError> {
        Ok(if *self.exit_rx.borrow() { Some(0) } else { None })
    }

    async fn wait(&mut self) -> Result<i32, PoolError> {
        let _ = self.exit_rx.wait_for(|exited| *exited).await;
        Ok(0)
    }

    fn terminate(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let _ = self.exit_tx.send(true);
    }

    fn kill(&mut self) {
        self.terminate();
    }
}

async fn run_scripted_worker(
    behavior: WorkerBehavior,
    stdin: tokio::io::DuplexStream,
    mut stdout: tokio::io::DuplexStream,
) {
    if behavior == WorkerBehavior::Silent {
        // Hold the pipes open without ever handshaking.
        let mut lines = BufReader::new(stdin).lines();
        while let Ok(Some(_)) = lines.next_line().await {}
        return;
    }

    if write_line(&mut stdout, &WireMessage::Ready).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = WireMessage::from_line(&line) else {
            continue;
        };
        match message {
            WireMessage::Task { task_id, task_data } => match behavior {
                WorkerBehavior::Echo | WorkerBehavior::SlowEcho { .. } => {
                    if let WorkerBehavior::SlowEcho { delay_ms } = behavior {
                        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    }
                    let result = WireMessage::Result {
                        task_id,
                        status: TaskStatus::Completed,
                        output: task_data,
                        metadata: ResultMetadata {
                            execution_time: 0.01,
                            model_used: Some("scripted".to_string()),
                            tokens_consumed: 128,
                            cost: 0.001,
                        },
                        confidence: 0.9,
                        resources_used: serde_json::json!({}),
                        error: None,
                    };
                    if write_line(&mut stdout, &result).await.is_err() {
                        break;
                    }
                }
                WorkerBehavior::FailTasks => {
                    let result = WireMessage::Result {
                        task_id,
                        status: TaskStatus::Failed,
                        output: serde_json::json!(null),
                        metadata: ResultMetadata::default(),
                        confidence: 0.0,
                        resources_used: serde_json::json!({}),
                        error: Some("scripted failure".to_string()),
                    };
                    if write_line(&mut stdout, &result).await.is_err() {
                        break;
                    }
                }
                WorkerBehavior::Mute => {}
                WorkerBehavior::Silent => unreachable!(),
            },
            WireMessage::Heartbeat => {
                if behavior != WorkerBehavior::Mute
                    && write_line(&mut stdout, &WireMessage::Heartbeat).await.is_err()
                {
                    break;
                }
            }
            WireMessage::Shutdown => {
                if behavior != WorkerBehavior::Mute {
                    break;
                }
            }
            // Workers drop anything they do not understand.
            _ => {}
        }
    }
}

async fn write_line(
    stdout: &mut tokio::io::DuplexStream,
    message: &WireMessage,
) -> Result<(), PoolError> {
    let mut line = message.to_line()?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    fn command() -> SpawnCommand {
        SpawnCommand::worker(
            "python3",
            "agents.research",
            "research-1",
            "{}",
            HashMap::new(),
            PathBuf::from("."),
        )
    }

    #[test]
    fn worker_command_shape() {
        let cmd = command();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args[0..2], ["-m".to_string(), "agents.research".to_string()]);
        assert!(cmd.args.contains(&"--protocol".to_string()));
        assert!(cmd.args.contains(&"json_stdio".to_string()));
    }

    #[tokio::test]
    async fn scripted_worker_handshakes_and_echoes() {
        let spawner = ScriptedSpawner::new(WorkerBehavior::Echo);
        let mut worker = spawner.spawn(command()).await.unwrap();

        let mut lines = BufReader::new(worker.stdout).lines();
        let ready = lines.next_line().await.unwrap().unwrap();
        assert!(matches!(
            WireMessage::from_line(&ready).unwrap(),
            WireMessage::Ready
        ));

        let task = WireMessage::Task {
            task_id: "t-1".to_string(),
            task_data: serde_json::json!({"x": 1}),
        };
        let mut line = task.to_line().unwrap();
        line.push('\n');
        worker.stdin.write_all(line.as_bytes()).await.unwrap();
        worker.stdin.flush().await.unwrap();

        let reply = lines.next_line().await.unwrap().unwrap();
        match WireMessage::from_line(&reply).unwrap() {
            WireMessage::Result {
                task_id, status, output, ..
            } => {
                assert_eq!(task_id, "t-1");
                assert_eq!(status, TaskStatus::Completed);
                assert_eq!(output["x"], serde_json::json!(1));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_worker_exits_on_shutdown() {
        let spawner = ScriptedSpawner::new(WorkerBehavior::Echo);
        let mut worker = spawner.spawn(command()).await.unwrap();

        let mut line = WireMessage::Shutdown.to_line().unwrap();
        line.push('\n');
        worker.stdin.write_all(line.as_bytes()).await.unwrap();
        worker.stdin.flush().await.unwrap();

        let code = worker.handle.wait().await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(worker.handle.try_wait().unwrap(), Some(0));
    }

    #[tokio::test]
    async fn kill_stops_a_mute_worker() {
        let spawner = ScriptedSpawner::new(WorkerBehavior::Mute);
        let mut worker = spawner.spawn(command()).await.unwrap();

        assert_eq!(worker.handle.try_wait().unwrap(), None);
        worker.handle.kill();
        assert_eq!(worker.handle.wait().await.unwrap(), 0);
    }
}
