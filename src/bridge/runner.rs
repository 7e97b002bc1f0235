//! 脚本执行器：把 ScriptProgram 交给 osascript（或配置中的其他解释器）执行
//!
//! 脚本在独立进程组中运行；超时或本轮被取消时整组 kill，返回时不会留下仍在运行的脚本进程。

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::script::ScriptProgram;

/// 进程的原始输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl RawOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("script did not finish within {0:?}")]
    Timeout(Duration),

    #[error("failed to start script interpreter: {0}")]
    Spawn(#[source] io::Error),

    #[error("i/o error while running script: {0}")]
    Io(#[source] io::Error),
}

/// 执行脚本的抽象；测试中用假的实现替换真实进程
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, program: &ScriptProgram) -> Result<RawOutput, RunnerError>;
}

/// 以子进程方式执行：`<interpreter> <script_flag> <script>`
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: PathBuf,
    script_flag: String,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<PathBuf>, script_flag: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script_flag: script_flag.into(),
        }
    }
}

fn read_pipe<R>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn collect(handle: JoinHandle<io::Result<Vec<u8>>>) -> Result<String, RunnerError> {
    let bytes = handle
        .await
        .map_err(|e| RunnerError::Io(io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(RunnerError::Io)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// 脚本进程组：未 disarm 就被 drop（超时或本轮被取消）时整组 SIGKILL，连同脚本派生的后台进程
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // 子进程以 process_group(0) 启动，pgid 即其 pid
            let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(pgid, error = %io::Error::last_os_error(), "killpg failed");
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn run(&self, program: &ScriptProgram) -> Result<RawOutput, RunnerError> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script_flag)
            .arg(&program.text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(RunnerError::Spawn)?;
        let mut group = ProcessGroup { pgid: child.id() };

        let stdout_task = read_pipe(child.stdout.take());
        let stderr_task = read_pipe(child.stderr.take());
        let readers = [stdout_task.abort_handle(), stderr_task.abort_handle()];

        // 等待退出与读完管道共用同一个超时：后台进程持有管道时也不会超出 timeout
        let finished = tokio::time::timeout(program.timeout, async {
            let status = child.wait().await.map_err(RunnerError::Io)?;
            Ok::<_, RunnerError>(RawOutput {
                stdout: collect(stdout_task).await?,
                stderr: collect(stderr_task).await?,
                exit_code: status.code(),
            })
        })
        .await;

        match finished {
            Ok(output) => {
                group.disarm();
                output
            }
            Err(_) => {
                group.kill();
                // 直接子进程可能已退出，尚未回收时 kill 之后再 wait
                if let Ok(None) = child.try_wait() {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill timed-out script");
                    }
                }
                for reader in readers {
                    reader.abort();
                }
                Err(RunnerError::Timeout(program.timeout))
            }
        }
    }
}
