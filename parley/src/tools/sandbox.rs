//! Approval-gated code execution in a single long-lived sandbox container.
//!
//! The container survives across calls; isolation between calls comes from
//! a fresh working directory per execution plus a mutex serialising access.
//! A wall-clock timeout kills runaway executions at the container level.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Tool, ToolContext, ToolError, ToolSpec};

/// Hard cap on captured output.
const OUTPUT_MAX_CHARS: usize = 8000;

/// Captured result of one sandbox execution.
#[derive(Clone, Debug)]
pub struct ExecOutput {
    pub output: String,
    pub exit_code: i64,
    pub duration_ms: u128,
}

/// Execution backend seam: the docker sandbox in production, a stub in
/// tests.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, code: &str) -> Result<ExecOutput, ToolError>;
}

pub struct DockerSandboxConfig {
    pub image: String,
    pub container_name: String,
    pub timeout: Duration,
    pub memory_bytes: i64,
}

impl Default for DockerSandboxConfig {
    fn default() -> Self {
        Self {
            image: "agent-python-executor".into(),
            container_name: "agent-python-executor".into(),
            timeout: Duration::from_secs(60),
            memory_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Single persistent container driven over the docker socket.
pub struct DockerSandbox {
    docker: bollard::Docker,
    config: DockerSandboxConfig,
    /// Serialises executions; per-call working directories keep state from
    /// leaking between them.
    gate: tokio::sync::Mutex<()>,
}

impl DockerSandbox {
    pub fn connect(config: DockerSandboxConfig) -> Result<Self, ToolError> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| ToolError::Execution(format!("docker unavailable: {e}")))?;
        Ok(Self { docker, config, gate: tokio::sync::Mutex::new(()) })
    }

    async fn ensure_container(&self) -> Result<(), ToolError> {
        use bollard::container::{Config, CreateContainerOptions, StartContainerOptions};
        use bollard::models::HostConfig;

        let name = &self.config.container_name;
        if self.docker.inspect_container(name, None).await.is_err() {
            let options = CreateContainerOptions { name: name.clone(), platform: None };
            let config = Config {
                image: Some(self.config.image.clone()),
                cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
                host_config: Some(HostConfig {
                    memory: Some(self.config.memory_bytes),
                    nano_cpus: Some(1_000_000_000),
                    ..Default::default()
                }),
                ..Default::default()
            };
            self.docker
                .create_container(Some(options), config)
                .await
                .map_err(|e| ToolError::Execution(format!("create sandbox: {e}")))?;
            tracing::info!(container = %name, "sandbox container created");
        }
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already running.
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }) => {
                Ok(())
            }
            Err(e) => Err(ToolError::Execution(format!("start sandbox: {e}"))),
        }
    }

    async fn exec_capture(
        &self,
        cmd: Vec<String>,
        working_dir: Option<String>,
    ) -> Result<(String, i64), ToolError> {
        use bollard::exec::{CreateExecOptions, StartExecResults};
        use futures::StreamExt;

        let exec = self
            .docker
            .create_exec(
                &self.config.container_name,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ToolError::Execution(format!("create exec: {e}")))?;

        let mut captured = Vec::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ToolError::Execution(format!("start exec: {e}")))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(log) => captured.extend_from_slice(&log.into_bytes()),
                        Err(e) => {
                            return Err(ToolError::Execution(format!("exec stream: {e}")));
                        }
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ToolError::Execution(format!("inspect exec: {e}")))?;
        Ok((
            String::from_utf8_lossy(&captured).into_owned(),
            inspect.exit_code.unwrap_or(-1),
        ))
    }
}

fn truncate_output(s: &str) -> String {
    match s.char_indices().nth(OUTPUT_MAX_CHARS) {
        Some((i, _)) => format!("{}\n[output truncated]", &s[..i]),
        None => s.to_string(),
    }
}

#[async_trait]
impl CodeRunner for DockerSandbox {
    async fn run(&self, code: &str) -> Result<ExecOutput, ToolError> {
        let _guard = self.gate.lock().await;
        self.ensure_container().await?;

        let hex = uuid::Uuid::new_v4().simple().to_string();
        let work_dir = format!("/workspace/exec-{}", &hex[..12]);
        let script_path = format!("{work_dir}/script.py");
        let started = Instant::now();

        // Ship the source without a tar pipeline: base64 through the shell.
        let encoded = base64::engine::general_purpose::STANDARD.encode(code.as_bytes());
        self.exec_capture(
            vec![
                "sh".into(),
                "-c".into(),
                format!("mkdir -p {work_dir} && echo {encoded} | base64 -d > {script_path}"),
            ],
            None,
        )
        .await?;

        let run = self.exec_capture(
            vec!["python".into(), script_path.clone()],
            Some(work_dir.clone()),
        );
        let (output, exit_code) = match tokio::time::timeout(self.config.timeout, run).await {
            Ok(result) => result?,
            Err(_) => (
                format!(
                    "[error] execution timed out after {} seconds",
                    self.config.timeout.as_secs()
                ),
                -1,
            ),
        };

        // Best-effort cleanup of the per-call directory.
        let _ = self
            .exec_capture(vec!["rm".into(), "-rf".into(), work_dir], None)
            .await;

        let output = if output.trim().is_empty() {
            "[no output; print() results to stdout]".to_string()
        } else {
            truncate_output(&output)
        };
        Ok(ExecOutput {
            output,
            exit_code,
            duration_ms: started.elapsed().as_millis(),
        })
    }
}

/// Stand-in runner for deployments without a docker socket; every call
/// fails with a clear execution error the model can read.
pub struct UnavailableSandbox;

#[async_trait]
impl CodeRunner for UnavailableSandbox {
    async fn run(&self, _code: &str) -> Result<ExecOutput, ToolError> {
        Err(ToolError::Execution("code sandbox is not available".into()))
    }
}

/// `code_execute`: runs source in the sandbox. Always approval-gated.
pub struct CodeExecuteTool {
    runner: Arc<dyn CodeRunner>,
}

impl CodeExecuteTool {
    pub fn new(runner: Arc<dyn CodeRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for CodeExecuteTool {
    fn name(&self) -> &str {
        "code_execute"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "code_execute".into(),
            description: "Execute Python code in an isolated sandbox. Stateless between calls; \
                 print() anything you want to see."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Python source to run."}
                },
                "required": ["code"]
            }),
        }
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn approval_reason(&self, args: &Value) -> String {
        let code = args.get("code").and_then(|v| v.as_str()).unwrap_or_default();
        let preview: String = code.chars().take(200).collect();
        let ellipsis = if code.chars().count() > 200 { "…" } else { "" };
        format!("Code execution needs your approval:\n```python\n{preview}{ellipsis}\n```")
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing code".into()))?;
        let result = self.runner.run(code).await?;
        if result.exit_code != 0 {
            return Err(ToolError::Execution(format!(
                "exit code {}\n{}",
                result.exit_code, result.output
            )));
        }
        Ok(format!(
            "```\n{}\n```\n(took {} ms)",
            result.output, result.duration_ms
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::test_context;

    struct StubRunner {
        output: String,
        exit_code: i64,
    }

    #[async_trait]
    impl CodeRunner for StubRunner {
        async fn run(&self, _code: &str) -> Result<ExecOutput, ToolError> {
            Ok(ExecOutput {
                output: self.output.clone(),
                exit_code: self.exit_code,
                duration_ms: 7,
            })
        }
    }

    #[tokio::test]
    async fn successful_run_is_fenced_with_duration() {
        let tool = CodeExecuteTool::new(Arc::new(StubRunner { output: "2".into(), exit_code: 0 }));
        let out = tool
            .call(json!({"code": "print(1+1)"}), &test_context())
            .await
            .unwrap();
        assert!(out.starts_with("```\n2\n```"));
        assert!(out.contains("(took 7 ms)"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_execution_error() {
        let tool = CodeExecuteTool::new(Arc::new(StubRunner {
            output: "Traceback".into(),
            exit_code: 1,
        }));
        let err = tool
            .call(json!({"code": "boom"}), &test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[tokio::test]
    async fn missing_code_is_invalid_input() {
        let tool = CodeExecuteTool::new(Arc::new(StubRunner { output: String::new(), exit_code: 0 }));
        assert!(matches!(
            tool.call(json!({}), &test_context()).await,
            Err(ToolError::InvalidInput(_))
        ));
    }

    #[test]
    fn approval_reason_previews_code() {
        let tool = CodeExecuteTool::new(Arc::new(StubRunner { output: String::new(), exit_code: 0 }));
        assert!(tool.requires_approval());
        let reason = tool.approval_reason(&json!({"code": "print('hello')"}));
        assert!(reason.contains("print('hello')"));
        let long = "x".repeat(500);
        let reason = tool.approval_reason(&json!({"code": long}));
        assert!(reason.contains('…'));
    }

    #[test]
    fn output_truncation() {
        let long = "y".repeat(OUTPUT_MAX_CHARS + 100);
        let t = truncate_output(&long);
        assert!(t.ends_with("[output truncated]"));
        assert!(t.len() < long.len());
    }
}
