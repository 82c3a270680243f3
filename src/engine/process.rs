//! Interpreter process engine driven over a JSON-lines channel

use super::traits::{EngineReply, EngineSession, EngineStartOptions, ExecutionEngine};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// How long a session may take to acknowledge the shutdown request, then to exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Driver run by the interpreter: one JSON request per line in, one JSON reply per line out.
///
/// Block output is captured so the reply channel on the real stdout stays clean.
const DRIVER: &str = r##"
import ast, contextlib, io, json, logging, sys, traceback
_channel = sys.stdout
_namespace = {"__name__": "__main__"}
_count = 0

def _reply(message):
    _channel.write(json.dumps(message) + "\n")
    _channel.flush()

for _line in sys.stdin:
    _request = json.loads(_line)
    _op = _request.get("op")
    if _op == "init":
        for _p in reversed(_request.get("paths", [])):
            if _p not in sys.path:
                sys.path.insert(0, _p)
        _namespace.update(_request.get("variables", {}))
        logging.basicConfig(level=int(_request.get("log_level", 30)))
        _reply({"ok": True})
    elif _op == "shutdown":
        _reply({"ok": True})
        break
    elif _op == "execute":
        _count += 1
        _name = "<block-%d>" % _count
        _stdout, _stderr = io.StringIO(), io.StringIO()
        _value, _error = None, None
        try:
            with contextlib.redirect_stdout(_stdout), contextlib.redirect_stderr(_stderr):
                _tree = ast.parse(_request["code"], mode="exec")
                _last = None
                if _tree.body and isinstance(_tree.body[-1], ast.Expr):
                    _last = ast.Expression(_tree.body.pop().value)
                exec(compile(_tree, _name, "exec"), _namespace)
                if _last is not None:
                    _value = eval(compile(_last, _name, "eval"), _namespace)
        except BaseException as _e:
            _error = {
                "ename": type(_e).__name__,
                "evalue": str(_e),
                "traceback": traceback.format_exception(type(_e), _e, _e.__traceback__),
            }
        _outputs = []
        if _stdout.getvalue():
            _outputs.append({"output_type": "stream", "name": "stdout", "text": _stdout.getvalue()})
        if _stderr.getvalue():
            _outputs.append({"output_type": "stream", "name": "stderr", "text": _stderr.getvalue()})
        if _value is not None:
            _outputs.append({"output_type": "execute_result", "execution_count": _count,
                             "data": {"text/plain": repr(_value)}, "metadata": {}})
        _reply({"outputs": _outputs, "error": _error, "execution_count": _count})
"##;

/// Engine that spawns an interpreter process per session
///
/// # Examples
///
/// ```no_run
/// use nbpress::engine::ProcessEngine;
/// use std::path::PathBuf;
///
/// // Create with explicit path
/// let engine = ProcessEngine::new(PathBuf::from("/usr/bin/python3"));
///
/// // Or auto-discover from PATH
/// let engine = ProcessEngine::from_path().expect("python not found in PATH");
/// ```
pub struct ProcessEngine {
    program: PathBuf,
}

impl ProcessEngine {
    /// Create an engine with an explicit interpreter path
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Attempt to find `python3` (then `python`) in PATH
    pub fn from_path() -> Option<Self> {
        which::which("python3")
            .or_else(|_| which::which("python"))
            .ok()
            .map(Self::new)
    }

    /// Interpreter path
    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl ExecutionEngine for ProcessEngine {
    async fn start(&self, options: &EngineStartOptions) -> crate::Result<Box<dyn EngineSession>> {
        debug!(
            program = ?self.program,
            engine = %options.engine_name,
            working_dir = ?options.working_dir,
            "starting engine"
        );

        let mut child = Command::new(&self.program)
            .args(&options.extra_args)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .current_dir(&options.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                crate::Error::ExternalTool(format!(
                    "Failed to start engine {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                child.kill().await.ok();
                return Err(crate::Error::ExternalTool(
                    "engine stdio was not captured".into(),
                ));
            }
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "nbpress::engine::stderr", "{}", line);
                }
            });
        }

        let mut session = ProcessSession {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            in_flight: false,
        };

        let paths: Vec<String> = options
            .extra_paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let variables: serde_json::Map<String, serde_json::Value> = options
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.as_str())))
            .collect();
        let init = json!({
            "op": "init",
            "paths": paths,
            "variables": variables,
            "log_level": options.log_level,
        });

        if let Err(e) = session.request(&init).await {
            session.kill().await;
            return Err(e);
        }
        Ok(Box::new(session))
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

#[derive(Deserialize)]
struct Ack {
    #[serde(default)]
    ok: bool,
}

struct ProcessSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    /// Set while a request waits for its reply; stays set when the caller
    /// dropped the request (block timeout), since the interpreter is still busy
    in_flight: bool,
}

impl ProcessSession {
    /// Send one request line and read one reply line
    async fn request(&mut self, message: &serde_json::Value) -> crate::Result<String> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.in_flight = true;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = self.stdout.next_line().await?;
        self.in_flight = false;
        match reply {
            Some(reply) => Ok(reply),
            None => Err(crate::Error::ExternalTool(
                "engine closed its channel".into(),
            )),
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill engine process");
        }
    }
}

#[async_trait]
impl EngineSession for ProcessSession {
    async fn execute(&mut self, source: &str) -> crate::Result<EngineReply> {
        let reply = self.request(&json!({"op": "execute", "code": source})).await?;
        Ok(serde_json::from_str(&reply)?)
    }

    async fn shutdown(&mut self) -> crate::Result<()> {
        if self.in_flight {
            warn!("engine still busy with an abandoned request, killing it");
            self.kill().await;
            return Ok(());
        }
        let request = json!({"op": "shutdown"});
        let acknowledged = match tokio::time::timeout(SHUTDOWN_GRACE, self.request(&request)).await {
            Ok(Ok(reply)) => serde_json::from_str::<Ack>(&reply).map(|a| a.ok).unwrap_or(false),
            Ok(Err(_)) | Err(_) => false,
        };
        if !acknowledged {
            self.kill().await;
            return Ok(());
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(?status, "engine exited");
            }
            Err(_) => {
                warn!("engine did not exit after shutdown, killing it");
                self.kill().await;
            }
        }
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Output;

    fn python() -> Option<ProcessEngine> {
        let engine = ProcessEngine::from_path();
        if engine.is_none() {
            println!("Skipping test: python not found in PATH");
        }
        engine
    }

    #[test]
    fn from_path_consistency_with_which_crate() {
        let found = which::which("python3").or_else(|_| which::which("python"));
        assert_eq!(found.is_ok(), ProcessEngine::from_path().is_some());
    }

    #[tokio::test]
    async fn start_with_invalid_program_is_external_tool_error() {
        let engine = ProcessEngine::new(PathBuf::from("/nonexistent/path/to/python"));
        match engine.start(&EngineStartOptions::new(".")).await {
            Err(crate::Error::ExternalTool(msg)) => assert!(msg.contains("Failed to start engine")),
            Err(e) => panic!("Expected ExternalTool error, got: {:?}", e),
            Ok(_) => panic!("engine must not start"),
        }
    }

    #[tokio::test]
    async fn state_persists_between_blocks() {
        let Some(engine) = python() else { return };
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = engine.start(&EngineStartOptions::new(dir.path())).await.unwrap();

        let first = session.execute("x = 1").await.unwrap();
        assert!(first.outputs.is_empty());
        assert!(first.error.is_none());

        let second = session.execute("print(x + 1)").await.unwrap();
        assert_eq!(
            second.outputs,
            vec![Output::Stream {
                name: "stdout".into(),
                text: "2\n".into()
            }]
        );

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn exception_is_a_reply_not_an_error() {
        let Some(engine) = python() else { return };
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = engine.start(&EngineStartOptions::new(dir.path())).await.unwrap();

        let reply = session.execute("str2datetimes('2015')").await.unwrap();
        let error = reply.error.expect("NameError expected");
        assert_eq!(error.ename, "NameError");
        assert!(error.evalue.contains("str2datetimes"));
        assert!(!error.traceback.is_empty());

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_after_abandoned_block_kills_the_process() {
        let Some(engine) = python() else { return };
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = engine.start(&EngineStartOptions::new(dir.path())).await.unwrap();

        let busy = tokio::time::timeout(
            Duration::from_millis(300),
            session.execute("while True:\n    pass"),
        )
        .await;
        assert!(busy.is_err());

        tokio::time::timeout(Duration::from_secs(10), session.shutdown())
            .await
            .expect("shutdown must not wait for the busy interpreter")
            .unwrap();
    }

    #[tokio::test]
    async fn variables_and_last_expression() {
        let Some(engine) = python() else { return };
        let dir = tempfile::TempDir::new().unwrap();
        let mut options = EngineStartOptions::new(dir.path());
        options.variables.push(("theNotebook".into(), "/docs/a.ipynb".into()));
        let mut session = engine.start(&options).await.unwrap();

        let reply = session.execute("theNotebook").await.unwrap();
        assert_eq!(
            reply.outputs[0].text().as_deref(),
            Some("'/docs/a.ipynb'")
        );

        session.shutdown().await.unwrap();
    }
}
