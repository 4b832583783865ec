//! Handlers backed by programs under the service directory.
//!
//! A reference `src/consumer.handler` resolves to `<service>/src/consumer`
//! (bare, `.sh`, `.py` or `.js`). Each invocation spawns the program with the
//! export path (`handler`) as its only argument and the event JSON on stdin;
//! stdout is read back as the handler result. Nothing is cached, so edits to
//! the program take effect on the next batch.
//!
//! `.js` modules are loaded by a small node shim instead of being executed:
//! it walks the export path on `module.exports`, calls the function it finds
//! with the event, and prints the awaited result as JSON. A missing export
//! fails the invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use offline_streams_core::envelope::StreamEvent;
use offline_streams_core::error::{HandlerError, ResolutionError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{HandlerResolver, StreamHandler};

pub const HANDLER_REFERENCE_ENV: &str = "OFFLINE_STREAMS_HANDLER";

const CANDIDATE_EXTENSIONS: [&str; 3] = ["sh", "py", "js"];

/// Arguments: module path, export path. Event JSON arrives on stdin.
const NODE_SHIM: &str = r#"
const [modulePath, exportPath] = process.argv.slice(1);
let target = require(require('path').resolve(modulePath));
for (const key of exportPath.split('.').filter(Boolean)) {
  target = target == null ? undefined : target[key];
}
if (typeof target !== 'function') {
  console.error(`export '${exportPath}' of ${modulePath} is not a function`);
  process.exit(1);
}
let input = '';
process.stdin.setEncoding('utf8');
process.stdin.on('data', (chunk) => { input += chunk; });
process.stdin.on('end', async () => {
  try {
    const result = await new Promise((resolve, reject) => {
      const done = (error, value) => (error ? reject(error) : resolve(value));
      const returned = target(JSON.parse(input), {}, done);
      if (returned && typeof returned.then === 'function') {
        returned.then(resolve, reject);
      } else if (target.length < 3) {
        resolve(returned);
      }
    });
    if (result !== undefined) {
      process.stdout.write(JSON.stringify(result));
    }
  } catch (error) {
    console.error(error && error.stack ? error.stack : String(error));
    process.exit(1);
  }
});
"#;

#[derive(Debug, Clone)]
pub struct CommandResolver {
    service_path: PathBuf,
}

impl CommandResolver {
    pub fn new(service_path: impl Into<PathBuf>) -> Self {
        Self {
            service_path: service_path.into(),
        }
    }

    /// Returned paths are absolute, since handlers run with the service
    /// directory as their working directory.
    fn locate(&self, module: &str) -> Option<PathBuf> {
        let base = self.service_path.join(module);
        let found = if base.is_file() {
            base
        } else {
            CANDIDATE_EXTENSIONS
                .iter()
                .map(|extension| base.with_extension(extension))
                .find(|candidate| candidate.is_file())?
        };
        Some(found.canonicalize().unwrap_or(found))
    }
}

impl HandlerResolver for CommandResolver {
    fn resolve(&self, reference: &str) -> Result<Arc<dyn StreamHandler>, ResolutionError> {
        let (module, export) = reference.split_once('.').unwrap_or((reference, ""));
        if module.is_empty() {
            return Err(ResolutionError::EmptyReference);
        }

        let program = self
            .locate(module)
            .ok_or_else(|| ResolutionError::NotFound {
                reference: reference.to_string(),
                searched: self.service_path.join(module),
            })?;

        Ok(Arc::new(CommandHandler {
            reference: reference.to_string(),
            program,
            export: export.to_string(),
            working_dir: self.service_path.clone(),
        }))
    }
}

#[derive(Debug)]
struct CommandHandler {
    reference: String,
    program: PathBuf,
    export: String,
    working_dir: PathBuf,
}

impl CommandHandler {
    fn command(&self) -> Command {
        let mut command = match launcher(&self.program) {
            Launcher::Node => {
                let mut command = Command::new("node");
                command.arg("-e").arg(NODE_SHIM).arg(&self.program);
                command
            }
            Launcher::Interpreter(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&self.program);
                command
            }
            Launcher::Direct => Command::new(&self.program),
        };
        command
            .arg(&self.export)
            .current_dir(&self.working_dir)
            .env(HANDLER_REFERENCE_ENV, &self.reference)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl StreamHandler for CommandHandler {
    async fn invoke(&self, event: &StreamEvent) -> Result<serde_json::Value, HandlerError> {
        let payload = serde_json::to_vec(event)
            .map_err(|error| HandlerError::new(format!("failed to encode stream event: {error}")))?;

        let mut child = self.command().spawn().map_err(|error| {
            HandlerError::new(format!(
                "failed to start {}: {error}",
                self.program.display()
            ))
        })?;

        let stdin = child.stdin.take();
        let write_event = async move {
            if let Some(mut stdin) = stdin {
                if let Err(error) = stdin.write_all(&payload).await {
                    debug!(%error, "handler did not read the whole event");
                }
            }
        };
        let ((), output) = tokio::join!(write_event, child.wait_with_output());
        let output = output
            .map_err(|error| HandlerError::new(format!("failed to wait for handler: {error}")))?;

        if !output.status.success() {
            return Err(HandlerError::new(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_result(&String::from_utf8_lossy(&output.stdout)))
    }
}

enum Launcher {
    Node,
    Interpreter(&'static str),
    Direct,
}

fn launcher(program: &Path) -> Launcher {
    match program.extension().and_then(|extension| extension.to_str()) {
        Some("js") => Launcher::Node,
        Some("sh") => Launcher::Interpreter("sh"),
        Some("py") => Launcher::Interpreter("python3"),
        _ => Launcher::Direct,
    }
}

/// JSON when stdout is JSON, the raw text otherwise, `null` when empty.
fn parse_result(stdout: &str) -> serde_json::Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string()))
}
