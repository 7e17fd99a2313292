use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::KiraError;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const STDERR_TAIL_LINES: usize = 20;

/// One external command with its output sent to `<log_dir>/<label>.{stdout,stderr}.log`.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub label: String,
}

/// Runs `spec` to completion, killing the child as soon as `cancel` fires.
pub fn run_logged(spec: &CommandSpec, cancel: &CancelToken) -> Result<(), KiraError> {
    cancel.check(&spec.label)?;
    fs::create_dir_all(&spec.log_dir).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let stdout_path = spec.log_dir.join(format!("{}.stdout.log", spec.label));
    let stderr_path = spec.log_dir.join(format!("{}.stderr.log", spec.label));
    let stdout =
        File::create(&stdout_path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let stderr =
        File::create(&stderr_path).map_err(|err| KiraError::Filesystem(err.to_string()))?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    tracing::debug!(
        program = %spec.program.display(),
        args = ?spec.args,
        "spawning {}",
        spec.label
    );
    let mut child = cmd.spawn().map_err(|err| KiraError::ToolFailed {
        tool: tool_name(&spec.program),
        message: err.to_string(),
    })?;

    let status = loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(KiraError::Cancelled(format!("cancelled during {}", spec.label)));
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                let _ = child.kill();
                return Err(KiraError::ToolFailed {
                    tool: tool_name(&spec.program),
                    message: err.to_string(),
                });
            }
        }
    };

    if status.success() {
        return Ok(());
    }
    let tail = stderr_tail(&stderr_path);
    let message = if tail.is_empty() {
        format!("{} exited with {status}", spec.label)
    } else {
        format!("{} exited with {status}: {tail}", spec.label)
    };
    Err(KiraError::ToolFailed {
        tool: tool_name(&spec.program),
        message,
    })
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

pub fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() { None } else { Some(stdout) }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

fn stderr_tail(path: &Path) -> String {
    let content = fs::read_to_string(path).unwrap_or_default();
    let lines = content.lines().collect::<Vec<_>>();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n").trim().to_string()
}
