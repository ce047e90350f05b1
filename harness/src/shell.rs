//! Local command execution

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, trace};

use crate::errors::HarnessError;

/// Run a command and wait for it, returning trimmed stdout
pub async fn execute(workdir: impl AsRef<Path>, program: &str, args: &[String]) -> Result<String, HarnessError> {
    execute_with_env(workdir, program, &HashMap::new(), args).await
}

/// Run a command with an environment overlay, returning trimmed stdout
pub async fn execute_with_env(
    workdir: impl AsRef<Path>,
    program: &str,
    env: &HashMap<String, String>,
    args: &[String],
) -> Result<String, HarnessError> {
    let command_line = render(program, args);
    debug!("Executing command: {}", command_line);

    let output = Command::new(program)
        .args(args)
        .envs(env)
        .current_dir(workdir.as_ref())
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| HarnessError::CommandFailed {
            command: command_line.clone(),
            code: None,
            stderr: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        return Err(HarnessError::CommandFailed {
            command: command_line,
            code: output.status.code().map(i64::from),
            stderr: if stderr.is_empty() { stdout } else { stderr },
        });
    }

    trace!("Command '{}' output: {}", command_line, stdout);
    Ok(stdout)
}

/// Start a command without waiting for it to finish
pub fn execute_detached(
    workdir: impl AsRef<Path>,
    program: &str,
    env: &HashMap<String, String>,
    args: &[String],
) -> Result<u32, HarnessError> {
    let command_line = render(program, args);
    debug!("Spawning detached command: {}", command_line);

    let child = Command::new(program)
        .args(args)
        .envs(env)
        .current_dir(workdir.as_ref())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false)
        .spawn()
        .map_err(|e| HarnessError::CommandFailed {
            command: command_line,
            code: None,
            stderr: e.to_string(),
        })?;

    Ok(child.id().unwrap_or_default())
}

/// Read an environment variable, falling back to a default when unset or empty
pub fn get_env(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Read a boolean environment variable (`true`/`1`/`yes`)
pub fn get_env_bool(key: &str) -> bool {
    matches!(
        std::env::var(key).map(|v| v.to_lowercase()).as_deref(),
        Ok("true") | Ok("1") | Ok("yes")
    )
}

/// Convert string slices into an owned argument vector
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_trims_output() {
        let out = execute(".", "echo", &args(["  hello  "])).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_reports_exit_code() {
        let err = execute(".", "sh", &args(["-c", "echo boom >&2; exit 3"]))
            .await
            .unwrap_err();

        match err {
            HarnessError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_with_env_overlay() {
        let env = HashMap::from([("HARNESS_TEST_VALUE".to_string(), "42".to_string())]);
        let out = execute_with_env(".", "sh", &env, &args(["-c", "echo $HARNESS_TEST_VALUE"]))
            .await
            .unwrap();
        assert_eq!(out, "42");
    }

    #[test]
    fn test_get_env_default() {
        assert_eq!(get_env("HARNESS_SURELY_UNSET_VARIABLE", "fallback"), "fallback");
        assert!(!get_env_bool("HARNESS_SURELY_UNSET_VARIABLE"));
    }
}
