// # Command Reloader
//
// ResolverControl implementation that runs an external command, e.g.
// `systemctl restart unbound`.
//
// The command is spawned without a shell, bounded by a timeout, and killed
// if the timeout elapses. A non-zero exit status is a reload failure; its
// stderr is carried in the error.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::Error;
use crate::traits::ResolverControl;

/// Reload the resolver by running a command
#[derive(Debug, Clone)]
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandReloader {
    /// Build from a command line split into program and arguments
    pub fn new(command: &[String], timeout: Duration) -> Result<Self, Error> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::config("Resolver reload command cannot be empty"))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }
}

#[async_trait]
impl ResolverControl for CommandReloader {
    async fn reload(&self) -> Result<(), Error> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::config_reload(format!("Failed to run {}: {}", self.describe(), e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::config_reload(format!(
                    "{} timed out after {}s",
                    self.describe(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::config_reload(format!("Failed to wait for {}: {}", self.describe(), e)))?;

        if output.status.success() {
            tracing::debug!("Resolver reloaded via {}", self.describe());
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::config_reload(format!(
            "{} exited with {}: {}",
            self.describe(),
            output.status,
            stderr.trim()
        )))
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandReloader::new(&[], Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_successful_command() {
        let reloader = CommandReloader::new(&command(&["true"]), Duration::from_secs(5)).unwrap();
        reloader.reload().await.unwrap();
        assert_eq!(reloader.describe(), "true");
    }

    #[tokio::test]
    async fn test_failing_command_reports_stderr() {
        let reloader = CommandReloader::new(
            &command(&["sh", "-c", "echo unit not found >&2; exit 3"]),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = reloader.reload().await.unwrap_err();
        assert!(matches!(err, Error::ConfigReload(_)));
        assert!(err.to_string().contains("unit not found"), "{}", err);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let reloader = CommandReloader::new(
            &command(&["/nonexistent/guardian-reload"]),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(reloader.reload().await, Err(Error::ConfigReload(_))));
    }
}
