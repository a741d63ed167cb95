//! Starting and stopping the automation target.
//!
//! The bridge does not manage browser profiles or installation; it only
//! needs something that can bring a Marionette listener up and take it down
//! again. [`SessionLauncher`] is that seam:
//!
//! - [`AttachLauncher`] assumes the target is already running.
//! - [`ProcessLauncher`] spawns a browser executable and kills it on quit.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::process::{Child, Command as ProcessCommand};
use tracing::{debug, info, warn};

use crate::command::{names, Command};
use crate::config::BridgeConfig;

/// Opaque capability descriptor. It rides along on the session request as
/// `desiredCapabilities` and the rewriter drops it before the wire, since
/// Marionette does not negotiate capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(pub Value);

/// What the launcher should start.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub binary: Option<PathBuf>,
    pub args: Vec<String>,
    pub capabilities: Capabilities,
}

impl LaunchOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            binary: config.browser_binary.clone(),
            args: config.browser_args.clone(),
            capabilities: Capabilities::default(),
        }
    }

    /// The `newSession` command for these options.
    pub fn new_session_command(&self) -> Command {
        let command = Command::new(names::NEW_SESSION);
        if self.capabilities.0.is_null() {
            command
        } else {
            command.with_param("desiredCapabilities", self.capabilities.0.clone())
        }
    }
}

/// Errors from launching or stopping the target.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// No executable was configured.
    #[error("no browser binary configured")]
    NoBinary,

    /// The executable could not be started.
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred while stopping the target.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Brings the automation target up and down around a session.
#[async_trait]
pub trait SessionLauncher: Send {
    /// Start the target. The Marionette listener may come up later; the
    /// coordinator's connection retry covers the gap.
    async fn launch(&mut self, options: &LaunchOptions) -> Result<(), LaunchError>;

    /// Stop the target. Safe to call when nothing is running.
    async fn quit(&mut self) -> Result<(), LaunchError>;
}

/// Launcher for a target someone else started.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttachLauncher;

#[async_trait]
impl SessionLauncher for AttachLauncher {
    async fn launch(&mut self, _options: &LaunchOptions) -> Result<(), LaunchError> {
        debug!("attaching to running target");
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), LaunchError> {
        Ok(())
    }
}

/// Launcher that owns a browser child process.
#[derive(Debug, Default)]
pub struct ProcessLauncher {
    child: Option<Child>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// OS process id of the running child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

#[async_trait]
impl SessionLauncher for ProcessLauncher {
    async fn launch(&mut self, options: &LaunchOptions) -> Result<(), LaunchError> {
        if self.child.is_some() {
            warn!("target already launched, stopping the previous process first");
            self.quit().await?;
        }

        let binary = options.binary.clone().ok_or(LaunchError::NoBinary)?;
        let child = ProcessCommand::new(&binary)
            .args(&options.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                binary: binary.clone(),
                source,
            })?;

        info!(binary = %binary.display(), pid = ?child.id(), "launched target");
        self.child = Some(child);
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), LaunchError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // The process may already have exited on its own.
        if child.try_wait()?.is_none() {
            child.kill().await?;
        }
        info!("target stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attach_launcher_is_noop() {
        let mut launcher = AttachLauncher;
        launcher.launch(&LaunchOptions::default()).await.unwrap();
        launcher.quit().await.unwrap();
    }

    #[tokio::test]
    async fn process_launcher_requires_binary() {
        let mut launcher = ProcessLauncher::new();
        let err = launcher.launch(&LaunchOptions::default()).await.unwrap_err();
        assert!(matches!(err, LaunchError::NoBinary));
        assert!(!launcher.is_running());
    }

    #[tokio::test]
    async fn process_launcher_reports_spawn_failure() {
        let mut launcher = ProcessLauncher::new();
        let options = LaunchOptions {
            binary: Some(PathBuf::from("/nonexistent/marionette-test-browser")),
            ..Default::default()
        };
        let err = launcher.launch(&options).await.unwrap_err();
        match err {
            LaunchError::Spawn { binary, .. } => {
                assert_eq!(binary, PathBuf::from("/nonexistent/marionette-test-browser"));
            }
            other => panic!("expected Spawn, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn quit_without_launch_is_ok() {
        let mut launcher = ProcessLauncher::new();
        launcher.quit().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_launcher_starts_and_kills_child() {
        let mut launcher = ProcessLauncher::new();
        let options = LaunchOptions {
            binary: Some(PathBuf::from("sleep")),
            args: vec!["30".to_string()],
            ..Default::default()
        };
        launcher.launch(&options).await.unwrap();
        assert!(launcher.is_running());
        assert!(launcher.pid().is_some());

        launcher.quit().await.unwrap();
        assert!(!launcher.is_running());
    }

    #[test]
    fn session_command_carries_capabilities() {
        let options = LaunchOptions {
            capabilities: Capabilities(serde_json::json!({"browserName": "firefox"})),
            ..Default::default()
        };
        let command = options.new_session_command();
        assert_eq!(command.name, names::NEW_SESSION);
        assert_eq!(
            command.parameters.get("desiredCapabilities"),
            Some(&serde_json::json!({"browserName": "firefox"}))
        );

        let envelope = crate::rewrite::RewriteTable::standard().rewrite(command, None);
        assert!(envelope.params.get("desiredCapabilities").is_none());

        assert!(LaunchOptions::default().new_session_command().parameters.is_empty());
    }

    #[test]
    fn options_from_config() {
        let config = BridgeConfig {
            browser_binary: Some(PathBuf::from("/opt/firefox/firefox")),
            ..Default::default()
        };
        let options = LaunchOptions::from_config(&config);
        assert_eq!(options.binary, config.browser_binary);
        assert_eq!(options.args, vec!["-foreground".to_string()]);
        assert_eq!(options.capabilities, Capabilities::default());
    }
}
