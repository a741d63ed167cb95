//! High-level driver: launcher plus session.
//!
//! [`MarionetteDriver`] ties a [`SessionLauncher`] to a
//! [`SessionCoordinator`] so callers get a single start / dispatch / stop
//! surface. Methods take `&self`; the coordinator lives behind a
//! [`tokio::sync::Mutex`], which also keeps commands strictly sequential.
//!
//! # Example
//!
//! ```no_run
//! use marionette_core::command::{names, Command};
//! use marionette_core::config::BridgeConfig;
//! use marionette_core::driver::MarionetteDriver;
//! use marionette_core::launcher::LaunchOptions;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = MarionetteDriver::attach(BridgeConfig::load());
//! driver.start(&LaunchOptions::default()).await?;
//! let response = driver.dispatch(Command::new(names::NEW_SESSION)).await?;
//! println!("session: {:?}", response.session_id());
//! driver.stop().await?;
//! # Ok(())
//! # }
//! ```

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::command::Command;
use crate::config::BridgeConfig;
use crate::launcher::{AttachLauncher, LaunchOptions, ProcessLauncher, SessionLauncher};
use crate::response::NormalizedResponse;
use crate::rewrite::RewriteTable;
use crate::session::{SessionCoordinator, SessionError, SessionState};

pub struct MarionetteDriver {
    config: BridgeConfig,
    rewriter: RewriteTable,
    launcher: Mutex<Box<dyn SessionLauncher>>,
    session: Mutex<Option<SessionCoordinator>>,
}

impl MarionetteDriver {
    pub fn new(config: BridgeConfig, launcher: Box<dyn SessionLauncher>) -> Self {
        Self {
            config,
            rewriter: RewriteTable::standard(),
            launcher: Mutex::new(launcher),
            session: Mutex::new(None),
        }
    }

    /// Driver for a target that is already running.
    pub fn attach(config: BridgeConfig) -> Self {
        Self::new(config, Box::new(AttachLauncher))
    }

    /// Driver that spawns the configured browser binary.
    pub fn spawn(config: BridgeConfig) -> Self {
        Self::new(config, Box::new(ProcessLauncher::new()))
    }

    /// Replace the rewrite table used by sessions started afterwards.
    pub fn with_rewrite_table(mut self, rewriter: RewriteTable) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Launch the target and bring a session to `Ready`.
    ///
    /// If the connection cannot be established the launched target is
    /// stopped again before the error is returned.
    pub async fn start(&self, options: &LaunchOptions) -> Result<(), SessionError> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            if existing.is_ready() {
                return Err(SessionError::NotReady(SessionState::Ready));
            }
        }

        let mut launcher = self.launcher.lock().await;
        launcher.launch(options).await?;

        let mut coordinator = SessionCoordinator::new().with_rewrite_table(self.rewriter.clone());
        if let Err(e) = coordinator.connect(&self.config).await {
            if let Err(quit_err) = launcher.quit().await {
                warn!(error = %quit_err, "failed to stop target after connection failure");
            }
            return Err(e);
        }

        info!(peer = ?coordinator.peer_addr(), "driver started");
        *session = Some(coordinator);
        Ok(())
    }

    /// Dispatch one command on the running session.
    pub async fn dispatch(&self, command: Command) -> Result<NormalizedResponse, SessionError> {
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(coordinator) => coordinator.dispatch(command).await,
            None => Err(SessionError::NotReady(SessionState::Disconnected)),
        }
    }

    /// Close the socket, then stop the target. Calling it again is a no-op.
    pub async fn stop(&self) -> Result<(), SessionError> {
        if let Some(mut coordinator) = self.session.lock().await.take() {
            coordinator.close().await;
        }
        self.launcher.lock().await.quit().await?;
        Ok(())
    }

    pub async fn is_ready(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(SessionCoordinator::is_ready)
    }

    /// Current session state; `Disconnected` before `start` and after `stop`.
    pub async fn state(&self) -> SessionState {
        self.session
            .lock()
            .await
            .as_ref()
            .map_or(SessionState::Disconnected, SessionCoordinator::state)
    }
}
