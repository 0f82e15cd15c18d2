//! Host capabilities the player relies on: identifiers, dialogs, fullscreen and
//! the clock. Browser builds bind these to the real globals; headless runs and
//! tests use [`HeadlessPlatform`].

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::error_codes::{CodedError, FULLSCREEN_UNAVAILABLE};

pub trait Platform: Send + Sync {
    /// A random UUID, or `None` when the host has no cryptographic source.
    fn random_uuid(&self) -> Option<String>;

    /// Blocking yes/no question. Hosts without dialogs answer `true`.
    fn confirm(&self, message: &str) -> bool;

    fn alert(&self, message: &str);

    fn request_fullscreen(&self) -> Result<()>;

    fn exit_fullscreen(&self) -> Result<()>;

    fn is_fullscreen(&self) -> bool;

    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Default)]
struct HeadlessState {
    confirm_answers: VecDeque<bool>,
    prompts: Vec<String>,
    alerts: Vec<String>,
    fullscreen: bool,
    deny_fullscreen: bool,
    fixed_now: Option<i64>,
}

/// In-memory platform. Confirm answers are scripted (default `true`), every
/// prompt and alert is recorded, and fullscreen can be made to fail.
#[derive(Debug)]
pub struct HeadlessPlatform {
    uuids: bool,
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self {
            uuids: true,
            state: Mutex::new(HeadlessState::default()),
        }
    }

    /// A platform that reports no UUID source, forcing id fallbacks.
    pub fn without_uuid() -> Self {
        Self {
            uuids: false,
            ..Self::new()
        }
    }

    pub fn push_confirm_answer(&self, answer: bool) {
        self.lock().confirm_answers.push_back(answer);
    }

    pub fn deny_fullscreen(&self, deny: bool) {
        self.lock().deny_fullscreen = deny;
    }

    pub fn set_now(&self, millis: i64) {
        self.lock().fixed_now = Some(millis);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.lock().alerts.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeadlessState> {
        // A poisoned lock only means a test thread panicked mid-update.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Platform for HeadlessPlatform {
    fn random_uuid(&self) -> Option<String> {
        self.uuids.then(|| uuid::Uuid::new_v4().to_string())
    }

    fn confirm(&self, message: &str) -> bool {
        let mut state = self.lock();
        state.prompts.push(message.to_owned());
        state.confirm_answers.pop_front().unwrap_or(true)
    }

    fn alert(&self, message: &str) {
        self.lock().alerts.push(message.to_owned());
    }

    fn request_fullscreen(&self) -> Result<()> {
        let mut state = self.lock();
        if state.deny_fullscreen {
            return Err(anyhow!(CodedError::platform(
                FULLSCREEN_UNAVAILABLE,
                "fullscreen request denied by platform policy"
            )));
        }
        state.fullscreen = true;
        Ok(())
    }

    fn exit_fullscreen(&self) -> Result<()> {
        self.lock().fullscreen = false;
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.lock().fullscreen
    }

    fn now_millis(&self) -> i64 {
        self.lock()
            .fixed_now
            .unwrap_or_else(|| Utc::now().timestamp_millis())
    }
}

/// Platform for the command line: confirmations read `y`/`n` from stdin,
/// alerts go to stderr, and there is no fullscreen surface.
#[derive(Debug, Default)]
pub struct TerminalPlatform;

impl Platform for TerminalPlatform {
    fn random_uuid(&self) -> Option<String> {
        Some(uuid::Uuid::new_v4().to_string())
    }

    fn confirm(&self, message: &str) -> bool {
        eprint!("{message} [y/N] ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }

    fn alert(&self, message: &str) {
        eprintln!("{message}");
    }

    fn request_fullscreen(&self) -> Result<()> {
        Err(anyhow!(CodedError::platform(
            FULLSCREEN_UNAVAILABLE,
            "the terminal has no fullscreen surface"
        )))
    }

    fn exit_fullscreen(&self) -> Result<()> {
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        false
    }
}
