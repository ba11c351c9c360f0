// SPDX-License-Identifier: GPL-3.0-only

//! Desktop notifications
//!
//! Notifications are a courtesy side effect of attach/detach/mint. Failures
//! are reported to the caller, who is expected to ignore them.

use crate::error::{Result, SysError};
use std::collections::HashMap;
use tracing::debug;
use zbus::zvariant::Value;

const APP_NAME: &str = "ZenFS";

pub trait Notifier: Send + Sync {
    fn notify(&self, summary: &str, body: &str) -> Result<()>;
}

/// Sends notifications to `org.freedesktop.Notifications` on the session bus
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, summary: &str, body: &str) -> Result<()> {
        let connection = zbus::blocking::Connection::session()
            .map_err(|e| SysError::Notification(e.to_string()))?;

        let actions: Vec<&str> = Vec::new();
        let hints: HashMap<&str, Value<'_>> = HashMap::new();

        connection
            .call_method(
                Some("org.freedesktop.Notifications"),
                "/org/freedesktop/Notifications",
                Some("org.freedesktop.Notifications"),
                "Notify",
                &(APP_NAME, 0u32, "", summary, body, actions, hints, -1i32),
            )
            .map_err(|e| SysError::Notification(e.to_string()))?;

        debug!("Notified: {} {}", summary, body);
        Ok(())
    }
}

/// Drops every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _summary: &str, _body: &str) -> Result<()> {
        Ok(())
    }
}
