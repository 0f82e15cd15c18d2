use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use url::Url;

use crate::document::escape_html;

/// Capabilities a sandboxed frame can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SandboxPermission {
    Scripts,
    SameOrigin,
    Modals,
    Popups,
    PointerLock,
    Forms,
    TopNavigation,
    TopNavigationByUserActivation,
    PopupsToEscapeSandbox,
    Downloads,
}

impl SandboxPermission {
    pub fn token(self) -> &'static str {
        match self {
            Self::Scripts => "allow-scripts",
            Self::SameOrigin => "allow-same-origin",
            Self::Modals => "allow-modals",
            Self::Popups => "allow-popups",
            Self::PointerLock => "allow-pointer-lock",
            Self::Forms => "allow-forms",
            Self::TopNavigation => "allow-top-navigation",
            Self::TopNavigationByUserActivation => "allow-top-navigation-by-user-activation",
            Self::PopupsToEscapeSandbox => "allow-popups-to-escape-sandbox",
            Self::Downloads => "allow-downloads",
        }
    }

    /// Grants that would hand the guest control over the host page.
    pub fn escapes_host(self) -> bool {
        matches!(
            self,
            Self::TopNavigation
                | Self::TopNavigationByUserActivation
                | Self::PopupsToEscapeSandbox
                | Self::Downloads
        )
    }
}

pub const GUEST_PERMISSIONS: [SandboxPermission; 6] = [
    SandboxPermission::Scripts,
    SandboxPermission::SameOrigin,
    SandboxPermission::Modals,
    SandboxPermission::Popups,
    SandboxPermission::PointerLock,
    SandboxPermission::Forms,
];

const LOADABLE_SCHEMES: [&str; 2] = ["blob", "file"];

/// Permission set for the frame a game runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationPolicy {
    permissions: BTreeSet<SandboxPermission>,
    allow_fullscreen: bool,
}

impl Default for IsolationPolicy {
    fn default() -> Self {
        Self {
            permissions: GUEST_PERMISSIONS.into_iter().collect(),
            allow_fullscreen: true,
        }
    }
}

impl IsolationPolicy {
    /// Builds a custom policy, rejecting any grant that escapes the host.
    pub fn new(
        permissions: impl IntoIterator<Item = SandboxPermission>,
        allow_fullscreen: bool,
    ) -> Result<Self> {
        let permissions = permissions.into_iter().collect::<BTreeSet<_>>();
        if let Some(escaping) = permissions.iter().find(|perm| perm.escapes_host()) {
            bail!(
                "isolation violation: '{}' would give the guest control of the host page",
                escaping.token()
            );
        }
        Ok(Self {
            permissions,
            allow_fullscreen,
        })
    }

    #[cfg(test)]
    fn grants(&self, permission: SandboxPermission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn allows_fullscreen(&self) -> bool {
        self.allow_fullscreen
    }

    /// Value of the frame's `sandbox` attribute, in declaration order.
    pub fn sandbox_attribute(&self) -> String {
        self.permissions
            .iter()
            .map(|perm| perm.token())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Markup for an isolated frame loading `load_target`.
    pub fn frame_markup(&self, load_target: &str, title: &str) -> Result<String> {
        validate_load_target(load_target)?;
        let mut markup = format!(
            "<iframe src=\"{}\" title=\"{}\" sandbox=\"{}\"",
            escape_html(load_target),
            escape_html(title),
            self.sandbox_attribute()
        );
        if self.allows_fullscreen() {
            markup.push_str(" allowfullscreen");
        }
        markup.push_str(" style=\"width:100%;height:100%;border:none;display:block\"></iframe>");
        Ok(markup)
    }
}

/// Only locally materialized documents may be mounted.
pub fn validate_load_target(load_target: &str) -> Result<Url> {
    let url = Url::parse(load_target)
        .with_context(|| format!("invalid frame load target '{load_target}'"))?;
    if !LOADABLE_SCHEMES.iter().any(|scheme| *scheme == url.scheme()) {
        bail!(
            "isolation violation: frames may only load {} resources, got '{}'",
            LOADABLE_SCHEMES.join("/"),
            url.scheme()
        );
    }
    Ok(url)
}
