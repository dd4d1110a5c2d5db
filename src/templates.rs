//! Predefined device profiles.
//!
//! A profile bundles what the core needs to know about one switch family:
//! its prompt patterns, its pagination markers and the command that disables
//! pagination for the rest of the session.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::PromptMatcher;
use crate::error::ConnectError;
use crate::session::{CompletionPolicy, RegistryOptions};

/// Built-in profile names supported by this crate.
pub const BUILTIN_TEMPLATES: &[&str] = &[
    "cisco",
    "huawei",
    "h3c",
    "hillstone",
    "juniper",
    "aruba",
    "brocade",
];

/// Metadata for a built-in device profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateMetadata {
    pub name: String,
    pub vendor: String,
    pub family: String,
    pub setup_command: String,
}

/// Prompt recognition and session setup for one switch family.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub name: String,
    /// Sent once per session to disable pagination.
    pub setup_command: String,
    pub matcher: PromptMatcher,
}

impl DeviceProfile {
    /// Prompt-match policy bounded by `timeout`.
    pub fn prompt_policy(&self, timeout: Duration) -> CompletionPolicy {
        CompletionPolicy::prompt_match(self.matcher.clone(), timeout)
    }

    /// Registry options that run this profile's setup command under prompt matching.
    pub fn registry_options(&self, timeout: Duration) -> RegistryOptions {
        RegistryOptions {
            setup_command: Some(self.setup_command.clone()),
            setup_policy: self.prompt_policy(timeout),
            ..RegistryOptions::default()
        }
    }
}

fn metadata_for(name: &str) -> Option<TemplateMetadata> {
    let (vendor, family, setup) = match name {
        "cisco" => ("Cisco", "IOS/IOS-XE", "terminal length 0"),
        "huawei" => ("Huawei", "VRP", "screen-length 0 temporary"),
        "h3c" => ("H3C", "Comware", "screen-length disable"),
        "hillstone" => ("Hillstone", "StoneOS", "terminal length 0"),
        "juniper" => ("Juniper", "JunOS", "set cli screen-length 0"),
        "aruba" => ("HPE Aruba", "ArubaOS-Switch", "no page"),
        "brocade" => ("Ruckus/Brocade", "FastIron ICX", "skip-page-display"),
        _ => return None,
    };
    Some(TemplateMetadata {
        name: name.to_string(),
        vendor: vendor.to_string(),
        family: family.to_string(),
        setup_command: setup.to_string(),
    })
}

/// Returns names of all built-in profiles.
pub fn available_templates() -> &'static [&'static str] {
    BUILTIN_TEMPLATES
}

/// Returns metadata for all built-in profiles.
pub fn template_catalog() -> Vec<TemplateMetadata> {
    BUILTIN_TEMPLATES
        .iter()
        .filter_map(|name| metadata_for(name))
        .collect()
}

fn canonical_name(name: &str) -> String {
    match name.to_ascii_lowercase().as_str() {
        "icx" | "ruckus" => "brocade".to_string(),
        other => other.to_string(),
    }
}

/// Returns metadata for one profile by name (case-insensitive).
pub fn template_metadata(name: &str) -> Result<TemplateMetadata, ConnectError> {
    metadata_for(&canonical_name(name))
        .ok_or_else(|| ConnectError::TemplateNotFound(name.to_string()))
}

/// Builds a profile by name (case-insensitive). `icx` and `ruckus` are
/// aliases of `brocade`.
pub fn by_name(name: &str) -> Result<DeviceProfile, ConnectError> {
    match canonical_name(name).as_str() {
        "cisco" => cisco(),
        "huawei" => huawei(),
        "h3c" => h3c(),
        "hillstone" => hillstone(),
        "juniper" => juniper(),
        "aruba" => aruba(),
        "brocade" => brocade(),
        _ => Err(ConnectError::TemplateNotFound(name.to_string())),
    }
}

fn build(name: &str, prompts: Vec<&str>, more: Vec<&str>) -> Result<DeviceProfile, ConnectError> {
    let meta = template_metadata(name)?;
    Ok(DeviceProfile {
        name: meta.name,
        setup_command: meta.setup_command,
        matcher: PromptMatcher::new(prompts, more)?,
    })
}

/// Cisco IOS/IOS-XE.
pub fn cisco() -> Result<DeviceProfile, ConnectError> {
    build(
        "cisco",
        vec![r"^\S+\(\S+\)#\s*$", r"^[^\s#]+#\s*$", r"^[^\s<]+>\s*$"],
        vec![r"\s*<--- More --->\s*", r"\s*--More--\s*"],
    )
}

/// Huawei VRP.
pub fn huawei() -> Result<DeviceProfile, ConnectError> {
    build(
        "huawei",
        vec![r"^(HRP_M|HRP_S){0,1}\[.+]+\s*$", r"^(RBM_P|RBM_S)?<.+>\s*$"],
        vec![r"\s*---- More ----\s*"],
    )
}

/// H3C Comware.
pub fn h3c() -> Result<DeviceProfile, ConnectError> {
    build(
        "h3c",
        vec![r"^(RBM_P|RBM_S)?\[.+\]\s*$", r"^(RBM_P|RBM_S)?<.+>\s*$"],
        vec![r"\s*---- More ----\s*"],
    )
}

/// Hillstone StoneOS.
pub fn hillstone() -> Result<DeviceProfile, ConnectError> {
    build(
        "hillstone",
        vec![r"^.+#\s\r{0,1}$", r"^.+\(config.*\)\s*#\s\r{0,1}$"],
        vec![r"\s*--More--\s*"],
    )
}

/// Juniper JunOS operational and configuration mode.
pub fn juniper() -> Result<DeviceProfile, ConnectError> {
    build(
        "juniper",
        vec![r"^(\{\w+(:\w+)?\}\s*)?[\w.\-]+@[\w.\-]+[>#%]\s*$"],
        vec![r"\s*---\(more.*\)---\s*"],
    )
}

/// HPE Aruba (ProCurve) access switches.
pub fn aruba() -> Result<DeviceProfile, ConnectError> {
    build(
        "aruba",
        vec![r"^[\w.\-]+(\([\w.\-]+\))?[#>]\s*$"],
        vec![r"-- MORE --, next page: Space.*"],
    )
}

/// Ruckus (formerly Brocade) FastIron ICX. The host part of the prompt is
/// the model plus `Router` or `Switch`, optionally behind `SSH@`.
pub fn brocade() -> Result<DeviceProfile, ConnectError> {
    build(
        "brocade",
        vec![r"^(SSH@)?[\w.\-]+( [\w.\-]+)?(\([\w.\-/]+\))?[#>]\s*$"],
        vec![r"\s*--More--, next page: Space.*"],
    )
}
