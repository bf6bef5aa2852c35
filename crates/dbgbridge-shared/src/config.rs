//! Bridge configuration.

use std::path::{Path, PathBuf};

/// Extension assembly loaded when nothing else is configured.
pub const DEFAULT_ASSEMBLY: &str = "CsDebugScript.UI.dll";

/// Type instantiated from the extension assembly.
pub const DEFAULT_ENTRY_TYPE: &str = "CsDebugScript.Executor";

/// Friendly name of the isolated execution domain.
pub const DEFAULT_DOMAIN_NAME: &str = "DbgBridge";

pub const EXTENSION_VERSION_MAJOR: u16 = 1;
pub const EXTENSION_VERSION_MINOR: u16 = 0;

/// Pack a debugger-extension version the way the host expects it.
pub const fn debug_extension_version(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | (minor as u32)
}

pub const ENV_ASSEMBLY: &str = "DBGBRIDGE_ASSEMBLY";
pub const ENV_ENTRY_TYPE: &str = "DBGBRIDGE_ENTRY_TYPE";
pub const ENV_DOMAIN: &str = "DBGBRIDGE_DOMAIN";
pub const ENV_HOST_CALLBACK: &str = "DBGBRIDGE_HOST_CALLBACK";
pub const ENV_ASYNC_TEARDOWN: &str = "DBGBRIDGE_ASYNC_TEARDOWN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Extension assembly. Relative paths resolve against the bridge module's directory.
    pub assembly: PathBuf,
    pub entry_type: String,
    pub domain_name: String,
    /// Install the host control so a declared domain manager can be adopted.
    pub host_callback: bool,
    /// Run full teardown on a worker thread.
    pub async_teardown: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            assembly: PathBuf::from(DEFAULT_ASSEMBLY),
            entry_type: DEFAULT_ENTRY_TYPE.to_string(),
            domain_name: DEFAULT_DOMAIN_NAME.to_string(),
            host_callback: true,
            async_teardown: true,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by `DBGBRIDGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(assembly) = lookup(ENV_ASSEMBLY).filter(|v| !v.is_empty()) {
            config.assembly = PathBuf::from(assembly);
        }
        if let Some(entry_type) = lookup(ENV_ENTRY_TYPE).filter(|v| !v.is_empty()) {
            config.entry_type = entry_type;
        }
        if let Some(domain) = lookup(ENV_DOMAIN).filter(|v| !v.is_empty()) {
            config.domain_name = domain;
        }

        for (key, field) in [
            (ENV_HOST_CALLBACK, &mut config.host_callback),
            (ENV_ASYNC_TEARDOWN, &mut config.async_teardown),
        ] {
            if let Some(raw) = lookup(key) {
                match parse_flag(&raw) {
                    Some(value) => *field = value,
                    None => tracing::warn!("Ignoring {}={:?}: expected 0, 1, true or false", key, raw),
                }
            }
        }

        config
    }

    /// Full path of the extension assembly for a bridge module living in `module_dir`.
    pub fn assembly_path(&self, module_dir: &Path) -> PathBuf {
        if self.assembly.is_absolute() {
            self.assembly.clone()
        } else {
            module_dir.join(&self.assembly)
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn extension_version_is_one_zero() {
        assert_eq!(
            debug_extension_version(EXTENSION_VERSION_MAJOR, EXTENSION_VERSION_MINOR),
            0x0001_0000
        );
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(BridgeConfig::from_lookup(lookup(&[])), BridgeConfig::default());
    }

    #[test]
    fn environment_overrides_fields() {
        let config = BridgeConfig::from_lookup(lookup(&[
            (ENV_ASSEMBLY, "Other.dll"),
            (ENV_ENTRY_TYPE, "Other.Entry"),
            (ENV_DOMAIN, "Scratch"),
            (ENV_HOST_CALLBACK, "0"),
            (ENV_ASYNC_TEARDOWN, "FALSE"),
        ]));
        assert_eq!(config.assembly, PathBuf::from("Other.dll"));
        assert_eq!(config.entry_type, "Other.Entry");
        assert_eq!(config.domain_name, "Scratch");
        assert!(!config.host_callback);
        assert!(!config.async_teardown);
    }

    #[test]
    fn invalid_flags_are_ignored() {
        let config = BridgeConfig::from_lookup(lookup(&[(ENV_ASYNC_TEARDOWN, "maybe")]));
        assert!(config.async_teardown);
    }

    #[test]
    fn relative_assembly_resolves_against_module_dir() {
        let config = BridgeConfig::default();
        let dir = Path::new("ext");
        assert_eq!(config.assembly_path(dir), dir.join(DEFAULT_ASSEMBLY));

        let absolute = std::env::temp_dir().join("abs.dll");
        let config = BridgeConfig {
            assembly: absolute.clone(),
            ..BridgeConfig::default()
        };
        assert_eq!(config.assembly_path(dir), absolute);
    }
}
