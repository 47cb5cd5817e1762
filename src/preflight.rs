use crate::bridge::BridgeCommand;
use crate::error::LauncherError;
use std::path::PathBuf;

/// Resolve the bridge executable before any window is shown.
pub fn ensure_dependencies(command: &BridgeCommand) -> Result<PathBuf, LauncherError> {
    which::which(&command.program).map_err(|e| {
        LauncherError::DependencyMissing(format!(
            "Required bridge executable '{}' is not available ({e}).\n\
             Install esptool (pip install esptool) or pass --bridge <path>.",
            command.program
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bridge_is_reported() {
        let err = ensure_dependencies(&BridgeCommand::new("serial-bridge-missing-binary-xyz"))
            .unwrap_err();
        assert!(matches!(err, LauncherError::DependencyMissing(_)));
        assert!(err.to_string().contains("serial-bridge-missing-binary-xyz"));
    }

    #[cfg(unix)]
    #[test]
    fn present_bridge_resolves() {
        assert!(ensure_dependencies(&BridgeCommand::new("sh")).is_ok());
    }
}
