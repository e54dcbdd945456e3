use crate::args::ProviderName;
use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

/// Checks that must pass before a cluster is allowed to boot. Failures
/// print titled remediation steps rather than bare errors.
pub fn check_run(config_path: &Path, provider: ProviderName) -> Result<()> {
    if !config_path.exists() {
        bail!(
            "config {:?} does not exist\n  1. Check the --config path\n  2. Run `agmesh validate <config>` once it exists",
            config_path
        );
    }

    let binary = provider.to_string();
    if find_on_path(&binary).is_none() {
        bail!(
            "provider binary {:?} not found on PATH\n  1. Install the {} CLI\n  2. Make sure it is reachable from this shell\n  3. Re-run with a different --provider if intended",
            binary,
            binary
        );
    }

    Ok(())
}

fn find_on_path(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_on_path_locates_sh() {
        assert!(find_on_path("sh").is_some());
        assert!(find_on_path("definitely-not-a-real-binary-xyz").is_none());
    }

    #[test]
    fn test_missing_config_names_remediation() {
        let err = check_run(Path::new("/no/such/config.json"), ProviderName::Claude)
            .unwrap_err()
            .to_string();
        assert!(err.contains("does not exist"));
        assert!(err.contains("1."));
    }
}
