//! Install callbacks run around each changed asset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tessera_ports::exec::run_checked;
use tessera_ports::PortError;
use tokio::process::Command;

/// Called by [`crate::unseal::unseal`] for every asset whose content changed.
#[async_trait]
pub trait InstallHook: Send + Sync {
    /// `staged` holds the new content; the installed file is still the old one.
    async fn before_install(&self, name: &str, staged: &Path) -> Result<(), PortError>;

    /// `installed` now holds the new content.
    async fn after_install(&self, name: &str, installed: &Path) -> Result<(), PortError>;
}

/// Runs `program pre|post <name> <path>` in the asset directory.
#[derive(Debug, Clone)]
pub struct CommandHook {
    program: PathBuf,
    workdir: PathBuf,
    timeout: Duration,
}

impl CommandHook {
    pub fn new(program: impl Into<PathBuf>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
            timeout,
        }
    }

    async fn run(&self, phase: &str, name: &str, path: &Path) -> Result<(), PortError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(phase).arg(name).arg(path).current_dir(&self.workdir);
        run_checked(cmd, "install hook", self.timeout).await?;
        Ok(())
    }
}

#[async_trait]
impl InstallHook for CommandHook {
    async fn before_install(&self, name: &str, staged: &Path) -> Result<(), PortError> {
        self.run("pre", name, staged).await
    }

    async fn after_install(&self, name: &str, installed: &Path) -> Result<(), PortError> {
        self.run("post", name, installed).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("hook.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_command_hook_arguments_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), r#"echo "$1 $2 $3" >> calls; pwd >> calls"#);
        let hook = CommandHook::new(&program, dir.path(), Duration::from_secs(5));

        hook.before_install("krb5.conf", Path::new("krb5.conf.tmp"))
            .await
            .unwrap();
        hook.after_install("krb5.conf", Path::new("krb5.conf"))
            .await
            .unwrap();

        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        let lines: Vec<_> = calls.lines().collect();
        assert_eq!(lines[0], "pre krb5.conf krb5.conf.tmp");
        assert_eq!(lines[2], "post krb5.conf krb5.conf");
        assert_eq!(
            std::fs::canonicalize(lines[1]).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_command_hook_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo refused >&2; exit 2");
        let hook = CommandHook::new(&program, dir.path(), Duration::from_secs(5));

        let err = hook
            .before_install("keytab-host", Path::new("keytab-host.tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Failed { ref stderr, .. } if stderr == "refused"));
    }

    #[tokio::test]
    async fn test_command_hook_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "sleep 5");
        let hook = CommandHook::new(&program, dir.path(), Duration::from_millis(100));

        let err = hook
            .after_install("keytab-host", Path::new("keytab-host"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Timeout { .. }));
    }
}
