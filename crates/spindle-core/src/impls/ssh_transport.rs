//! SshTransport - システムの `ssh` バイナリを使う Transport
//!
//! `open_session` で ControlMaster 接続を張り、以降の `spawn` はその
//! 多重化ソケット上で実行します。リモート側ではコマンドを `setsid` で
//! 独立したセッション (= プロセスグループ) として起動し、その pgid を
//! ファイルに書き出します。kill 時はグループ全体に SIGKILL を送るので、
//! 孫プロセスも残りません。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use ulid::Ulid;

use super::local_transport::spawn_child;
use crate::config::SshConfig;
use crate::ports::{
    Credentials, ProcessControl, RemoteProcess, RemoteSession, Transport, TransportError,
};

pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Remote wrapper: `command` leads its own session, its pid (= pgid) goes to `pid_file`.
fn wrap_remote(command: &str, workdir: Option<&str>, pid_file: &str) -> String {
    let cd = workdir
        .map(|dir| format!("cd {} || exit 1; ", shell_quote(dir)))
        .unwrap_or_default();
    format!(
        "{cd}setsid sh -c {cmd} & p=$!; echo $p > {pid}; wait $p; rc=$?; rm -f {pid}; exit $rc",
        cmd = shell_quote(command),
        pid = pid_file,
    )
}

/// SIGKILL the process group recorded by [`wrap_remote`].
fn kill_remote(pid_file: &str) -> String {
    format!(
        "if [ -f {pid} ]; then p=$(cat {pid}); [ -n \"$p\" ] && kill -KILL -$p; rm -f {pid}; fi",
        pid = pid_file
    )
}

#[derive(Debug, Clone)]
struct Destination {
    host: String,
    user: String,
    port: u16,
    key_path: Option<PathBuf>,
    connect_timeout: Duration,
    control_path: PathBuf,
}

impl Destination {
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn command(&self, extra: &[&str], remote: Option<&str>) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args())
            .args(extra)
            .arg(self.login())
            .stdin(Stdio::null());
        if let Some(remote) = remote {
            cmd.arg("--").arg(remote);
        }
        cmd
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open_session(
        &self,
        target: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, TransportError> {
        let dest = Destination {
            host: target.to_string(),
            user: credentials
                .user
                .clone()
                .unwrap_or_else(|| self.config.user.clone()),
            port: credentials.port.unwrap_or(self.config.port),
            key_path: credentials.key_path.clone(),
            connect_timeout: self.config.connect_timeout,
            control_path: std::env::temp_dir().join(format!("spindle-{}.sock", Ulid::new())),
        };

        let output = dest
            .command(&["-o", "ControlMaster=yes", "-o", "ControlPersist=no", "-f", "-N"], None)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| TransportError::Connect {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(TransportError::Connect {
                target: target.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::debug!(target, user = %dest.user, port = dest.port, "ssh session opened");
        Ok(Box::new(SshSession { dest }))
    }
}

struct SshSession {
    dest: Destination,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn spawn(
        &mut self,
        command: &str,
        workdir: Option<&str>,
    ) -> Result<RemoteProcess, TransportError> {
        let pid_file = format!("/tmp/spindle-{}.pid", Ulid::new());
        let wrapped = wrap_remote(command, workdir, &pid_file);

        let mut cmd = self.dest.command(&[], Some(&wrapped));
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let process = spawn_child(cmd)?;
        Ok(RemoteProcess {
            stdout: process.stdout,
            stderr: process.stderr,
            control: Box::new(SshProcessControl {
                local: process.control,
                dest: self.dest.clone(),
                pid_file,
            }),
        })
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        let status = self
            .dest
            .command(&["-O", "exit"], None)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            tracing::debug!(host = %self.dest.host, "ssh control master already gone");
        }
        Ok(())
    }
}

struct SshProcessControl {
    local: Box<dyn ProcessControl>,
    dest: Destination,
    pid_file: String,
}

#[async_trait]
impl ProcessControl for SshProcessControl {
    async fn wait(&mut self) -> Result<Option<i32>, TransportError> {
        self.local.wait().await
    }

    async fn kill(&mut self) -> Result<(), TransportError> {
        let remote = kill_remote(&self.pid_file);
        let status = self
            .dest
            .command(&[], Some(&remote))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => tracing::warn!(host = %self.dest.host, code = ?s.code(), "remote kill reported failure"),
            Err(e) => tracing::warn!(host = %self.dest.host, error = %e, "remote kill failed"),
        }
        self.local.kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("echo hi"), "'echo hi'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn destination_args_include_port_and_key() {
        let dest = Destination {
            host: "10.0.0.5".to_string(),
            user: "deploy".to_string(),
            port: 2222,
            key_path: Some(PathBuf::from("/keys/id_ed25519")),
            connect_timeout: Duration::from_secs(10),
            control_path: PathBuf::from("/tmp/s.sock"),
        };
        let args = dest.base_args();
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/keys/id_ed25519"));
        assert!(args.contains(&"ControlPath=/tmp/s.sock".to_string()));
        assert_eq!(dest.login(), "deploy@10.0.0.5");
    }

    #[test]
    fn wrapper_changes_directory_before_starting_the_session() {
        let wrapped = wrap_remote("make install", Some("/srv/app"), "/tmp/x.pid");
        assert!(wrapped.starts_with("cd '/srv/app' || exit 1; setsid sh -c 'make install' &"));
        assert!(wrapped.contains("echo $p > /tmp/x.pid"));
    }

    /// The wrapper and kill scripts are plain POSIX sh, so they can be
    /// exercised against the local shell without an ssh server.
    #[tokio::test]
    async fn kill_script_takes_down_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("job.pid").display().to_string();

        let mut wrapper = Command::new("sh")
            .arg("-c")
            .arg(wrap_remote("sleep 157; echo x", None, &pid_file))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let mut recorded = false;
        for _ in 0..50 {
            let pid = std::fs::read_to_string(&pid_file).unwrap_or_default();
            let sleeping = std::process::Command::new("pgrep")
                .args(["-f", "^sleep 157"])
                .output()
                .unwrap();
            if !pid.trim().is_empty() && !sleeping.stdout.is_empty() {
                recorded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert!(recorded, "wrapper never started the command");

        let status = Command::new("sh")
            .arg("-c")
            .arg(kill_remote(&pid_file))
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let exit = tokio::time::timeout(Duration::from_secs(5), wrapper.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.code(), Some(137));

        let mut left = Vec::new();
        for _ in 0..50 {
            left = std::process::Command::new("pgrep")
                .args(["-f", "^sleep 157"])
                .output()
                .unwrap()
                .stdout;
            if left.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert!(left.is_empty(), "sleep survived the kill");
        assert!(!std::path::Path::new(&pid_file).exists());
    }
}
