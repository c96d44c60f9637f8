//! JobKind - ジョブ種別（どの handler が実行するか）
//!
//! 文字列キーの dispatch table ではなく、閉じた enum として定義します。
//! 新しい種別の追加は variant + handler 登録のみで、JobManager の変更は不要です。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ProvisionHost,
    ConfigureHost,
    DeployStack,
    DeployApp,
    RemoteExec,
    RegisterDns,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::ProvisionHost,
        JobKind::ConfigureHost,
        JobKind::DeployStack,
        JobKind::DeployApp,
        JobKind::RemoteExec,
        JobKind::RegisterDns,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::ProvisionHost => "provision-host",
            JobKind::ConfigureHost => "configure-host",
            JobKind::DeployStack => "deploy-stack",
            JobKind::DeployApp => "deploy-app",
            JobKind::RemoteExec => "remote-exec",
            JobKind::RegisterDns => "register-dns",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for JobKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_form_roundtrips_for_every_kind() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn unknown_string_is_rejected() {
        let err = "launch-rocket".parse::<JobKind>().unwrap_err();
        assert_eq!(err, UnknownKind("launch-rocket".to_string()));
    }
}
