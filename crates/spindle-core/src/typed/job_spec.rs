//! JobSpec trait - JobKind と params 型を対応付ける
//!
//! # 学習ポイント
//! - Associated Constants (`const KIND`)
//! - Trait bounds の組み合わせ (DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{JobKind, JobParams};

/// JobSpec は handler が受け取る params 型
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct RegisterDns {
///     zone: String,
///     name: String,
///     value: String,
/// }
///
/// impl JobSpec for RegisterDns {
///     const KIND: JobKind = JobKind::RegisterDns;
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: `into_params` で submit 用の `JobParams` を作るため
/// - `DeserializeOwned`: 永続化された `JobParams` から復元するため
/// - `Send + Sync + 'static`: handler task に move できるため
pub trait JobSpec: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: JobKind;

    /// Encode into the opaque params map stored on the job.
    ///
    /// Non-object encodings produce an empty map.
    fn into_params(&self) -> Result<JobParams, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Ok(JobParams::new()),
        }
    }

    /// Decode from the params map stored on the job.
    fn from_params(params: &JobParams) -> Result<Self, serde_json::Error> {
        let object: serde_json::Map<String, serde_json::Value> =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(serde_json::Value::Object(object))
    }
}
