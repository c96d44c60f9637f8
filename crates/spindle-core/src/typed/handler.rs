//! Handler trait - JobSpec を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::job_spec::JobSpec;
use crate::app::JobContext;
use crate::domain::{JobError, JobKind, JobParams, Outcome, ValidationError};

/// Handler は params を受け取って Outcome を返す
///
/// `Err` は dispatch 境界で捕捉され、Job の `error` に記録されます。
/// `Ok(Outcome::Failure)` も同じく Failed になります（Completed にはならない）。
///
/// # ジェネリクスによる型安全性
/// - `Handler<RegisterDns>` は `RegisterDns` しか受け取れない
/// - JobKind と params 型の対応はコンパイル時に決まる
#[async_trait]
pub trait Handler<T: JobSpec>: Send + Sync {
    async fn execute(&self, params: T, ctx: &JobContext) -> Result<Outcome, JobError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `HashMap<JobKind, Arc<dyn DynHandler>>` に格納するための型消去層。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn execute_dyn(
        &self,
        params: &JobParams,
        ctx: &JobContext,
    ) -> Result<Outcome, JobError>;

    fn kind(&self) -> JobKind;
}

pub struct TypedHandler<T: JobSpec, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: JobSpec, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: JobSpec, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn execute_dyn(
        &self,
        params: &JobParams,
        ctx: &JobContext,
    ) -> Result<Outcome, JobError> {
        let params = T::from_params(params).map_err(|e| ValidationError::InvalidParams {
            kind: T::KIND,
            reason: e.to_string(),
        })?;
        self.handler.execute(params, ctx).await
    }

    fn kind(&self) -> JobKind {
        T::KIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::JobContext;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        text: String,
        #[serde(default)]
        repeat: Option<u32>,
    }

    impl JobSpec for Echo {
        const KIND: JobKind = JobKind::RemoteExec;
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler<Echo> for EchoHandler {
        async fn execute(&self, params: Echo, _ctx: &JobContext) -> Result<Outcome, JobError> {
            let n = params.repeat.unwrap_or(1) as usize;
            Ok(Outcome::success_with(params.text.repeat(n)))
        }
    }

    #[test]
    fn params_roundtrip_through_the_opaque_map() {
        let params = Echo {
            text: "hi".into(),
            repeat: Some(2),
        }
        .into_params()
        .unwrap();
        assert_eq!(params["text"], "hi");
        let back = Echo::from_params(&params).unwrap();
        assert_eq!(back.repeat, Some(2));
    }

    #[tokio::test]
    async fn typed_handler_decodes_params() {
        let ctx = JobContext::detached(JobKind::RemoteExec);
        let handler = TypedHandler::<Echo, _>::new(EchoHandler);
        let params = Echo {
            text: "ab".into(),
            repeat: Some(3),
        }
        .into_params()
        .unwrap();

        let outcome = handler.execute_dyn(&params, &ctx).await.unwrap();
        assert_eq!(outcome, Outcome::Success(serde_json::json!("ababab")));
        assert_eq!(handler.kind(), JobKind::RemoteExec);
    }

    #[tokio::test]
    async fn bad_params_are_a_validation_error() {
        let ctx = JobContext::detached(JobKind::RemoteExec);
        let handler = TypedHandler::<Echo, _>::new(EchoHandler);
        let mut params = JobParams::new();
        params.insert("text".into(), serde_json::json!(42));

        let err = handler.execute_dyn(&params, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::Validation(ValidationError::InvalidParams {
                kind: JobKind::RemoteExec,
                ..
            })
        ));
    }
}
