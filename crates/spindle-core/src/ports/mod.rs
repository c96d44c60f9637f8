//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（ファイル、クラウド API、SSH など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//! handler はこれらを `JobContext` 経由で呼び出します。

pub mod catalog;
pub mod clock;
pub mod id_generator;
pub mod job_repository;
pub mod provider;
pub mod transport;

pub use self::catalog::{AppCatalog, CatalogError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_repository::{JobRepository, StoreError};
pub use self::provider::{
    ComputeProvider, DnsProvider, Instance, InstanceSpec, ProviderError, StackDefinition,
    StackDeployer, StackOutcome,
};
pub use self::transport::{
    CredentialStore, Credentials, OutputStream, ProcessControl, RemoteProcess, RemoteSession,
    Transport, TransportError,
};
