//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **FileJobRepository** / **InMemoryJobRepository**: ジョブ集合の永続化
//! - **LocalTransport** / **SshTransport**: リモートコマンドのセッション
//! - **StaticCatalog**: アプリケーションカタログ
//! - **StaticCredentials**: ターゲットごとの接続情報
//!
//! クラウド API（compute / stack / DNS）の実装は別クレートに置きます。

pub mod file_repository;
pub mod inmem_repository;
pub mod local_transport;
pub mod ssh_transport;
pub mod static_catalog;
pub mod static_credentials;

pub use self::file_repository::FileJobRepository;
pub use self::inmem_repository::InMemoryJobRepository;
pub use self::local_transport::LocalTransport;
pub use self::ssh_transport::SshTransport;
pub use self::static_catalog::StaticCatalog;
pub use self::static_credentials::StaticCredentials;
