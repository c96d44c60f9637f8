//! App - アプリケーション層
//!
//! ports・store・capture を組み合わせてジョブのライフサイクルを実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: 構築とワイヤリング（起動時検証）
//! - **JobManager**: submit / run / cancel / shutdown / cleanup とクエリ
//! - **JobContext**: handler に渡される collaborators・log sink・progress・cancel

pub mod builder;
pub mod context;
pub mod manager;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::context::{Collaborators, JobContext};
pub use self::manager::{JobManager, MaintenanceReport, ManagerSettings};
