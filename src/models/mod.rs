// 基本的なデータ型と数学ユーティリティ
pub mod common;

// エージェントレコードとグローバル状態テーブル
pub mod record;

// 参加者の基本インターフェース（trait）定義
pub mod traits;

// 各参加者の実装
pub mod observer;
pub mod uav;

// 便利な re-export
pub use common::*;
pub use record::{AgentRecord, AgentRole, GlobalStateTable, Phase};
pub use traits::*;
pub use observer::Observer;
pub use uav::{CollisionOutcome, FlightParameters, UavController};
