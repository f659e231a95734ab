use std::sync::Arc;

use crate::error::ControllerError;
use crate::models::record::{AgentRecord, AgentRole, GlobalStateTable};

/// 集団交換に参加する全ての実行単位が実装する基本インターフェース
///
/// 参加者は自分のスロット（`rank`）のレコードだけを書き、
/// テーブルの他のスロットは読み取り専用として扱います。
pub trait IParticipant: Send {
    /// 参加者番号（テーブルのインデックス）
    fn rank(&self) -> usize;

    /// 参加者の役割
    fn role(&self) -> AgentRole;

    /// ティック0で配布する初期レコード
    fn seed_record(&self) -> AgentRecord;

    /// 前ティックの確定テーブルから次ティックの自レコードを計算
    fn next_record(&mut self, table: &GlobalStateTable) -> Result<AgentRecord, ControllerError>;

    /// 新しいテーブルが確定したときの通知
    fn on_commit(&mut self, _table: &Arc<GlobalStateTable>) {}

    /// 目標球面に到達したティック（未到達・非移動体はNone）
    fn arrival_tick(&self) -> Option<u64> {
        None
    }
}
