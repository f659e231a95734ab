use std::sync::Arc;

use tracing::info;

use crate::error::ControllerError;
use crate::models::{
    common::Position3D,
    record::{AgentRecord, AgentRole, GlobalStateTable},
    traits::IParticipant,
};
use crate::presentation::FramePublisher;

/// 観測者（調整役）エージェント
///
/// 移動せず、毎ティック同じレコードで集団交換に参加します。
/// 確定したテーブルを表示側へ配信し、進行状況をログに出します。
#[derive(Debug)]
pub struct Observer {
    rank: usize,
    record: AgentRecord,
    total_ticks: u64,
    publisher: Option<FramePublisher>,
}

impl Observer {
    pub fn new(rank: usize, position: Position3D, total_ticks: u64) -> Self {
        Self {
            rank,
            record: AgentRecord::observer(position),
            total_ticks,
            publisher: None,
        }
    }

    /// 表示側への配信口を設定
    pub fn with_publisher(mut self, publisher: FramePublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }
}

impl IParticipant for Observer {
    fn rank(&self) -> usize {
        self.rank
    }

    fn role(&self) -> AgentRole {
        AgentRole::Observer
    }

    fn seed_record(&self) -> AgentRecord {
        self.record
    }

    fn next_record(&mut self, _table: &GlobalStateTable) -> Result<AgentRecord, ControllerError> {
        Ok(self.record)
    }

    fn on_commit(&mut self, table: &Arc<GlobalStateTable>) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(Arc::clone(table));
        }

        let tick = table.tick();
        if tick > 0 && tick % 100 == 0 {
            let progress = (tick as f64 / self.total_ticks as f64) * 100.0;
            info!(
                "進行状況: {:.1}% (ティック {}/{}, 球面上 {}機)",
                progress,
                tick,
                self.total_ticks,
                table.count_on_surface()
            );
        }
    }
}
