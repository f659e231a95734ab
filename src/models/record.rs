use std::fmt;
use std::ops::Index;

use crate::models::common::{Position3D, Velocity3D};

/// エージェントの行動フェーズ
///
/// `Approaching` → `OnTargetSurface` の一方向遷移のみ許されます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// 目標球面へ接近中（初期状態）
    Approaching,
    /// 目標球面上を周回中（終端状態）
    OnTargetSurface,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Approaching => write!(f, "APPROACHING"),
            Phase::OnTargetSurface => write!(f, "ON_TARGET_SURFACE"),
        }
    }
}

/// 参加者の役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// 移動しない調整役兼観測者（衝突判定の対象外）
    Observer,
    /// 移動するUAV
    Uav,
}

/// 1エージェント分の状態レコード
///
/// テーブル内のインデックスがエージェントの識別子になります。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentRecord {
    pub position: Position3D,
    pub velocity: Velocity3D,
    pub phase: Phase,
    pub role: AgentRole,
}

impl AgentRecord {
    pub fn uav(position: Position3D) -> Self {
        Self {
            position,
            velocity: Velocity3D::ZERO,
            phase: Phase::Approaching,
            role: AgentRole::Uav,
        }
    }

    pub fn observer(position: Position3D) -> Self {
        Self {
            position,
            velocity: Velocity3D::ZERO,
            phase: Phase::Approaching,
            role: AgentRole::Observer,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }

    /// 表示用の1行（`index,phase,x,y,z`）
    pub fn to_frame_line(&self, index: usize) -> String {
        format!(
            "{},{},{:.6},{:.6},{:.6}",
            index, self.phase, self.position.x, self.position.y, self.position.z
        )
    }
}

/// 全エージェントの確定済みスナップショット
///
/// 1ティックにつき1回、集団交換によって丸ごと作り直されます。
/// 作成後は不変で、参加者間では `Arc` で共有します。
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalStateTable {
    tick: u64,
    records: Vec<AgentRecord>,
}

impl GlobalStateTable {
    pub fn new(tick: u64, records: Vec<AgentRecord>) -> Self {
        Self { tick, records }
    }

    /// このテーブルが確定したティック
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AgentRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[AgentRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &AgentRecord)> {
        self.records.iter().enumerate()
    }

    /// 球面上にいるUAVの数
    pub fn count_on_surface(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.role == AgentRole::Uav && r.phase == Phase::OnTargetSurface)
            .count()
    }
}

impl Index<usize> for GlobalStateTable {
    type Output = AgentRecord;

    fn index(&self, index: usize) -> &Self::Output {
        &self.records[index]
    }
}
