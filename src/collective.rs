//! # Collective モジュール
//!
//! 全参加者が毎ティック1回ずつ呼び出す集団通信（バリアと状態交換）を提供します。
//!
//! ## 提供する操作
//!
//! - [`CollectiveGroup::barrier`]: 全参加者が同じティックのバリアに到達するまで待機
//! - [`CollectiveGroup::exchange`]: 各参加者が自レコードを1件ずつ提出し、
//!   参加者番号順に連結した同一のテーブルを全員が受け取る
//!
//! ## 一貫性
//!
//! 交換スロットはティックの偶奇で二重化されています。ティック t の読み出しは
//! ティック t+1 のバリアより前に必ず完了するため、ティック t+2 の書き込みと
//! 衝突することはありません。全参加者は同じスロット内容から自分のテーブルを
//! 組み立てるので、受け取るテーブルはビット単位で一致します。
//!
//! ## 故障時の挙動
//!
//! 待機は設定されたタイムアウトで打ち切られ、未到達の参加者番号を添えて
//! [`CollectiveError::Timeout`] を返します。故障を提出した参加者がいる場合は、
//! 全員が同じ [`CollectiveError::PeerFault`] を受け取り同じティックで停止します。
//! 再試行はしません。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Barrier;
use tracing::{trace, warn};

use crate::error::CollectiveError;
use crate::models::record::{AgentRecord, GlobalStateTable};

/// 状態交換で提出する内容
#[derive(Debug, Clone, PartialEq)]
pub enum Contribution {
    /// 次ティックの自レコード
    Record(AgentRecord),
    /// 計算に失敗した（理由付き）
    Fault(String),
}

#[derive(Debug, Clone)]
struct Slot {
    tick: u64,
    contribution: Contribution,
}

#[derive(Debug)]
struct GroupState {
    barrier_arrivals: Vec<Option<u64>>,
    slots: [Vec<Option<Slot>>; 2],
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Barrier,
    Exchange,
}

/// 固定メンバーの集団通信グループ
#[derive(Debug)]
pub struct CollectiveGroup {
    size: usize,
    timeout: Duration,
    barrier: Barrier,
    state: Mutex<GroupState>,
}

impl CollectiveGroup {
    pub fn new(size: usize, timeout: Duration) -> Self {
        Self {
            size,
            timeout,
            barrier: Barrier::new(size),
            state: Mutex::new(GroupState {
                barrier_arrivals: vec![None; size],
                slots: [vec![None; size], vec![None; size]],
            }),
        }
    }

    pub fn shared(size: usize, timeout: Duration) -> Arc<Self> {
        Arc::new(Self::new(size, timeout))
    }

    /// 参加者数
    pub fn size(&self) -> usize {
        self.size
    }

    /// 全参加者がティック `tick` のバリアに到達するまで待機
    pub async fn barrier(&self, rank: usize, tick: u64) -> Result<(), CollectiveError> {
        self.check_rank(rank)?;
        self.lock()?.barrier_arrivals[rank] = Some(tick);
        self.wait(rank, tick, Stage::Barrier).await
    }

    /// 自レコードを提出し、全参加者分を番号順に連結したテーブルを受け取る
    pub async fn exchange(
        &self,
        rank: usize,
        tick: u64,
        contribution: Contribution,
    ) -> Result<Arc<GlobalStateTable>, CollectiveError> {
        self.check_rank(rank)?;
        let parity = (tick % 2) as usize;
        self.lock()?.slots[parity][rank] = Some(Slot { tick, contribution });

        self.wait(rank, tick, Stage::Exchange).await?;

        let state = self.lock()?;
        let mut records = Vec::with_capacity(self.size);
        for (index, slot) in state.slots[parity].iter().enumerate() {
            match slot {
                Some(Slot { tick: found, contribution }) if *found == tick => match contribution {
                    Contribution::Record(record) => records.push(*record),
                    Contribution::Fault(reason) => {
                        return Err(CollectiveError::PeerFault {
                            rank: index,
                            tick,
                            reason: reason.clone(),
                        });
                    }
                },
                other => {
                    return Err(CollectiveError::TickMismatch {
                        tick,
                        rank: index,
                        found: other.as_ref().map(|s| s.tick),
                    });
                }
            }
        }

        trace!(rank, tick, "状態交換完了");
        Ok(Arc::new(GlobalStateTable::new(tick, records)))
    }

    async fn wait(&self, rank: usize, tick: u64, stage: Stage) -> Result<(), CollectiveError> {
        match tokio::time::timeout(self.timeout, self.barrier.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                let missing = self.missing(stage, tick)?;
                warn!(
                    rank,
                    tick,
                    stage = ?stage,
                    missing = ?missing,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "COLLECTIVE_TIMEOUT: 集団通信の待機がタイムアウトしました"
                );
                Err(CollectiveError::Timeout {
                    tick,
                    rank,
                    missing,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// 指定ティックに到達していない参加者番号
    fn missing(&self, stage: Stage, tick: u64) -> Result<Vec<usize>, CollectiveError> {
        let state = self.lock()?;
        let missing = match stage {
            Stage::Barrier => state
                .barrier_arrivals
                .iter()
                .enumerate()
                .filter(|(_, arrived)| **arrived != Some(tick))
                .map(|(index, _)| index)
                .collect(),
            Stage::Exchange => state.slots[(tick % 2) as usize]
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.as_ref().map(|s| s.tick) != Some(tick))
                .map(|(index, _)| index)
                .collect(),
        };
        Ok(missing)
    }

    fn check_rank(&self, rank: usize) -> Result<(), CollectiveError> {
        if rank < self.size {
            Ok(())
        } else {
            Err(CollectiveError::RankOutOfRange { rank, size: self.size })
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, GroupState>, CollectiveError> {
        self.state.lock().map_err(|_| CollectiveError::Poisoned)
    }
}
