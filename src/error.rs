//! # Error モジュール
//!
//! シミュレーション実行中に発生するエラーの分類を提供します。
//!
//! - **プロトコルエラー** ([`CollectiveError`]): 参加者が集団呼び出しに
//!   到達しない、故障を報告した、ティックがずれた等。実行全体を停止します。
//! - **数値エラー** ([`ControllerError`]): 非有限値（NaN/∞）の検出。
//! - **設定エラー** ([`crate::scenario::ScenarioError`]): ティック0より前に検出。
//!
//! 同期モデルのため再試行は行いません。

use thiserror::Error;

use crate::scenario::ScenarioError;

/// 集団通信（バリア・状態交換）のエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollectiveError {
    #[error("ティック{tick}: 参加者{rank}が{timeout_ms}ms待機してタイムアウトしました（未到達: {missing:?}）")]
    Timeout {
        tick: u64,
        rank: usize,
        missing: Vec<usize>,
        timeout_ms: u64,
    },

    #[error("ティック{tick}: 参加者{rank}が故障を報告しました: {reason}")]
    PeerFault {
        rank: usize,
        tick: u64,
        reason: String,
    },

    #[error("ティック{tick}: スロット{rank}のレコードはティック{found:?}のものです")]
    TickMismatch {
        tick: u64,
        rank: usize,
        found: Option<u64>,
    },

    #[error("参加者番号{rank}はグループ（{size}参加者）の範囲外です")]
    RankOutOfRange { rank: usize, size: usize },

    #[error("集団通信スロットのロックが汚染されています")]
    Poisoned,
}

/// エージェント制御器のエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    #[error("ティック{tick}: エージェント{rank}の状態が非有限値になりました")]
    NonFinite { rank: usize, tick: u64 },

    #[error("エージェント{rank}のスロットがテーブル（{len}件）に存在しません")]
    MissingSlot { rank: usize, len: usize },
}

/// シミュレーション全体のエラー
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Collective(#[from] CollectiveError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("参加者{rank}の最終テーブルが参加者0と一致しません")]
    Diverged { rank: usize },

    #[error("参加者{rank}のタスクが異常終了しました: {message}")]
    Join { rank: usize, message: String },

    #[error("シミュレーションエンジンが初期化されていません")]
    NotInitialized,

    #[error("非同期ランタイムの構築に失敗しました: {0}")]
    Runtime(#[from] std::io::Error),
}
