//! # formation
//!
//! 仮想球面へ集合して周回するUAV編隊の分散シミュレーションです。
//!
//! 各UAVの状態はそれぞれの参加者が所有し、毎ティックのバリアと
//! 状態交換（all-gather）で全参加者が同一のスナップショットを共有します。

pub mod collective;
pub mod error;
pub mod logging;
pub mod models;
pub mod presentation;
pub mod scenario;
pub mod simulation;
