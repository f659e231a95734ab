//! # Simulation モジュール
//!
//! UAV編隊シミュレーションのティック駆動部を提供します。
//!
//! 中央のシミュレーションプロセスは存在せず、各エージェントの状態は
//! それぞれの参加者（tokioタスク）が所有します。全参加者はロックステップで
//! 進み、毎ティックの集団交換で全員が同じスナップショットを共有します。
//!
//! ## ティック処理順序
//!
//! 各参加者は、各ティックにおいて以下の順序で処理を実行します：
//!
//! 1. **自レコード計算**: 前ティックの確定テーブルから次レコードを計算
//!    （ティック0のみ初期配置をそのまま使用）
//! 2. **バリア**: 全参加者の到達を待機
//! 3. **状態交換**: 自レコードを提出し、全員分のテーブルを受け取る
//! 4. **確定**: 受け取ったテーブルを採用し、前ティックのテーブルを破棄
//!
//! ## 使用例
//!
//! ```no_run
//! use formation::scenario::ScenarioConfig;
//! use formation::simulation::SimulationEngine;
//!
//! let config = ScenarioConfig::from_file("scenarios/halftime_show.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! let report = engine.run()?;
//! report.print_summary();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::collective::{CollectiveGroup, Contribution};
use crate::error::SimulationError;
use crate::models::{
    record::{AgentRecord, GlobalStateTable, Phase},
    traits::IParticipant,
    Observer, UavController,
};
use crate::presentation::{frame_channel, PresentationFeed, TextRenderer};
use crate::scenario::ScenarioConfig;

/// 1参加者の実行結果
#[derive(Debug, Clone)]
pub struct ParticipantOutcome {
    pub rank: usize,
    pub final_table: Arc<GlobalStateTable>,
    pub arrival_tick: Option<u64>,
}

/// シミュレーション結果
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub ticks_completed: u64,
    pub final_table: Arc<GlobalStateTable>,
    /// 参加者ごとの球面到達ティック
    pub arrival_ticks: Vec<Option<u64>>,
    pub elapsed: Duration,
}

impl SimulationReport {
    pub fn on_surface(&self) -> usize {
        self.final_table.count_on_surface()
    }

    /// 結果の概要を表示
    pub fn print_summary(&self) {
        println!("=== シミュレーション結果 ===");
        println!("実行ティック数: {}", self.ticks_completed);
        println!("実行時間: {:.3}秒", self.elapsed.as_secs_f64());
        println!("球面上のUAV: {}機", self.on_surface());
        println!();
        println!("=== 最終状態 ===");
        for (index, record) in self.final_table.iter() {
            let arrival = match self.arrival_ticks.get(index).copied().flatten() {
                Some(tick) => format!("到達ティック {}", tick),
                None => "-".to_string(),
            };
            println!("  {} ({})", record.to_frame_line(index), arrival);
        }
    }
}

/// 1参加者分のティックループ
///
/// どの参加者も全ティックでバリアと状態交換を1回ずつ呼び出します。
/// 自分の計算に失敗した場合も故障として交換に参加し、全員を同じティックで
/// 停止させます。
pub async fn drive_participant(
    mut participant: Box<dyn IParticipant>,
    group: Arc<CollectiveGroup>,
    ticks: u64,
) -> Result<ParticipantOutcome, SimulationError> {
    let rank = participant.rank();
    let mut table: Option<Arc<GlobalStateTable>> = None;

    for tick in 0..ticks {
        let contribution = match &table {
            None => Contribution::Record(participant.seed_record()),
            Some(previous) => match participant.next_record(previous) {
                Ok(record) => Contribution::Record(record),
                Err(err) => {
                    error!(rank, tick, error = %err, "PARTICIPANT_FAULT: 参加者が故障しました");
                    Contribution::Fault(err.to_string())
                }
            },
        };

        group.barrier(rank, tick).await?;
        let committed = group.exchange(rank, tick, contribution).await?;
        participant.on_commit(&committed);
        table = Some(committed);
    }

    let final_table = table.ok_or(SimulationError::NotInitialized)?;
    debug!(rank, "参加者のティックループが完了しました");
    Ok(ParticipantOutcome {
        rank,
        final_table,
        arrival_tick: participant.arrival_tick(),
    })
}

/// 全参加者を1タスクずつ起動し、完了を待つ
///
/// 結果は参加者番号順に並びます。いずれかが失敗した場合は最小番号の
/// エラーを返します。全員の最終テーブルが一致しない場合もエラーです。
pub async fn run_participants(
    participants: Vec<Box<dyn IParticipant>>,
    ticks: u64,
    tick_timeout: Duration,
) -> Result<Vec<ParticipantOutcome>, SimulationError> {
    if participants.is_empty() || ticks == 0 {
        return Err(SimulationError::NotInitialized);
    }

    let group = CollectiveGroup::shared(participants.len(), tick_timeout);
    let handles: Vec<(usize, JoinHandle<Result<ParticipantOutcome, SimulationError>>)> = participants
        .into_iter()
        .map(|participant| {
            let rank = participant.rank();
            (rank, tokio::spawn(drive_participant(participant, Arc::clone(&group), ticks)))
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (rank, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(SimulationError::Join {
                rank,
                message: join_error.to_string(),
            }),
        };
        results.push((rank, result));
    }
    results.sort_by_key(|(rank, _)| *rank);

    let mut outcomes = Vec::with_capacity(results.len());
    for (_, result) in results {
        outcomes.push(result?);
    }

    let reference = &outcomes[0].final_table;
    if let Some(diverged) = outcomes.iter().find(|o| *o.final_table != **reference) {
        return Err(SimulationError::Diverged { rank: diverged.rank });
    }

    Ok(outcomes)
}

/// シミュレーションエンジン
pub struct SimulationEngine {
    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
    pub render_every: u64,

    initial_table: Option<GlobalStateTable>,
    participants: Vec<Box<dyn IParticipant>>,
    feed: Option<PresentationFeed>,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        Self {
            scenario_config: scenario,
            verbose_level,
            render_every: 0,
            initial_table: None,
            participants: Vec::new(),
            feed: None,
        }
    }

    /// N ティックごとにフレームを標準出力へ描画（0で描画しない）
    pub fn with_render_every(mut self, every: u64) -> Self {
        self.render_every = every;
        self
    }

    /// 設定を検証し、初期テーブルと参加者を構築
    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        self.scenario_config.validate()?;

        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        let (publisher, feed) = frame_channel();
        let observer_position = self.scenario_config.formation.observer.to_vector();
        let observer = Observer::new(0, observer_position, self.scenario_config.sim.ticks)
            .with_publisher(publisher);

        let mut records = vec![observer.seed_record()];
        let mut participants: Vec<Box<dyn IParticipant>> = vec![Box::new(observer)];

        for (index, position) in self.scenario_config.uav_positions().into_iter().enumerate() {
            let rank = index + 1;
            let controller = UavController::new(rank, position.to_vector(), &self.scenario_config);
            records.push(controller.seed_record());
            participants.push(Box::new(controller));

            if self.verbose_level > 1 {
                debug!(
                    "UAV初期化: {} (位置: {:.2}, {:.2}, {:.2})",
                    rank, position.x_m, position.y_m, position.z_m
                );
            }
        }

        if self.verbose_level > 0 {
            info!("初期化完了:");
            info!("  観測者: 1");
            info!("  UAV: {}機", participants.len() - 1);
        }

        self.initial_table = Some(GlobalStateTable::new(0, records));
        self.participants = participants;
        self.feed = Some(feed);
        Ok(())
    }

    /// 初期配置テーブル（初期化後のみ）
    pub fn initial_table(&self) -> Option<&GlobalStateTable> {
        self.initial_table.as_ref()
    }

    /// 表示側の受信口（初期化後のみ）
    pub fn presentation_feed(&self) -> Option<PresentationFeed> {
        self.feed.clone()
    }

    /// マルチスレッドランタイム上でシミュレーションを実行
    pub fn run(&mut self) -> Result<SimulationReport, SimulationError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()?;
        runtime.block_on(self.run_async())
    }

    /// 実行中のランタイム上でシミュレーションを実行
    pub async fn run_async(&mut self) -> Result<SimulationReport, SimulationError> {
        let participants = std::mem::take(&mut self.participants);
        if participants.is_empty() {
            return Err(SimulationError::NotInitialized);
        }

        let ticks = self.scenario_config.sim.ticks;
        let tick_timeout = Duration::from_millis(self.scenario_config.sim.tick_timeout_ms);

        info!("=== シミュレーション実行開始 ===");
        info!("参加者数: {} / ティック数: {}", participants.len(), ticks);

        let renderer = match (&self.feed, self.render_every) {
            (Some(feed), every) if every > 0 => {
                Some(tokio::spawn(TextRenderer::new(every).run(feed.clone())))
            }
            _ => None,
        };

        let started = Instant::now();
        let result = run_participants(participants, ticks, tick_timeout).await;

        if let Some(renderer) = renderer {
            if let Ok(rendered) = renderer.await {
                debug!(rendered, "描画フレーム数");
            }
        }

        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(err) => {
                error!(error = %err, "シミュレーションを停止しました");
                return Err(err);
            }
        };

        let final_table = Arc::clone(&outcomes[0].final_table);
        let report = SimulationReport {
            ticks_completed: final_table.tick() + 1,
            arrival_ticks: outcomes.iter().map(|o| o.arrival_tick).collect(),
            final_table,
            elapsed: started.elapsed(),
        };

        info!("=== シミュレーション完了 ===");
        info!("総ティック数: {}", report.ticks_completed);
        info!("球面上のUAV: {}機", report.on_surface());

        Ok(report)
    }
}

/// テーブル列のフェーズ単調性を検査（到達後に接近へ戻ったエージェントを返す）
pub fn find_phase_regression(tables: &[Arc<GlobalStateTable>]) -> Option<(usize, u64)> {
    for window in tables.windows(2) {
        let (before, after) = (&window[0], &window[1]);
        for (index, record) in after.iter() {
            let previous: Option<&AgentRecord> = before.get(index);
            if previous.map(|p| p.phase) == Some(Phase::OnTargetSurface)
                && record.phase == Phase::Approaching
            {
                return Some((index, after.tick()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollectiveError, ControllerError};
    use crate::models::common::{Position3D, Velocity3D};
    use crate::models::record::AgentRole;
    use crate::scenario::Position3D as ScenarioPosition;
    use std::sync::Mutex;

    /// 確定テーブルを全て記録する観測用参加者
    struct Recorder {
        rank: usize,
        record: AgentRecord,
        tables: Arc<Mutex<Vec<Arc<GlobalStateTable>>>>,
    }

    impl IParticipant for Recorder {
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
            self.tables.lock().unwrap().push(Arc::clone(table));
        }
    }

    /// 指定ティックで故障する参加者
    struct Faulty {
        rank: usize,
        fail_at: u64,
    }

    impl IParticipant for Faulty {
        fn rank(&self) -> usize {
            self.rank
        }

        fn role(&self) -> AgentRole {
            AgentRole::Uav
        }

        fn seed_record(&self) -> AgentRecord {
            AgentRecord::uav(Position3D::new(100.0, 0.0, 0.0))
        }

        fn next_record(&mut self, table: &GlobalStateTable) -> Result<AgentRecord, ControllerError> {
            let tick = table.tick() + 1;
            if tick == self.fail_at {
                Err(ControllerError::NonFinite { rank: self.rank, tick })
            } else {
                Ok(table[self.rank])
            }
        }
    }

    fn recorder(rank: usize) -> (Recorder, Arc<Mutex<Vec<Arc<GlobalStateTable>>>>) {
        let tables = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            rank,
            record: AgentRecord::observer(Position3D::new(0.0, 0.0, -(rank as f64))),
            tables: Arc::clone(&tables),
        };
        (recorder, tables)
    }

    fn small_scenario(ticks: u64) -> ScenarioConfig {
        let mut config = ScenarioConfig::halftime_show();
        config.sim.ticks = ticks;
        config.formation.grid = None;
        config.formation.uav_count = None;
        config.formation.positions = Some(vec![
            ScenarioPosition { x_m: 0.0, y_m: 20.0, z_m: 50.0 },
            ScenarioPosition { x_m: 0.0, y_m: -20.0, z_m: 50.0 },
            ScenarioPosition { x_m: 15.0, y_m: 0.0, z_m: 30.0 },
        ]);
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_views_are_identical_and_phases_monotonic() {
        let config = small_scenario(400);
        let (first, first_tables) = recorder(0);
        let (second, second_tables) = recorder(4);

        let mut participants: Vec<Box<dyn IParticipant>> = vec![Box::new(first)];
        for (index, position) in config.uav_positions().into_iter().enumerate() {
            participants.push(Box::new(UavController::new(index + 1, position.to_vector(), &config)));
        }
        participants.push(Box::new(second));

        let outcomes = run_participants(participants, 400, Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcomes.len(), 5);

        let first_tables = first_tables.lock().unwrap().clone();
        let second_tables = second_tables.lock().unwrap().clone();
        assert_eq!(first_tables.len(), 400);
        for (a, b) in first_tables.iter().zip(&second_tables) {
            assert_eq!(**a, **b);
        }
        assert_eq!(find_phase_regression(&first_tables), None);

        // 3機とも到達し、到達ティック以降は球面上に留まる
        for rank in 1..=3 {
            let arrival = outcomes[rank].arrival_tick.expect("UAV should reach the surface");
            assert_eq!(first_tables[arrival as usize][rank].phase, Phase::OnTargetSurface);
            assert_eq!(first_tables[arrival as usize - 1][rank].phase, Phase::Approaching);
        }
    }

    #[tokio::test]
    async fn test_fault_stops_every_participant() {
        let (observer, tables) = recorder(0);
        let participants: Vec<Box<dyn IParticipant>> = vec![
            Box::new(observer),
            Box::new(Faulty { rank: 1, fail_at: 5 }),
        ];
        let err = run_participants(participants, 50, Duration::from_secs(5)).await.unwrap_err();
        match err {
            SimulationError::Collective(CollectiveError::PeerFault { rank, tick, .. }) => {
                assert_eq!(rank, 1);
                assert_eq!(tick, 5);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // ティック0〜4までしか確定していない
        assert_eq!(tables.lock().unwrap().len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_engine_run_is_reproducible() {
        let mut reports = Vec::new();
        for _ in 0..2 {
            let mut engine = SimulationEngine::new(small_scenario(300), 0);
            engine.initialize().unwrap();
            assert_eq!(engine.initial_table().map(|t| t.len()), Some(4));
            reports.push(engine.run_async().await.unwrap());
        }
        assert_eq!(*reports[0].final_table, *reports[1].final_table);
        assert_eq!(reports[0].arrival_ticks, reports[1].arrival_ticks);
        assert_eq!(reports[0].ticks_completed, 300);
        assert_eq!(reports[0].arrival_ticks[0], None);
        assert_eq!(reports[0].final_table[0].role, AgentRole::Observer);
    }

    #[tokio::test]
    async fn test_engine_requires_initialize() {
        let mut engine = SimulationEngine::new(small_scenario(10), 0);
        assert!(matches!(engine.run_async().await, Err(SimulationError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_presentation_feed_receives_last_frame() {
        let mut engine = SimulationEngine::new(small_scenario(20), 0);
        engine.initialize().unwrap();
        let feed = engine.presentation_feed().unwrap();
        engine.run_async().await.unwrap();
        let last = feed.latest().unwrap();
        assert_eq!(last.tick(), 19);
        assert_eq!(last.len(), 4);
    }

    #[test]
    fn test_phase_regression_detected() {
        let mut on = AgentRecord::uav(Position3D::ZERO);
        on.phase = Phase::OnTargetSurface;
        let back = AgentRecord { velocity: Velocity3D::ZERO, ..AgentRecord::uav(Position3D::ZERO) };
        let tables = vec![
            Arc::new(GlobalStateTable::new(0, vec![on])),
            Arc::new(GlobalStateTable::new(1, vec![back])),
        ];
        assert_eq!(find_phase_regression(&tables), Some((0, 1)));
    }
}
