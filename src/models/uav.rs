use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, trace};

use crate::error::ControllerError;
use crate::models::{
    common::{integrate, Acceleration3D, Force3D, Position3D, Vector3D, Velocity3D, MIN_DISTANCE},
    record::{AgentRecord, AgentRole, GlobalStateTable, Phase},
    traits::IParticipant,
};
use crate::scenario::ScenarioConfig;

/// UAVの飛行パラメータ
///
/// シナリオから実行開始時に一度だけ取り出され、実行中は変化しません。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightParameters {
    /// 時間刻み（秒）
    pub dt: f64,
    /// 目標球面の中心
    pub center: Position3D,
    /// 目標球面の半径（m）
    pub radius: f64,
    /// 到達判定の余裕（m）
    pub arrival_margin: f64,
    /// 質量（kg）
    pub mass: f64,
    /// 推力上限（N）
    pub max_force: f64,
    /// 鉛直下向きの定常加速度（m/s²）
    pub gravity: f64,
    /// 接近中に加速を続ける速度上限（m/s）
    pub speed_cap: f64,
    /// 衝突判定距離（m）
    pub collision_threshold: f64,
    /// 復元力ゲイン
    pub restoring_gain: f64,
    /// 半径方向の減衰係数
    pub radial_damping: f64,
    /// 接線方向揺らぎの重み（N）
    pub perturbation_weight: f64,
}

impl FlightParameters {
    pub fn from_scenario(scenario: &ScenarioConfig) -> Self {
        let uav = &scenario.uav;
        let surface = &scenario.target_surface;
        Self {
            dt: scenario.sim.dt_s,
            center: surface.center.to_vector(),
            radius: surface.radius_m,
            arrival_margin: surface.arrival_margin_m,
            mass: uav.mass_kg,
            max_force: uav.max_force_n,
            gravity: uav.gravity_mps2,
            speed_cap: uav.speed_cap_mps,
            collision_threshold: uav.collision_threshold_m,
            restoring_gain: uav.restoring_gain,
            radial_damping: uav.radial_damping,
            perturbation_weight: uav.perturbation_weight,
        }
    }

    /// 到達判定距離（radius + ε）
    pub fn arrival_distance(&self) -> f64 {
        self.radius + self.arrival_margin
    }

    /// 接近フェーズの加速度の大きさ
    ///
    /// 推力 `T/m = a·dir + g·ẑ` の大きさが `F_max/m` になる `a` を求めます。
    /// `a² + 2·g·dir_z·a − (F_max²/m² − g²) = 0` の正の解です。
    pub fn approach_acceleration_magnitude(&self, dir_z: f64) -> f64 {
        let max_accel = self.max_force / self.mass;
        let b = 2.0 * self.gravity * dir_z;
        let c = -(max_accel * max_accel - self.gravity * self.gravity);
        (-b + (b * b - 4.0 * c).sqrt()) / 2.0
    }
}

/// 衝突解決の結果
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionOutcome {
    /// 解決後の自機速度
    pub velocity: Velocity3D,
    /// 衝突相手（昇順）
    pub partners: Vec<usize>,
}

/// 凍結スナップショットに対する衝突解決
///
/// 判定距離以内の各UAVと速度を交換します（等質量の弾性衝突）。
/// 交換はインデックス昇順に、スナップショット上の相手速度を受け取る形で
/// 適用されるため、複数同時衝突では最後の相手の速度になります。
/// 結果は参加者の実行順序に依存しません。
pub fn resolve_collisions(table: &GlobalStateTable, rank: usize, threshold: f64) -> CollisionOutcome {
    let Some(own) = table.get(rank) else {
        return CollisionOutcome { velocity: Velocity3D::ZERO, partners: Vec::new() };
    };

    let mut velocity = own.velocity;
    let mut partners = Vec::new();
    if own.role != AgentRole::Uav {
        return CollisionOutcome { velocity, partners };
    }

    for (index, other) in table.iter() {
        if index == rank || other.role != AgentRole::Uav {
            continue;
        }
        if own.position.distance_3d(&other.position) <= threshold {
            velocity = other.velocity;
            partners.push(index);
        }
    }

    CollisionOutcome { velocity, partners }
}

/// 全エージェントについて衝突解決した速度を計算
pub fn resolve_all_collisions(table: &GlobalStateTable, threshold: f64) -> Vec<Velocity3D> {
    (0..table.len())
        .map(|rank| resolve_collisions(table, rank, threshold).velocity)
        .collect()
}

/// 目標中心方向の単位ベクトルと距離
///
/// 距離は `MIN_DISTANCE` で下限を取ってから除算します。
fn direction_to_center(params: &FlightParameters, position: Position3D) -> (Vector3D, f64) {
    let to_center = params.center - position;
    let distance = to_center.magnitude();
    (to_center / distance.max(MIN_DISTANCE), distance)
}

/// 接近フェーズの加速度
///
/// 速度上限以下なら中心方向へ全加速、上限超過なら等速で惰性飛行します。
pub fn approach_acceleration(
    params: &FlightParameters,
    position: Position3D,
    velocity: Velocity3D,
) -> Acceleration3D {
    let (direction, _) = direction_to_center(params, position);
    if velocity.magnitude() <= params.speed_cap {
        direction * params.approach_acceleration_magnitude(direction.z)
    } else {
        Acceleration3D::ZERO
    }
}

/// 半径方向に直交する接線単位ベクトル
///
/// 外積で作った直交基底 (u, w) を2つの乱数 s, t で合成します。
/// 合成結果が退化した場合はNone。
pub fn tangential_direction(radial: Vector3D, s: f64, t: f64) -> Option<Vector3D> {
    let radial = radial.try_normalize()?;
    let helper = if radial.z.abs() < 0.9 { Vector3D::UNIT_Z } else { Vector3D::new(1.0, 0.0, 0.0) };
    let u = radial.cross(&helper).try_normalize()?;
    let w = radial.cross(&u);
    (u * s + w * t).try_normalize()
}

/// 球面周回フェーズの加速度
///
/// 復元力・半径方向減衰・接線方向の揺らぎを合成し、
/// 浮上用の鉛直バイアスを加えた推力を上限でクリップします。
pub fn loiter_acceleration<R: Rng>(
    params: &FlightParameters,
    position: Position3D,
    velocity: Velocity3D,
    rng: &mut R,
) -> Acceleration3D {
    let (direction, distance) = direction_to_center(params, position);

    let restoring = direction * (params.restoring_gain * (distance - params.radius) * params.mass);
    let damping = direction * (-params.radial_damping * velocity.dot(&direction) * params.mass);

    let s = rng.random_range(-1.0..=1.0);
    let t = rng.random_range(-1.0..=1.0);
    let perturbation = match tangential_direction(direction, s, t) {
        Some(tangent) => tangent * params.perturbation_weight,
        None => {
            trace!(s, t, "接線方向の揺らぎが退化したため省略");
            Force3D::ZERO
        }
    };

    let hover = Vector3D::UNIT_Z * (params.gravity * params.mass);
    let thrust = (restoring + damping + perturbation + hover).clamp_magnitude(params.max_force);

    thrust / params.mass - Vector3D::UNIT_Z * params.gravity
}

/// UAV制御器
///
/// 1機分のレコードを所有し、毎ティック前ティックの確定テーブルを読んで
/// 衝突解決 → フェーズ判定 → 運動更新 の順に次レコードを計算します。
#[derive(Debug)]
pub struct UavController {
    rank: usize,
    initial: AgentRecord,
    params: FlightParameters,
    rng: StdRng,
    arrival_tick: Option<u64>,
}

impl UavController {
    /// 新しいUAV制御器を作成します
    ///
    /// 乱数系列はシナリオのシード値と参加者番号から決まります。
    pub fn new(rank: usize, initial_position: Position3D, scenario: &ScenarioConfig) -> Self {
        Self::with_parameters(
            rank,
            AgentRecord::uav(initial_position),
            FlightParameters::from_scenario(scenario),
            scenario.sim.seed.wrapping_add(rank as u64),
        )
    }

    pub fn with_parameters(rank: usize, initial: AgentRecord, params: FlightParameters, seed: u64) -> Self {
        Self {
            rank,
            initial,
            params,
            rng: StdRng::seed_from_u64(seed),
            arrival_tick: None,
        }
    }

    pub fn parameters(&self) -> &FlightParameters {
        &self.params
    }
}

impl IParticipant for UavController {
    fn rank(&self) -> usize {
        self.rank
    }

    fn role(&self) -> AgentRole {
        AgentRole::Uav
    }

    fn seed_record(&self) -> AgentRecord {
        self.initial
    }

    fn next_record(&mut self, table: &GlobalStateTable) -> Result<AgentRecord, ControllerError> {
        let tick = table.tick() + 1;
        let current = *table.get(self.rank).ok_or(ControllerError::MissingSlot {
            rank: self.rank,
            len: table.len(),
        })?;

        // 1. 衝突解決（運動計算より先）
        let collision = resolve_collisions(table, self.rank, self.params.collision_threshold);
        if !collision.partners.is_empty() {
            debug!(
                uav = self.rank,
                tick,
                partners = ?collision.partners,
                velocity_before = ?current.velocity,
                velocity_after = ?collision.velocity,
                "UAV_COLLISION: 速度を交換しました"
            );
        }
        let velocity = collision.velocity;

        // 2. フェーズ判定（遷移したティックで周回則を適用）
        let mut phase = current.phase;
        let distance = current.position.distance_3d(&self.params.center);
        if phase == Phase::Approaching && distance <= self.params.arrival_distance() {
            phase = Phase::OnTargetSurface;
            self.arrival_tick = Some(tick);
            info!(
                uav = self.rank,
                tick,
                distance_to_center = distance,
                position_x = current.position.x,
                position_y = current.position.y,
                position_z = current.position.z,
                speed = velocity.magnitude(),
                "UAV_PHASE_TRANSITION: 目標球面に到達しました"
            );
        }

        // 3. 運動更新
        let acceleration = match phase {
            Phase::Approaching => approach_acceleration(&self.params, current.position, velocity),
            Phase::OnTargetSurface => {
                loiter_acceleration(&self.params, current.position, velocity, &mut self.rng)
            }
        };
        let (position, velocity) = integrate(current.position, velocity, acceleration, self.params.dt);

        let next = AgentRecord {
            position,
            velocity,
            phase,
            role: AgentRole::Uav,
        };

        if !next.is_finite() {
            error!(
                uav = self.rank,
                tick,
                position = ?next.position,
                velocity = ?next.velocity,
                "UAV_NON_FINITE: 状態が非有限値になりました"
            );
            return Err(ControllerError::NonFinite { rank: self.rank, tick });
        }

        Ok(next)
    }

    fn arrival_tick(&self) -> Option<u64> {
        self.arrival_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FlightParameters {
        FlightParameters::from_scenario(&ScenarioConfig::halftime_show())
    }

    fn uav_at(position: Position3D, velocity: Velocity3D) -> AgentRecord {
        AgentRecord { velocity, ..AgentRecord::uav(position) }
    }

    #[test]
    fn test_approach_magnitude_matches_reference_constants() {
        let p = params();
        for dir_z in [-1.0, -0.3, 0.0, 0.5, 1.0] {
            let expected = (-20.0 * dir_z + (400.0 * dir_z * dir_z + 1200.0_f64).sqrt()) / 2.0;
            assert!((p.approach_acceleration_magnitude(dir_z) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_approach_thrust_respects_force_cap() {
        let p = params();
        let dir = Vector3D::new(0.6, 0.0, 0.8);
        let a = p.approach_acceleration_magnitude(dir.z);
        let thrust_per_mass = dir * a + Vector3D::UNIT_Z * p.gravity;
        assert!((thrust_per_mass.magnitude() - p.max_force / p.mass).abs() < 1e-9);
    }

    #[test]
    fn test_head_on_pair_swaps_velocities() {
        let position = Position3D::new(5.0, 5.0, 0.0);
        let table = GlobalStateTable::new(
            0,
            vec![
                uav_at(position, Velocity3D::new(1.0, 0.0, 0.0)),
                uav_at(position, Velocity3D::new(-1.0, 0.0, 0.0)),
            ],
        );
        let resolved = resolve_all_collisions(&table, 0.01);
        assert_eq!(resolved[0], Velocity3D::new(-1.0, 0.0, 0.0));
        assert_eq!(resolved[1], Velocity3D::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_collision_symmetry_is_exact() {
        let a = uav_at(Position3D::new(1.0, 2.0, 3.0), Velocity3D::new(0.123456789, -7.5, 1e-7));
        let b = uav_at(Position3D::new(1.004, 2.0, 3.0), Velocity3D::new(-3.3, 0.1, 42.0));
        let far = uav_at(Position3D::new(100.0, 0.0, 0.0), Velocity3D::new(9.0, 9.0, 9.0));
        let table = GlobalStateTable::new(4, vec![a, b, far]);
        let resolved = resolve_all_collisions(&table, 0.01);
        assert_eq!(resolved[0], b.velocity);
        assert_eq!(resolved[1], a.velocity);
        assert_eq!(resolved[2], far.velocity);
    }

    #[test]
    fn test_no_collision_is_noop() {
        let table = GlobalStateTable::new(
            0,
            vec![
                uav_at(Position3D::new(0.0, 0.0, 0.0), Velocity3D::new(1.0, 0.0, 0.0)),
                uav_at(Position3D::new(1.0, 0.0, 0.0), Velocity3D::new(-1.0, 0.0, 0.0)),
            ],
        );
        let once = resolve_all_collisions(&table, 0.01);
        let records: Vec<AgentRecord> = table
            .records()
            .iter()
            .zip(&once)
            .map(|(r, v)| AgentRecord { velocity: *v, ..*r })
            .collect();
        let twice = resolve_all_collisions(&GlobalStateTable::new(0, records), 0.01);
        assert_eq!(once, vec![Velocity3D::new(1.0, 0.0, 0.0), Velocity3D::new(-1.0, 0.0, 0.0)]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_multiple_collisions_take_highest_index_partner() {
        let p = Position3D::new(0.0, 0.0, 0.0);
        let table = GlobalStateTable::new(
            0,
            vec![
                uav_at(p, Velocity3D::new(1.0, 0.0, 0.0)),
                uav_at(p, Velocity3D::new(0.0, 1.0, 0.0)),
                uav_at(p, Velocity3D::new(0.0, 0.0, 1.0)),
            ],
        );
        let outcome = resolve_collisions(&table, 0, 0.01);
        assert_eq!(outcome.partners, vec![1, 2]);
        assert_eq!(outcome.velocity, Velocity3D::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_observer_slot_is_ignored() {
        let p = Position3D::ZERO;
        let table = GlobalStateTable::new(
            0,
            vec![
                AgentRecord::observer(p),
                uav_at(p, Velocity3D::new(2.0, 0.0, 0.0)),
            ],
        );
        let outcome = resolve_collisions(&table, 1, 0.01);
        assert!(outcome.partners.is_empty());
        assert_eq!(outcome.velocity, Velocity3D::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_tangential_direction_is_orthogonal_unit() {
        for radial in [Vector3D::new(0.0, 0.0, 1.0), Vector3D::new(1.0, 2.0, -0.5), Vector3D::new(0.0, -1.0, 0.0)] {
            let tangent = tangential_direction(radial, 0.3, -0.8).unwrap();
            assert!((tangent.magnitude() - 1.0).abs() < 1e-12);
            assert!(tangent.dot(&radial).abs() < 1e-12);
        }
        assert_eq!(tangential_direction(Vector3D::new(1.0, 0.0, 0.0), 0.0, 0.0), None);
        assert_eq!(tangential_direction(Vector3D::ZERO, 1.0, 1.0), None);
    }

    #[test]
    fn test_loiter_at_center_stays_finite() {
        let p = params();
        let mut rng = StdRng::seed_from_u64(1);
        let acceleration = loiter_acceleration(&p, p.center, Velocity3D::ZERO, &mut rng);
        assert!(acceleration.is_finite());
        assert!((acceleration + Vector3D::UNIT_Z * p.gravity).magnitude() <= p.max_force / p.mass + 1e-9);
    }

    #[test]
    fn test_transition_runs_loiter_in_same_tick() {
        let p = params();
        let on_edge = p.center + Vector3D::new(p.radius + 0.05, 0.0, 0.0);
        let mut controller = UavController::with_parameters(1, AgentRecord::uav(on_edge), p, 3);
        let table = GlobalStateTable::new(10, vec![AgentRecord::observer(Position3D::ZERO), AgentRecord::uav(on_edge)]);
        let next = controller.next_record(&table).unwrap();
        assert_eq!(next.phase, Phase::OnTargetSurface);
        assert_eq!(controller.arrival_tick(), Some(11));
        // 周回則は中心方向へ戻すので、接近則の全加速より小さい
        assert!(next.velocity.magnitude() < 0.5);
    }

    #[test]
    fn test_missing_slot_is_reported() {
        let mut controller = UavController::with_parameters(5, AgentRecord::uav(Position3D::ZERO), params(), 0);
        let table = GlobalStateTable::new(0, vec![AgentRecord::observer(Position3D::ZERO)]);
        assert_eq!(
            controller.next_record(&table),
            Err(ControllerError::MissingSlot { rank: 5, len: 1 })
        );
    }

    #[test]
    fn test_non_finite_record_is_rejected() {
        let mut controller = UavController::with_parameters(1, AgentRecord::uav(Position3D::ZERO), params(), 0);
        let broken = uav_at(Position3D::new(f64::NAN, 0.0, 0.0), Velocity3D::ZERO);
        let table = GlobalStateTable::new(7, vec![AgentRecord::observer(Position3D::ZERO), broken]);
        assert_eq!(
            controller.next_record(&table),
            Err(ControllerError::NonFinite { rank: 1, tick: 8 })
        );
    }

    /// 単機を直接回す（集団交換なし）
    fn fly_alone(controller: &mut UavController, table: &mut GlobalStateTable) -> AgentRecord {
        let next = controller.next_record(table).unwrap();
        *table = GlobalStateTable::new(table.tick() + 1, vec![AgentRecord::observer(Position3D::ZERO), next]);
        next
    }

    #[test]
    fn test_approach_converges_then_flips_once() {
        let p = params();
        let start = p.center + Vector3D::new(0.0, 50.0, 0.0);
        let mut controller = UavController::with_parameters(1, AgentRecord::uav(start), p, 11);
        let mut table = GlobalStateTable::new(0, vec![AgentRecord::observer(Position3D::ZERO), AgentRecord::uav(start)]);

        let mut previous_distance = start.distance_3d(&p.center);
        let mut flips = 0;
        let mut phase = Phase::Approaching;
        for _ in 0..600 {
            let next = fly_alone(&mut controller, &mut table);
            if next.phase != phase {
                flips += 1;
                phase = next.phase;
            }
            if phase == Phase::Approaching {
                let distance = next.position.distance_3d(&p.center);
                assert!(distance < previous_distance);
                previous_distance = distance;
            }
        }
        assert_eq!(flips, 1);
        assert_eq!(phase, Phase::OnTargetSurface);
        // 2ティック加速して約3.46m/sで惰性飛行、残り約39.9mで118ティック前後
        let arrival = controller.arrival_tick().unwrap();
        assert!(arrival > 100 && arrival < 140, "arrival at {}", arrival);
    }

    #[test]
    fn test_distance_50_reaches_surface_and_stays_in_band() {
        let p = params();
        let start = p.center + Vector3D::new(30.0, -40.0, 0.0);
        assert!((start.distance_3d(&p.center) - 50.0).abs() < 1e-9);
        let mut controller = UavController::with_parameters(1, AgentRecord::uav(start), p, 99);
        let mut table = GlobalStateTable::new(0, vec![AgentRecord::observer(Position3D::ZERO), AgentRecord::uav(start)]);

        let mut ticks = 0;
        while controller.arrival_tick().is_none() {
            fly_alone(&mut controller, &mut table);
            ticks += 1;
            assert!(ticks < 600, "never reached the surface");
        }

        for _ in 0..500 {
            let next = fly_alone(&mut controller, &mut table);
            assert_eq!(next.phase, Phase::OnTargetSurface);
            let distance = next.position.distance_3d(&p.center);
            assert!((distance - p.radius).abs() < 2.5, "drifted to {}", distance);
        }
    }
}
