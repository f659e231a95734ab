use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::common::Position3D as VectorPosition;

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// 実行ティック数（ティック0は初期配置の配布）
    pub ticks: u64,
    pub dt_s: f64,
    pub seed: u64,
    /// 集団通信1回あたりの待機上限（ミリ秒）
    #[serde(default = "default_tick_timeout_ms")]
    pub tick_timeout_ms: u64,
}

fn default_tick_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Position3D {
    pub x_m: f64,
    pub y_m: f64,
    pub z_m: f64,
}

impl Position3D {
    pub fn to_vector(self) -> VectorPosition {
        VectorPosition::new(self.x_m, self.y_m, self.z_m)
    }

    fn is_finite(&self) -> bool {
        self.x_m.is_finite() && self.y_m.is_finite() && self.z_m.is_finite()
    }
}

/// 目標球面設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetSurfaceConfig {
    pub center: Position3D,
    pub radius_m: f64,
    /// 球面到達判定の余裕（radius + margin 以内で到達）
    pub arrival_margin_m: f64,
}

/// UAV性能・制御則パラメータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UavConfig {
    pub mass_kg: f64,
    /// 推力の上限（N）
    pub max_force_n: f64,
    /// 鉛直方向の定常バイアス（重力加速度）
    pub gravity_mps2: f64,
    /// 接近フェーズで加速を続ける速度上限
    pub speed_cap_mps: f64,
    pub collision_threshold_m: f64,
    /// 球面への復元力ゲイン（N/m per kg）
    pub restoring_gain: f64,
    /// 半径方向速度の減衰係数（0で無効）
    #[serde(default)]
    pub radial_damping: f64,
    /// 接線方向の揺らぎの重み
    pub perturbation_weight: f64,
}

/// 格子状の初期配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
    pub spacing_x_m: f64,
    pub spacing_y_m: f64,
    pub center: Position3D,
}

impl GridLayout {
    /// 上段左から行優先で位置を生成
    pub fn positions(&self) -> Vec<Position3D> {
        let half_cols = (self.cols as f64 - 1.0) / 2.0;
        let half_rows = (self.rows as f64 - 1.0) / 2.0;
        let mut positions = Vec::with_capacity(self.rows * self.cols);
        for row in 0..self.rows {
            for col in 0..self.cols {
                positions.push(Position3D {
                    x_m: self.center.x_m + (col as f64 - half_cols) * self.spacing_x_m,
                    y_m: self.center.y_m + (half_rows - row as f64) * self.spacing_y_m,
                    z_m: self.center.z_m,
                });
            }
        }
        positions
    }
}

/// 編隊（初期配置）設定
///
/// `grid` と `positions` のどちらか一方のみを指定します。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FormationConfig {
    /// 観測者（移動しない調整役）の位置
    pub observer: Position3D,
    /// 想定UAV数（指定時は配置数と一致しなければならない）
    #[serde(default)]
    pub uav_count: Option<usize>,
    #[serde(default)]
    pub grid: Option<GridLayout>,
    #[serde(default)]
    pub positions: Option<Vec<Position3D>>,
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub target_surface: TargetSurfaceConfig,
    pub uav: UavConfig,
    pub formation: FormationConfig,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// フットボール場のハーフタイムショー（基準シナリオ）
    ///
    /// 観測者1 + 3×5格子のUAV15機、半径10mの球（中心高度50m）へ集合します。
    pub fn halftime_show() -> Self {
        Self {
            meta: ScenarioMeta {
                version: "1.0".to_string(),
                name: "halftime_show".to_string(),
                description: "15機のUAVがフィールド上空の仮想球に集合し周回する".to_string(),
            },
            sim: SimulationConfig {
                ticks: 600,
                dt_s: 0.1,
                seed: 4122,
                tick_timeout_ms: default_tick_timeout_ms(),
            },
            target_surface: TargetSurfaceConfig {
                center: Position3D { x_m: 0.0, y_m: 0.0, z_m: 50.0 },
                radius_m: 10.0,
                arrival_margin_m: 0.1,
            },
            uav: UavConfig {
                mass_kg: 1.0,
                max_force_n: 20.0,
                gravity_mps2: 10.0,
                speed_cap_mps: 1.8,
                collision_threshold_m: 0.01,
                restoring_gain: 2.0,
                radial_damping: 2.0,
                perturbation_weight: 0.1,
            },
            formation: FormationConfig {
                observer: Position3D { x_m: 0.0, y_m: 0.0, z_m: 0.0 },
                uav_count: Some(15),
                grid: Some(GridLayout {
                    rows: 3,
                    cols: 5,
                    spacing_x_m: 22.86,
                    spacing_y_m: 24.384,
                    center: Position3D { x_m: 0.0, y_m: 0.0, z_m: 0.0 },
                }),
                positions: None,
            },
        }
    }

    /// UAVの初期位置一覧（観測者を除く）
    pub fn uav_positions(&self) -> Vec<Position3D> {
        match (&self.formation.grid, &self.formation.positions) {
            (Some(grid), None) => grid.positions(),
            (None, Some(positions)) => positions.clone(),
            _ => Vec::new(),
        }
    }

    /// 参加者数（観測者 + UAV）
    pub fn participant_count(&self) -> usize {
        1 + self.uav_positions().len()
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let sim = &self.sim;
        if !(sim.dt_s > 0.0 && sim.dt_s.is_finite()) {
            return Err(ScenarioError::ValidationError("dt_s must be positive".to_string()));
        }
        if sim.ticks == 0 {
            return Err(ScenarioError::ValidationError("ticks must be positive".to_string()));
        }
        if sim.tick_timeout_ms == 0 {
            return Err(ScenarioError::ValidationError("tick_timeout_ms must be positive".to_string()));
        }

        let surface = &self.target_surface;
        if !surface.center.is_finite() {
            return Err(ScenarioError::ValidationError("Target center must be finite".to_string()));
        }
        if !(surface.radius_m > 0.0 && surface.radius_m.is_finite()) {
            return Err(ScenarioError::ValidationError("radius_m must be positive".to_string()));
        }
        if !(surface.arrival_margin_m >= 0.0 && surface.arrival_margin_m.is_finite()) {
            return Err(ScenarioError::ValidationError("arrival_margin_m must be non-negative".to_string()));
        }

        let uav = &self.uav;
        if !(uav.mass_kg > 0.0 && uav.mass_kg.is_finite()) {
            return Err(ScenarioError::ValidationError("mass_kg must be positive".to_string()));
        }
        if !(uav.gravity_mps2 >= 0.0 && uav.gravity_mps2.is_finite()) {
            return Err(ScenarioError::ValidationError("gravity_mps2 must be non-negative".to_string()));
        }
        if !(uav.max_force_n.is_finite() && uav.max_force_n / uav.mass_kg > uav.gravity_mps2) {
            return Err(ScenarioError::ValidationError(
                format!("max_force_n {} cannot overcome gravity {} for mass {}",
                        uav.max_force_n, uav.gravity_mps2, uav.mass_kg)
            ));
        }
        if !(uav.speed_cap_mps > 0.0 && uav.speed_cap_mps.is_finite()) {
            return Err(ScenarioError::ValidationError("speed_cap_mps must be positive".to_string()));
        }
        let non_negative = [
            ("collision_threshold_m", uav.collision_threshold_m),
            ("restoring_gain", uav.restoring_gain),
            ("radial_damping", uav.radial_damping),
            ("perturbation_weight", uav.perturbation_weight),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ScenarioError::ValidationError(format!("{} must be non-negative", name)));
            }
        }

        self.validate_formation()
    }

    fn validate_formation(&self) -> Result<(), ScenarioError> {
        let formation = &self.formation;
        if !formation.observer.is_finite() {
            return Err(ScenarioError::ValidationError("Observer position must be finite".to_string()));
        }

        let positions = match (&formation.grid, &formation.positions) {
            (Some(grid), None) => {
                if grid.rows == 0 || grid.cols == 0 {
                    return Err(ScenarioError::ValidationError("Grid must have at least one row and column".to_string()));
                }
                if !(grid.spacing_x_m.is_finite() && grid.spacing_y_m.is_finite() && grid.center.is_finite()) {
                    return Err(ScenarioError::ValidationError("Grid geometry must be finite".to_string()));
                }
                grid.positions()
            }
            (None, Some(positions)) => positions.clone(),
            (Some(_), Some(_)) => {
                return Err(ScenarioError::ValidationError("Specify either formation.grid or formation.positions, not both".to_string()));
            }
            (None, None) => {
                return Err(ScenarioError::ValidationError("Initial layout is missing".to_string()));
            }
        };

        if positions.is_empty() {
            return Err(ScenarioError::ValidationError("Initial layout has no UAVs".to_string()));
        }
        if let Some(index) = positions.iter().position(|p| !p.is_finite()) {
            return Err(ScenarioError::ValidationError(
                format!("Initial position {} is not finite", index)
            ));
        }
        if let Some(expected) = formation.uav_count {
            if expected != positions.len() {
                return Err(ScenarioError::ValidationError(
                    format!("uav_count {} does not match {} initial positions", expected, positions.len())
                ));
            }
        }

        Ok(())
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("ティック数: {}", self.sim.ticks);
        println!("時間刻み: {:.3}秒 (総時間 {:.1}秒)", self.sim.dt_s, self.sim.dt_s * self.sim.ticks as f64);
        println!("シード値: {}", self.sim.seed);
        println!("ティックタイムアウト: {}ms", self.sim.tick_timeout_ms);
        println!();

        println!("=== 目標球面 ===");
        let c = &self.target_surface.center;
        println!("中心: ({:.2}, {:.2}, {:.2})", c.x_m, c.y_m, c.z_m);
        println!("半径: {:.2}m (到達余裕 {:.2}m)", self.target_surface.radius_m, self.target_surface.arrival_margin_m);
        println!();

        println!("=== 編隊 ===");
        println!("参加者数: {} (観測者1 + UAV {}機)", self.participant_count(), self.uav_positions().len());
        println!("質量: {:.2}kg / 最大推力: {:.1}N / 速度上限: {:.2}m/s",
                 self.uav.mass_kg, self.uav.max_force_n, self.uav.speed_cap_mps);
        println!("衝突判定距離: {:.3}m", self.uav.collision_threshold_m);
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::halftime_show()
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),

    #[error("設定検証エラー: {0}")]
    ValidationError(String),
}
