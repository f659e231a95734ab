use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// ゼロ除算を避けるための最小距離（m）
pub const MIN_DISTANCE: f64 = 1e-9;

/// 3次元ベクトル
///
/// 位置・速度・加速度・力のすべてをこの型で表現します。
/// 単位は用途ごとの型エイリアスで区別します。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// 位置（m）
pub type Position3D = Vector3D;
/// 速度（m/s）
pub type Velocity3D = Vector3D;
/// 加速度（m/s²）
pub type Acceleration3D = Vector3D;
/// 力（N）
pub type Force3D = Vector3D;

impl Vector3D {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };
    pub const UNIT_Z: Self = Self { x: 0.0, y: 0.0, z: 1.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// ベクトルの長さ
    pub fn magnitude(&self) -> f64 {
        self.magnitude_squared().sqrt()
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// 3次元距離
    pub fn distance_3d(&self, other: &Vector3D) -> f64 {
        (*self - *other).magnitude()
    }

    pub fn dot(&self, other: &Vector3D) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3D) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// 正規化（長さ0の場合はNone）
    pub fn try_normalize(&self) -> Option<Self> {
        let mag = self.magnitude();
        if mag > MIN_DISTANCE && mag.is_finite() {
            Some(*self / mag)
        } else {
            None
        }
    }

    /// 大きさ制限（最大値でクリップ）
    pub fn clamp_magnitude(&self, max: f64) -> Self {
        let mag = self.magnitude();
        if mag > max {
            *self * (max / mag)
        } else {
            *self
        }
    }

    /// 全成分が有限値かどうか
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vector3D {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl AddAssign for Vector3D {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Vector3D {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f64> for Vector3D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

impl Div<f64> for Vector3D {
    type Output = Self;

    fn div(self, scalar: f64) -> Self::Output {
        Self::new(self.x / scalar, self.y / scalar, self.z / scalar)
    }
}

impl Neg for Vector3D {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// 2次精度オイラー積分
///
/// `p' = p + v·dt + ½·a·dt²`, `v' = v + a·dt`
pub fn integrate(
    position: Position3D,
    velocity: Velocity3D,
    acceleration: Acceleration3D,
    dt: f64,
) -> (Position3D, Velocity3D) {
    let next_position = position + velocity * dt + acceleration * (0.5 * dt * dt);
    let next_velocity = velocity + acceleration * dt;
    (next_position, next_velocity)
}
