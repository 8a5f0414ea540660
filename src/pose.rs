// 该文件是 Maodian （锚点） 项目的一部分。
// src/pose.rs - 世界坐标位姿与相机射线
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 位姿约定：世界坐标系 y 轴向上；相机坐标系中相机朝向 -z，
//! x 向右，y 向上。屏幕坐标以左上角为原点，x 向右，y 向下。

use nalgebra::{Isometry3, Quaternion, Translation3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoseError {
  #[error("位姿包含非有限数值")]
  NonFinite,
  #[error("四元数长度为零")]
  ZeroQuaternion,
  #[error("相机内参无效: fx={fx}, fy={fy}")]
  InvalidIntrinsics { fx: f32, fy: f32 },
}

/// 屏幕（视图）坐标中的一个点
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
  pub x: f32,
  pub y: f32,
}

impl ScreenPoint {
  pub fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }
}

/// 世界坐标系下的位姿，创建后不可变
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PoseRepr", into = "PoseRepr")]
pub struct WorldPose {
  position: Vector3<f32>,
  orientation: UnitQuaternion<f32>,
}

#[derive(Serialize, Deserialize)]
struct PoseRepr {
  position: [f32; 3],
  orientation: [f32; 4],
}

impl WorldPose {
  pub fn new(position: Vector3<f32>, orientation: UnitQuaternion<f32>) -> Self {
    Self {
      position,
      orientation,
    }
  }

  /// 仅平移、无旋转的位姿
  pub fn from_position(position: Vector3<f32>) -> Self {
    Self::new(position, UnitQuaternion::identity())
  }

  pub fn identity() -> Self {
    Self::from_position(Vector3::zeros())
  }

  /// 由 (x,y,z) 与 (qx,qy,qz,qw) 构造，四元数会被归一化
  pub fn from_components(position: [f32; 3], orientation: [f32; 4]) -> Result<Self, PoseError> {
    if position.iter().chain(orientation.iter()).any(|v| !v.is_finite()) {
      return Err(PoseError::NonFinite);
    }
    let [qx, qy, qz, qw] = orientation;
    let quaternion = Quaternion::new(qw, qx, qy, qz);
    if quaternion.norm() <= f32::EPSILON {
      return Err(PoseError::ZeroQuaternion);
    }
    Ok(Self::new(
      Vector3::from(position),
      UnitQuaternion::from_quaternion(quaternion),
    ))
  }

  pub fn position(&self) -> &Vector3<f32> {
    &self.position
  }

  pub fn orientation(&self) -> &UnitQuaternion<f32> {
    &self.orientation
  }

  /// (qx, qy, qz, qw)
  pub fn orientation_xyzw(&self) -> [f32; 4] {
    let q = self.orientation.quaternion();
    [q.i, q.j, q.k, q.w]
  }

  pub fn is_finite(&self) -> bool {
    self.position.iter().all(|v| v.is_finite())
      && self.orientation.coords.iter().all(|v| v.is_finite())
  }

  pub fn distance_to(&self, point: &Vector3<f32>) -> f32 {
    (self.position - point).norm()
  }

  pub fn to_isometry(&self) -> Isometry3<f32> {
    Isometry3::from_parts(Translation3::from(self.position), self.orientation)
  }
}

impl TryFrom<PoseRepr> for WorldPose {
  type Error = PoseError;

  fn try_from(repr: PoseRepr) -> Result<Self, Self::Error> {
    WorldPose::from_components(repr.position, repr.orientation)
  }
}

impl From<WorldPose> for PoseRepr {
  fn from(pose: WorldPose) -> Self {
    PoseRepr {
      position: pose.position.into(),
      orientation: pose.orientation_xyzw(),
    }
  }
}

/// 相机内参，单位为视图像素
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
  pub fx: f32,
  pub fy: f32,
  pub cx: f32,
  pub cy: f32,
}

impl CameraIntrinsics {
  pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Result<Self, PoseError> {
    if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
      return Err(PoseError::InvalidIntrinsics { fx, fy });
    }
    Ok(Self { fx, fy, cx, cy })
  }

  /// 由竖直视场角和视图尺寸推算针孔内参，主点位于视图中心
  pub fn from_vertical_fov(fov_y_degrees: f32, view_width: f32, view_height: f32) -> Result<Self, PoseError> {
    let focal = 0.5 * view_height / (0.5 * fov_y_degrees.to_radians()).tan();
    Self::new(focal, focal, 0.5 * view_width, 0.5 * view_height)
  }
}

/// 某一跟踪帧中的相机
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
  pub pose: WorldPose,
  pub intrinsics: CameraIntrinsics,
}

impl Camera {
  pub fn new(pose: WorldPose, intrinsics: CameraIntrinsics) -> Self {
    Self { pose, intrinsics }
  }

  pub fn position(&self) -> &Vector3<f32> {
    self.pose.position()
  }

  /// 从相机光心穿过屏幕点的世界坐标射线
  pub fn ray_through(&self, point: ScreenPoint) -> Ray {
    let k = &self.intrinsics;
    let local = Vector3::new((point.x - k.cx) / k.fx, -(point.y - k.cy) / k.fy, -1.0);
    let direction = self.pose.orientation() * local;
    Ray {
      origin: *self.pose.position(),
      direction: Unit::new_normalize(direction),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
  pub origin: Vector3<f32>,
  pub direction: Unit<Vector3<f32>>,
}

impl Ray {
  pub fn point_at(&self, distance: f32) -> Vector3<f32> {
    self.origin + self.direction.into_inner() * distance
  }
}
