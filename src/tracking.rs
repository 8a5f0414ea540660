// 该文件是 Maodian （锚点） 项目的一部分。
// src/tracking.rs - AR 跟踪与场景渲染接口
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

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pose::{Camera, WorldPose};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingError {
  #[error("跟踪不可用，当前没有可用的帧")]
  TrackingUnavailable,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnchorError {
  #[error("创建锚点失败: {0}")]
  AnchorCreationFailed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
  #[error("挂载场景节点失败: {0}")]
  AttachFailed(String),
  #[error("渲染端已断开")]
  Disconnected,
}

/// 跟踪系统当前的一帧
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingFrame {
  pub id: u64,
  pub camera: Camera,
}

/// 被命中的可跟踪对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trackable {
  /// 有边界的平面；多边形在平面局部坐标系的 (x, z) 平面内
  Plane { center: WorldPose, polygon: Vec<[f32; 2]> },
  /// 深度估计得到的点
  DepthPoint,
  /// 跟踪尚未收敛时的即时放置点，置信度低
  InstantPlacement,
  /// 其它类型，例如特征点
  Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitResult {
  pub trackable: Trackable,
  pub pose: WorldPose,
  /// 到相机的距离（米）
  pub distance: f32,
}

impl HitResult {
  /// 命中点是否落在平面多边形之内；非平面命中返回 false
  pub fn in_plane_polygon(&self) -> bool {
    match &self.trackable {
      Trackable::Plane { center, polygon } => {
        let local = center.to_isometry().inverse_transform_point(&(*self.pose.position()).into());
        point_in_polygon(local.x, local.z, polygon)
      }
      _ => false,
    }
  }
}

/// 偶奇规则的点在多边形内判定
fn point_in_polygon(x: f32, z: f32, polygon: &[[f32; 2]]) -> bool {
  if polygon.len() < 3 {
    return false;
  }
  let mut inside = false;
  let mut j = polygon.len() - 1;
  for i in 0..polygon.len() {
    let [xi, zi] = polygon[i];
    let [xj, zj] = polygon[j];
    if (zi > z) != (zj > z) && x < (xj - xi) * (z - zi) / (zj - zi) + xi {
      inside = !inside;
    }
    j = i;
  }
  inside
}

/// 跟踪系统中锚点的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorHandle(pub u64);

/// AR 跟踪会话。只在持有会话的线程上调用。
pub trait TrackingSession {
  fn current_frame(&self) -> Result<TrackingFrame, TrackingError>;

  /// 按距离从近到远返回命中结果
  fn hit_test(&self, frame: &TrackingFrame, x: f32, y: f32) -> Vec<HitResult>;

  fn camera_pose(&self) -> Result<WorldPose, TrackingError> {
    Ok(self.current_frame()?.camera.pose)
  }

  fn create_anchor(&mut self, pose: &WorldPose) -> Result<AnchorHandle, AnchorError>;

  fn is_depth_supported(&self) -> bool;
}

/// 渲染节点的所有权标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle(pub u64);

/// 挂到锚点上的标记内容
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerContent {
  pub label: String,
  pub position: Vector3<f32>,
}

/// 异步挂载的完成通知
#[derive(Debug)]
pub struct Attachment {
  rx: Receiver<Result<SceneHandle, SceneError>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentState {
  Pending,
  Attached(SceneHandle),
  Failed(SceneError),
}

impl Attachment {
  pub fn channel() -> (Sender<Result<SceneHandle, SceneError>>, Self) {
    let (tx, rx) = mpsc::channel();
    (tx, Self { rx })
  }

  pub fn ready(result: Result<SceneHandle, SceneError>) -> Self {
    let (tx, attachment) = Self::channel();
    let _ = tx.send(result);
    attachment
  }

  /// 非阻塞地查询挂载状态
  pub fn poll(&self) -> AttachmentState {
    match self.rx.try_recv() {
      Ok(Ok(handle)) => AttachmentState::Attached(handle),
      Ok(Err(e)) => AttachmentState::Failed(e),
      Err(TryRecvError::Empty) => AttachmentState::Pending,
      Err(TryRecvError::Disconnected) => AttachmentState::Failed(SceneError::Disconnected),
    }
  }
}

/// 场景渲染端。挂载是异步的，调用方不等待完成。
pub trait SceneRenderer {
  fn attach_node(&mut self, anchor: AnchorHandle, content: MarkerContent) -> Attachment;
}

#[cfg(test)]
mod tests {
  use super::*;
  use nalgebra::UnitQuaternion;
  use std::f32::consts::FRAC_PI_2;

  fn square() -> Vec<[f32; 2]> {
    vec![[-0.5, -0.5], [0.5, -0.5], [0.5, 0.5], [-0.5, 0.5]]
  }

  fn plane_hit(center: WorldPose, at: Vector3<f32>) -> HitResult {
    HitResult {
      trackable: Trackable::Plane {
        center,
        polygon: square(),
      },
      pose: WorldPose::from_position(at),
      distance: 1.0,
    }
  }

  #[test]
  fn polygon_containment_in_plane_frame() {
    let floor = WorldPose::from_position(Vector3::new(0.0, -1.0, -2.0));
    assert!(plane_hit(floor, Vector3::new(0.2, -1.0, -2.3)).in_plane_polygon());
    assert!(!plane_hit(floor, Vector3::new(0.8, -1.0, -2.0)).in_plane_polygon());
  }

  #[test]
  fn polygon_containment_follows_plane_rotation() {
    // 竖直的墙面：平面法线朝 +z，局部 z 轴对应世界 -y
    let tilt = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2);
    let wall = WorldPose::new(Vector3::new(0.0, 0.0, -3.0), tilt);
    assert!(plane_hit(wall, Vector3::new(0.1, -0.4, -3.0)).in_plane_polygon());
    assert!(!plane_hit(wall, Vector3::new(0.1, -0.7, -3.0)).in_plane_polygon());
  }

  #[test]
  fn degenerate_polygon_contains_nothing() {
    assert!(!point_in_polygon(0.0, 0.0, &[[0.0, 0.0], [1.0, 1.0]]));
  }

  #[test]
  fn attachment_reports_progress() {
    let (tx, attachment) = Attachment::channel();
    assert_eq!(attachment.poll(), AttachmentState::Pending);
    tx.send(Ok(SceneHandle(3))).unwrap();
    assert_eq!(attachment.poll(), AttachmentState::Attached(SceneHandle(3)));
    drop(tx);
    assert_eq!(attachment.poll(), AttachmentState::Failed(SceneError::Disconnected));
  }

  #[test]
  fn hit_result_json_is_tagged() {
    let hit = HitResult {
      trackable: Trackable::DepthPoint,
      pose: WorldPose::identity(),
      distance: 0.5,
    };
    let json = serde_json::to_value(&hit).unwrap();
    assert_eq!(json["trackable"]["kind"], "depth_point");
  }
}
