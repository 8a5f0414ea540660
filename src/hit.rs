// 该文件是 Maodian （锚点） 项目的一部分。
// src/hit.rs - 屏幕点到世界位姿的命中解析链
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

//! 命中解析按优先级依次尝试：
//!
//! 1. 命中点位于平面多边形内的平面命中
//! 2. 深度点命中
//! 3. 即时放置点命中
//! 4. 任意类型的第一个命中
//! 5. 没有任何命中时，沿相机射线在固定深度处合成位姿

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
  pose::{Camera, ScreenPoint, WorldPose},
  tracking::{HitResult, Trackable, TrackingError, TrackingFrame, TrackingSession},
};

const DEFAULT_FALLBACK_DEPTH: f32 = 0.7;

/// 解析得到位姿的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
  Plane,
  DepthPoint,
  InstantPlacement,
  AnyHit,
  RayFallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
  pub pose: WorldPose,
  pub source: HitSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
  /// 回退时沿射线放置的深度（米）
  pub fallback_depth: f32,
  /// 是否采用深度点命中；跟踪端不支持深度时应关闭
  pub depth_hits: bool,
}

impl Default for ResolverConfig {
  fn default() -> Self {
    Self {
      fallback_depth: DEFAULT_FALLBACK_DEPTH,
      depth_hits: true,
    }
  }
}

/// 一条解析策略：判定条件 + 位姿提取
#[derive(Clone, Copy)]
struct Strategy {
  source: HitSource,
  accepts: fn(&HitResult) -> bool,
  extract: fn(&HitResult) -> WorldPose,
}

fn hit_pose(hit: &HitResult) -> WorldPose {
  hit.pose
}

const PLANE: Strategy = Strategy {
  source: HitSource::Plane,
  accepts: HitResult::in_plane_polygon,
  extract: hit_pose,
};

const DEPTH_POINT: Strategy = Strategy {
  source: HitSource::DepthPoint,
  accepts: |hit| matches!(hit.trackable, Trackable::DepthPoint),
  extract: hit_pose,
};

const INSTANT_PLACEMENT: Strategy = Strategy {
  source: HitSource::InstantPlacement,
  accepts: |hit| matches!(hit.trackable, Trackable::InstantPlacement),
  extract: hit_pose,
};

const ANY_HIT: Strategy = Strategy {
  source: HitSource::AnyHit,
  accepts: |_| true,
  extract: hit_pose,
};

#[derive(Clone)]
pub struct HitResolver {
  config: ResolverConfig,
  strategies: Vec<Strategy>,
}

impl std::fmt::Debug for HitResolver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let order: Vec<HitSource> = self.strategies.iter().map(|s| s.source).collect();
    f.debug_struct("HitResolver")
      .field("config", &self.config)
      .field("order", &order)
      .finish()
  }
}

impl Default for HitResolver {
  fn default() -> Self {
    Self::new(ResolverConfig::default())
  }
}

impl HitResolver {
  pub fn new(config: ResolverConfig) -> Self {
    let mut strategies = vec![PLANE];
    if config.depth_hits {
      strategies.push(DEPTH_POINT);
    }
    strategies.push(INSTANT_PLACEMENT);
    strategies.push(ANY_HIT);
    Self { config, strategies }
  }

  pub fn config(&self) -> &ResolverConfig {
    &self.config
  }

  /// 策略的尝试顺序
  pub fn order(&self) -> Vec<HitSource> {
    self.strategies.iter().map(|s| s.source).collect()
  }

  /// 从跟踪会话取当前帧并解析；跟踪不可用时不产生位姿
  pub fn resolve<T: TrackingSession + ?Sized>(
    &self,
    session: &T,
    point: ScreenPoint,
  ) -> Result<Resolution, TrackingError> {
    let frame = session.current_frame()?;
    Ok(self.resolve_frame(session, &frame, point))
  }

  pub fn resolve_frame<T: TrackingSession + ?Sized>(
    &self,
    session: &T,
    frame: &TrackingFrame,
    point: ScreenPoint,
  ) -> Resolution {
    let hits = session.hit_test(frame, point.x, point.y);
    self.resolve_hits(&hits, point, &frame.camera, self.config.fallback_depth)
  }

  /// 在给定命中列表上执行解析链，第一个满足条件的策略胜出
  pub fn resolve_hits(
    &self,
    hits: &[HitResult],
    point: ScreenPoint,
    camera: &Camera,
    fallback_depth: f32,
  ) -> Resolution {
    debug!("屏幕点 ({:.1}, {:.1}) 命中 {} 个结果", point.x, point.y, hits.len());
    let chosen = self
      .strategies
      .iter()
      .find_map(|strategy| hits.iter().find(|hit| (strategy.accepts)(hit)).map(|hit| (strategy, hit)));

    match chosen {
      Some((strategy, hit)) => {
        debug!("采用 {:?} 命中，距离 {:.2} 米", strategy.source, hit.distance);
        Resolution {
          pose: (strategy.extract)(hit),
          source: strategy.source,
        }
      }
      None => {
        let pose = ray_fallback(point, camera, fallback_depth);
        info!(
          "无命中结果，沿相机射线在 {:.2} 米处放置: {:?}",
          fallback_depth,
          pose.position()
        );
        Resolution {
          pose,
          source: HitSource::RayFallback,
        }
      }
    }
  }
}

/// 沿相机穿过屏幕点的射线，在 `depth` 米处放置无旋转的位姿
pub fn ray_fallback(point: ScreenPoint, camera: &Camera, depth: f32) -> WorldPose {
  let ray = camera.ray_through(point);
  WorldPose::from_position(ray.point_at(depth))
}
