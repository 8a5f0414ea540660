// 该文件是 Maodian （锚点） 项目的一部分。
// src/model.rs - 目标检测模型接口
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

use serde::{Deserialize, Serialize};

use crate::frame::{CameraFrame, ImageFrameMeta, Rotation};

const DEFAULT_SCORE_THRESHOLD: f32 = 0.45;
const DEFAULT_MAX_RESULTS: usize = 3;

/// 检测模型。推理在生产者线程上执行，模型本身不感知视图坐标。
pub trait Model {
  type Error: std::fmt::Display;

  fn infer(&self, input: &CameraFrame) -> Result<DetectResult, Self::Error>;
}

/// 按配置创建模型实例。重新配置时创建新实例，不修改旧实例。
pub trait ModelFactory {
  type Model: Model;
  type Error: std::fmt::Display;

  fn create(&self, options: &DetectorOptions) -> Result<Self::Model, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectItem {
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化或像素坐标
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult {
  pub meta: ImageFrameMeta,
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn new(meta: ImageFrameMeta, items: Vec<DetectItem>) -> Self {
    Self {
      meta,
      items: items.into_boxed_slice(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// 按分数阈值过滤，并按分数从高到低保留至多 `max_results` 个
  pub fn filtered(self, options: &DetectorOptions) -> Self {
    let mut items: Vec<DetectItem> = self
      .items
      .into_vec()
      .into_iter()
      .filter(|item| item.score >= options.score_threshold)
      .collect();
    // 稳定排序，同分时保持模型输出顺序
    items.sort_by(|a, b| b.score.total_cmp(&a.score));
    items.truncate(options.max_results);
    Self::new(self.meta, items)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
  #[default]
  Cpu,
  Gpu,
}

/// 检测器配置，由检测器组件独占
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
  pub score_threshold: f32,
  pub max_results: usize,
  pub delegate: Delegate,
  pub rotation: Rotation,
  /// 期望的输入尺寸；`None` 表示接受任意尺寸
  pub input_size: Option<(u32, u32)>,
}

impl Default for DetectorOptions {
  fn default() -> Self {
    Self {
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      max_results: DEFAULT_MAX_RESULTS,
      delegate: Delegate::default(),
      rotation: Rotation::default(),
      input_size: None,
    }
  }
}

impl DetectorOptions {
  /// 帧几何与当前配置是否一致
  pub fn matches(&self, meta: &ImageFrameMeta) -> bool {
    self.rotation == meta.rotation && self.input_size.is_none_or(|size| size == meta.dimensions())
  }

  /// 以新帧几何生成一份新配置
  pub fn reconfigured(&self, meta: &ImageFrameMeta) -> Self {
    Self {
      rotation: meta.rotation,
      input_size: Some(meta.dimensions()),
      ..self.clone()
    }
  }
}
