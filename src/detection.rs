// 该文件是 Maodian （锚点） 项目的一部分。
// src/detection.rs - 检测结果缓冲区
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

use std::sync::Arc;

use tracing::debug;

use crate::{
  frame::ImageFrameMeta,
  model::DetectResult,
  pose::ScreenPoint,
  transform::{TransformMode, ViewRect, ViewSize, map_rect},
};

/// 视图坐标下的检测框
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
  pub label: String,
  pub score: f32,
}

impl DetectionBox {
  pub fn from_rect(rect: ViewRect, label: impl Into<String>, score: f32) -> Self {
    Self {
      left: rect.left,
      top: rect.top,
      right: rect.right,
      bottom: rect.bottom,
      label: label.into(),
      score,
    }
  }

  /// 边界上的点也算在框内
  pub fn contains(&self, point: ScreenPoint) -> bool {
    point.x >= self.left && point.x <= self.right && point.y >= self.top && point.y <= self.bottom
  }

  pub fn center(&self) -> ScreenPoint {
    ScreenPoint::new((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
  }

  /// 叠加层上显示的标签文本
  pub fn caption(&self) -> String {
    format!("{} {:.2}", self.label, self.score)
  }
}

/// 一批检测框及其来源图像的几何信息
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBatch {
  pub meta: Option<ImageFrameMeta>,
  pub boxes: Box<[DetectionBox]>,
}

impl DetectionBatch {
  pub fn empty() -> Self {
    Self {
      meta: None,
      boxes: Box::new([]),
    }
  }

  pub fn new(meta: ImageFrameMeta, boxes: Vec<DetectionBox>) -> Self {
    Self {
      meta: Some(meta),
      boxes: boxes.into_boxed_slice(),
    }
  }

  /// 将模型输出映射为视图坐标；图像坐标不会离开这里
  pub fn from_result(result: &DetectResult, view: ViewSize, mode: TransformMode) -> Self {
    let meta = result.meta;
    let boxes = result
      .items
      .iter()
      .map(|item| {
        let rect = map_rect(
          mode,
          item.bbox,
          meta.image_width,
          meta.image_height,
          meta.rotation,
          view,
        );
        DetectionBox::from_rect(rect, item.label.clone(), item.score)
      })
      .collect();
    Self::new(meta, boxes)
  }

  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }
}

/// 最新一批检测框。整批替换，读者拿到的要么是旧批次，要么是新批次。
#[derive(Debug)]
pub struct DetectionFrameBuffer {
  current: Arc<DetectionBatch>,
}

impl Default for DetectionFrameBuffer {
  fn default() -> Self {
    Self::new()
  }
}

impl DetectionFrameBuffer {
  pub fn new() -> Self {
    Self {
      current: Arc::new(DetectionBatch::empty()),
    }
  }

  pub fn replace(&mut self, meta: ImageFrameMeta, detections: Vec<DetectionBox>) {
    self.replace_batch(DetectionBatch::new(meta, detections));
  }

  pub fn replace_batch(&mut self, batch: DetectionBatch) {
    debug!("替换检测批次: {} -> {} 个检测框", self.current.len(), batch.len());
    self.current = Arc::new(batch);
  }

  /// 按插入顺序返回第一个包含该点的检测框
  pub fn hit_test(&self, point: ScreenPoint) -> Option<&DetectionBox> {
    self.current.boxes.iter().find(|b| b.contains(point))
  }

  /// 当前批次的快照，之后的 `replace` 不影响已取得的快照
  pub fn snapshot(&self) -> Arc<DetectionBatch> {
    Arc::clone(&self.current)
  }

  pub fn iter(&self) -> DetectionIter {
    DetectionIter {
      batch: self.snapshot(),
      index: 0,
    }
  }

  pub fn meta(&self) -> Option<ImageFrameMeta> {
    self.current.meta
  }

  pub fn len(&self) -> usize {
    self.current.len()
  }

  pub fn is_empty(&self) -> bool {
    self.current.is_empty()
  }
}

/// 遍历某一批次的检测框，遍历结束后不可重新开始
#[derive(Debug)]
pub struct DetectionIter {
  batch: Arc<DetectionBatch>,
  index: usize,
}

impl Iterator for DetectionIter {
  type Item = DetectionBox;

  fn next(&mut self) -> Option<Self::Item> {
    let item = self.batch.boxes.get(self.index)?.clone();
    self.index += 1;
    Some(item)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.batch.boxes.len().saturating_sub(self.index);
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for DetectionIter {}
