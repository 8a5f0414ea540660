// 该文件是 Maodian （锚点） 项目的一部分。
// src/frame.rs - 相机帧与图像几何描述
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

const RGBA_CHANNELS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
  #[error("不支持的旋转角度: {0}")]
  InvalidRotation(u32),
  #[error("图像尺寸无效: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 图像相对显示方向的顺时针旋转
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  pub fn degrees(self) -> u32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }

  /// 旋转 90/270 度时宽高互换
  pub fn swaps_axes(self) -> bool {
    matches!(self, Rotation::Deg90 | Rotation::Deg270)
  }

  /// 精确的 (cos, sin)，避免浮点三角函数误差
  pub fn cos_sin(self) -> (f32, f32) {
    match self {
      Rotation::Deg0 => (1.0, 0.0),
      Rotation::Deg90 => (0.0, 1.0),
      Rotation::Deg180 => (-1.0, 0.0),
      Rotation::Deg270 => (0.0, -1.0),
    }
  }
}

impl TryFrom<u32> for Rotation {
  type Error = FrameError;

  fn try_from(degrees: u32) -> Result<Self, Self::Error> {
    match degrees {
      0 => Ok(Rotation::Deg0),
      90 => Ok(Rotation::Deg90),
      180 => Ok(Rotation::Deg180),
      270 => Ok(Rotation::Deg270),
      other => Err(FrameError::InvalidRotation(other)),
    }
  }
}

impl From<Rotation> for u32 {
  fn from(rotation: Rotation) -> Self {
    rotation.degrees()
  }
}

/// 检测结果所在的图像坐标空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFrameMeta {
  pub image_width: u32,
  pub image_height: u32,
  #[serde(default)]
  pub rotation: Rotation,
}

impl ImageFrameMeta {
  pub fn new(image_width: u32, image_height: u32, rotation: Rotation) -> Result<Self, FrameError> {
    if image_width == 0 || image_height == 0 {
      return Err(FrameError::EmptyImage {
        width: image_width,
        height: image_height,
      });
    }
    Ok(Self {
      image_width,
      image_height,
      rotation,
    })
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.image_width, self.image_height)
  }
}

/// 相机采集到的一帧 RGBA 图像
#[derive(Debug, Clone)]
pub struct CameraFrame {
  pub meta: ImageFrameMeta,
  pub timestamp_ms: u64,
  data: Arc<[u8]>,
}

impl CameraFrame {
  pub fn new(meta: ImageFrameMeta, timestamp_ms: u64, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGBA_CHANNELS * meta.image_width as usize * meta.image_height as usize;
    if data.len() != expected {
      return Err(FrameError::BufferSizeMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      meta,
      timestamp_ms,
      data: data.into(),
    })
  }

  /// 全黑帧，用于不关心像素内容的检测器
  pub fn blank(meta: ImageFrameMeta, timestamp_ms: u64) -> Self {
    let size = RGBA_CHANNELS * meta.image_width as usize * meta.image_height as usize;
    Self {
      meta,
      timestamp_ms,
      data: vec![0u8; size].into(),
    }
  }

  pub fn width(&self) -> u32 {
    self.meta.image_width
  }

  pub fn height(&self) -> u32 {
    self.meta.image_height
  }

  pub fn channels(&self) -> usize {
    RGBA_CHANNELS
  }

  pub fn as_rgba(&self) -> &[u8] {
    &self.data
  }
}
