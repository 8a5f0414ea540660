// 该文件是 Maodian （锚点） 项目的一部分。
// src/transform.rs - 图像坐标到视图坐标的变换
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

//! 检测框从图像空间映射到视图空间。
//!
//! 采用“填充”（cover）缩放：图像完全覆盖视图，多余部分被裁掉，
//! 不会出现黑边。主路径不做旋转校正；旋转感知的变体先绕图像中心旋转，
//! 再按旋转后的尺寸缩放。
//!
//! 两条路径共用同一条归一化规则：小于等于 1.0 的坐标按图像尺寸放大为像素，
//! 其余视为像素坐标。检测器输出的是归一化框，`map_rect` 对两种模式传入的
//! 是同一个框，所以旋转感知的路径也必须接受归一化输入。

use serde::{Deserialize, Serialize};

use crate::frame::Rotation;

/// 视图（显示区域）尺寸，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewSize {
  pub width: f32,
  pub height: f32,
}

impl ViewSize {
  pub fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }
}

impl Default for ViewSize {
  fn default() -> Self {
    Self::new(1080.0, 1920.0)
  }
}

impl std::str::FromStr for ViewSize {
  type Err = String;

  /// 解析 `WxH`，例如 `1080x1920`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (w, h) = s
      .split_once(['x', 'X'])
      .ok_or_else(|| format!("视图尺寸格式应为 WxH: {}", s))?;
    let width: f32 = w.trim().parse().map_err(|e| format!("宽度无效 {}: {}", w, e))?;
    let height: f32 = h.trim().parse().map_err(|e| format!("高度无效 {}: {}", h, e))?;
    if width <= 0.0 || height <= 0.0 {
      return Err(format!("视图尺寸必须为正数: {}", s));
    }
    Ok(Self::new(width, height))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewRect {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl ViewRect {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 四个角点的外接矩形
  fn bounding(points: &[(f32, f32)]) -> Self {
    let mut rect = ViewRect::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for &(x, y) in points {
      rect.left = rect.left.min(x);
      rect.top = rect.top.min(y);
      rect.right = rect.right.max(x);
      rect.bottom = rect.bottom.max(y);
    }
    rect
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }
}

/// 变换方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformMode {
  /// 主路径：只缩放平移，不做旋转校正
  #[default]
  Cover,
  /// 先绕图像中心旋转，再缩放平移
  RotationAware,
}

impl std::str::FromStr for TransformMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cover" => Ok(TransformMode::Cover),
      "rotation-aware" => Ok(TransformMode::RotationAware),
      other => Err(format!("未知的变换方式: {}", other)),
    }
  }
}

/// 填充缩放参数：`v = coord * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverTransform {
  pub scale: f32,
  pub offset_x: f32,
  pub offset_y: f32,
}

impl CoverTransform {
  pub fn new(image_width: f32, image_height: f32, view: ViewSize) -> Self {
    let scale = (view.width / image_width).max(view.height / image_height);
    Self {
      scale,
      offset_x: (view.width - image_width * scale) / 2.0,
      offset_y: (view.height - image_height * scale) / 2.0,
    }
  }

  pub fn apply(&self, rect: ViewRect) -> ViewRect {
    ViewRect::new(
      rect.left * self.scale + self.offset_x,
      rect.top * self.scale + self.offset_y,
      rect.right * self.scale + self.offset_x,
      rect.bottom * self.scale + self.offset_y,
    )
  }

  /// `apply` 的逆映射，结果为图像像素坐标
  pub fn invert(&self, rect: ViewRect) -> ViewRect {
    ViewRect::new(
      (rect.left - self.offset_x) / self.scale,
      (rect.top - self.offset_y) / self.scale,
      (rect.right - self.offset_x) / self.scale,
      (rect.bottom - self.offset_y) / self.scale,
    )
  }
}

/// 小于等于 1.0 的坐标视为归一化坐标
// NOTE: 小于 1 像素的绝对坐标会被误判为归一化坐标
fn denormalize(value: f32, extent: f32) -> f32 {
  if value <= 1.0 { value * extent } else { value }
}

fn denormalize_rect(l: f32, t: f32, r: f32, b: f32, image_width: f32, image_height: f32) -> ViewRect {
  ViewRect::new(
    denormalize(l, image_width),
    denormalize(t, image_height),
    denormalize(r, image_width),
    denormalize(b, image_height),
  )
}

/// 主路径：图像矩形 -> 视图矩形
#[allow(clippy::too_many_arguments)]
pub fn to_view_rect(
  l: f32,
  t: f32,
  r: f32,
  b: f32,
  image_width: u32,
  image_height: u32,
  view_width: f32,
  view_height: f32,
) -> ViewRect {
  let (iw, ih) = (image_width as f32, image_height as f32);
  let pixels = denormalize_rect(l, t, r, b, iw, ih);
  CoverTransform::new(iw, ih, ViewSize::new(view_width, view_height)).apply(pixels)
}

/// 旋转感知的变体：绕图像中心旋转后再按旋转后的尺寸填充
#[allow(clippy::too_many_arguments)]
pub fn to_view_rect_rotated(
  l: f32,
  t: f32,
  r: f32,
  b: f32,
  image_width: u32,
  image_height: u32,
  rotation: Rotation,
  view_width: f32,
  view_height: f32,
) -> ViewRect {
  let (iw, ih) = (image_width as f32, image_height as f32);
  let pixels = denormalize_rect(l, t, r, b, iw, ih);

  let (rotated_w, rotated_h) = if rotation.swaps_axes() { (ih, iw) } else { (iw, ih) };
  let (cos, sin) = rotation.cos_sin();

  // 平移到图像中心 -> 旋转 -> 平移到旋转后图像的中心
  let rotate = |x: f32, y: f32| {
    let (cx, cy) = (x - iw / 2.0, y - ih / 2.0);
    (
      cx * cos - cy * sin + rotated_w / 2.0,
      cx * sin + cy * cos + rotated_h / 2.0,
    )
  };
  let rotated = ViewRect::bounding(&[
    rotate(pixels.left, pixels.top),
    rotate(pixels.right, pixels.top),
    rotate(pixels.right, pixels.bottom),
    rotate(pixels.left, pixels.bottom),
  ]);

  CoverTransform::new(rotated_w, rotated_h, ViewSize::new(view_width, view_height)).apply(rotated)
}

/// 按配置选择变换方式；点击测试使用的坐标与绘制的一致
pub fn map_rect(
  mode: TransformMode,
  bbox: [f32; 4],
  image_width: u32,
  image_height: u32,
  rotation: Rotation,
  view: ViewSize,
) -> ViewRect {
  let [l, t, r, b] = bbox;
  match mode {
    TransformMode::Cover => to_view_rect(l, t, r, b, image_width, image_height, view.width, view.height),
    TransformMode::RotationAware => to_view_rect_rotated(
      l,
      t,
      r,
      b,
      image_width,
      image_height,
      rotation,
      view.width,
      view.height,
    ),
  }
}
