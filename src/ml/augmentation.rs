//! 学習データの拡張（左右反転・回転・シフト・ズーム）
//!
//! 出力画素ごとに元画像の座標を逆算する最近傍補間です。画像外を参照した
//! 場合は最も近い端の画素で埋めます。

use image::RgbImage;
use rand::Rng;

use crate::model::config::AugmentationConfig;

const MAX_ROTATION_DEG: f32 = 180.0;
/// 画像サイズに対する割合
const MAX_SHIFT: f32 = 1.0;
const MAX_ZOOM: f32 = 0.9;

/// 1枚分の拡張パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentParams {
    pub flip: bool,
    /// 回転角（度）
    pub angle_deg: f32,
    /// 横シフト（ピクセル）
    pub shift_x: f32,
    /// 縦シフト（ピクセル）
    pub shift_y: f32,
    /// 拡大率（1.0 で等倍）
    pub zoom: f32,
}

impl AugmentParams {
    pub fn identity() -> Self {
        Self {
            flip: false,
            angle_deg: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            zoom: 1.0,
        }
    }

    /// 設定の範囲内でランダムに生成
    pub fn sample<R: Rng + ?Sized>(
        config: &AugmentationConfig,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> Self {
        // 範囲は [0, max] に収める（NaN や負値は拡張なし）
        let symmetric = |rng: &mut R, range: f32, max: f32| {
            if range > 0.0 {
                let range = range.min(max);
                rng.gen_range(-range..=range)
            } else {
                0.0
            }
        };

        Self {
            flip: config.horizontal_flip && rng.gen_bool(0.5),
            angle_deg: symmetric(rng, config.rotation_range, MAX_ROTATION_DEG),
            shift_x: symmetric(rng, config.width_shift_range, MAX_SHIFT) * width as f32,
            shift_y: symmetric(rng, config.height_shift_range, MAX_SHIFT) * height as f32,
            zoom: 1.0 + symmetric(rng, config.zoom_range, MAX_ZOOM),
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// 画像に適用（サイズは変わらない）
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        if self.is_identity() {
            return image.clone();
        }

        let (width, height) = image.dimensions();
        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;
        let (sin, cos) = (-self.angle_deg.to_radians()).sin_cos();
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;

        RgbImage::from_fn(width, height, |x, y| {
            let u = x as f32 - cx - self.shift_x;
            let v = y as f32 - cy - self.shift_y;

            let mut sx = (u * cos - v * sin) / self.zoom + cx;
            let sy = (u * sin + v * cos) / self.zoom + cy;
            if self.flip {
                sx = max_x - sx;
            }

            let sx = sx.round().clamp(0.0, max_x) as u32;
            let sy = sy.round().clamp(0.0, max_y) as u32;
            *image.get_pixel(sx, sy)
        })
    }
}

/// 設定に従って画像をランダムに拡張
pub fn augment_image<R: Rng + ?Sized>(
    image: &RgbImage,
    config: &AugmentationConfig,
    rng: &mut R,
) -> RgbImage {
    if config.is_identity() {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    AugmentParams::sample(config, width, height, rng).apply(image)
}
