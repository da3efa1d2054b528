//! drawing - Drawing surface interface and a reference pixel buffer
//! The simulator only ever talks to `DrawingSurface`

use crate::mapping::PixelIndex;

/// 8-bit fixed point scale, `value * (scale + 1) / 256`. 255 is identity.
#[inline]
pub const fn scale8(value: u8, scale: u8) -> u8 {
    ((value as u16 * (scale as u16 + 1)) >> 8) as u8
}

/// Scale by a 16-bit fraction.
#[inline]
pub const fn scale16(value: u8, fraction: u16) -> u8 {
    ((value as u32 * (fraction as u32 + 1)) >> 16) as u8
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn scale8(self, scale: u8) -> Self {
        Self::new(scale8(self.r, scale), scale8(self.g, scale), scale8(self.b, scale))
    }

    fn zip(self, other: Rgb, f: impl Fn(u8, u8) -> u8) -> Self {
        Self::new(f(self.r, other.r), f(self.g, other.g), f(self.b, other.b))
    }

    pub fn average_light(self) -> u8 {
        ((self.r as u16 + self.g as u16 + self.b as u16) / 3) as u8
    }

    pub fn is_black(self) -> bool {
        self == Self::BLACK
    }
}

/// How a drawn color combines with what is already on the surface.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    #[default]
    SourceOver,
    Brighten,
    Darken,
    Subtract,
    Multiply,
    Screen,
}

impl BlendMode {
    pub fn blend(self, src: Rgb, dst: Rgb) -> Rgb {
        match self {
            BlendMode::SourceOver => src,
            BlendMode::Brighten => src.zip(dst, u8::max),
            BlendMode::Darken => src.zip(dst, u8::min),
            BlendMode::Subtract => dst.zip(src, u8::saturating_sub),
            BlendMode::Multiply => src.zip(dst, scale8),
            // 1 - (1 - dst)(1 - src)
            BlendMode::Screen => src.zip(dst, |s, d| 0xFF - scale8(0xFF - d, 0xFF - s)),
        }
    }
}

/// Where particles get drawn.
pub trait DrawingSurface {
    /// Blend `color`, scaled by `brightness`, into one pixel.
    fn point(&mut self, position: PixelIndex, color: Rgb, mode: BlendMode, brightness: u8);

    /// Darken every pixel by `amount` / 256.
    fn fade_to_black_by(&mut self, amount: u8);
}

/// Palette lookup: a color for index `n`.
pub trait ColorSource {
    fn color(&self, index: u8, brightness: u8) -> Rgb;
}

/// In-memory surface, one color per pixel.
pub struct PixelBuffer<const SIZE: usize> {
    pub leds: [Rgb; SIZE],
}

impl<const SIZE: usize> Default for PixelBuffer<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> PixelBuffer<SIZE> {
    pub const fn new() -> Self {
        Self { leds: [Rgb::BLACK; SIZE] }
    }

    pub fn clear(&mut self) {
        self.leds = [Rgb::BLACK; SIZE];
    }

    pub fn lit(&self) -> impl Iterator<Item = usize> + '_ {
        self.leds.iter().enumerate().filter(|(_, c)| !c.is_black()).map(|(i, _)| i)
    }
}

impl<const SIZE: usize> DrawingSurface for PixelBuffer<SIZE> {
    fn point(&mut self, position: PixelIndex, color: Rgb, mode: BlendMode, brightness: u8) {
        let index = position as usize;
        assert!(index < SIZE, "pixel {} out of range for {} pixels", index, SIZE);
        self.leds[index] = mode.blend(color.scale8(brightness), self.leds[index]);
    }

    fn fade_to_black_by(&mut self, amount: u8) {
        if amount == 0 {
            return;
        }
        for led in self.leds.iter_mut() {
            *led = led.scale8(0xFF - amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale8_identity_and_zero() {
        assert_eq!(scale8(200, 0xFF), 200);
        assert_eq!(scale8(200, 0), 0);
        assert_eq!(scale8(0xFF, 0x80), 0x80);
        assert_eq!(scale16(0xFF, 0xFFFF), 0xFF);
        assert_eq!(scale16(0xFF, 0), 0);
    }

    #[test]
    fn blend_modes() {
        let src = Rgb::new(100, 10, 200);
        let dst = Rgb::new(50, 80, 250);
        assert_eq!(BlendMode::SourceOver.blend(src, dst), src);
        assert_eq!(BlendMode::Brighten.blend(src, dst), Rgb::new(100, 80, 250));
        assert_eq!(BlendMode::Darken.blend(src, dst), Rgb::new(50, 10, 200));
        assert_eq!(BlendMode::Subtract.blend(src, dst), Rgb::new(0, 70, 50));
        assert_eq!(BlendMode::Multiply.blend(Rgb::WHITE, dst), dst);
        assert_eq!(BlendMode::Screen.blend(Rgb::BLACK, dst), dst);
        assert_eq!(BlendMode::Screen.blend(Rgb::WHITE, dst), Rgb::WHITE);
    }

    #[test]
    fn point_scales_by_brightness() {
        let mut buffer: PixelBuffer<3> = PixelBuffer::new();
        buffer.point(1, Rgb::WHITE, BlendMode::Brighten, 0x80);
        assert_eq!(buffer.leds[1], Rgb::new(0x80, 0x80, 0x80));
        buffer.point(1, Rgb::new(0x10, 0xFF, 0), BlendMode::Brighten, 0xFF);
        assert_eq!(buffer.leds[1], Rgb::new(0x80, 0xFF, 0x80));
        assert_eq!(buffer.lit().count(), 1);
    }

    #[test]
    #[should_panic]
    fn point_out_of_range_panics() {
        let mut buffer: PixelBuffer<3> = PixelBuffer::new();
        buffer.point(3, Rgb::WHITE, BlendMode::SourceOver, 0xFF);
    }

    #[test]
    fn fade_darkens_everything() {
        let mut buffer: PixelBuffer<2> = PixelBuffer::new();
        buffer.leds = [Rgb::WHITE, Rgb::new(2, 2, 2)];
        buffer.fade_to_black_by(0x80);
        assert_eq!(buffer.leds[0], Rgb::new(0x7F, 0x7F, 0x7F));
        assert_eq!(buffer.leds[1], Rgb::new(1, 1, 1));
    }
}
