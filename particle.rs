//! particle - A single particle travelling the pixel graph
//! Trail storage is inline and owned, never shared between particles

use heapless::Vec;

use crate::drawing::Rgb;
use crate::error::{Error, Result};
use crate::mapping::{PixelIndex, PriorityMask};

pub const MAX_TRAIL_DEPTH: usize = 16;

/// Recently vacated pixels, slot 0 newest. `None` is an unlit slot.
pub type Trail = Vec<Option<PixelIndex>, MAX_TRAIL_DEPTH>;

fn empty_trail(depth: usize) -> Result<Trail> {
    if depth > MAX_TRAIL_DEPTH {
        return Err(Error::TrailTooDeep { depth, max: MAX_TRAIL_DEPTH });
    }
    let mut trail = Trail::new();
    // Cannot fail, depth was checked above
    let _ = trail.resize(depth, None);
    Ok(trail)
}

#[derive(Debug)]
pub struct Particle {
    pub position: PixelIndex,
    pub brightness: u8,
    /// Pixels per second. Zero holds the particle in place.
    pub speed: u8,
    pub color: Rgb,
    /// Palette slot used when colors are reset; storage only.
    pub color_index: u8,
    /// Milliseconds, unbounded if 0.
    pub lifespan_ms: u32,
    /// Ranked edge type preferences.
    pub directions: PriorityMask,

    pub(crate) previous_position: PixelIndex,
    pub(crate) birth_ms: u32,
    pub(crate) last_move_ms: Option<u32>,
    pub(crate) continue_to: Option<PixelIndex>,
    pub(crate) alive: bool,
    pub(crate) paused: bool,
    pub(crate) trail: Trail,
}

impl Particle {
    pub(crate) fn new(
        position: PixelIndex,
        directions: PriorityMask,
        lifespan_ms: u32,
        speed: u8,
        trail_depth: usize,
        now: u32,
    ) -> Result<Self> {
        Ok(Self {
            position,
            brightness: 0xFF,
            speed,
            color: Rgb::WHITE,
            color_index: 0,
            lifespan_ms,
            directions,
            previous_position: position,
            birth_ms: now,
            last_move_ms: None,
            continue_to: None,
            alive: true,
            paused: false,
            trail: empty_trail(trail_depth)?,
        })
    }

    /// Copy for a split branch at `to`: same age, look and speed, but an empty trail
    /// of the same depth and its own direction preference.
    pub(crate) fn branch(&self, from: PixelIndex, to: PixelIndex, directions: PriorityMask) -> Self {
        let mut trail = Trail::new();
        let _ = trail.resize(self.trail.len(), None);
        Self {
            position: to,
            brightness: self.brightness,
            speed: self.speed,
            color: self.color,
            color_index: self.color_index,
            lifespan_ms: self.lifespan_ms,
            directions,
            previous_position: from,
            birth_ms: self.birth_ms,
            last_move_ms: self.last_move_ms,
            continue_to: None,
            alive: true,
            paused: false,
            trail,
        }
    }

    pub fn previous_position(&self) -> PixelIndex {
        self.previous_position
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn birth_ms(&self) -> u32 {
        self.birth_ms
    }

    pub fn last_move_ms(&self) -> Option<u32> {
        self.last_move_ms
    }

    pub fn pending_continue_to(&self) -> Option<PixelIndex> {
        self.continue_to
    }

    pub fn trail(&self) -> &[Option<PixelIndex>] {
        &self.trail
    }

    pub fn trail_depth(&self) -> usize {
        self.trail.len()
    }

    /// Any trail slot still lit.
    pub fn is_fading(&self) -> bool {
        self.trail.iter().any(Option::is_some)
    }

    pub(crate) fn set_trail_depth(&mut self, depth: usize) -> Result<()> {
        self.trail = empty_trail(depth)?;
        Ok(())
    }

    pub fn clear_trail(&mut self) {
        self.trail.iter_mut().for_each(|slot| *slot = None);
    }

    /// Push the pixel being vacated into slot 0, dropping the oldest slot.
    pub(crate) fn shift_trail(&mut self) {
        if self.trail.is_empty() {
            return;
        }
        let vacated = self.alive.then_some(self.position);
        self.trail.rotate_right(1);
        self.trail[0] = vacated;
    }

    /// Milliseconds between moves, `None` when stationary.
    pub fn move_interval_ms(&self) -> Option<u32> {
        (self.speed > 0).then(|| 1000 / self.speed as u32)
    }

    /// Fraction of the current move interval already elapsed, 16-bit fixed point.
    pub fn move_fraction(&self, now: u32) -> u16 {
        match self.last_move_ms {
            None => 0,
            Some(last) => {
                let elapsed = now.wrapping_sub(last) as u64;
                let fraction = elapsed * self.speed as u64 * 0xFFFF / 1000;
                fraction.min(0xFFFF) as u16
            }
        }
    }

    pub(crate) fn exact_age(&self, now: u32) -> u32 {
        now.wrapping_sub(self.birth_ms)
    }

    /// Age in milliseconds, capped at the lifespan.
    pub fn age(&self, now: u32) -> u32 {
        let age = self.exact_age(now);
        if self.lifespan_ms > 0 {
            age.min(self.lifespan_ms)
        } else {
            age
        }
    }

    /// Age scaled to 0..=255 over the lifespan, or 0 with no lifespan.
    pub fn age_byte(&self, now: u32) -> u8 {
        if self.lifespan_ms == 0 {
            return 0;
        }
        (0xFF * self.age(now) as u64 / self.lifespan_ms as u64) as u8
    }

    pub(crate) fn lifespan_exceeded(&self, now: u32) -> bool {
        self.lifespan_ms != 0 && self.exact_age(now) > self.lifespan_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(trail_depth: usize) -> Particle {
        Particle::new(5, PriorityMask::new(1), 1000, 4, trail_depth, 100).unwrap()
    }

    #[test]
    fn new_particle_has_empty_trail() {
        let p = particle(3);
        assert!(p.is_alive());
        assert_eq!(p.trail(), &[None, None, None]);
        assert!(!p.is_fading());
        assert_eq!(p.previous_position(), 5);
        assert_eq!(p.move_interval_ms(), Some(250));
    }

    #[test]
    fn trail_shifts_newest_first() {
        let mut p = particle(3);
        p.shift_trail();
        p.position = 6;
        p.shift_trail();
        p.position = 7;
        assert_eq!(p.trail(), &[Some(6), Some(5), None]);

        p.alive = false;
        p.shift_trail();
        assert_eq!(p.trail(), &[None, Some(6), Some(5)]);
        p.shift_trail();
        assert_eq!(p.trail(), &[None, None, Some(6)]);
        assert!(p.is_fading());
        p.shift_trail();
        assert!(!p.is_fading());
    }

    #[test]
    fn branch_never_copies_trail() {
        let mut p = particle(2);
        p.shift_trail();
        p.color = Rgb::new(1, 2, 3);
        let b = p.branch(5, 9, PriorityMask::new(2));
        assert_eq!(b.trail(), &[None, None]);
        assert_eq!(b.position, 9);
        assert_eq!(b.previous_position(), 5);
        assert_eq!(b.color, p.color);
        assert_eq!(b.birth_ms(), p.birth_ms());
        assert_eq!(b.directions, PriorityMask::new(2));
        assert_eq!(p.trail(), &[Some(5), None]);
    }

    #[test]
    fn trail_depth_is_bounded() {
        let mut p = particle(0);
        assert_eq!(
            p.set_trail_depth(MAX_TRAIL_DEPTH + 1),
            Err(Error::TrailTooDeep { depth: MAX_TRAIL_DEPTH + 1, max: MAX_TRAIL_DEPTH })
        );
        p.set_trail_depth(4).unwrap();
        assert_eq!(p.trail_depth(), 4);
        assert!(!p.is_fading());
    }

    #[test]
    fn age_is_capped_by_lifespan() {
        let p = particle(0);
        assert_eq!(p.age(600), 500);
        assert_eq!(p.age_byte(600), 127);
        assert_eq!(p.age(5000), 1000);
        assert_eq!(p.age_byte(5000), 0xFF);
        assert!(!p.lifespan_exceeded(1100));
        assert!(p.lifespan_exceeded(1101));
    }

    #[test]
    fn move_fraction_tracks_interval() {
        let mut p = particle(0);
        assert_eq!(p.move_fraction(1000), 0);
        p.last_move_ms = Some(1000);
        assert_eq!(p.move_fraction(1000), 0);
        assert_eq!(p.move_fraction(1125), 0x7FFF);
        assert_eq!(p.move_fraction(2000), 0xFFFF);
    }
}
