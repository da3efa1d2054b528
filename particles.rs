//! particles - Particle flow simulation on a pixel adjacency graph
//! No heap allocation, no_std compatible

#![no_std]

pub mod drawing;
pub mod error;
pub mod mapping;
pub mod particle;

use heapless::Vec;
use log::{debug, info, trace, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub use drawing::{BlendMode, ColorSource, DrawingSurface, PixelBuffer, Rgb};
pub use error::{Error, Result};
pub use mapping::{Edge, EdgeTypes, Graph, PixelIndex, PriorityMask, MAX_EDGES_PER_PIXEL};
pub use particle::{Particle, MAX_TRAIL_DEPTH};

use drawing::scale16;

/// Hard cap so any particle index fits in a byte.
pub const MAX_PARTICLES: usize = 255;
pub const MAX_DIRECTIONS: usize = 8;

/// Distinct destinations out of one pixel, first entry is where the particle goes.
type Destinations = Vec<PixelIndex, MAX_EDGES_PER_PIXEL>;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FlowRule {
    /// Any matching edge, chosen uniformly.
    #[default]
    Random,
    /// First matching edge by direction priority.
    Priority,
    /// Every matching edge; extra branches get a copy of the particle.
    Split,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SpawnRule {
    #[default]
    MaintainPopulation,
    Manual,
}

/// Lifecycle callbacks, all invoked synchronously inside the simulator call.
pub trait ParticleHooks {
    fn on_create(&mut self, _particle: &mut Particle) {}
    /// Once per frame per live particle, `index` counts live particles in order.
    fn on_update(&mut self, _particle: &mut Particle, _index: u8) {}
    fn on_kill(&mut self, _particle: &mut Particle) {}
}

impl ParticleHooks for () {}

#[derive(Clone, Debug)]
pub struct Settings<const SIZE: usize> {
    // Flow
    pub flow_rule: FlowRule,
    /// Edge types allowed to split when `flow_rule` is `Split`.
    pub split_directions: EdgeTypes,
    /// Forbid flowing straight back to the previous pixel.
    pub prevent_reverse_flow: bool,
    /// Route across `continue_to` edges in priority mode.
    pub follow_continue_to: bool,
    /// Require all of a direction's bits on the edge instead of any.
    pub require_exact_match: bool,
    /// Pixels particles may travel to, all if `None`.
    pub allowed_pixels: Option<Vec<PixelIndex, SIZE>>,

    // Population
    pub spawn_rule: SpawnRule,
    pub max_population: u8,
    /// 0 = no limit. Only `Settings::new` derives it from the lifespan, see
    /// `derived_spawn_rate`.
    pub max_spawn_per_second: u16,
    /// Pixels to spawn on, all if `None`.
    pub spawn_pixels: Option<Vec<PixelIndex, SIZE>>,

    // New particles
    pub starting_speed: u8,
    /// Milliseconds, forever if 0.
    pub lifespan_ms: u32,
    /// One is drawn at random per new particle.
    pub directions: Vec<PriorityMask, MAX_DIRECTIONS>,

    // Rendering
    pub trail_depth: u8,
    /// Fade toward black in 1/256 units per millisecond.
    pub fade_down: u16,

    pub rng_seed: u64,
}

impl<const SIZE: usize> Default for Settings<SIZE> {
    fn default() -> Self {
        let mut directions = Vec::new();
        let _ = directions.push(PriorityMask::new(Edge::ALL));
        Self {
            flow_rule: FlowRule::Random,
            split_directions: Edge::ALL,
            prevent_reverse_flow: false,
            follow_continue_to: false,
            require_exact_match: false,
            allowed_pixels: None,
            spawn_rule: SpawnRule::MaintainPopulation,
            max_population: 10,
            max_spawn_per_second: 0,
            spawn_pixels: None,
            starting_speed: 10,
            lifespan_ms: 0,
            directions,
            trail_depth: 0,
            fade_down: 4 << 8,
            rng_seed: 0x12345678,
        }
    }
}

impl<const SIZE: usize> Settings<SIZE> {
    /// Population-maintaining settings with the spawn rate derived from the lifespan.
    pub fn new(max_population: u8, starting_speed: u8, lifespan_ms: u32, directions: &[PriorityMask]) -> Result<Self> {
        if directions.is_empty() {
            return Err(Error::NoDirections);
        }
        let directions = Vec::from_slice(directions).map_err(|_| Error::TooManyDirections {
            count: directions.len(),
            max: MAX_DIRECTIONS,
        })?;
        Ok(Self {
            max_population,
            max_spawn_per_second: Self::derived_spawn_rate(max_population, lifespan_ms),
            starting_speed,
            lifespan_ms,
            directions,
            ..Self::default()
        })
    }

    /// Spawns per second that keep a population of `max_population` topped up, 0 (no limit)
    /// for immortal particles.
    pub fn derived_spawn_rate(max_population: u8, lifespan_ms: u32) -> u16 {
        if lifespan_ms == 0 {
            return 0;
        }
        let rate = 1000 * max_population as u32 / lifespan_ms;
        rate.clamp(1, u16::MAX as u32) as u16
    }

    fn check_pixels(pixels: &Option<Vec<PixelIndex, SIZE>>) -> Result<()> {
        match pixels.iter().flatten().find(|px| **px as usize >= SIZE) {
            Some(px) => Err(Error::PositionOutOfBounds { position: *px as usize, pixel_count: SIZE }),
            None => Ok(()),
        }
    }

    pub fn validate(&self, capacity: usize) -> Result<()> {
        if self.max_population as usize > capacity {
            return Err(Error::PopulationAboveCapacity { requested: self.max_population as usize, capacity });
        }
        if self.trail_depth as usize > MAX_TRAIL_DEPTH {
            return Err(Error::TrailTooDeep { depth: self.trail_depth as usize, max: MAX_TRAIL_DEPTH });
        }
        Self::check_pixels(&self.allowed_pixels)?;
        Self::check_pixels(&self.spawn_pixels)
    }
}

/// What a single flow step did to a particle.
enum Step {
    /// Moved to a new pixel; any further destinations are split branches.
    Moved(Destinations),
    /// Already dead, only the trail advanced.
    Faded,
    /// Hit a dead end on this step.
    Killed,
}

// Const generics size the pixel space and the particle pool at compile time
pub struct ParticleSim<const SIZE: usize, H = (), const CAPACITY: usize = MAX_PARTICLES> {
    particles: Vec<Particle, CAPACITY>,
    settings: Settings<SIZE>,
    hooks: H,
    rng: SmallRng,

    last_tick_ms: Option<u32>,
    last_spawn_ms: Option<u32>,
    fade_accum: u16,
}

impl<const SIZE: usize, H: ParticleHooks + Default, const CAPACITY: usize> ParticleSim<SIZE, H, CAPACITY> {
    pub fn new(settings: Settings<SIZE>) -> Result<Self> {
        Self::with_hooks(settings, H::default())
    }
}

impl<const SIZE: usize, H: ParticleHooks, const CAPACITY: usize> ParticleSim<SIZE, H, CAPACITY> {
    const CAPACITY_FITS_BYTE: () = assert!(CAPACITY <= MAX_PARTICLES, "particle capacity must fit in a byte");

    pub fn with_hooks(settings: Settings<SIZE>, hooks: H) -> Result<Self> {
        let () = Self::CAPACITY_FITS_BYTE;
        settings.validate(CAPACITY)?;
        Ok(Self {
            particles: Vec::new(),
            rng: SmallRng::seed_from_u64(settings.rng_seed),
            settings,
            hooks,
            last_tick_ms: None,
            last_spawn_ms: None,
            fade_accum: 0,
        })
    }

    pub fn settings(&self) -> &Settings<SIZE> {
        &self.settings
    }

    /// Replace the configuration. A changed trail depth clears every trail, and the
    /// newest live particles above a lowered population cap are killed.
    pub fn update_settings(&mut self, settings: Settings<SIZE>) -> Result<()> {
        settings.validate(CAPACITY)?;
        let retrail = settings.trail_depth != self.settings.trail_depth;
        self.settings = settings;
        if retrail {
            self.set_trail_depth(self.settings.trail_depth)?;
        }
        self.enforce_population_cap();
        Ok(())
    }

    fn enforce_population_cap(&mut self) {
        let mut excess = self.live_count().saturating_sub(self.settings.max_population as usize);
        if excess > 0 {
            debug!("population cap lowered to {}, killing {} particles", self.settings.max_population, excess);
        }
        for index in (0..self.particles.len()).rev() {
            if excess == 0 {
                break;
            }
            if self.particles[index].alive {
                self.kill(index);
                excess -= 1;
            }
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Live and fading particles, in collection order.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particle_mut(&mut self, index: usize) -> Result<&mut Particle> {
        let count = self.particles.len();
        self.particles.get_mut(index).ok_or(Error::NoSuchParticle { index, count })
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.particles.iter().filter(|p| p.alive).count()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.particles.len() {
            Ok(())
        } else {
            Err(Error::NoSuchParticle { index, count: self.particles.len() })
        }
    }

    fn pick_directions(&mut self) -> Option<PriorityMask> {
        let directions = &self.settings.directions;
        if directions.is_empty() {
            return None;
        }
        Some(directions[self.rng.random_range(0..directions.len())])
    }

    fn spawn_location(&mut self) -> Result<PixelIndex> {
        match &self.settings.spawn_pixels {
            Some(pixels) if !pixels.is_empty() => Ok(pixels[self.rng.random_range(0..pixels.len())]),
            _ if SIZE == 0 => Err(Error::PositionOutOfBounds { position: 0, pixel_count: 0 }),
            _ => Ok(self.rng.random_range(0..SIZE) as PixelIndex),
        }
    }

    /// Create a particle on a spawn pixel.
    pub fn add_particle(&mut self, now: u32) -> Result<&mut Particle> {
        let position = self.spawn_location()?;
        self.add_particle_at(position, now)
    }

    /// Create a particle at `position`. It is drawn this frame but first moves next frame.
    pub fn add_particle_at(&mut self, position: PixelIndex, now: u32) -> Result<&mut Particle> {
        if position as usize >= SIZE {
            return Err(Error::PositionOutOfBounds { position: position as usize, pixel_count: SIZE });
        }
        if self.particles.is_full() {
            return Err(Error::CapacityExceeded { capacity: CAPACITY });
        }
        if self.live_count() >= self.settings.max_population as usize {
            return Err(Error::PopulationFull { max_population: self.settings.max_population as usize });
        }
        let directions = self.pick_directions().ok_or(Error::NoDirections)?;
        let mut particle = Particle::new(
            position,
            directions,
            self.settings.lifespan_ms,
            self.settings.starting_speed,
            self.settings.trail_depth as usize,
            now,
        )?;
        particle.color_index = self.rng.random();

        let index = self.particles.len();
        self.particles
            .push(particle)
            .map_err(|_| Error::CapacityExceeded { capacity: CAPACITY })?;
        debug!("particle {} created at pixel {}", index, position);

        let particle = &mut self.particles[index];
        self.hooks.on_create(particle);
        Ok(particle)
    }

    /// Kill a particle. Its trail, if any, still fades out.
    pub fn remove_particle(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        if self.particles[index].alive {
            self.kill(index);
        }
        Ok(())
    }

    /// Drop everything at once, no kill callbacks.
    pub fn remove_all_particles(&mut self) {
        self.particles.clear();
    }

    pub fn set_paused(&mut self, index: usize, paused: bool) -> Result<()> {
        self.particle_mut(index)?.paused = paused;
        Ok(())
    }

    pub fn set_all_speed(&mut self, speed: u8) {
        self.settings.starting_speed = speed;
        for p in self.particles.iter_mut() {
            p.speed = speed;
        }
    }

    /// New trail depth for future particles and every existing one. Trails restart empty.
    pub fn set_trail_depth(&mut self, depth: u8) -> Result<()> {
        if depth as usize > MAX_TRAIL_DEPTH {
            return Err(Error::TrailTooDeep { depth: depth as usize, max: MAX_TRAIL_DEPTH });
        }
        self.settings.trail_depth = depth;
        for p in self.particles.iter_mut() {
            p.set_trail_depth(depth as usize)?;
        }
        Ok(())
    }

    pub fn set_particle_trail_depth(&mut self, index: usize, depth: u8) -> Result<()> {
        self.particle_mut(index)?.set_trail_depth(depth as usize)
    }

    /// Recolor from each particle's palette index, keeping its light level.
    pub fn reset_particle_colors<C: ColorSource>(&mut self, colors: &C) {
        for p in self.particles.iter_mut() {
            p.color = colors.color(p.color_index, p.color.average_light());
        }
    }

    pub fn dump_particles(&self, now: u32) {
        info!("--------");
        info!("There are {} particles ({} alive)", self.particles.len(), self.live_count());
        for (i, p) in self.particles.iter().enumerate() {
            info!(
                "Particle {}: px={}, age={}, color_index={}, speed={}, directions={:?}, alive={}",
                i,
                p.position,
                p.age(now),
                p.color_index,
                p.speed,
                p.directions.slots(),
                p.alive
            );
        }
        info!("--------");
    }

    fn kill(&mut self, index: usize) {
        let particle = &mut self.particles[index];
        particle.alive = false;
        self.hooks.on_kill(particle);
        if particle.trail_depth() == 0 {
            self.particles.remove(index);
        }
    }

    fn is_allowed(settings: &Settings<SIZE>, particle: &Particle, to: PixelIndex) -> bool {
        if settings.prevent_reverse_flow && to == particle.previous_position {
            return false;
        }
        match &settings.allowed_pixels {
            Some(pixels) => pixels.contains(&to),
            None => true,
        }
    }

    /// Destinations for the next step. Empty means a dead end.
    fn edge_candidates(
        settings: &Settings<SIZE>,
        rng: &mut SmallRng,
        particle: &mut Particle,
        graph: &Graph<SIZE>,
    ) -> Result<Destinations> {
        let exact = settings.require_exact_match;
        let follow = settings.follow_continue_to;
        let mut next = Destinations::new();

        if settings.flow_rule == FlowRule::Priority {
            let mut first = None;
            for edge in graph.adjacencies(particle.position, particle.directions, exact)? {
                if !Self::is_allowed(settings, particle, edge.to) {
                    continue;
                }
                if follow && edge.continue_to {
                    // Remember where we were heading across an ambiguous intersection
                    particle.continue_to = Some(edge.to);
                } else if follow && particle.continue_to == Some(edge.to) {
                    particle.continue_to = None;
                    first = Some(edge.to);
                    break;
                } else if !edge.continue_to && first.is_none() {
                    first = Some(edge.to);
                }
            }
            // Only ever one edge in priority mode
            next.extend(first);
            return Ok(next);
        }

        // Random and split both start from every distinct allowed destination
        let mut allowed: Vec<(PixelIndex, EdgeTypes), MAX_EDGES_PER_PIXEL> = Vec::new();
        let mut filtered = 0usize;
        for edge in graph.adjacencies(particle.position, particle.directions, exact)? {
            if edge.continue_to || edge.types == Edge::NONE {
                continue;
            }
            if !Self::is_allowed(settings, particle, edge.to) {
                filtered += 1;
                continue;
            }
            if !allowed.iter().any(|(to, _)| *to == edge.to) {
                // At most one edge per (from, to), so this never overflows
                let _ = allowed.push((edge.to, edge.types));
            }
        }
        if allowed.is_empty() {
            if filtered > 0 {
                trace!("pixel {}: all {} candidates filtered out", particle.position, filtered);
            }
            return Ok(next);
        }

        match settings.flow_rule {
            FlowRule::Split if allowed.len() > 1 => {
                next.extend(
                    allowed
                        .iter()
                        .filter(|(_, types)| types & settings.split_directions != 0)
                        .map(|(to, _)| *to),
                );
            }
            FlowRule::Split => {
                let _ = next.push(allowed[0].0);
            }
            _ => {
                let _ = next.push(allowed[rng.random_range(0..allowed.len())].0);
            }
        }
        Ok(next)
    }

    fn flow_particle(&mut self, index: usize, graph: &Graph<SIZE>) -> Result<Step> {
        let particle = &mut self.particles[index];
        particle.shift_trail();
        if !particle.alive {
            return Ok(Step::Faded);
        }

        let mut next = Self::edge_candidates(&self.settings, &mut self.rng, particle, graph)?;
        if next.is_empty() {
            trace!("particle {} stuck at pixel {}", index, particle.position);
            self.kill(index);
            return Ok(Step::Killed);
        }

        let to = next.remove(0);
        trace!("particle {}: {} -> {}", index, particle.position, to);
        particle.previous_position = particle.position;
        particle.position = to;
        Ok(Step::Moved(next))
    }

    fn spawn_branches(&mut self, parent: usize, branches: &[PixelIndex]) {
        let from = self.particles[parent].previous_position;
        for &to in branches {
            if self.particles.is_full() || self.live_count() >= self.settings.max_population as usize {
                warn!("split at pixel {} dropped branch to {}: population full", from, to);
                continue;
            }
            let directions = self.pick_directions().unwrap_or(self.particles[parent].directions);
            let branch = self.particles[parent].branch(from, to, directions);
            if self.particles.push(branch).is_err() {
                warn!("split at pixel {} dropped branch to {}: capacity full", from, to);
            } else {
                debug!("split at pixel {}: new particle at {}", from, to);
            }
        }
    }

    fn maintain_population(&mut self, now: u32) -> Result<()> {
        let max_population = self.settings.max_population as usize;
        while !self.particles.is_full() && self.live_count() < max_population {
            let rate = self.settings.max_spawn_per_second;
            if rate != 0 {
                let interval = 1000 / rate as u32;
                if let Some(last) = self.last_spawn_ms {
                    if now.wrapping_sub(last) < interval {
                        break;
                    }
                }
            }
            self.add_particle(now)?;
            self.last_spawn_ms = Some(now);
        }
        Ok(())
    }

    /// Whole fade units owed since the previous frame, remainder kept for the next one.
    fn fade_amount(&mut self, now: u32) -> u8 {
        let Some(last) = self.last_tick_ms.replace(now) else {
            return 0;
        };
        let accum = self.fade_accum as u64 + self.settings.fade_down as u64 * now.wrapping_sub(last) as u64;
        let whole = accum >> 8;
        if whole > 0xFF {
            self.fade_accum = 0;
            return 0xFF;
        }
        self.fade_accum = (accum & 0xFF) as u16;
        whole as u8
    }

    fn draw<S: DrawingSurface>(&mut self, surface: &mut S, now: u32) {
        surface.fade_to_black_by(self.fade_amount(now));

        for index in (0..self.particles.len()).rev() {
            let p = &self.particles[index];
            let depth = p.trail_depth();
            if depth == 0 {
                if p.alive {
                    surface.point(p.position, p.color, BlendMode::Brighten, p.brightness);
                } else {
                    self.particles.remove(index);
                }
                continue;
            }

            // Each slot sits one step dimmer than the next newer one, and slides toward
            // the following step as the current move interval elapses.
            let step = (0xFF / depth) as u8;
            let fraction = if p.paused { 0 } else { p.move_fraction(now) };
            let lag = scale16(step, fraction);
            for (d, slot) in p.trail().iter().enumerate() {
                if let Some(px) = *slot {
                    let weight = step * (depth - d) as u8 - lag;
                    surface.point(px, p.color, BlendMode::Brighten, drawing::scale8(weight, p.brightness));
                }
            }
            if !p.alive && !p.is_fading() {
                self.particles.remove(index);
            }
        }
    }

    /// Advance one frame: spawn, flow every particle that is due, then draw.
    pub fn update<S: DrawingSurface>(&mut self, graph: &Graph<SIZE>, surface: &mut S, now: u32) -> Result<()> {
        if self.settings.spawn_rule == SpawnRule::MaintainPopulation {
            self.maintain_population(now)?;
        }

        // Reverse order, removal only shifts particles already handled this frame
        for index in (0..self.particles.len()).rev() {
            let p = &mut self.particles[index];
            let Some(last) = p.last_move_ms else {
                // First frame: start the clock, don't move
                p.last_move_ms = Some(now);
                continue;
            };
            let Some(interval) = p.move_interval_ms() else {
                continue;
            };
            let elapsed = now.wrapping_sub(last);
            if p.paused || elapsed < interval {
                continue;
            }

            let branches = match self.flow_particle(index, graph)? {
                Step::Killed => continue,
                Step::Faded => Destinations::new(),
                Step::Moved(branches) => branches,
            };

            // Step by whole intervals to avoid drift, unless we fell far behind
            let p = &mut self.particles[index];
            p.last_move_ms = Some(if elapsed > 2 * interval { now } else { last.wrapping_add(interval) });
            if !p.alive {
                continue;
            }

            self.spawn_branches(index, &branches);
            if self.particles[index].lifespan_exceeded(now) {
                self.kill(index);
            }
        }

        self.draw(surface, now);

        let mut live_index: u8 = 0;
        for p in self.particles.iter_mut().filter(|p| p.alive) {
            self.hooks.on_update(p, live_index);
            live_index = live_index.wrapping_add(1);
        }
        Ok(())
    }
}
