//! main.rs - Desktop simulator for the particle flow engine
//! Lays a ring-and-spokes LED graph out on screen and renders it

use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::Rgb565,
    prelude::*,
    primitives::{Circle, PrimitiveStyle},
    text::{Baseline, Text},
};
use embedded_graphics_simulator::{OutputSettingsBuilder, SimulatorDisplay, SimulatorEvent, Window};
use log::info;
use std::thread;
use std::time::{Duration, Instant};

use lightgraph::{
    ColorSource, Edge, EdgeTypes, FlowRule, Graph, Particle, ParticleHooks, ParticleSim, PixelBuffer, PixelIndex,
    PriorityMask, Rgb, Settings,
};

const RING: usize = 24;
const SPOKES: usize = 4;
const SPOKE_LEN: usize = 3;
const HUB: usize = RING + SPOKES * SPOKE_LEN;
const LED_COUNT: usize = HUB + 1;

const CW: EdgeTypes = 0x01;
const CCW: EdgeTypes = 0x02;
const INWARD: EdgeTypes = 0x04;
const OUTWARD: EdgeTypes = 0x08;

const SCREEN: u32 = 200;

/// Rainbow palette, also colors particles as they are created.
#[derive(Default)]
struct Rainbow;

impl ColorSource for Rainbow {
    fn color(&self, index: u8, brightness: u8) -> Rgb {
        // Three linear ramps around the hue circle
        let section = index / 86;
        let ramp = (index % 86) * 3;
        let (r, g, b) = match section {
            0 => (0xFF - ramp, ramp, 0),
            1 => (0, 0xFF - ramp, ramp),
            _ => (ramp, 0, 0xFF - ramp),
        };
        Rgb::new(r, g, b).scale8(brightness)
    }
}

impl ParticleHooks for Rainbow {
    fn on_create(&mut self, particle: &mut Particle) {
        particle.color = self.color(particle.color_index, 0xFF);
    }
}

fn build_graph() -> Result<Graph<LED_COUNT>, lightgraph::Error> {
    let mut edges: Vec<Edge> = Vec::new();
    for i in 0..RING {
        edges.push(Edge::new(i as PixelIndex, ((i + 1) % RING) as PixelIndex, CW));
    }
    for spoke in 0..SPOKES {
        let mut from = (spoke * RING / SPOKES) as PixelIndex;
        for step in 0..SPOKE_LEN {
            let to = (RING + spoke * SPOKE_LEN + step) as PixelIndex;
            edges.push(Edge::new(from, to, INWARD));
            from = to;
        }
        edges.push(Edge::new(from, HUB as PixelIndex, INWARD));
    }
    Graph::from_edges(&edges, &[(CW, CCW), (INWARD, OUTWARD)])
}

/// Screen coordinates for every LED.
fn layout() -> [Point; LED_COUNT] {
    let center = SCREEN as f32 / 2.0;
    let radius = center - 20.0;
    let mut points = [Point::zero(); LED_COUNT];
    let at = |angle: f32, r: f32| Point::new((center + r * angle.cos()) as i32, (center + r * angle.sin()) as i32);
    for (i, point) in points.iter_mut().enumerate().take(RING) {
        *point = at(i as f32 / RING as f32 * std::f32::consts::TAU, radius);
    }
    for spoke in 0..SPOKES {
        let angle = spoke as f32 / SPOKES as f32 * std::f32::consts::TAU;
        for step in 0..SPOKE_LEN {
            let r = radius * (SPOKE_LEN - step) as f32 / (SPOKE_LEN + 1) as f32;
            points[RING + spoke * SPOKE_LEN + step] = at(angle, r);
        }
    }
    points[HUB] = Point::new(center as i32, center as i32);
    points
}

fn render(
    display: &mut SimulatorDisplay<Rgb565>,
    leds: &PixelBuffer<LED_COUNT>,
    points: &[Point; LED_COUNT],
    status: &str,
) -> Result<(), std::convert::Infallible> {
    display.clear(Rgb565::BLACK)?;

    for (led, point) in leds.leds.iter().zip(points.iter()) {
        let color = Rgb565::new(led.r >> 3, led.g >> 2, led.b >> 3);
        let outline = Rgb565::new(2, 4, 2);
        Circle::with_center(*point, 7)
            .into_styled(PrimitiveStyle::with_fill(if led.is_black() { outline } else { color }))
            .draw(display)?;
    }

    let style = MonoTextStyle::new(&FONT_6X10, Rgb565::new(0, 31, 63));
    Text::with_baseline(status, Point::new(4, 4), style, Baseline::Top).draw(display)?;

    let instructions_style = MonoTextStyle::new(&FONT_6X10, Rgb565::new(0, 20, 40));
    Text::with_baseline(
        "F:Flow T:Trail S:Speed P:Pop D:Dump Q:Quit",
        Point::new(4, SCREEN as i32 - 12),
        instructions_style,
        Baseline::Top,
    )
    .draw(display)?;
    Ok(())
}

fn next_flow_rule(rule: FlowRule) -> FlowRule {
    match rule {
        FlowRule::Random => FlowRule::Priority,
        FlowRule::Priority => FlowRule::Split,
        FlowRule::Split => FlowRule::Random,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let graph = build_graph()?;
    let points = layout();

    let directions = [
        PriorityMask::new(CW),
        PriorityMask::new(CCW),
        PriorityMask::quad(INWARD, CW, 0, 0),
        PriorityMask::quad(OUTWARD, CCW, 0, 0),
    ];
    let mut settings: Settings<LED_COUNT> = Settings::new(8, 12, 6000, &directions)?;
    settings.trail_depth = 4;
    settings.split_directions = INWARD | OUTWARD;
    settings.prevent_reverse_flow = true;

    let mut system: ParticleSim<LED_COUNT, Rainbow> = ParticleSim::new(settings.clone())?;
    let mut leds: PixelBuffer<LED_COUNT> = PixelBuffer::new();

    let mut display = SimulatorDisplay::new(Size::new(SCREEN, SCREEN));
    let output_settings = OutputSettingsBuilder::new().scale(3).build();
    let mut window = Window::new("lightgraph - particle flow", &output_settings);

    let start = Instant::now();
    let target_fps = 60;
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps as f32);

    println!("=== lightgraph - particle flow on a LED graph ===");
    println!("Controls:");
    println!("  F: Cycle flow rule");
    println!("  T: Cycle trail depth");
    println!("  S: Cycle speed");
    println!("  P: Cycle max population");
    println!("  D: Dump particles to the log");
    println!("  Q: Quit");

    'main_loop: loop {
        let frame_start = Instant::now();
        let now = start.elapsed().as_millis() as u32;

        system.update(&graph, &mut leds, now)?;

        let status = format!(
            "{:?} trail {} speed {} live {}/{}",
            settings.flow_rule,
            settings.trail_depth,
            settings.starting_speed,
            system.live_count(),
            settings.max_population
        );
        render(&mut display, &leds, &points, &status)?;
        window.update(&display);

        for event in window.events() {
            match event {
                SimulatorEvent::Quit => break 'main_loop,
                SimulatorEvent::KeyDown { keycode, .. } => {
                    let key = format!("{:?}", keycode).to_lowercase();
                    match key.as_str() {
                        "f" => {
                            settings.flow_rule = next_flow_rule(settings.flow_rule);
                            system.update_settings(settings.clone())?;
                            info!("flow rule: {:?}", settings.flow_rule);
                        }
                        "t" => {
                            settings.trail_depth = (settings.trail_depth + 1) % 7;
                            system.update_settings(settings.clone())?;
                            info!("trail depth: {}", settings.trail_depth);
                        }
                        "s" => {
                            settings.starting_speed = if settings.starting_speed >= 40 { 4 } else { settings.starting_speed + 4 };
                            system.set_all_speed(settings.starting_speed);
                            info!("speed: {}", settings.starting_speed);
                        }
                        "p" => {
                            settings.max_population = if settings.max_population >= 32 { 1 } else { settings.max_population + 1 };
                            settings.max_spawn_per_second =
                                Settings::<LED_COUNT>::derived_spawn_rate(settings.max_population, settings.lifespan_ms);
                            system.update_settings(settings.clone())?;
                            info!("max population: {}", settings.max_population);
                        }
                        "d" => system.dump_particles(now),
                        "q" => break 'main_loop,
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        // Frame rate limiting
        let elapsed = frame_start.elapsed();
        if elapsed < frame_duration {
            thread::sleep(frame_duration - elapsed);
        }
    }

    println!("Thanks for watching the particles!");
    Ok(())
}
