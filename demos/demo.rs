//! Demo application showcasing the canvas engine
//!
//! Run with:
//!   cargo run --example demo
//!   cargo run --example demo -- --width 640 --height 480 --lenient
//!
//! Controls:
//!   L        - Force a render-target recreation (exercises recovery)
//!   Escape   - Exit

use canvas_engine::backend::types::{Color, EffectDescriptor, RectF};
use canvas_engine::bitmap::BitmapData;
use canvas_engine::scene::{BitmapLayer, CanvasScene, EffectLayer, OffscreenLayer};
use canvas_engine::{window, CanvasConfig, CanvasEngine, RecoveryPolicy, WgpuBackend};
use clap::Parser;
use glam::Vec2;
use winit::event::ElementState;
use winit::keyboard::KeyCode;

#[derive(Parser, Debug)]
#[command(about = "Canvas engine demo")]
struct Args {
    /// Window width in pixels
    #[arg(long, default_value_t = 200)]
    width: u32,

    /// Window height in pixels
    #[arg(long, default_value_t = 200)]
    height: u32,

    /// Disable vsync
    #[arg(long)]
    no_vsync: bool,

    /// Recreate resources on any frame failure, not just target loss
    #[arg(long)]
    lenient: bool,
}

/// Red fill, green rectangle through the offscreen path, a highlighted
/// copy of the offscreen content below it, and a checkerboard bitmap.
fn build_scene() -> CanvasScene {
    let mut scene = CanvasScene::new(Color::gray(0.1));
    let red = scene.add_brush(Color::RED);
    let green = scene.add_brush(Color::GREEN);

    scene.add_fill(RectF::new(8.0, 8.0, 64.0, 64.0), red);

    scene.offscreen = Some(
        OffscreenLayer::new(64, 64, RectF::new(80.0, 8.0, 64.0, 64.0))
            .with_fill(RectF::new(0.0, 0.0, 64.0, 64.0), green),
    );

    scene.effect = Some(EffectLayer::new(
        EffectDescriptor {
            tint: Color::new(1.0, 1.0, 0.0, 1.0),
            strength: 0.4,
        },
        Vec2::new(80.0, 80.0),
    ));

    scene.add_bitmap(BitmapLayer::new(
        BitmapData::checkerboard(64, [40, 40, 40, 255], [200, 200, 200, 255]),
        RectF::new(8.0, 80.0, 64.0, 64.0),
    ));

    scene
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = CanvasConfig {
        title: "Canvas Engine Demo".to_string(),
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        recovery: if args.lenient {
            RecoveryPolicy::Lenient
        } else {
            RecoveryPolicy::Strict
        },
    };

    let build_config = config.clone();
    let result = window::run(
        &config.title,
        config.width,
        config.height,
        move |window| CanvasEngine::new(window, build_scene(), &build_config),
        |engine: &mut CanvasEngine<WgpuBackend>, code, state| {
            if code == KeyCode::KeyL && state == ElementState::Pressed {
                log::info!("forcing render target recreation");
                if let Err(err) = engine.create_resources() {
                    log::error!("recreation failed: {err}");
                }
            }
        },
    );

    if let Err(err) = result {
        log::error!("demo failed: {err}");
        std::process::exit(1);
    }
}
