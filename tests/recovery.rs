//! Recovery-protocol tests against a scripted backend.
//!
//! The backend records every operation in order and can inject failures at
//! begin-draw and end-draw, which is how device loss is exercised without a
//! GPU.

use canvas_engine::backend::traits::*;
use canvas_engine::backend::types::*;
use canvas_engine::bitmap::BitmapData;
use canvas_engine::scene::{CanvasScene, EffectLayer, OffscreenLayer};
use canvas_engine::{CanvasEngine, RecoveryPolicy};
use glam::Vec2;
use std::collections::{HashSet, VecDeque};

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Op {
    RecreateTarget,
    CreateBrush(u64),
    CreateBitmap(u64),
    CreateOffscreen(u64),
    CreateEffect(u64),
    BeginDraw,
    Clear(Color),
    FillRect { rect: RectF, brush: u64 },
    DrawBitmap { bitmap: u64 },
    BeginOffscreen(u64),
    EndOffscreen,
    DrawOffscreen { target: u64, dest: RectF },
    DrawEffect { effect: u64 },
    EndDraw,
    Destroy(u64),
}

#[derive(Default)]
struct ScriptedBackend {
    next_id: u64,
    live: HashSet<u64>,
    destroyed: HashSet<u64>,
    double_destroys: u32,
    targets_created: u32,
    begin_draw_script: VecDeque<Option<BackendError>>,
    end_draw_script: VecDeque<Option<BackendError>>,
    fail_offscreen_creation: bool,
    effects_unsupported: bool,
    ops: Vec<Op>,
    recording: bool,
    width: u32,
    height: u32,
}

impl ScriptedBackend {
    fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.live.insert(self.next_id);
        self.next_id
    }

    fn destroy(&mut self, id: u64) {
        self.ops.push(Op::Destroy(id));
        if self.live.remove(&id) {
            self.destroyed.insert(id);
        } else if self.destroyed.contains(&id) {
            self.double_destroys += 1;
        }
    }

    /// Inject a result for the next end-draw (front of the queue first)
    fn script_end_draw(&mut self, result: Option<BackendError>) {
        self.end_draw_script.push_back(result);
    }

    fn op_index(&self, op: &Op) -> Option<usize> {
        self.ops.iter().position(|o| o == op)
    }
}

impl CanvasBackend for ScriptedBackend {
    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn recreate_target(&mut self, width: u32, height: u32) -> BackendResult<()> {
        self.targets_created += 1;
        self.width = width;
        self.height = height;
        self.ops.push(Op::RecreateTarget);
        Ok(())
    }

    fn create_solid_brush(&mut self, _color: Color) -> BackendResult<BrushHandle> {
        let id = self.mint();
        self.ops.push(Op::CreateBrush(id));
        Ok(BrushHandle::from_raw(id))
    }

    fn create_bitmap(&mut self, _data: &BitmapData) -> BackendResult<BitmapHandle> {
        let id = self.mint();
        self.ops.push(Op::CreateBitmap(id));
        Ok(BitmapHandle::from_raw(id))
    }

    fn create_offscreen_target(
        &mut self,
        _desc: &OffscreenDescriptor,
    ) -> BackendResult<OffscreenHandle> {
        if self.fail_offscreen_creation {
            return Err(BackendError::OffscreenCreationFailed("scripted".into()));
        }
        let id = self.mint();
        self.ops.push(Op::CreateOffscreen(id));
        Ok(OffscreenHandle::from_raw(id))
    }

    fn create_effect(
        &mut self,
        _desc: &EffectDescriptor,
        input: OffscreenHandle,
    ) -> BackendResult<EffectHandle> {
        if self.effects_unsupported {
            return Err(BackendError::EffectsUnsupported);
        }
        if !self.live.contains(&input.raw()) {
            return Err(BackendError::EffectCreationFailed(
                "unknown offscreen input".into(),
            ));
        }
        let id = self.mint();
        self.ops.push(Op::CreateEffect(id));
        Ok(EffectHandle::from_raw(id))
    }

    fn begin_draw(&mut self) -> BackendResult<()> {
        if self.recording {
            return Err(BackendError::FrameInProgress);
        }
        if let Some(Some(err)) = self.begin_draw_script.pop_front() {
            return Err(err);
        }
        self.recording = true;
        self.ops.push(Op::BeginDraw);
        Ok(())
    }

    fn clear(&mut self, color: Color) {
        self.ops.push(Op::Clear(color));
    }

    fn fill_rect(&mut self, rect: RectF, brush: BrushHandle) {
        self.ops.push(Op::FillRect {
            rect,
            brush: brush.raw(),
        });
    }

    fn draw_bitmap(
        &mut self,
        bitmap: BitmapHandle,
        _source: RectF,
        _dest: RectF,
        _opacity: f32,
        _interpolation: BitmapInterpolation,
    ) {
        self.ops.push(Op::DrawBitmap {
            bitmap: bitmap.raw(),
        });
    }

    fn begin_offscreen_draw(&mut self, target: OffscreenHandle) {
        self.ops.push(Op::BeginOffscreen(target.raw()));
    }

    fn end_offscreen_draw(&mut self) -> BackendResult<()> {
        self.ops.push(Op::EndOffscreen);
        Ok(())
    }

    fn draw_offscreen(
        &mut self,
        target: OffscreenHandle,
        _source: RectF,
        dest: RectF,
        _opacity: f32,
        _interpolation: BitmapInterpolation,
    ) {
        self.ops.push(Op::DrawOffscreen {
            target: target.raw(),
            dest,
        });
    }

    fn draw_effect(
        &mut self,
        effect: EffectHandle,
        _offset: Vec2,
        _composite: CompositeMode,
        _interpolation: BitmapInterpolation,
    ) {
        self.ops.push(Op::DrawEffect {
            effect: effect.raw(),
        });
    }

    fn end_draw(&mut self) -> BackendResult<()> {
        self.recording = false;
        self.ops.push(Op::EndDraw);
        if let Some(Some(err)) = self.end_draw_script.pop_front() {
            return Err(err);
        }
        Ok(())
    }

    fn destroy_brush(&mut self, brush: BrushHandle) {
        self.destroy(brush.raw());
    }

    fn destroy_bitmap(&mut self, bitmap: BitmapHandle) {
        self.destroy(bitmap.raw());
    }

    fn destroy_offscreen_target(&mut self, target: OffscreenHandle) {
        self.destroy(target.raw());
    }

    fn destroy_effect(&mut self, effect: EffectHandle) {
        self.destroy(effect.raw());
    }
}

// ---------------------------------------------------------------------------
// Scene and engine helpers
// ---------------------------------------------------------------------------

/// Red fill at (8,8)-(72,72), green rectangle through the offscreen path
/// landing at (80,8)-(144,72), on a dark gray background.
fn scenario_scene() -> CanvasScene {
    let mut scene = CanvasScene::new(Color::gray(0.1));
    let red = scene.add_brush(Color::RED);
    let green = scene.add_brush(Color::GREEN);

    scene.add_fill(RectF::new(8.0, 8.0, 64.0, 64.0), red);
    scene.offscreen = Some(
        OffscreenLayer::new(64, 64, RectF::new(80.0, 8.0, 64.0, 64.0))
            .with_fill(RectF::new(0.0, 0.0, 64.0, 64.0), green),
    );

    scene
}

fn scenario_engine(policy: RecoveryPolicy) -> CanvasEngine<ScriptedBackend> {
    CanvasEngine::from_backend(ScriptedBackend::default(), scenario_scene(), policy, 200, 200)
        .expect("engine construction")
}

// ---------------------------------------------------------------------------
// Steady state
// ---------------------------------------------------------------------------

#[test]
fn steady_state_creates_resources_once() {
    let mut engine = scenario_engine(RecoveryPolicy::Strict);

    for _ in 0..5 {
        engine.render_frame(200, 200).expect("frame");
    }

    assert_eq!(engine.backend().targets_created, 1);
    assert_eq!(engine.generation(), 1);

    let brush_creations = engine
        .backend()
        .ops
        .iter()
        .filter(|op| matches!(op, Op::CreateBrush(_)))
        .count();
    assert_eq!(brush_creations, 2);
}

#[test]
fn scenario_frame_draw_sequence() {
    let mut engine = scenario_engine(RecoveryPolicy::Strict);
    let res = engine.device_resources().expect("resources");
    let red = res.brushes()[0].raw();
    let green = res.brushes()[1].raw();
    let offscreen = res.offscreen().expect("offscreen").raw();

    engine.render_frame(200, 200).expect("frame");

    let backend = engine.backend();
    assert_eq!(backend.targets_created, 1);

    // Primary content
    assert!(backend.op_index(&Op::Clear(Color::gray(0.1))).is_some());
    assert!(backend
        .op_index(&Op::FillRect {
            rect: RectF::new(8.0, 8.0, 64.0, 64.0),
            brush: red,
        })
        .is_some());

    // Offscreen content and composite destination
    assert!(backend
        .op_index(&Op::FillRect {
            rect: RectF::new(0.0, 0.0, 64.0, 64.0),
            brush: green,
        })
        .is_some());
    assert!(backend
        .op_index(&Op::DrawOffscreen {
            target: offscreen,
            dest: RectF::new(80.0, 8.0, 64.0, 64.0),
        })
        .is_some());

    assert_eq!(backend.ops.last(), Some(&Op::EndDraw));
}

#[test]
fn offscreen_completes_before_primary_consumes_it() {
    let mut engine = scenario_engine(RecoveryPolicy::Strict);
    let offscreen = engine
        .device_resources()
        .and_then(|res| res.offscreen())
        .expect("offscreen")
        .raw();

    engine.render_frame(200, 200).expect("frame");

    let backend = engine.backend();
    let begin = backend
        .op_index(&Op::BeginOffscreen(offscreen))
        .expect("begin offscreen");
    let end = backend.op_index(&Op::EndOffscreen).expect("end offscreen");
    let consume = backend
        .ops
        .iter()
        .position(|op| matches!(op, Op::DrawOffscreen { .. }))
        .expect("draw offscreen");

    assert!(begin < end, "offscreen session must open before it closes");
    assert!(
        end < consume,
        "offscreen session must fully complete before its bitmap is drawn"
    );
}

// ---------------------------------------------------------------------------
// Device loss and recovery
// ---------------------------------------------------------------------------

#[test]
fn target_loss_recreates_once_with_new_handles() {
    let mut engine = scenario_engine(RecoveryPolicy::Strict);
    let old_res = engine.device_resources().expect("resources");
    let old_brushes: Vec<u64> = old_res.brushes().iter().map(|b| b.raw()).collect();
    let old_offscreen = old_res.offscreen().expect("offscreen").raw();

    engine.render_frame(200, 200).expect("frame 1");

    // Frame 2 loses the target at end-draw.
    engine
        .backend_mut()
        .script_end_draw(Some(BackendError::RecreateTarget));
    engine.render_frame(200, 200).expect("frame 2 recovers");

    assert_eq!(engine.backend().targets_created, 2);
    assert_eq!(engine.generation(), 2);

    // Every dependent resource is a distinct new instance.
    let new_res = engine.device_resources().expect("resources");
    for (old, new) in old_brushes.iter().zip(new_res.brushes()) {
        assert_ne!(*old, new.raw());
    }
    assert_ne!(old_offscreen, new_res.offscreen().expect("offscreen").raw());

    // The old set was released.
    let backend = engine.backend();
    for old in old_brushes {
        assert!(backend.op_index(&Op::Destroy(old)).is_some());
    }
    assert!(backend.op_index(&Op::Destroy(old_offscreen)).is_some());

    // Frame 3 proceeds normally against the stable backend: recovery
    // terminates.
    engine.render_frame(200, 200).expect("frame 3");
    assert_eq!(engine.backend().targets_created, 2);
    assert_eq!(engine.generation(), 2);
}

#[test]
fn recreation_happens_before_next_frame_begins() {
    let mut engine = scenario_engine(RecoveryPolicy::Strict);
    engine
        .backend_mut()
        .script_end_draw(Some(BackendError::RecreateTarget));

    engine.render_frame(200, 200).expect("frame recovers inline");

    // The recreate happened inside the failing render_frame call, so the op
    // log shows it after the failed EndDraw and before any later BeginDraw.
    let backend = engine.backend();
    let failed_end = backend.op_index(&Op::EndDraw).expect("end draw");
    let recreate = backend.ops[failed_end..]
        .iter()
        .position(|op| *op == Op::RecreateTarget)
        .expect("inline recreation");
    assert!(recreate > 0);

    let begins = backend
        .ops
        .iter()
        .filter(|op| matches!(op, Op::BeginDraw))
        .count();
    assert_eq!(begins, 1, "no frame begins until the next render call");
}

#[test]
fn acquire_loss_recovers_like_end_draw_loss() {
    let mut engine = scenario_engine(RecoveryPolicy::Strict);
    engine
        .backend_mut()
        .begin_draw_script
        .push_back(Some(BackendError::RecreateTarget));

    engine.render_frame(200, 200).expect("frame recovers");
    assert_eq!(engine.backend().targets_created, 2);

    engine.render_frame(200, 200).expect("next frame");
    assert_eq!(engine.backend().targets_created, 2);
}

#[test]
fn strict_policy_surfaces_generic_failure() {
    let mut engine = scenario_engine(RecoveryPolicy::Strict);
    engine
        .backend_mut()
        .script_end_draw(Some(BackendError::DrawFailed("scripted".into())));

    let result = engine.render_frame(200, 200);
    assert!(matches!(result, Err(BackendError::DrawFailed(_))));

    // No recreation happened.
    assert_eq!(engine.backend().targets_created, 1);
    assert_eq!(engine.generation(), 1);
}

#[test]
fn lenient_policy_recreates_on_generic_failure() {
    let mut engine = scenario_engine(RecoveryPolicy::Lenient);
    engine
        .backend_mut()
        .script_end_draw(Some(BackendError::DrawFailed("scripted".into())));

    engine.render_frame(200, 200).expect("frame recovers");
    assert_eq!(engine.backend().targets_created, 2);
    assert_eq!(engine.generation(), 2);
}

// ---------------------------------------------------------------------------
// Shutdown and release accounting
// ---------------------------------------------------------------------------

#[test]
fn shutdown_releases_everything_exactly_once() {
    let mut engine = scenario_engine(RecoveryPolicy::Strict);
    engine.render_frame(200, 200).expect("frame");

    engine.shutdown();
    assert!(engine.backend().live.is_empty());
    assert_eq!(engine.backend().double_destroys, 0);

    // Second shutdown is a no-op.
    engine.shutdown();
    assert_eq!(engine.backend().double_destroys, 0);
}

#[test]
fn partial_creation_rolls_back_and_shuts_down_cleanly() {
    // Start without the offscreen layer so construction succeeds.
    let mut scene = CanvasScene::new(Color::gray(0.1));
    let red = scene.add_brush(Color::RED);
    scene.add_fill(RectF::new(8.0, 8.0, 64.0, 64.0), red);

    let mut engine = CanvasEngine::from_backend(
        ScriptedBackend::default(),
        scene,
        RecoveryPolicy::Strict,
        200,
        200,
    )
    .expect("engine construction");

    // Now ask for an offscreen target the backend refuses to create.
    engine.scene_mut().offscreen = Some(OffscreenLayer::new(
        64,
        64,
        RectF::new(80.0, 8.0, 64.0, 64.0),
    ));
    engine.backend_mut().fail_offscreen_creation = true;

    let result = engine.create_resources();
    assert!(matches!(
        result,
        Err(BackendError::OffscreenCreationFailed(_))
    ));

    // Everything created before the failure was rolled back.
    assert!(engine.device_resources().is_none());
    assert!(engine.backend().live.is_empty());
    assert_eq!(engine.backend().double_destroys, 0);

    // Shutdown after the failed creation is still safe.
    engine.shutdown();
    assert_eq!(engine.backend().double_destroys, 0);
}

#[test]
fn effect_on_unsupported_target_surfaces_creation_error() {
    let mut scene = scenario_scene();
    scene.effect = Some(EffectLayer::new(
        EffectDescriptor::default(),
        Vec2::new(80.0, 80.0),
    ));

    let mut backend = ScriptedBackend::default();
    backend.effects_unsupported = true;

    // Creation failure is the caller's problem; no recovery is attempted.
    let result = CanvasEngine::from_backend(backend, scene, RecoveryPolicy::Strict, 200, 200);
    assert!(matches!(
        result,
        Err(BackendError::EffectsUnsupported)
    ));
}

#[test]
fn recreation_is_atomic_all_resources_same_generation() {
    let mut engine = scenario_engine(RecoveryPolicy::Strict);

    engine
        .backend_mut()
        .script_end_draw(Some(BackendError::RecreateTarget));
    engine.render_frame(200, 200).expect("frame recovers");

    // After recovery there is exactly one live copy of each resource: two
    // brushes and one offscreen target.
    assert_eq!(engine.backend().live.len(), 3);

    let res = engine.device_resources().expect("resources");
    assert_eq!(res.generation(), engine.generation());
    assert_eq!(res.brushes().len(), 2);
    assert!(res.offscreen().is_some());
}
