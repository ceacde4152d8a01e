//! End-to-end frame loop tests on a headless surface.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{Mat4, Vec4};
use vkframe_renderer::{FrameState, FrameUniforms, RenderError, Renderer};

use common::{QuadScene, try_renderer};

fn fence_signaled(renderer: &Renderer, slot: usize) -> bool {
    renderer
        .swapchain()
        .slots()
        .get(slot)
        .expect("Slot out of range")
        .fence()
        .is_signaled()
        .expect("Fence query failed")
}

#[test]
fn test_five_frames_cycle_two_slots() {
    let Some(mut renderer) = try_renderer() else {
        return;
    };
    let scene = QuadScene::new(&renderer).expect("Failed to build quad scene");

    let mut fences = HashSet::new();
    for frame in 0..5 {
        renderer.begin_frame().expect("begin_frame failed");
        fences.insert(renderer.current_fence());

        // The slot's fence was waited on and is only reset at submit.
        let current = renderer.current_slot();
        assert!(fence_signaled(&renderer, current));
        if frame == 0 {
            // The other slot has never been submitted.
            assert!(fence_signaled(&renderer, 1 - current));
        }

        let uniforms = FrameUniforms::new(Mat4::IDENTITY, Vec4::ONE, frame as f32);
        uniforms
            .write_to(&scene.uniforms[renderer.current_slot()])
            .expect("Uniform write failed");

        scene.draw(&mut renderer).expect("draw failed");
        renderer.end_frame().expect("end_frame failed");
        renderer.present().expect("present failed");
        assert_eq!(renderer.frame_state(), FrameState::Idle);
    }

    assert_eq!(fences.len(), 2, "Frames should alternate between two fences");
    assert_eq!(renderer.frame_count(), 5);

    renderer.wait_idle().expect("wait_idle failed");
    assert!(fence_signaled(&renderer, 0));
    assert!(fence_signaled(&renderer, 1));
}

#[test]
fn test_resize_drops_old_framebuffers() {
    let Some(mut renderer) = try_renderer() else {
        return;
    };
    let scene = QuadScene::new(&renderer).expect("Failed to build quad scene");

    renderer.begin_frame().expect("begin_frame failed");
    scene.draw(&mut renderer).expect("draw failed");
    renderer.end_frame().expect("end_frame failed");
    renderer.present().expect("present failed");
    assert_eq!(renderer.cached_framebuffer_sets(), 1);

    let generation = renderer.swapchain().generation();
    renderer.resize(48, 48);

    // No draw this frame, so nothing rebuilds the set for the new swapchain.
    renderer.begin_frame().expect("begin_frame failed");
    assert!(renderer.swapchain().generation() > generation);
    assert_eq!(renderer.cached_framebuffer_sets(), 0);
    renderer.end_frame().expect("end_frame failed");
    renderer.present().expect("present failed");

    renderer.begin_frame().expect("begin_frame failed");
    scene.draw(&mut renderer).expect("draw failed");
    assert_eq!(renderer.cached_framebuffer_sets(), 1);
    renderer.end_frame().expect("end_frame failed");
    renderer.present().expect("present failed");

    renderer.wait_idle().expect("wait_idle failed");
}

#[test]
fn test_draw_outside_frame_is_rejected() {
    let Some(mut renderer) = try_renderer() else {
        return;
    };
    let scene = QuadScene::new(&renderer).expect("Failed to build quad scene");

    let result = scene.draw(&mut renderer);
    assert!(matches!(
        result,
        Err(RenderError::InvalidFrameState {
            operation: "draw",
            state: FrameState::Idle
        })
    ));

    assert!(matches!(
        renderer.present(),
        Err(RenderError::InvalidFrameState { .. })
    ));
    assert_eq!(renderer.frame_count(), 0);

    renderer.wait_idle().expect("wait_idle failed");
}

#[test]
fn test_empty_frame_presents() {
    let Some(mut renderer) = try_renderer() else {
        return;
    };

    for _ in 0..3 {
        renderer.begin_frame().expect("begin_frame failed");
        assert!(matches!(
            renderer.begin_frame(),
            Err(RenderError::InvalidFrameState { .. })
        ));
        renderer.end_frame().expect("end_frame failed");
        renderer.present().expect("present failed");
    }
    assert_eq!(renderer.frame_count(), 3);

    renderer.wait_idle().expect("wait_idle failed");
}

#[test]
fn test_queued_actions_run_at_frame_start() {
    let Some(mut renderer) = try_renderer() else {
        return;
    };
    let ran = Arc::new(AtomicUsize::new(0));

    let sender = renderer.actions();
    let counter = ran.clone();
    sender
        .enqueue(move |r: &mut Renderer| {
            assert_eq!(r.frame_state(), FrameState::Idle);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .expect("enqueue failed");
    sender
        .enqueue(|r: &mut Renderer| {
            r.resize(32, 32);
            Ok(())
        })
        .expect("enqueue failed");
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    let generation = renderer.swapchain().generation();
    renderer.begin_frame().expect("begin_frame failed");
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert!(renderer.swapchain().generation() > generation);

    renderer.end_frame().expect("end_frame failed");
    renderer.present().expect("present failed");
    renderer.wait_idle().expect("wait_idle failed");
}
