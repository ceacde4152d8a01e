//! Swapchain error paths against a headless surface.

mod common;

use ash::vk;
use vkframe_rhi::RhiError;
use vkframe_rhi::image::record_transition;
use vkframe_rhi::swapchain::{Swapchain, SwapchainState};

use common::headless_swapchain;

/// Records a frame that only hands the image back for presentation.
fn record_empty_frame(swapchain: &mut Swapchain, image_index: u32) {
    let image = swapchain.image(image_index).expect("Image index out of range");
    swapchain
        .current_command_buffer_mut()
        .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        .expect("Failed to begin recording");
    record_transition(
        swapchain.current_command_buffer(),
        image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );
    swapchain
        .current_command_buffer_mut()
        .end()
        .expect("Failed to end recording");
}

#[test]
fn test_unrecorded_submit_leaves_fence_signaled() {
    let Some(mut swapchain) = headless_swapchain(2) else {
        return;
    };
    let slot = swapchain.current_slot();
    let generation = swapchain.generation();

    let index = swapchain.acquire_next_image().expect("First acquire failed");
    let result = swapchain.submit_and_present(index);
    assert!(matches!(result, Err(RhiError::CommandBufferNotEnded)));

    // The slot was not consumed and its fence was never reset.
    assert_eq!(swapchain.current_slot(), slot);
    assert_eq!(swapchain.state(), SwapchainState::Stale);
    assert!(
        swapchain
            .slots()
            .current()
            .fence()
            .is_signaled()
            .expect("Fence query failed")
    );

    // Returns instead of waiting forever on the slot fence.
    let index = swapchain.acquire_next_image().expect("Second acquire failed");
    assert!((index as usize) < swapchain.image_count());
    assert_eq!(swapchain.generation(), generation + 1);

    record_empty_frame(&mut swapchain, index);
    swapchain
        .submit_and_present(index)
        .expect("Recorded frame failed to present");
    assert_eq!(swapchain.state(), SwapchainState::Ready);
    assert_ne!(swapchain.current_slot(), slot);
}

#[test]
fn test_abandoned_frame_rebuilds_on_next_acquire() {
    let Some(mut swapchain) = headless_swapchain(2) else {
        return;
    };
    assert!(matches!(
        swapchain.abandon_frame(),
        Err(RhiError::SwapchainError(_))
    ));

    let generation = swapchain.generation();
    swapchain.acquire_next_image().expect("First acquire failed");
    assert_eq!(swapchain.state(), SwapchainState::Acquiring);

    swapchain.abandon_frame().expect("Abandon failed");
    assert_eq!(swapchain.state(), SwapchainState::Stale);

    let index = swapchain.acquire_next_image().expect("Acquire after abandon failed");
    assert_eq!(swapchain.generation(), generation + 1);

    record_empty_frame(&mut swapchain, index);
    swapchain
        .submit_and_present(index)
        .expect("Recorded frame failed to present");
}
