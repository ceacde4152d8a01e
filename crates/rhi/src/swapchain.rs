//! Swapchain, frame slots and presentation.
//!
//! The [`Swapchain`] owns the surface, the presentable images and their
//! views, and one [`FrameSlot`] per frame in flight. A frame goes through:
//!
//! ```text
//! acquire_next_image()   wait slot fence, acquire (recreating on OutOfDate)
//! <record into current_command_buffer_mut()>
//! submit_and_present()   reset fence, submit, present, advance slot
//! ```
//!
//! `OutOfDate` and `Suboptimal` results are handled here by recreating the
//! swapchain and never reach the caller.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use crate::command::{CommandBuffer, CommandPool};
use crate::device::{Device, QueueKind, Submission};
use crate::error::{RhiError, RhiResult};
use crate::frame::{FrameFence, FrameRing};
use crate::image::create_color_view;
use crate::surface::Surface;
use crate::sync::{Fence, Semaphore, WAIT_FOREVER};

/// How many times an `OutOfDate` acquire is retried after recreation.
pub const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Surface support queried for one adapter.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(physical_device: vk::PhysicalDevice, surface: &Surface) -> RhiResult<Self> {
        let loader = surface.loader();
        let handle = surface.handle();
        let capabilities = unsafe {
            loader.get_physical_device_surface_capabilities(physical_device, handle)?
        };
        let formats =
            unsafe { loader.get_physical_device_surface_formats(physical_device, handle)? };
        let present_modes =
            unsafe { loader.get_physical_device_surface_present_modes(physical_device, handle)? };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Lifecycle of a [`Swapchain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    Ready,
    Acquiring,
    Presenting,
    /// Needs recreation before the next acquire.
    Stale,
}

/// Result of one raw acquire call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    Suboptimal(u32),
    OutOfDate,
}

/// Image index handed back by [`acquire_with_recovery`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The image is usable but the swapchain should be rebuilt after present.
    pub suboptimal: bool,
}

/// The two operations acquire recovery needs from a presentation engine.
pub trait PresentationEngine {
    fn try_acquire(&mut self) -> RhiResult<AcquireOutcome>;
    fn recreate_for_acquire(&mut self) -> RhiResult<()>;
}

/// Acquires an image, recreating on `OutOfDate` up to
/// [`MAX_ACQUIRE_ATTEMPTS`] times. Any error from the engine is returned as is.
pub fn acquire_with_recovery(
    engine: &mut impl PresentationEngine,
) -> RhiResult<AcquiredImage> {
    for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
        match engine.try_acquire()? {
            AcquireOutcome::Ready(index) => {
                return Ok(AcquiredImage {
                    index,
                    suboptimal: false,
                });
            }
            AcquireOutcome::Suboptimal(index) => {
                debug!("Acquired image {} from a suboptimal swapchain", index);
                return Ok(AcquiredImage {
                    index,
                    suboptimal: true,
                });
            }
            AcquireOutcome::OutOfDate => {
                warn!(
                    "Swapchain out of date on acquire (attempt {}/{}), recreating",
                    attempt, MAX_ACQUIRE_ATTEMPTS
                );
                engine.recreate_for_acquire()?;
            }
        }
    }

    Err(RhiError::SwapchainError(format!(
        "swapchain still out of date after {} recreations",
        MAX_ACQUIRE_ATTEMPTS
    )))
}

/// Per-frame-in-flight recording and pacing state.
pub struct FrameSlot {
    command_buffer: CommandBuffer,
    pool: CommandPool,
    image_available: Semaphore,
    in_flight: Fence,
}

impl FrameSlot {
    fn new(device: &Arc<Device>) -> RhiResult<Self> {
        let pool = CommandPool::new_reusable(
            device.clone(),
            device.queue_family(QueueKind::Graphics),
        )?;
        let command_buffer = pool.allocate()?;
        Ok(Self {
            command_buffer,
            pool,
            image_available: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
        })
    }

    /// Replaces the command pool and semaphore, keeping the fence.
    fn rebuild(&mut self, device: &Arc<Device>) -> RhiResult<()> {
        let pool = CommandPool::new_reusable(
            device.clone(),
            device.queue_family(QueueKind::Graphics),
        )?;
        self.command_buffer = pool.allocate()?;
        self.pool = pool;
        self.image_available = Semaphore::new(device.clone())?;
        Ok(())
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn fence(&self) -> &Fence {
        &self.in_flight
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }
}

impl FrameFence for FrameSlot {
    fn wait(&self) -> RhiResult<()> {
        self.in_flight.wait()
    }

    fn reset(&self) -> RhiResult<()> {
        self.in_flight.reset()
    }
}

/// Vulkan swapchain plus the frame slots that feed it.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    preferred_present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    requested_extent: vk::Extent2D,
    state: SwapchainState,
    /// Set by a suboptimal acquire; forces recreation after present.
    pending_stale: bool,
    generation: u64,
    slots: FrameRing<FrameSlot>,
    /// One per swapchain image, signaled by the submit and waited by present.
    render_finished: Vec<Semaphore>,
    /// Frame slot last submitted against each image.
    images_in_flight: Vec<Option<usize>>,
    surface: Surface,
}

/// Handles produced by one `vkCreateSwapchainKHR` call.
struct Built {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Builds the swapchain, its views and `frames_in_flight` frame slots.
    ///
    /// `preferred_present_mode` is used when the surface supports it, FIFO
    /// otherwise.
    pub fn new(
        device: Arc<Device>,
        surface: Surface,
        extent: vk::Extent2D,
        frames_in_flight: usize,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> RhiResult<Self> {
        if !device.swapchain_enabled() {
            return Err(RhiError::SwapchainError(
                "device was created without VK_KHR_swapchain".to_string(),
            ));
        }

        let loader = ash::khr::swapchain::Device::new(device.instance().handle(), device.handle());
        let built = build(
            &device,
            &loader,
            &surface,
            extent,
            preferred_present_mode,
            vk::SwapchainKHR::null(),
        )?;

        let slots = (0..frames_in_flight)
            .map(|_| FrameSlot::new(&device))
            .collect::<RhiResult<Vec<_>>>()?;
        let slots = FrameRing::new(slots)?;
        let render_finished = create_semaphores(&device, built.images.len())?;
        let images_in_flight = vec![None; built.images.len()];

        info!(
            "Swapchain ready: {} images, {} frames in flight",
            built.images.len(),
            slots.len()
        );

        Ok(Self {
            device,
            loader,
            swapchain: built.swapchain,
            images: built.images,
            image_views: built.image_views,
            format: built.format,
            present_mode: built.present_mode,
            preferred_present_mode,
            extent: built.extent,
            requested_extent: extent,
            state: SwapchainState::Ready,
            pending_stale: false,
            generation: 0,
            slots,
            render_finished,
            images_in_flight,
            surface,
        })
    }

    // ========================================================================
    // Frame operations
    // ========================================================================

    /// Waits for the current slot's previous frame, then acquires an image.
    ///
    /// Blocks without a timeout in both waits. An `OutOfDate` result is
    /// recovered by recreating before this returns. A `Suboptimal` image is
    /// still returned and rendered; recreation is deferred until after its
    /// present, so the acquired image and its semaphore are never thrown away.
    pub fn acquire_next_image(&mut self) -> RhiResult<u32> {
        match self.state {
            SwapchainState::Ready | SwapchainState::Stale => {}
            other => {
                return Err(RhiError::SwapchainError(format!(
                    "acquire_next_image called in state {:?}",
                    other
                )));
            }
        }

        self.slots.wait_current()?;

        if self.state == SwapchainState::Stale {
            self.recreate(self.requested_extent)?;
        }

        self.state = SwapchainState::Acquiring;
        let acquired = match acquire_with_recovery(self) {
            Ok(acquired) => acquired,
            Err(e) => {
                self.state = SwapchainState::Ready;
                return Err(e);
            }
        };

        if acquired.suboptimal {
            self.pending_stale = true;
        }
        Ok(acquired.index)
    }

    /// Submits the current slot's command buffer and presents `image_index`.
    ///
    /// Recreates the swapchain afterwards if presentation reported it out of
    /// date or suboptimal.
    pub fn submit_and_present(&mut self, image_index: u32) -> RhiResult<()> {
        let result = self.submit_and_present_inner(image_index);
        if result.is_err()
            && matches!(
                self.state,
                SwapchainState::Acquiring | SwapchainState::Presenting
            )
        {
            self.state = SwapchainState::Ready;
        }
        result
    }

    /// Gives up on the acquired image without presenting it.
    ///
    /// The image-available semaphore is consumed by an empty submission and
    /// the swapchain is marked stale. The next acquire rebuilds it, which
    /// returns the unpresented image and replaces the slot's command buffer.
    pub fn abandon_frame(&mut self) -> RhiResult<()> {
        if self.state != SwapchainState::Acquiring {
            return Err(RhiError::SwapchainError(format!(
                "abandon_frame called in state {:?}",
                self.state
            )));
        }
        self.state = SwapchainState::Stale;
        self.pending_stale = false;

        let wait = [(
            self.slots.current().image_available(),
            vk::PipelineStageFlags::ALL_COMMANDS,
        )];
        let submission = Submission {
            wait: &wait,
            ..Default::default()
        };
        self.device
            .submit(QueueKind::Graphics, &submission, vk::Fence::null())?;

        warn!(
            "Abandoned frame on slot {}, swapchain will be rebuilt",
            self.slots.current_index()
        );
        Ok(())
    }

    fn submit_and_present_inner(&mut self, image_index: u32) -> RhiResult<()> {
        if self.state != SwapchainState::Acquiring {
            return Err(RhiError::SwapchainError(format!(
                "submit_and_present called in state {:?}",
                self.state
            )));
        }
        // Both checks run before the fence reset. A reset fence with nothing
        // submitted behind it never signals again.
        let image = image_index as usize;
        if image >= self.images.len() {
            self.abandon_frame()?;
            return Err(RhiError::InvalidHandle(format!(
                "swapchain image index {} out of range",
                image_index
            )));
        }
        if !self.slots.current().command_buffer().is_executable() {
            self.abandon_frame()?;
            return Err(RhiError::CommandBufferNotEnded);
        }

        let current = self.slots.current_index();
        if let Some(previous) = self.images_in_flight[image] {
            if previous != current {
                if let Some(slot) = self.slots.get(previous) {
                    slot.wait()?;
                }
            }
        }
        self.images_in_flight[image] = Some(current);

        self.state = SwapchainState::Presenting;
        let slot = self.slots.current();
        let render_finished = self.render_finished[image].handle();

        slot.reset()?;
        let submission = Submission {
            command_buffers: &[slot.command_buffer()],
            wait: &[(
                slot.image_available(),
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )],
            signal: &[render_finished],
        };
        self.device
            .submit(QueueKind::Graphics, &submission, slot.fence().handle())?;

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [render_finished];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = self.device.with_queue(QueueKind::Present, |queue| unsafe {
            self.loader.queue_present(queue, &present_info)
        });
        self.slots.advance();

        let needs_recreate = match result {
            Ok(suboptimal) => suboptimal || self.pending_stale,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(e.into()),
        };

        self.state = SwapchainState::Ready;
        if needs_recreate {
            debug!("Swapchain stale after present, recreating");
            self.recreate(self.requested_extent)?;
        }
        Ok(())
    }

    /// Marks the swapchain for recreation at `extent` before the next acquire.
    pub fn request_resize(&mut self, extent: vk::Extent2D) {
        if extent.width == 0 || extent.height == 0 {
            debug!("Ignoring zero-sized resize");
            return;
        }
        self.requested_extent = extent;
        match self.state {
            SwapchainState::Ready => self.state = SwapchainState::Stale,
            // Mid-frame: rebuild once the frame has been presented.
            SwapchainState::Acquiring | SwapchainState::Presenting => self.pending_stale = true,
            _ => {}
        }
    }

    /// Rebuilds the swapchain for `extent`.
    ///
    /// Waits for the device to go idle. The old handle is passed as
    /// `oldSwapchain` and destroyed once the new one exists, then views,
    /// slot command pools and semaphores are rebuilt. The image tracking
    /// table is only rebuilt when the image count changes.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!(
            "Recreating swapchain for {}x{}",
            extent.width, extent.height
        );

        let old_swapchain = self.swapchain;
        let built = build(
            &self.device,
            &self.loader,
            &self.surface,
            extent,
            self.preferred_present_mode,
            old_swapchain,
        )?;

        unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        self.destroy_image_views();

        let old_image_count = self.images.len();
        self.swapchain = built.swapchain;
        self.images = built.images;
        self.image_views = built.image_views;
        self.format = built.format;
        self.present_mode = built.present_mode;
        self.extent = built.extent;
        self.requested_extent = extent;

        for slot in self.slots.iter_mut() {
            slot.rebuild(&self.device)?;
        }
        self.render_finished = create_semaphores(&self.device, self.images.len())?;
        if self.images.len() != old_image_count {
            debug!(
                "Image count changed {} -> {}, rebuilding image tracking",
                old_image_count,
                self.images.len()
            );
            self.images_in_flight = vec![None; self.images.len()];
        }

        self.pending_stale = false;
        self.generation += 1;
        self.state = SwapchainState::Ready;
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Incremented on every recreation.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.format.color_space
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: u32) -> RhiResult<vk::Image> {
        self.images.get(index as usize).copied().ok_or_else(|| {
            RhiError::InvalidHandle(format!("swapchain image index {} out of range", index))
        })
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.slots.current_index()
    }

    #[inline]
    pub fn slots(&self) -> &FrameRing<FrameSlot> {
        &self.slots
    }

    #[inline]
    pub fn current_command_buffer(&self) -> &CommandBuffer {
        &self.slots.current().command_buffer
    }

    #[inline]
    pub fn current_command_buffer_mut(&mut self) -> &mut CommandBuffer {
        &mut self.slots.current_mut().command_buffer
    }

    #[inline]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    fn destroy_image_views(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
        self.image_views.clear();
    }
}

impl PresentationEngine for Swapchain {
    fn try_acquire(&mut self) -> RhiResult<AcquireOutcome> {
        let semaphore = self.slots.current().image_available();
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                WAIT_FOREVER,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok(AcquireOutcome::Ready(index)),
            Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn recreate_for_acquire(&mut self) -> RhiResult<()> {
        self.recreate(self.requested_extent)?;
        self.state = SwapchainState::Acquiring;
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during swapchain drop: {:?}", e);
        }

        unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
        self.destroy_image_views();

        info!(
            "Swapchain destroyed (was {}x{}, {} images, generation {})",
            self.extent.width,
            self.extent.height,
            self.images.len(),
            self.generation
        );
        // Frame slots, semaphores and then the surface drop with the fields.
    }
}

fn build(
    device: &Arc<Device>,
    loader: &ash::khr::swapchain::Device,
    surface: &Surface,
    extent: vk::Extent2D,
    preferred_present_mode: vk::PresentModeKHR,
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<Built> {
    let support = SwapchainSupportDetails::query(device.physical_device(), surface)?;
    if !support.is_adequate() {
        return Err(RhiError::SwapchainError(
            "Inadequate swapchain support (no formats or present modes)".to_string(),
        ));
    }

    let format = choose_surface_format(&support.formats)?;
    let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
    let extent = choose_extent(&support.capabilities, extent.width, extent.height);
    let image_count = determine_image_count(&support.capabilities);

    info!(
        "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
        extent.width, extent.height, format.format, present_mode, image_count
    );

    let graphics_family = device.queue_family(QueueKind::Graphics);
    let present_family = device.queue_family(QueueKind::Present);
    let queue_family_indices = [graphics_family, present_family];
    let (sharing_mode, queue_family_indices) = if graphics_family != present_family {
        (vk::SharingMode::CONCURRENT, &queue_family_indices[..])
    } else {
        (vk::SharingMode::EXCLUSIVE, &[][..])
    };

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface.handle())
        .min_image_count(image_count)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing_mode)
        .queue_family_indices(queue_family_indices)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
    let images = match unsafe { loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { loader.destroy_swapchain(swapchain, None) };
            return Err(e.into());
        }
    };

    let mut image_views = Vec::with_capacity(images.len());
    for &image in &images {
        match create_color_view(device, image, format.format) {
            Ok(view) => image_views.push(view),
            Err(e) => {
                unsafe {
                    for view in image_views {
                        device.handle().destroy_image_view(view, None);
                    }
                    loader.destroy_swapchain(swapchain, None);
                }
                return Err(e);
            }
        }
    }

    Ok(Built {
        swapchain,
        images,
        image_views,
        format,
        present_mode,
        extent,
    })
}

fn create_semaphores(device: &Arc<Device>, count: usize) -> RhiResult<Vec<Semaphore>> {
    (0..count).map(|_| Semaphore::new(device.clone())).collect()
}

/// Prefers `B8G8R8A8_SRGB` with `SRGB_NONLINEAR`, else the first format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        debug!("Selected preferred surface format: B8G8R8A8_SRGB with SRGB_NONLINEAR");
        return Ok(format);
    }

    let first = formats.first().copied().ok_or_else(|| {
        RhiError::SwapchainError("surface reports no formats".to_string())
    })?;
    warn!("Using first available surface format: {:?}", first.format);
    Ok(first)
}

/// Uses `preferred` when available; FIFO is always supported.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        debug!("Selected {:?} present mode", preferred);
        return preferred;
    }

    debug!("{:?} unavailable, selected FIFO present mode (vsync)", preferred);
    vk::PresentModeKHR::FIFO
}

/// The surface's current extent if fixed, else the request clamped to limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 means no cap).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = vec![
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];

        let selected = choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX);
        assert_eq!(selected, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

        let selected = choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX);
        assert_eq!(selected, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!(extent.width, 2000);
        assert_eq!(extent.height, 100);

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_determine_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 2);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
    }

    /// Presentation engine that replays scripted acquire results.
    struct ScriptedEngine {
        script: VecDeque<AcquireOutcome>,
        recreations: usize,
        image_count: u32,
    }

    impl ScriptedEngine {
        fn new(script: &[AcquireOutcome]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                recreations: 0,
                image_count: 3,
            }
        }
    }

    impl PresentationEngine for ScriptedEngine {
        fn try_acquire(&mut self) -> RhiResult<AcquireOutcome> {
            Ok(self.script.pop_front().unwrap_or(AcquireOutcome::Ready(0)))
        }

        fn recreate_for_acquire(&mut self) -> RhiResult<()> {
            self.recreations += 1;
            Ok(())
        }
    }

    #[test]
    fn test_out_of_date_triggers_exactly_one_recreation() {
        let mut engine = ScriptedEngine::new(&[AcquireOutcome::OutOfDate, AcquireOutcome::Ready(1)]);

        let acquired = acquire_with_recovery(&mut engine).unwrap();
        assert_eq!(engine.recreations, 1);
        assert_eq!(acquired.index, 1);
        assert!(acquired.index < engine.image_count);
        assert!(!acquired.suboptimal);
    }

    #[test]
    fn test_suboptimal_returns_image_without_recreating() {
        let mut engine = ScriptedEngine::new(&[AcquireOutcome::Suboptimal(2)]);

        let acquired = acquire_with_recovery(&mut engine).unwrap();
        assert_eq!(engine.recreations, 0);
        assert_eq!(acquired.index, 2);
        assert!(acquired.suboptimal);
    }

    #[test]
    fn test_persistent_out_of_date_gives_up() {
        let mut engine = ScriptedEngine::new(&[AcquireOutcome::OutOfDate; MAX_ACQUIRE_ATTEMPTS]);

        let result = acquire_with_recovery(&mut engine);
        assert!(matches!(result, Err(RhiError::SwapchainError(_))));
        assert_eq!(engine.recreations, MAX_ACQUIRE_ATTEMPTS);
    }

    #[test]
    fn test_fatal_acquire_error_propagates() {
        struct LostDevice;
        impl PresentationEngine for LostDevice {
            fn try_acquire(&mut self) -> RhiResult<AcquireOutcome> {
                Err(vk::Result::ERROR_DEVICE_LOST.into())
            }
            fn recreate_for_acquire(&mut self) -> RhiResult<()> {
                panic!("must not recreate on a fatal error");
            }
        }

        let result = acquire_with_recovery(&mut LostDevice);
        assert!(matches!(
            result,
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
    }
}
