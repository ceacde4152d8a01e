//! Frame orchestration.
//!
//! The [`Renderer`] owns the device, the upload context and the swapchain,
//! and exposes the strict per-frame call sequence:
//!
//! ```text
//! begin_frame()  drain queued actions, acquire an image, start recording
//! draw(..)       bind and draw an indexed mesh inside a render pass
//! end_frame()    close the render pass and finish recording
//! present()      submit, present, advance the frame slot
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use vkframe_core::{PresentModePreference, RendererConfig};
use vkframe_rhi::buffer::{BufferKind, GpuBuffer};
use vkframe_rhi::descriptor::DescriptorSet;
use vkframe_rhi::device::Device;
use vkframe_rhi::image::record_transition;
use vkframe_rhi::instance::Instance;
use vkframe_rhi::physical_device::select_physical_device;
use vkframe_rhi::pipeline::Pipeline;
use vkframe_rhi::render_pass::{AttachmentLoad, Framebuffers, RenderPass, RenderPassDesc};
use vkframe_rhi::surface::{Surface, SurfaceSource};
use vkframe_rhi::swapchain::Swapchain;
use vkframe_rhi::upload::UploadContext;
use vkframe_rhi::RhiError;

use crate::actions::{self, ActionQueue, ActionSender};
use crate::error::RenderResult;
use crate::frame::FrameState;

/// Frame pipeline over one presentation surface.
pub struct Renderer {
    // Field order is drop order: framebuffers, swapchain (and its surface),
    // upload pool, then the device and instance once the last Arc goes.
    framebuffers: HashMap<vk::RenderPass, Framebuffers>,
    swapchain: Swapchain,
    upload: UploadContext,
    device: Arc<Device>,
    config: RendererConfig,
    state: FrameState,
    image_index: Option<u32>,
    active_pass: Option<vk::RenderPass>,
    draws_this_frame: u32,
    frame_count: u64,
    action_tx: ActionSender<Renderer>,
    action_rx: ActionQueue<Renderer>,
}

impl Renderer {
    /// Brings up instance, surface, adapter, device, upload context and
    /// swapchain for `source`.
    ///
    /// # Errors
    ///
    /// Invalid configuration, no suitable adapter, or any creation failure.
    /// None of these are retried.
    pub fn new(source: &(impl SurfaceSource + ?Sized), config: RendererConfig) -> RenderResult<Self> {
        config.validate()?;

        let extent = source.extent();
        info!(
            "Initializing renderer ({}x{}, {} frames in flight)",
            extent.width, extent.height, config.frames_in_flight
        );

        let extensions = source.required_extensions()?;
        let instance = Instance::new(config.enable_validation, &extensions)?;
        let surface = Surface::new(instance.clone(), source)?;
        let info = select_physical_device(&instance, Some(&surface))?;
        let device = Device::new(instance, info, true)?;
        let upload = UploadContext::new(device.clone())?;

        let present_mode = match config.present_mode {
            PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        };
        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            extent,
            config.frames_in_flight,
            present_mode,
        )?;

        let (action_tx, action_rx) = actions::channel(&config.actions);

        info!(
            "Renderer initialized: {} swapchain images, format {:?}",
            swapchain.image_count(),
            swapchain.format()
        );

        Ok(Self {
            framebuffers: HashMap::new(),
            swapchain,
            upload,
            device,
            config,
            state: FrameState::Idle,
            image_index: None,
            active_pass: None,
            draws_this_frame: 0,
            frame_count: 0,
            action_tx,
            action_rx,
        })
    }

    /// A render pass that clears to the configured colour and targets the
    /// swapchain format.
    pub fn create_clear_pass(&self) -> RenderResult<RenderPass> {
        let pass = RenderPass::new(
            self.device.clone(),
            RenderPassDesc {
                color_format: self.swapchain.format(),
                load: AttachmentLoad::Clear(self.config.clear_color),
            },
        )?;
        Ok(pass)
    }

    // ========================================================================
    // Frame API
    // ========================================================================

    /// Runs queued actions, waits for the frame slot, acquires an image and
    /// begins recording.
    pub fn begin_frame(&mut self) -> RenderResult<()> {
        let next = self.state.begin()?;

        let queued = self.action_rx.drain();
        if !queued.is_empty() {
            let failed = actions::run_all(self, queued);
            if failed > 0 {
                error!("{} queued action(s) failed before frame {}", failed, self.frame_count);
            }
        }

        let image_index = self.swapchain.acquire_next_image()?;
        if let Err(e) = self
            .swapchain
            .current_command_buffer_mut()
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        {
            if let Err(abandon) = self.swapchain.abandon_frame() {
                error!("Failed to abandon frame after begin error: {}", abandon);
            }
            return Err(e.into());
        }

        self.drop_stale_framebuffers();
        self.image_index = Some(image_index);
        self.active_pass = None;
        self.draws_this_frame = 0;
        self.state = next;
        Ok(())
    }

    /// Records an indexed draw of `vertex_buffer`/`index_buffer` with
    /// `pipeline` inside `render_pass`.
    ///
    /// The render pass is begun on the acquired image when it differs from
    /// the one already active this frame.
    ///
    /// # Errors
    ///
    /// [`InvalidFrameState`](crate::RenderError::InvalidFrameState) outside
    /// `begin_frame`/`end_frame`; `Unsupported` for wrong buffer kinds or a
    /// render pass whose format does not match the swapchain.
    pub fn draw(
        &mut self,
        render_pass: &RenderPass,
        pipeline: &Pipeline,
        vertex_buffer: &GpuBuffer,
        index_buffer: &GpuBuffer,
        descriptor_set: &DescriptorSet,
    ) -> RenderResult<()> {
        let next = self.state.draw()?;

        if vertex_buffer.kind() != BufferKind::Vertex {
            return Err(RhiError::Unsupported(format!(
                "draw expects a vertex buffer, got a {} buffer",
                vertex_buffer.kind().name()
            ))
            .into());
        }
        let BufferKind::Index(index_type) = index_buffer.kind() else {
            return Err(RhiError::Unsupported(format!(
                "draw expects an index buffer, got a {} buffer",
                index_buffer.kind().name()
            ))
            .into());
        };
        if vertex_buffer.is_destroyed() || index_buffer.is_destroyed() {
            return Err(RhiError::InvalidHandle("buffer used after cleanup".into()).into());
        }
        if render_pass.color_format() != self.swapchain.format() {
            return Err(RhiError::Unsupported(format!(
                "render pass format {:?} does not match swapchain format {:?}",
                render_pass.color_format(),
                self.swapchain.format()
            ))
            .into());
        }

        let index_count = index_buffer.index_count()?;
        let descriptor = descriptor_set.handle(self.swapchain.current_slot())?;
        let image_index = self.current_image()?;
        let extent = self.swapchain.extent();

        if self.active_pass != Some(render_pass.handle()) {
            let framebuffer = self.framebuffer_for(render_pass, image_index)?;
            let cmd = self.swapchain.current_command_buffer();
            if self.active_pass.is_some() {
                cmd.end_render_pass();
            }

            let clear_values = render_pass.clear_values();
            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(render_pass.handle())
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);
            cmd.begin_render_pass(&begin_info);
            self.active_pass = Some(render_pass.handle());
        }

        let cmd = self.swapchain.current_command_buffer();
        cmd.set_viewport(&vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        cmd.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });
        cmd.bind_pipeline(pipeline.handle());
        cmd.bind_vertex_buffers(0, &[vertex_buffer.handle()], &[0]);
        cmd.bind_index_buffer(index_buffer.handle(), 0, index_type);
        cmd.bind_descriptor_sets(pipeline.layout().handle(), 0, &[descriptor]);
        cmd.draw_indexed(index_count, 1, 0, 0, 0);

        self.draws_this_frame += 1;
        self.state = next;
        Ok(())
    }

    /// Closes the active render pass and finishes recording.
    ///
    /// A frame with no draws still has to hand a presentable image back, so
    /// the image is moved to `PRESENT_SRC_KHR` with a barrier.
    pub fn end_frame(&mut self) -> RenderResult<()> {
        let next = self.state.end()?;
        let image_index = self.current_image()?;

        if self.active_pass.take().is_some() {
            self.swapchain.current_command_buffer().end_render_pass();
        } else {
            let image = self.swapchain.image(image_index)?;
            record_transition(
                self.swapchain.current_command_buffer(),
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );
        }
        self.swapchain.current_command_buffer_mut().end()?;

        self.state = next;
        Ok(())
    }

    /// Submits the frame and presents it, recreating the swapchain if it
    /// went stale.
    pub fn present(&mut self) -> RenderResult<()> {
        let next = self.state.present()?;
        let image_index = self.current_image()?;

        // The frame is over whether or not presentation succeeds.
        self.state = next;
        self.image_index = None;
        self.swapchain.submit_and_present(image_index)?;

        self.frame_count += 1;
        if self.frame_count.is_multiple_of(600) {
            debug!("Presented {} frames", self.frame_count);
        }
        Ok(())
    }

    /// Requests a swapchain rebuild at the new size. Zero sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to {}x{}", width, height);
            return;
        }
        self.swapchain
            .request_resize(vk::Extent2D { width, height });
    }

    /// A sender other threads can use to queue work for the next frame.
    pub fn actions(&self) -> ActionSender<Renderer> {
        self.action_tx.clone()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn upload(&self) -> &UploadContext {
        &self.upload
    }

    #[inline]
    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.swapchain.frames_in_flight()
    }

    /// Frame slot the next (or current) frame records into.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.swapchain.current_slot()
    }

    /// In-flight fence of the current frame slot.
    pub fn current_fence(&self) -> vk::Fence {
        self.swapchain.slots().current().fence().handle()
    }

    #[inline]
    pub fn frame_state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }

    /// Number of render passes with framebuffers for the current swapchain.
    #[inline]
    pub fn cached_framebuffer_sets(&self) -> usize {
        self.framebuffers.len()
    }

    /// Drops framebuffer sets built against an older swapchain. Recreation
    /// waited for the device, so none of them is still in use.
    fn drop_stale_framebuffers(&mut self) {
        let generation = self.swapchain.generation();
        let before = self.framebuffers.len();
        self.framebuffers
            .retain(|_, cached| cached.generation() == generation);
        let dropped = before - self.framebuffers.len();
        if dropped > 0 {
            debug!(
                "Dropped {} framebuffer set(s) from before generation {}",
                dropped, generation
            );
        }
    }

    fn current_image(&self) -> RenderResult<u32> {
        self.image_index.ok_or_else(|| {
            RhiError::InvalidHandle("no swapchain image acquired for this frame".into()).into()
        })
    }

    /// Framebuffer for `render_pass` on `image_index`, built on first use in
    /// the current swapchain generation.
    fn framebuffer_for(
        &mut self,
        render_pass: &RenderPass,
        image_index: u32,
    ) -> RenderResult<vk::Framebuffer> {
        if !self.framebuffers.contains_key(&render_pass.handle()) {
            let framebuffers = Framebuffers::new(
                self.device.clone(),
                render_pass,
                self.swapchain.image_views(),
                self.swapchain.extent(),
                self.swapchain.generation(),
            )?;
            self.framebuffers.insert(render_pass.handle(), framebuffers);
        }

        let framebuffers = self
            .framebuffers
            .get(&render_pass.handle())
            .ok_or_else(|| RhiError::InvalidHandle("framebuffer cache miss".into()))?;
        Ok(framebuffers.get(image_index)?)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during renderer drop: {:?}",
                e
            );
        }
        self.framebuffers.clear();
        info!("Renderer shut down after {} frames", self.frame_count);
    }
}
