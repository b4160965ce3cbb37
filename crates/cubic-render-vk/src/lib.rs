// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain as khr_swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry};
use cubic_render::{FrameInput, RenderSize, Renderer, RendererDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

mod device;
mod error;
mod instance;
mod pipeline;
mod swapchain;
mod uniform;

pub use device::{find_memory_type, GpuDevice, VkDevice};
pub use error::UniformError;
pub use swapchain::{Swapchain, SwapchainInfo};
pub use uniform::UniformBuffers;

use instance::InstanceBundle;
use pipeline::DrawTarget;

const MAX_FRAMES_IN_FLIGHT: usize = 2;
const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.04, 1.0];

pub struct VkRenderer {
    _entry: Entry,
    instance: InstanceBundle,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    phys: vk::PhysicalDevice,
    device: VkDevice,
    queue: vk::Queue,

    swapchain_loader: khr_swapchain::Device,
    swapchain: Swapchain,

    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    framebuffers: Vec<vk::Framebuffer>,

    uniforms: UniformBuffers<VkDevice>,
    desc_pool: vk::DescriptorPool,
    desc_sets: Vec<vk::DescriptorSet>,

    cmd_pool: vk::CommandPool,
    cmd_bufs: Vec<vk::CommandBuffer>,

    slots: Vec<FrameSlot>,
    slot_index: usize,
    render_finished: Vec<vk::Semaphore>,
    images_in_flight: Vec<vk::Fence>,

    clear: vk::ClearValue,
    size: RenderSize,
    needs_rebuild: bool,
    paused: bool,
}

/// Acquire-side sync for one frame in flight.
struct FrameSlot {
    image_available: vk::Semaphore,
    in_flight: vk::Fence,
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - per-frame sync, command buffers, then their pool
// - framebuffers, descriptor pool, uniform pairs (buffer then memory)
// - pipeline, layouts, render pass
// - image views + swapchain BEFORE device
// - surface AFTER device; instance last.
impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let d = self.device.raw();
            d.device_wait_idle().ok();

            for s in &self.slots {
                d.destroy_fence(s.in_flight, None);
                d.destroy_semaphore(s.image_available, None);
            }
            for &s in &self.render_finished {
                d.destroy_semaphore(s, None);
            }
            if !self.cmd_bufs.is_empty() {
                d.free_command_buffers(self.cmd_pool, &self.cmd_bufs);
            }
            d.destroy_command_pool(self.cmd_pool, None);

            for &fb in &self.framebuffers {
                d.destroy_framebuffer(fb, None);
            }
            d.destroy_descriptor_pool(self.desc_pool, None);
            self.uniforms.release();

            d.destroy_pipeline(self.pipeline, None);
            d.destroy_pipeline_layout(self.pipeline_layout, None);
            d.destroy_descriptor_set_layout(self.set_layout, None);
            d.destroy_render_pass(self.render_pass, None);

            self.swapchain.destroy(d, &self.swapchain_loader);

            d.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy();
        }
        debug!("vk renderer destroyed");
    }
}

unsafe fn create_command_pool(device: &ash::Device, queue_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    Ok(unsafe { device.create_command_pool(&pool_info, None) }?)
}

unsafe fn allocate_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    Ok(unsafe { device.allocate_command_buffers(&alloc_info) }?)
}

unsafe fn create_frame_slot(device: &ash::Device) -> Result<FrameSlot> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    Ok(FrameSlot {
        image_available: unsafe { device.create_semaphore(&sem_ci, None) }?,
        in_flight: unsafe { device.create_fence(&fence_ci, None) }?,
    })
}

unsafe fn create_frame_slots(device: &ash::Device) -> Result<Vec<FrameSlot>> {
    (0..MAX_FRAMES_IN_FLIGHT)
        .map(|_| unsafe { create_frame_slot(device) })
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
enum Acquired {
    /// Draw into `index`; `rebuild` when the swapchain is suboptimal but still usable.
    Image { index: u32, rebuild: bool },
    /// Out of date: nothing was signaled, skip the frame and rebuild.
    Skip,
}

fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<Acquired> {
    match result {
        Ok((index, suboptimal)) => Ok(Acquired::Image {
            index,
            rebuild: suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::Skip),
        Err(e) => Err(anyhow!("acquire_next_image: {e:?}")),
    }
}

/// Drops every image's claim on `fence`, e.g. before the fence is destroyed.
fn forget_fence(images_in_flight: &mut [vk::Fence], fence: vk::Fence) {
    for claim in images_in_flight.iter_mut().filter(|claim| **claim == fence) {
        *claim = vk::Fence::null();
    }
}

/// Runs `recover` if `result` failed. The original error is what the caller sees.
fn settle<T>(result: Result<T>, recover: impl FnOnce() -> Result<()>) -> Result<T> {
    if result.is_err() {
        if let Err(e) = recover() {
            warn!("frame slot recovery failed: {e:#}");
        }
    }
    result
}

unsafe fn create_semaphores(device: &ash::Device, count: usize) -> Result<Vec<vk::Semaphore>> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    let semaphores = (0..count)
        .map(|_| unsafe { device.create_semaphore(&sem_ci, None) })
        .collect::<VkResult<Vec<_>>>()?;
    Ok(semaphores)
}

fn uniform_handles(uniforms: &UniformBuffers<VkDevice>) -> Vec<vk::Buffer> {
    (0..uniforms.len()).map(|i| uniforms.buffer(i)).collect()
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    desc: &RendererDesc<'_>,
) -> Result<VkRenderer> {
    let entry = unsafe { Entry::load() }.context("load Vulkan loader")?;

    let dh = display.display_handle()?.as_raw();
    let wh = window.window_handle()?.as_raw();

    let instance = unsafe { instance::create_instance(&entry, dh, desc.title, desc.validation) }?;
    let vk_instance = &instance.instance;

    let surface = unsafe { ash_window::create_surface(&entry, vk_instance, dh, wh, None) }
        .context("create_surface")?;
    let surface_loader = surface::Instance::new(&entry, vk_instance);

    let (phys, queue_family) =
        unsafe { instance::pick_device_and_queue(vk_instance, &surface_loader, surface) }?;
    let (raw_device, queue) = unsafe { instance::create_device(vk_instance, phys, queue_family) }?;
    let device = VkDevice::new(vk_instance, phys, raw_device);
    let d = device.raw();

    let swapchain_loader = khr_swapchain::Device::new(vk_instance, d);
    let swapchain = unsafe {
        Swapchain::new(
            d,
            &surface_loader,
            &swapchain_loader,
            phys,
            surface,
            vk::SwapchainKHR::null(),
            desc.size,
        )
    }?;
    let image_count = swapchain.images.len();

    let render_pass = unsafe { pipeline::create_render_pass(d, swapchain.format) }?;
    let set_layout = unsafe { pipeline::create_transform_set_layout(d) }?;
    let (pipeline_layout, pipeline) =
        unsafe { pipeline::create_pipeline(d, render_pass, set_layout) }?;
    let framebuffers = unsafe {
        pipeline::create_framebuffers(d, render_pass, &swapchain.image_views, swapchain.extent)
    }?;

    let uniforms = UniformBuffers::new(device.clone(), &swapchain)?;
    let (desc_pool, desc_sets) =
        unsafe { pipeline::create_transform_sets(d, set_layout, &uniform_handles(&uniforms)) }?;

    let cmd_pool = unsafe { create_command_pool(d, queue_family) }?;
    let cmd_bufs = unsafe { allocate_command_buffers(d, cmd_pool, image_count) }?;
    let slots = unsafe { create_frame_slots(d) }?;
    let render_finished = unsafe { create_semaphores(d, image_count) }?;

    let mut r = VkRenderer {
        _entry: entry,
        instance,
        surface_loader,
        surface,
        phys,
        device,
        queue,
        swapchain_loader,
        swapchain,
        render_pass,
        set_layout,
        pipeline_layout,
        pipeline,
        framebuffers,
        uniforms,
        desc_pool,
        desc_sets,
        cmd_pool,
        cmd_bufs,
        slots,
        slot_index: 0,
        render_finished,
        images_in_flight: vec![vk::Fence::null(); image_count],
        clear: vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        },
        size: desc.size,
        needs_rebuild: false,
        paused: false,
    };

    unsafe { r.record_commands() }?;
    Ok(r)
}

impl VkRenderer {
    unsafe fn record_commands(&self) -> Result<()> {
        let d = self.device.raw();
        for (i, &cmd) in self.cmd_bufs.iter().enumerate() {
            let target = DrawTarget {
                render_pass: self.render_pass,
                framebuffer: self.framebuffers[i],
                extent: self.swapchain.extent,
                layout: self.pipeline_layout,
                pipeline: self.pipeline,
                set: self.desc_sets[i],
                clear: self.clear,
            };
            unsafe { pipeline::record_draw(d, cmd, &target) }?;
        }
        Ok(())
    }

    // Rebuild order after a resize / out-of-date swapchain:
    // 1) device_wait_idle()
    // 2) framebuffers out, swapchain (retiring the old one) + views in
    // 3) render pass + pipeline only if the color format changed
    // 4) framebuffers, then the whole uniform set for the new image count
    // 5) descriptor sets, command buffers, per-image semaphores, re-record
    unsafe fn recreate_swapchain(&mut self) -> Result<()> {
        let d = self.device.raw().clone();
        unsafe { d.device_wait_idle() }.context("device_wait_idle")?;

        for fb in self.framebuffers.drain(..) {
            unsafe { d.destroy_framebuffer(fb, None) };
        }

        let old_format = self.swapchain.format;
        let fresh = unsafe {
            Swapchain::new(
                &d,
                &self.surface_loader,
                &self.swapchain_loader,
                self.phys,
                self.surface,
                self.swapchain.handle,
                self.size,
            )
        }?;
        let mut retired = std::mem::replace(&mut self.swapchain, fresh);
        unsafe { retired.destroy(&d, &self.swapchain_loader) };

        if self.swapchain.format != old_format {
            debug!("swapchain format changed, rebuilding pipeline");
            unsafe {
                d.destroy_pipeline(self.pipeline, None);
                d.destroy_pipeline_layout(self.pipeline_layout, None);
                d.destroy_render_pass(self.render_pass, None);
            }
            self.pipeline = vk::Pipeline::null();
            self.pipeline_layout = vk::PipelineLayout::null();
            self.render_pass = unsafe { pipeline::create_render_pass(&d, self.swapchain.format) }?;
            (self.pipeline_layout, self.pipeline) =
                unsafe { pipeline::create_pipeline(&d, self.render_pass, self.set_layout) }?;
        }

        self.framebuffers = unsafe {
            pipeline::create_framebuffers(
                &d,
                self.render_pass,
                &self.swapchain.image_views,
                self.swapchain.extent,
            )
        }?;

        // The new set is complete before the old one is dropped.
        self.uniforms = UniformBuffers::new(self.device.clone(), &self.swapchain)?;

        unsafe { d.destroy_descriptor_pool(self.desc_pool, None) };
        self.desc_pool = vk::DescriptorPool::null();
        self.desc_sets.clear();
        (self.desc_pool, self.desc_sets) = unsafe {
            pipeline::create_transform_sets(&d, self.set_layout, &uniform_handles(&self.uniforms))
        }?;

        let image_count = self.swapchain.images.len();
        if self.cmd_bufs.len() != image_count {
            if !self.cmd_bufs.is_empty() {
                unsafe { d.free_command_buffers(self.cmd_pool, &self.cmd_bufs) };
            }
            self.cmd_bufs.clear();
            self.cmd_bufs = unsafe { allocate_command_buffers(&d, self.cmd_pool, image_count) }?;
        }

        for s in self.render_finished.drain(..) {
            unsafe { d.destroy_semaphore(s, None) };
        }
        self.render_finished = unsafe { create_semaphores(&d, image_count) }?;
        self.images_in_flight = vec![vk::Fence::null(); image_count];

        unsafe { self.record_commands() }?;
        self.needs_rebuild = false;
        info!(
            "swapchain rebuilt: {}x{}, {} images",
            self.swapchain.extent.width, self.swapchain.extent.height, image_count
        );
        Ok(())
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait this slot's fence, acquire (signals image_available)
    // 2) wait whichever slot last used the image, then rewrite its uniforms
    // 3) submit (signals render_finished[image] + slot fence), present
    unsafe fn render(&mut self, elapsed: f32) -> Result<()> {
        let d = self.device.raw();
        let slot = &self.slots[self.slot_index];
        let (image_available, in_flight) = (slot.image_available, slot.in_flight);

        unsafe { d.wait_for_fences(&[in_flight], true, u64::MAX) }
            .context("wait_for_fences(frame slot)")?;

        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match classify_acquire(acquired)? {
            Acquired::Image { index, rebuild } => {
                self.needs_rebuild |= rebuild;
                index
            }
            Acquired::Skip => {
                self.needs_rebuild = true;
                return Ok(());
            }
        };
        // From here on `image_available` is pending; a failure must not leave it that way.
        let slot_index = self.slot_index;
        let submitted = unsafe { self.submit_acquired(image_index, elapsed, image_available, in_flight) };
        settle(submitted, || unsafe { self.reset_slot(slot_index) })?;
        self.slot_index = (self.slot_index + 1) % self.slots.len();

        let render_finished = self.render_finished[image_index as usize];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.queue, &present) } {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => self.needs_rebuild = true,
            Err(e) => return Err(anyhow!("queue_present: {e:?}")),
        }
        Ok(())
    }

    /// Waits out the image's previous frame, rewrites its uniforms and submits.
    unsafe fn submit_acquired(
        &mut self,
        image_index: u32,
        elapsed: f32,
        image_available: vk::Semaphore,
        in_flight: vk::Fence,
    ) -> Result<()> {
        let d = self.device.raw();
        let img = image_index as usize;

        let previous = self.images_in_flight[img];
        if previous != vk::Fence::null() {
            unsafe { d.wait_for_fences(&[previous], true, u64::MAX) }
                .context("wait_for_fences(image)")?;
        }
        self.images_in_flight[img] = in_flight;

        self.uniforms.update(&self.swapchain, elapsed, img)?;

        unsafe { d.reset_fences(&[in_flight]) }?;

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let cmd = self.cmd_bufs[img];
        let render_finished = self.render_finished[img];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &render_finished,
            ..Default::default()
        };
        unsafe { d.queue_submit(self.queue, std::slice::from_ref(&submit), in_flight) }
            .context("queue_submit")?;
        Ok(())
    }

    /// Replaces a slot whose semaphore was signaled but never waited on, or
    /// whose fence was reset without a submit. The acquired image is never
    /// presented, so the swapchain is rebuilt to get it back.
    unsafe fn reset_slot(&mut self, index: usize) -> Result<()> {
        let d = self.device.raw();
        unsafe { d.device_wait_idle() }.context("device_wait_idle")?;

        let slot = &mut self.slots[index];
        forget_fence(&mut self.images_in_flight, slot.in_flight);
        unsafe {
            d.destroy_semaphore(slot.image_available, None);
            d.destroy_fence(slot.in_flight, None);
        }
        slot.image_available = vk::Semaphore::null();
        slot.in_flight = vk::Fence::null();

        *slot = unsafe { create_frame_slot(d) }?;
        self.needs_rebuild = true;
        warn!("frame slot {index} reset after a failed frame");
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.uniforms.len()
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        desc: &RendererDesc<'_>,
    ) -> Result<Self> {
        let r = unsafe { build_renderer(window, display, desc) }?;
        info!(
            "Vulkan renderer ready for '{}' ({}x{}, {} images, fmt 0x{:x})",
            desc.title,
            r.swapchain.extent.width,
            r.swapchain.extent.height,
            r.image_count(),
            r.swapchain.format.as_raw()
        );
        Ok(r)
    }

    fn draw_frame(&mut self, frame: FrameInput) -> Result<()> {
        // Latched: a resize seen while minimized is applied once we have a size again.
        self.needs_rebuild |= frame.framebuffer_resized;
        self.size = frame.size;

        if frame.size.is_empty() {
            if !self.paused {
                info!("vk: framebuffer is 0x0 → paused=true");
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!(
                "vk: framebuffer {}x{} → paused=false",
                frame.size.width, frame.size.height
            );
            self.paused = false;
        }

        unsafe {
            if self.needs_rebuild {
                self.recreate_swapchain()?;
            }
            self.render(frame.elapsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::Cell;

    #[test]
    fn suboptimal_acquire_draws_then_rebuilds() {
        assert_eq!(
            classify_acquire(Ok((2, true))).ok(),
            Some(Acquired::Image {
                index: 2,
                rebuild: true
            })
        );
        assert_eq!(
            classify_acquire(Ok((0, false))).ok(),
            Some(Acquired::Image {
                index: 0,
                rebuild: false
            })
        );
    }

    #[test]
    fn out_of_date_acquire_skips_and_other_errors_fail() {
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).ok(),
            Some(Acquired::Skip)
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn settle_recovers_only_on_failure() {
        let recovered = Cell::new(0);
        let ok = settle(Ok(7), || {
            recovered.set(recovered.get() + 1);
            Ok(())
        });
        assert_eq!(ok.ok(), Some(7));
        assert_eq!(recovered.get(), 0);

        let failed: Result<()> = settle(Err(anyhow!("map failed")), || {
            recovered.set(recovered.get() + 1);
            Ok(())
        });
        assert_eq!(recovered.get(), 1);
        assert_eq!(failed.unwrap_err().to_string(), "map failed");
    }

    #[test]
    fn settle_keeps_original_error_when_recovery_fails() {
        let failed: Result<()> = settle(Err(anyhow!("queue_submit")), || Err(anyhow!("device lost")));
        assert_eq!(failed.unwrap_err().to_string(), "queue_submit");
    }

    #[test]
    fn forget_fence_clears_only_matching_claims() {
        let a = vk::Fence::from_raw(1);
        let b = vk::Fence::from_raw(2);
        let mut claims = [a, b, a, vk::Fence::null()];
        forget_fence(&mut claims, a);
        assert_eq!(claims, [vk::Fence::null(), b, vk::Fence::null(), vk::Fence::null()]);
    }
}
