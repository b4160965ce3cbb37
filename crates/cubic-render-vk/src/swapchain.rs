// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use cubic_render::RenderSize;
use tracing::info;

/// What per-image consumers need to know about the swapchain.
pub trait SwapchainInfo {
    fn image_count(&self) -> u32;
    fn viewport_extent(&self) -> vk::Extent2D;
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

impl SwapchainInfo for Swapchain {
    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn viewport_extent(&self) -> vk::Extent2D {
        self.extent
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn image_count_from_caps(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

impl Swapchain {
    /// Builds a swapchain (retiring `old` if given) and one view per image.
    ///
    /// The caller still owns `old` and destroys it once this returns.
    pub unsafe fn new(
        device: &ash::Device,
        surface_loader: &surface::Instance,
        swapchain_loader: &swapchain::Device,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        old: vk::SwapchainKHR,
        size: RenderSize,
    ) -> Result<Self> {
        let (caps, formats, modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(phys, surface)?,
                surface_loader.get_physical_device_surface_formats(phys, surface)?,
                surface_loader.get_physical_device_surface_present_modes(phys, surface)?,
            )
        };

        let surf_format =
            choose_surface_format(&formats).context("surface reports no formats")?;
        let present_mode = choose_present_mode(&modes);
        let extent = extent_from_caps(&caps, size);

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: image_count_from_caps(&caps),
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };

        let handle = unsafe { swapchain_loader.create_swapchain(&info, None) }
            .context("create_swapchain")?;
        let images = unsafe { swapchain_loader.get_swapchain_images(handle) }?;

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: surf_format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            image_views.push(unsafe { device.create_image_view(&iv_info, None) }?);
        }

        info!(
            "swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            surf_format.format,
            present_mode
        );

        Ok(Self {
            handle,
            format: surf_format.format,
            extent,
            images,
            image_views,
        })
    }

    /// Views first, then the swapchain that owns the images.
    pub unsafe fn destroy(&mut self, device: &ash::Device, swapchain_loader: &swapchain::Device) {
        unsafe {
            for &iv in &self.image_views {
                device.destroy_image_view(iv, None);
            }
            swapchain_loader.destroy_swapchain(self.handle, None);
        }
        self.image_views.clear();
        self.images.clear();
        self.handle = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_unorm_srgb() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_UNORM)
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT)];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R16G16B16A16_SFLOAT)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_then_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_or_clamps() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 640, height: 480 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 1024, height: 1024 },
            ..Default::default()
        };
        let want = RenderSize { width: 800, height: 2000 };
        assert_eq!(extent_from_caps(&caps, want), vk::Extent2D { width: 640, height: 480 });

        caps.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        assert_eq!(extent_from_caps(&caps, want), vk::Extent2D { width: 800, height: 1024 });
    }

    #[test]
    fn image_count_respects_bounds() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(image_count_from_caps(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(image_count_from_caps(&caps), 2);
    }
}
