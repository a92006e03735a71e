// SPDX-License-Identifier: CEPL-1.0
//! Device & queue context: instance, optional surface, physical device
//! selection and the logical device with its graphics/present/transfer queues.

use anyhow::{anyhow, Context, Result};
use ash::ext::{debug_utils, mesh_shader};
use ash::khr::{push_descriptor, surface, swapchain};
use ash::{vk, Entry, Instance};
use prism_render::RendererSettings;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_void, CStr};
use tracing::{debug, error, info, trace, warn};

use crate::error::{VkError, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"prism";

/// Queue family indices backing the three logical queues. Any of them may alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    /// Transfer-only family when one exists, otherwise the graphics family.
    pub transfer: u32,
}

impl QueueFamilies {
    /// Distinct family indices, one queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut v = vec![self.graphics, self.present, self.transfer];
        v.sort_unstable();
        v.dedup();
        v
    }

    pub fn has_dedicated_transfer(&self) -> bool {
        self.transfer != self.graphics
    }
}

/// Scans every family. Graphics is the first family with GRAPHICS; present
/// prefers the graphics family when it can present; transfer prefers a
/// family with TRANSFER but not GRAPHICS.
pub fn find_queue_families(
    props: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    let mut transfer = None;

    for (i, p) in props.iter().enumerate() {
        let i = i as u32;
        if p.queue_count == 0 {
            continue;
        }
        let is_graphics = p.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        if is_graphics && graphics.is_none() {
            graphics = Some(i);
        }
        if supports_present(i) && (present.is_none() || Some(i) == graphics) {
            present = Some(i);
        }
        if p.queue_flags.contains(vk::QueueFlags::TRANSFER) && !is_graphics && transfer.is_none() {
            transfer = Some(i);
        }
    }

    let graphics = graphics?;
    Some(QueueFamilies {
        graphics,
        present: present?,
        transfer: transfer.unwrap_or(graphics),
    })
}

#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub require_discrete: bool,
    /// Presentation support and non-empty formats/present modes.
    pub needs_surface: bool,
    pub require_features: bool,
}

/// What was learned about one physical device during selection.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub sampler_anisotropy: bool,
    pub sample_rate_shading: bool,
    pub missing_extensions: Vec<String>,
    pub families: Option<QueueFamilies>,
    pub surface_formats: usize,
    pub present_modes: usize,
}

impl DeviceCandidate {
    /// `None` when the device qualifies, otherwise the first failed predicate.
    pub fn rejection(&self, req: &DeviceRequirements) -> Option<String> {
        if req.require_discrete && self.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
            return Some(format!("not a discrete GPU ({:?})", self.device_type));
        }
        if req.require_features && !(self.sampler_anisotropy && self.sample_rate_shading) {
            return Some("missing samplerAnisotropy or sampleRateShading".into());
        }
        if !self.missing_extensions.is_empty() {
            return Some(format!("missing extensions {:?}", self.missing_extensions));
        }
        if self.families.is_none() {
            return Some("no graphics or present queue family".into());
        }
        if req.needs_surface && (self.surface_formats == 0 || self.present_modes == 0) {
            return Some("surface reports no formats or present modes".into());
        }
        None
    }
}

/// Highest sample count both color and depth attachments support, capped.
pub fn max_usable_samples(limits: &vk::PhysicalDeviceLimits, cap: u32) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        (64, vk::SampleCountFlags::TYPE_64),
        (32, vk::SampleCountFlags::TYPE_32),
        (16, vk::SampleCountFlags::TYPE_16),
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
    ]
    .into_iter()
    .find(|&(n, flag)| n <= cap && counts.contains(flag))
    .map(|(_, flag)| flag)
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Geometry submission path, fixed at device creation.
pub enum GeometryPath {
    /// Vertex shader pulls from a storage buffer, indexed draw.
    VertexPulling,
    /// Mesh shader walks meshlets; one workgroup per meshlet.
    MeshShading(mesh_shader::Device),
}

impl GeometryPath {
    pub fn is_mesh(&self) -> bool {
        matches!(self, GeometryPath::MeshShading(_))
    }
}

pub struct SurfaceBinding {
    pub loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

pub struct DeviceContext {
    _entry: Entry,
    pub instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<SurfaceBinding>,

    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,

    pub samples: vk::SampleCountFlags,
    pub mem_props: vk::PhysicalDeviceMemoryProperties,
    pub limits: vk::PhysicalDeviceLimits,
    pub anisotropy: bool,
    pub timestamp_valid_bits: u32,
    push_descriptor: Option<push_descriptor::Device>,
    pub geometry: GeometryPath,
}

impl DeviceContext {
    /// Windowed context: creates the surface and requires presentation support.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        settings: &RendererSettings,
    ) -> Result<Self> {
        let dh = display.display_handle().map_err(|e| anyhow!("{e}"))?.as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        unsafe {
            let entry = Entry::load().map_err(VkError::from)?;
            let wsi = wsi_extensions(dh)?;
            let (instance, debug) = create_instance(&entry, &wsi, settings.validation)?;

            let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
                Ok(s) => SurfaceBinding {
                    loader: surface::Instance::new(&entry, &instance),
                    surface: s,
                },
                Err(e) => {
                    destroy_instance(&instance, debug);
                    return Err(VkError::call("vkCreateSurfaceKHR", e).into());
                }
            };

            let req = DeviceRequirements {
                require_discrete: settings.require_discrete_gpu,
                needs_surface: true,
                require_features: true,
            };
            let mut exts: Vec<&'static CStr> = vec![swapchain::NAME, push_descriptor::NAME];
            let prefer_mesh = settings.prefer_mesh_shading;
            match Self::finish(&instance, Some(&surface), &req, &mut exts, prefer_mesh, settings.max_msaa_samples) {
                Ok(parts) => Ok(parts.assemble(entry, instance, debug, Some(surface))),
                Err(e) => {
                    surface.loader.destroy_surface(surface.surface, None);
                    destroy_instance(&instance, debug);
                    Err(e)
                }
            }
        }
    }

    /// Surface-less context for load-time work and tests. Accepts any device
    /// with a graphics queue.
    pub fn headless(validation: bool) -> Result<Self> {
        unsafe {
            let entry = Entry::load().map_err(VkError::from)?;
            let (instance, debug) = create_instance(&entry, &[], validation)?;
            let req = DeviceRequirements {
                require_discrete: false,
                needs_surface: false,
                require_features: false,
            };
            match Self::finish(&instance, None, &req, &mut Vec::new(), false, 1) {
                Ok(parts) => Ok(parts.assemble(entry, instance, debug, None)),
                Err(e) => {
                    destroy_instance(&instance, debug);
                    Err(e)
                }
            }
        }
    }

    unsafe fn finish(
        instance: &Instance,
        surface: Option<&SurfaceBinding>,
        req: &DeviceRequirements,
        exts: &mut Vec<&'static CStr>,
        prefer_mesh: bool,
        msaa_cap: u32,
    ) -> Result<DeviceParts> {
        let phys_list = instance.enumerate_physical_devices().check("vkEnumeratePhysicalDevices")?;

        let mut chosen = None;
        for &phys in &phys_list {
            let cand = inspect_device(instance, phys, surface, exts)?;
            match cand.rejection(req) {
                None => {
                    chosen = Some((phys, cand));
                    break;
                }
                Some(why) => debug!("skipping {}: {}", cand.name, why),
            }
        }
        let (phys, cand) = chosen.ok_or(VkError::NoSuitableDevice)?;
        let families = cand.families.ok_or(VkError::NoSuitableDevice)?;

        let props = instance.get_physical_device_properties(phys);
        let qprops = instance.get_physical_device_queue_family_properties(phys);
        let mesh_ok = prefer_mesh && supports_mesh_shading(instance, phys)?;
        if prefer_mesh && !mesh_ok {
            warn!("mesh shading requested but unsupported; using vertex pulling");
        }
        if mesh_ok {
            exts.push(mesh_shader::NAME);
        }

        let device = create_logical_device(instance, phys, &families, exts, &cand, mesh_ok)?;

        let samples = max_usable_samples(&props.limits, msaa_cap.max(1));
        info!(
            "device: {} (graphics={}, present={}, transfer={}, samples={:?}, path={})",
            cand.name,
            families.graphics,
            families.present,
            families.transfer,
            samples,
            if mesh_ok { "mesh" } else { "vertex" }
        );

        let push = exts
            .contains(&push_descriptor::NAME)
            .then(|| push_descriptor::Device::new(instance, &device));
        let geometry = if mesh_ok {
            GeometryPath::MeshShading(mesh_shader::Device::new(instance, &device))
        } else {
            GeometryPath::VertexPulling
        };

        Ok(DeviceParts {
            phys,
            graphics_queue: device.get_device_queue(families.graphics, 0),
            present_queue: device.get_device_queue(families.present, 0),
            transfer_queue: device.get_device_queue(families.transfer, 0),
            families,
            samples,
            mem_props: instance.get_physical_device_memory_properties(phys),
            limits: props.limits,
            anisotropy: cand.sampler_anisotropy,
            timestamp_valid_bits: qprops[families.graphics as usize].timestamp_valid_bits,
            push_descriptor: push,
            geometry,
            device,
        })
    }

    pub fn surface(&self) -> Option<&SurfaceBinding> {
        self.surface.as_ref()
    }

    /// Loaded once at device creation; absent on headless contexts.
    pub fn push_descriptor(&self) -> Result<&push_descriptor::Device> {
        self.push_descriptor
            .as_ref()
            .ok_or_else(|| VkError::MissingExtension(push_descriptor::NAME.to_string_lossy().into_owned()).into())
    }

    /// Sharing for device-local buffers written on the transfer queue and
    /// read on the graphics queue.
    pub fn buffer_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.families.has_dedicated_transfer() {
            (vk::SharingMode::CONCURRENT, vec![self.families.graphics, self.families.transfer])
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.check("vkDeviceWaitIdle")?;
        Ok(())
    }
}

// Device, then surface, then messenger, instance last.
impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            if let Some(s) = self.surface.take() {
                s.loader.destroy_surface(s.surface, None);
            }
            destroy_instance(&self.instance, self.debug.take());
        }
        debug!("device context destroyed");
    }
}

struct DeviceParts {
    phys: vk::PhysicalDevice,
    device: ash::Device,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
    samples: vk::SampleCountFlags,
    mem_props: vk::PhysicalDeviceMemoryProperties,
    limits: vk::PhysicalDeviceLimits,
    anisotropy: bool,
    timestamp_valid_bits: u32,
    push_descriptor: Option<push_descriptor::Device>,
    geometry: GeometryPath,
}

impl DeviceParts {
    fn assemble(
        self,
        entry: Entry,
        instance: Instance,
        debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
        surface: Option<SurfaceBinding>,
    ) -> DeviceContext {
        DeviceContext {
            _entry: entry,
            instance,
            debug,
            surface,
            phys: self.phys,
            device: self.device,
            families: self.families,
            graphics_queue: self.graphics_queue,
            present_queue: self.present_queue,
            transfer_queue: self.transfer_queue,
            samples: self.samples,
            mem_props: self.mem_props,
            limits: self.limits,
            anisotropy: self.anisotropy,
            timestamp_valid_bits: self.timestamp_valid_bits,
            push_descriptor: self.push_descriptor,
            geometry: self.geometry,
        }
    }
}

unsafe fn wsi_extensions(dh: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let raw = ash_window::enumerate_required_extensions(dh).check("enumerate_required_extensions")?;
    Ok(raw.iter().map(|&p| CStr::from_ptr(p)).collect())
}

unsafe fn create_instance(
    entry: &Entry,
    wsi: &[&'static CStr],
    validation: bool,
) -> Result<(Instance, Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>)> {
    let mut layers: Vec<&CStr> = Vec::new();
    if validation {
        let available = entry
            .enumerate_instance_layer_properties()
            .check("vkEnumerateInstanceLayerProperties")?;
        let found = available
            .iter()
            .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER);
        if !found {
            return Err(VkError::MissingLayer(VALIDATION_LAYER.to_string_lossy().into_owned()).into());
        }
        layers.push(VALIDATION_LAYER);
    }

    let mut exts: Vec<&CStr> = wsi.to_vec();
    if validation {
        exts.push(debug_utils::NAME);
    }
    let available = entry
        .enumerate_instance_extension_properties(None)
        .check("vkEnumerateInstanceExtensionProperties")?;
    for want in &exts {
        let ok = available
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == *want);
        if !ok {
            return Err(VkError::MissingExtension(want.to_string_lossy().into_owned()).into());
        }
    }

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };
    let layer_ptrs: Vec<_> = layers.iter().map(|l| l.as_ptr()).collect();
    let ext_ptrs: Vec<_> = exts.iter().map(|e| e.as_ptr()).collect();
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        ..Default::default()
    };
    let instance = entry.create_instance(&create_info, None).check("vkCreateInstance")?;

    let debug = if validation {
        let loader = debug_utils::Instance::new(entry, &instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        match loader.create_debug_utils_messenger(&ci, None) {
            Ok(m) => Some((loader, m)),
            Err(e) => {
                instance.destroy_instance(None);
                return Err(VkError::call("vkCreateDebugUtilsMessengerEXT", e).into());
            }
        }
    } else {
        None
    };

    Ok((instance, debug))
}

unsafe fn destroy_instance(instance: &Instance, debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>) {
    if let Some((loader, messenger)) = debug {
        loader.destroy_debug_utils_messenger(messenger, None);
    }
    instance.destroy_instance(None);
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

unsafe fn inspect_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    surface: Option<&SurfaceBinding>,
    wanted: &[&CStr],
) -> Result<DeviceCandidate> {
    let props = instance.get_physical_device_properties(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy().into_owned();
    let feats = instance.get_physical_device_features(phys);

    let ext_props = instance
        .enumerate_device_extension_properties(phys)
        .check("vkEnumerateDeviceExtensionProperties")?;
    let missing_extensions = wanted
        .iter()
        .filter(|w| {
            !ext_props
                .iter()
                .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == **w)
        })
        .map(|w| w.to_string_lossy().into_owned())
        .collect();

    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let families = find_queue_families(&qprops, |i| match surface {
        Some(s) => s
            .loader
            .get_physical_device_surface_support(phys, i, s.surface)
            .unwrap_or(false),
        None => true,
    });

    let (surface_formats, present_modes) = match surface {
        Some(s) => (
            s.loader
                .get_physical_device_surface_formats(phys, s.surface)
                .map(|v| v.len())
                .unwrap_or(0),
            s.loader
                .get_physical_device_surface_present_modes(phys, s.surface)
                .map(|v| v.len())
                .unwrap_or(0),
        ),
        None => (0, 0),
    };

    Ok(DeviceCandidate {
        name,
        device_type: props.device_type,
        sampler_anisotropy: feats.sampler_anisotropy == vk::TRUE,
        sample_rate_shading: feats.sample_rate_shading == vk::TRUE,
        missing_extensions,
        families,
        surface_formats,
        present_modes,
    })
}

unsafe fn supports_mesh_shading(instance: &Instance, phys: vk::PhysicalDevice) -> Result<bool> {
    let ext_props = instance
        .enumerate_device_extension_properties(phys)
        .check("vkEnumerateDeviceExtensionProperties")?;
    let has_ext = ext_props
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == mesh_shader::NAME);
    if !has_ext {
        return Ok(false);
    }

    let mut mesh = vk::PhysicalDeviceMeshShaderFeaturesEXT {
        s_type: vk::StructureType::PHYSICAL_DEVICE_MESH_SHADER_FEATURES_EXT,
        ..Default::default()
    };
    let mut feats12 = vk::PhysicalDeviceVulkan12Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
        p_next: (&mut mesh) as *mut _ as *mut c_void,
        ..Default::default()
    };
    let mut feats2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        p_next: (&mut feats12) as *mut _ as *mut c_void,
        ..Default::default()
    };
    instance.get_physical_device_features2(phys, &mut feats2);

    Ok(mesh.mesh_shader == vk::TRUE
        && feats12.storage_buffer8_bit_access == vk::TRUE
        && feats12.shader_int8 == vk::TRUE)
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: &QueueFamilies,
    exts: &[&CStr],
    cand: &DeviceCandidate,
    mesh: bool,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<_> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    // Feature chain: features2 [-> vulkan12 -> mesh] on the mesh path.
    let mut mesh_feats = vk::PhysicalDeviceMeshShaderFeaturesEXT {
        s_type: vk::StructureType::PHYSICAL_DEVICE_MESH_SHADER_FEATURES_EXT,
        mesh_shader: vk::TRUE,
        ..Default::default()
    };
    let mut feats12 = vk::PhysicalDeviceVulkan12Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
        ..Default::default()
    };
    let mut chain: *mut c_void = std::ptr::null_mut();
    if mesh {
        feats12.storage_buffer8_bit_access = vk::TRUE;
        feats12.shader_int8 = vk::TRUE;
        feats12.p_next = (&mut mesh_feats) as *mut _ as *mut c_void;
        chain = (&mut feats12) as *mut _ as *mut c_void;
    }
    let feats2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        p_next: chain,
        features: vk::PhysicalDeviceFeatures {
            sampler_anisotropy: cand.sampler_anisotropy as vk::Bool32,
            sample_rate_shading: cand.sample_rate_shading as vk::Bool32,
            ..Default::default()
        },
        ..Default::default()
    };

    let ext_ptrs: Vec<_> = exts.iter().map(|e| e.as_ptr()).collect();
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&feats2) as *const _ as *const c_void,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        ..Default::default()
    };
    let device = instance
        .create_device(phys, &dinfo, None)
        .check("vkCreateDevice")
        .context("create logical device")?;
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_dedicated_transfer_family() {
        let props = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let f = find_queue_families(&props, |_| true).unwrap();
        assert_eq!(
            f,
            QueueFamilies {
                graphics: 0,
                present: 0,
                transfer: 1
            }
        );
        assert_eq!(f.unique(), vec![0, 1]);
        assert!(f.has_dedicated_transfer());
    }

    #[test]
    fn test_transfer_falls_back_to_graphics() {
        let props = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let f = find_queue_families(&props, |_| true).unwrap();
        assert_eq!(f.transfer, 0);
        assert_eq!(f.unique(), vec![0]);
        assert!(!f.has_dedicated_transfer());
    }

    #[test]
    fn test_scans_past_first_family_for_present() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];
        let f = find_queue_families(&props, |i| i == 2).unwrap();
        assert_eq!(f.graphics, 0);
        assert_eq!(f.present, 2);
        assert_eq!(f.transfer, 2);
        assert_eq!(f.unique(), vec![0, 2]);
    }

    #[test]
    fn test_no_present_family_is_incomplete() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        assert!(find_queue_families(&props, |_| false).is_none());
        assert!(find_queue_families(&[family(vk::QueueFlags::COMPUTE)], |_| true).is_none());
    }

    fn good_candidate() -> DeviceCandidate {
        DeviceCandidate {
            name: "test gpu".into(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            sampler_anisotropy: true,
            sample_rate_shading: true,
            missing_extensions: Vec::new(),
            families: Some(QueueFamilies {
                graphics: 0,
                present: 0,
                transfer: 0,
            }),
            surface_formats: 2,
            present_modes: 1,
        }
    }

    fn windowed() -> DeviceRequirements {
        DeviceRequirements {
            require_discrete: true,
            needs_surface: true,
            require_features: true,
        }
    }

    #[test]
    fn test_candidate_predicates() {
        assert_eq!(good_candidate().rejection(&windowed()), None);

        let mut c = good_candidate();
        c.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        assert!(c.rejection(&windowed()).is_some());
        let relaxed = DeviceRequirements {
            require_discrete: false,
            ..windowed()
        };
        assert_eq!(c.rejection(&relaxed), None);

        let mut c = good_candidate();
        c.missing_extensions.push("VK_KHR_push_descriptor".into());
        assert!(c.rejection(&windowed()).unwrap().contains("push_descriptor"));

        let mut c = good_candidate();
        c.present_modes = 0;
        assert!(c.rejection(&windowed()).is_some());

        let mut c = good_candidate();
        c.sampler_anisotropy = false;
        assert!(c.rejection(&windowed()).is_some());
    }

    #[test]
    fn test_max_usable_samples() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_samples(&limits, 64), vk::SampleCountFlags::TYPE_4);
        assert_eq!(max_usable_samples(&limits, 2), vk::SampleCountFlags::TYPE_2);
        assert_eq!(max_usable_samples(&limits, 1), vk::SampleCountFlags::TYPE_1);
    }
}
