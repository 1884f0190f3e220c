//! Direct3D 11 graphics binding
//!
//! The device is created on the DXGI adapter whose LUID the runtime asks
//! for. Each swapchain texture gets a render target view plus a `D32_FLOAT`
//! depth view over an `R32_TYPELESS` texture of the same shape. View
//! dimensions follow the texture's sample count and array size.

use std::ffi::c_void;

use openxr as xr;
use windows::core::Interface;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_11_0,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11DepthStencilView, ID3D11Device, ID3D11DeviceContext,
    ID3D11RenderTargetView, ID3D11Texture2D, D3D11_BIND_DEPTH_STENCIL,
    D3D11_BIND_SHADER_RESOURCE, D3D11_CLEAR_DEPTH, D3D11_CLEAR_STENCIL,
    D3D11_CREATE_DEVICE_FLAG, D3D11_DEPTH_STENCIL_VIEW_DESC, D3D11_DEPTH_STENCIL_VIEW_DESC_0,
    D3D11_DSV_DIMENSION_TEXTURE2D, D3D11_DSV_DIMENSION_TEXTURE2DARRAY,
    D3D11_DSV_DIMENSION_TEXTURE2DMS, D3D11_DSV_DIMENSION_TEXTURE2DMSARRAY,
    D3D11_RENDER_TARGET_VIEW_DESC, D3D11_RENDER_TARGET_VIEW_DESC_0,
    D3D11_RTV_DIMENSION_TEXTURE2D, D3D11_RTV_DIMENSION_TEXTURE2DARRAY,
    D3D11_RTV_DIMENSION_TEXTURE2DMS, D3D11_RTV_DIMENSION_TEXTURE2DMSARRAY, D3D11_SDK_VERSION,
    D3D11_TEX2DMS_ARRAY_DSV, D3D11_TEX2DMS_ARRAY_RTV, D3D11_TEX2DMS_DSV, D3D11_TEX2DMS_RTV,
    D3D11_TEX2D_ARRAY_DSV, D3D11_TEX2D_ARRAY_RTV, D3D11_TEX2D_DSV, D3D11_TEX2D_RTV,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT, D3D11_VIEWPORT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{CreateDXGIFactory1, IDXGIAdapter, IDXGIAdapter1, IDXGIFactory1};

use crate::graphics::{
    select_adapter, AdapterInfo, AdapterLuid, GraphicsBinding, TextureDesc, ViewDimension,
    COLOR_FORMAT, DEPTH_VIEW_FORMAT,
};
use crate::openxr_backend::XrGraphicsBinding;
use crate::{ProjectionView, XrError};

/// Color + depth views of one swapchain image
pub struct D3D11ViewPair {
    pub target_view: ID3D11RenderTargetView,
    pub depth_view: ID3D11DepthStencilView,
}

/// D3D11 device on the runtime's adapter
pub struct D3D11Binding {
    // Dropped in declaration order: context before device
    context: ID3D11DeviceContext,
    device: ID3D11Device,
    adapter: AdapterInfo,
}

impl D3D11Binding {
    /// Create a device on the adapter matching `required`
    pub fn new(required: AdapterLuid, min_feature_level: D3D_FEATURE_LEVEL) -> Result<Self, XrError> {
        let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
            .map_err(|e| XrError::DeviceCreation(format!("CreateDXGIFactory1: {}", e)))?;

        let (adapters, infos) = enumerate_adapters(&factory);
        let index = select_adapter(&infos, required)?;
        let adapter: IDXGIAdapter = adapters[index]
            .cast()
            .map_err(|e| XrError::DeviceCreation(e.to_string()))?;

        let feature_levels = [if min_feature_level.0 > D3D_FEATURE_LEVEL_11_0.0 {
            min_feature_level
        } else {
            D3D_FEATURE_LEVEL_11_0
        }];

        let mut device = None;
        let mut context = None;
        unsafe {
            D3D11CreateDevice(
                &adapter,
                D3D_DRIVER_TYPE_UNKNOWN,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_FLAG(0),
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }
        .map_err(|e| XrError::DeviceCreation(format!("D3D11CreateDevice: {}", e)))?;

        let (Some(device), Some(context)) = (device, context) else {
            return Err(XrError::DeviceCreation("D3D11CreateDevice returned no device".into()));
        };

        Ok(Self {
            context,
            device,
            adapter: infos[index].clone(),
        })
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    /// Viewport from the sub-image rect, clear both targets, bind them
    pub fn prepare_view(&self, pair: &D3D11ViewPair, view: &ProjectionView, clear: [f32; 4]) {
        prepare_view(&self.context, pair, view, clear);
    }
}

/// Set the viewport from the sub-image rect, clear color to `clear` and
/// depth to 1.0, then bind both targets
pub fn prepare_view(
    context: &ID3D11DeviceContext,
    pair: &D3D11ViewPair,
    view: &ProjectionView,
    clear: [f32; 4],
) {
    let rect = view.image_rect;
    let viewport = D3D11_VIEWPORT {
        TopLeftX: rect.offset[0] as f32,
        TopLeftY: rect.offset[1] as f32,
        Width: rect.extent.width as f32,
        Height: rect.extent.height as f32,
        MinDepth: 0.0,
        MaxDepth: 1.0,
    };

    unsafe {
        context.RSSetViewports(Some(&[viewport]));
        context.ClearRenderTargetView(&pair.target_view, &clear);
        context.ClearDepthStencilView(
            &pair.depth_view,
            (D3D11_CLEAR_DEPTH.0 | D3D11_CLEAR_STENCIL.0) as u32,
            1.0,
            0,
        );
        context.OMSetRenderTargets(Some(&[Some(pair.target_view.clone())]), &pair.depth_view);
    }
}

fn enumerate_adapters(factory: &IDXGIFactory1) -> (Vec<IDXGIAdapter1>, Vec<AdapterInfo>) {
    let mut adapters = Vec::new();
    let mut infos = Vec::new();

    let mut index = 0;
    while let Ok(adapter) = unsafe { factory.EnumAdapters1(index) } {
        index += 1;
        let Ok(desc) = (unsafe { adapter.GetDesc1() }) else {
            continue;
        };

        let len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
        let info = AdapterInfo {
            luid: AdapterLuid::from_parts(desc.AdapterLuid.LowPart, desc.AdapterLuid.HighPart),
            description: String::from_utf16_lossy(&desc.Description[..len]),
        };
        log::debug!("Adapter {}: {} ({})", index - 1, info.description, info.luid);

        adapters.push(adapter);
        infos.push(info);
    }

    (adapters, infos)
}

impl GraphicsBinding for D3D11Binding {
    type ViewPair = D3D11ViewPair;
    type Image = <xr::D3D11 as xr::Graphics>::SwapchainImage;

    fn make_view_pair(
        &self,
        image: &Self::Image,
        desc: &TextureDesc,
    ) -> Result<D3D11ViewPair, XrError> {
        let raw = *image as *mut c_void;
        let color = unsafe { ID3D11Texture2D::from_raw_borrowed(&raw) }
            .ok_or_else(|| XrError::DeviceCreation("null swapchain texture".into()))?;

        // The runtime may allocate differently than requested
        let mut color_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { color.GetDesc(&mut color_desc) };

        let shape = TextureDesc {
            width: color_desc.Width,
            height: color_desc.Height,
            array_size: color_desc.ArraySize,
            mip_levels: color_desc.MipLevels,
            sample_count: color_desc.SampleDesc.Count,
            format: desc.format,
        };

        let target_desc = target_view_desc(&shape);
        let mut target_view = None;
        unsafe {
            self.device
                .CreateRenderTargetView(color, Some(&target_desc), Some(&mut target_view))
        }
        .map_err(|e| XrError::DeviceCreation(format!("CreateRenderTargetView: {}", e)))?;

        let depth = shape.depth();

        let depth_desc = D3D11_TEXTURE2D_DESC {
            Width: depth.width,
            Height: depth.height,
            MipLevels: depth.mip_levels,
            ArraySize: depth.array_size,
            Format: DXGI_FORMAT(depth.format as i32),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: depth.sample_count,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_DEPTH_STENCIL.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let mut depth_texture: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .CreateTexture2D(&depth_desc, None, Some(&mut depth_texture))
        }
        .map_err(|e| XrError::DeviceCreation(format!("CreateTexture2D (depth): {}", e)))?;
        let depth_texture = depth_texture
            .ok_or_else(|| XrError::DeviceCreation("no depth texture".into()))?;

        let stencil_desc = depth_view_desc(&depth);
        let mut depth_view = None;
        unsafe {
            self.device
                .CreateDepthStencilView(&depth_texture, Some(&stencil_desc), Some(&mut depth_view))
        }
        .map_err(|e| XrError::DeviceCreation(format!("CreateDepthStencilView: {}", e)))?;

        match (target_view, depth_view) {
            (Some(target_view), Some(depth_view)) => Ok(D3D11ViewPair {
                target_view,
                depth_view,
            }),
            _ => Err(XrError::DeviceCreation("view creation returned null".into())),
        }
    }
}

fn target_view_desc(desc: &TextureDesc) -> D3D11_RENDER_TARGET_VIEW_DESC {
    let (dimension, view) = match desc.view_dimension() {
        ViewDimension::Texture2D => (
            D3D11_RTV_DIMENSION_TEXTURE2D,
            D3D11_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_RTV { MipSlice: 0 },
            },
        ),
        ViewDimension::Texture2DArray => (
            D3D11_RTV_DIMENSION_TEXTURE2DARRAY,
            D3D11_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DArray: D3D11_TEX2D_ARRAY_RTV {
                    MipSlice: 0,
                    FirstArraySlice: 0,
                    ArraySize: desc.array_size,
                },
            },
        ),
        ViewDimension::Texture2DMs => (
            D3D11_RTV_DIMENSION_TEXTURE2DMS,
            D3D11_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DMS: D3D11_TEX2DMS_RTV::default(),
            },
        ),
        ViewDimension::Texture2DMsArray => (
            D3D11_RTV_DIMENSION_TEXTURE2DMSARRAY,
            D3D11_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DMSArray: D3D11_TEX2DMS_ARRAY_RTV {
                    FirstArraySlice: 0,
                    ArraySize: desc.array_size,
                },
            },
        ),
    };

    D3D11_RENDER_TARGET_VIEW_DESC {
        Format: DXGI_FORMAT(desc.format as i32),
        ViewDimension: dimension,
        Anonymous: view,
    }
}

fn depth_view_desc(desc: &TextureDesc) -> D3D11_DEPTH_STENCIL_VIEW_DESC {
    let (dimension, view) = match desc.view_dimension() {
        ViewDimension::Texture2D => (
            D3D11_DSV_DIMENSION_TEXTURE2D,
            D3D11_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_DSV { MipSlice: 0 },
            },
        ),
        ViewDimension::Texture2DArray => (
            D3D11_DSV_DIMENSION_TEXTURE2DARRAY,
            D3D11_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DArray: D3D11_TEX2D_ARRAY_DSV {
                    MipSlice: 0,
                    FirstArraySlice: 0,
                    ArraySize: desc.array_size,
                },
            },
        ),
        ViewDimension::Texture2DMs => (
            D3D11_DSV_DIMENSION_TEXTURE2DMS,
            D3D11_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DMS: D3D11_TEX2DMS_DSV::default(),
            },
        ),
        ViewDimension::Texture2DMsArray => (
            D3D11_DSV_DIMENSION_TEXTURE2DMSARRAY,
            D3D11_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DMSArray: D3D11_TEX2DMS_ARRAY_DSV {
                    FirstArraySlice: 0,
                    ArraySize: desc.array_size,
                },
            },
        ),
    };

    D3D11_DEPTH_STENCIL_VIEW_DESC {
        Format: DXGI_FORMAT(DEPTH_VIEW_FORMAT as i32),
        ViewDimension: dimension,
        Flags: 0,
        Anonymous: view,
    }
}

impl XrGraphicsBinding for D3D11Binding {
    type Api = xr::D3D11;

    const EXTENSION: &'static str = "XR_KHR_D3D11_enable";

    fn enable_extension(available: &xr::ExtensionSet, enabled: &mut xr::ExtensionSet) -> bool {
        enabled.khr_d3d11_enable = available.khr_d3d11_enable;
        available.khr_d3d11_enable
    }

    fn create(instance: &xr::Instance, system: xr::SystemId) -> Result<Self, XrError> {
        let requirements = instance
            .graphics_requirements::<xr::D3D11>(system)
            .map_err(|e| XrError::runtime("xrGetD3D11GraphicsRequirementsKHR", e))?;

        // LUID is eight bytes in every binding's layout
        let luid: [u8; 8] = unsafe { std::mem::transmute_copy(&requirements.adapter_luid) };
        let min_level = D3D_FEATURE_LEVEL(requirements.min_feature_level as i32);

        Self::new(AdapterLuid::from_bytes(luid), min_level)
    }

    fn session_create_info(&self) -> xr::d3d::SessionCreateInfoD3D11 {
        xr::d3d::SessionCreateInfoD3D11 {
            device: self.device.as_raw() as *mut _,
        }
    }

    fn swapchain_format(&self) -> u32 {
        COLOR_FORMAT
    }

    fn shutdown(&mut self) {
        unsafe {
            self.context.ClearState();
            self.context.Flush();
        }
    }
}
