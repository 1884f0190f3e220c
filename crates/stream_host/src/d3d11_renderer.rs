//! Lit cube renderer on Direct3D 11

use std::ffi::c_void;
use std::time::Instant;

use bytemuck::Zeroable;
use windows::core::{s, PCSTR};
use windows::Win32::Graphics::Direct3D::Fxc::{
    D3DCompile, D3DCOMPILE_ENABLE_STRICTNESS, D3DCOMPILE_OPTIMIZATION_LEVEL3,
    D3DCOMPILE_PACK_MATRIX_COLUMN_MAJOR,
};
use windows::Win32::Graphics::Direct3D::{ID3DBlob, D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Buffer, ID3D11Device, ID3D11DeviceContext, ID3D11InputLayout, ID3D11PixelShader,
    ID3D11RasterizerState, ID3D11VertexShader, D3D11_APPEND_ALIGNED_ELEMENT,
    D3D11_BIND_CONSTANT_BUFFER, D3D11_BIND_INDEX_BUFFER, D3D11_BIND_VERTEX_BUFFER,
    D3D11_BUFFER_DESC, D3D11_CULL_NONE, D3D11_FILL_SOLID, D3D11_INPUT_ELEMENT_DESC,
    D3D11_INPUT_PER_VERTEX_DATA, D3D11_RASTERIZER_DESC, D3D11_SUBRESOURCE_DATA,
    D3D11_USAGE_DEFAULT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R16_UINT, DXGI_FORMAT_R32G32B32_FLOAT};

use stream_xr::d3d11::{prepare_view, D3D11Binding, D3D11ViewPair};
use stream_xr::{ProjectionView, Renderer, XrError};

use crate::scene::{self, Vertex, CLEAR_COLOR, CUBE_INDICES};

/// Draws the rotating cube into each view it is handed
pub struct CubeRenderer {
    context: ID3D11DeviceContext,
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
    vertex_buffer: ID3D11Buffer,
    index_buffer: ID3D11Buffer,
    constant_buffer: ID3D11Buffer,
    rasterizer: ID3D11RasterizerState,
    started: Instant,
}

impl CubeRenderer {
    /// Compile the shaders and upload the cube on the binding's device
    pub fn new(binding: &D3D11Binding) -> Result<Self, XrError> {
        let device = binding.device();
        let source = scene::shader_source();

        let vs_blob = compile(&source, s!("vs"), s!("vs_5_0"))?;
        let ps_blob = compile(&source, s!("ps"), s!("ps_5_0"))?;
        let vs_bytes = blob_bytes(&vs_blob);
        let ps_bytes = blob_bytes(&ps_blob);

        let mut vertex_shader = None;
        let mut pixel_shader = None;
        let mut input_layout = None;
        unsafe {
            device
                .CreateVertexShader(vs_bytes, None, Some(&mut vertex_shader))
                .map_err(|e| render_error("CreateVertexShader", e))?;
            device
                .CreatePixelShader(ps_bytes, None, Some(&mut pixel_shader))
                .map_err(|e| render_error("CreatePixelShader", e))?;

            let elements = [
                input_element(s!("SV_POSITION")),
                input_element(s!("COLOR")),
                input_element(s!("NORMAL")),
            ];
            device
                .CreateInputLayout(&elements, vs_bytes, Some(&mut input_layout))
                .map_err(|e| render_error("CreateInputLayout", e))?;
        }

        let vertices = scene::cube_vertices();
        let vertex_buffer = create_buffer(
            device,
            bytemuck::cast_slice(&vertices),
            D3D11_BIND_VERTEX_BUFFER.0 as u32,
            true,
        )?;
        let index_buffer = create_buffer(
            device,
            bytemuck::cast_slice(&CUBE_INDICES),
            D3D11_BIND_INDEX_BUFFER.0 as u32,
            true,
        )?;
        let constants = scene::TransformBuffer::zeroed();
        let constant_buffer = create_buffer(
            device,
            bytemuck::bytes_of(&constants),
            D3D11_BIND_CONSTANT_BUFFER.0 as u32,
            false,
        )?;

        let raster_desc = D3D11_RASTERIZER_DESC {
            FillMode: D3D11_FILL_SOLID,
            CullMode: D3D11_CULL_NONE,
            DepthClipEnable: true.into(),
            ..Default::default()
        };
        let mut rasterizer = None;
        unsafe { device.CreateRasterizerState(&raster_desc, Some(&mut rasterizer)) }
            .map_err(|e| render_error("CreateRasterizerState", e))?;

        match (vertex_shader, pixel_shader, input_layout, rasterizer) {
            (Some(vertex_shader), Some(pixel_shader), Some(input_layout), Some(rasterizer)) => {
                log::info!("Cube renderer ready ({} indices)", CUBE_INDICES.len());
                Ok(Self {
                    context: binding.context().clone(),
                    vertex_shader,
                    pixel_shader,
                    input_layout,
                    vertex_buffer,
                    index_buffer,
                    constant_buffer,
                    rasterizer,
                    started: Instant::now(),
                })
            }
            _ => Err(XrError::Render("pipeline object creation returned null".into())),
        }
    }

    fn draw_cube(&self, view: &ProjectionView) {
        let constants = scene::transforms(view, self.started.elapsed().as_secs_f32());
        let stride = std::mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        let context = &self.context;

        unsafe {
            context.UpdateSubresource(
                &self.constant_buffer,
                0,
                None,
                bytemuck::bytes_of(&constants).as_ptr() as *const c_void,
                0,
                0,
            );
            context.VSSetConstantBuffers(0, Some(&[Some(self.constant_buffer.clone())]));
            context.VSSetShader(&self.vertex_shader, None);
            context.PSSetShader(&self.pixel_shader, None);
            context.RSSetState(&self.rasterizer);

            context.IASetVertexBuffers(
                0,
                1,
                Some(&Some(self.vertex_buffer.clone())),
                Some(&stride),
                Some(&offset),
            );
            context.IASetIndexBuffer(&self.index_buffer, DXGI_FORMAT_R16_UINT, 0);
            context.IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            context.IASetInputLayout(&self.input_layout);
            context.DrawIndexed(CUBE_INDICES.len() as u32, 0, 0);
        }
    }
}

impl Renderer<D3D11ViewPair> for CubeRenderer {
    fn draw(&mut self, view: &ProjectionView, target: &D3D11ViewPair) -> Result<(), XrError> {
        prepare_view(&self.context, target, view, CLEAR_COLOR);
        self.draw_cube(view);
        Ok(())
    }
}

fn render_error(call: &str, e: windows::core::Error) -> XrError {
    XrError::Render(format!("{}: {}", call, e))
}

fn input_element(semantic: PCSTR) -> D3D11_INPUT_ELEMENT_DESC {
    D3D11_INPUT_ELEMENT_DESC {
        SemanticName: semantic,
        SemanticIndex: 0,
        Format: DXGI_FORMAT_R32G32B32_FLOAT,
        InputSlot: 0,
        AlignedByteOffset: D3D11_APPEND_ALIGNED_ELEMENT,
        InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
        InstanceDataStepRate: 0,
    }
}

fn create_buffer(
    device: &ID3D11Device,
    bytes: &[u8],
    bind_flags: u32,
    initial: bool,
) -> Result<ID3D11Buffer, XrError> {
    let desc = D3D11_BUFFER_DESC {
        ByteWidth: bytes.len() as u32,
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: bind_flags,
        ..Default::default()
    };
    let data = D3D11_SUBRESOURCE_DATA {
        pSysMem: bytes.as_ptr() as *const c_void,
        ..Default::default()
    };

    let mut buffer = None;
    unsafe {
        device.CreateBuffer(
            &desc,
            initial.then_some(&data as *const _),
            Some(&mut buffer),
        )
    }
    .map_err(|e| render_error("CreateBuffer", e))?;
    buffer.ok_or_else(|| XrError::Render("CreateBuffer returned null".into()))
}

fn compile(source: &str, entry: PCSTR, target: PCSTR) -> Result<ID3DBlob, XrError> {
    let flags = D3DCOMPILE_PACK_MATRIX_COLUMN_MAJOR
        | D3DCOMPILE_ENABLE_STRICTNESS
        | D3DCOMPILE_OPTIMIZATION_LEVEL3;

    let mut code = None;
    let mut errors = None;
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as *const c_void,
            source.len(),
            PCSTR::null(),
            None,
            None,
            entry,
            target,
            flags,
            0,
            &mut code,
            Some(&mut errors),
        )
    };

    if let Err(e) = result {
        let detail = errors
            .as_ref()
            .map(|blob| String::from_utf8_lossy(blob_bytes(blob)).into_owned())
            .unwrap_or_else(|| e.to_string());
        return Err(XrError::Render(format!("D3DCompile failed: {}", detail)));
    }
    code.ok_or_else(|| XrError::Render("D3DCompile returned no code".into()))
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
    }
}
