//! Accelerator backend: WGSL compute kernels dispatched through `wgpu`.
//!
//! Results stay device-resident; host reads go through [`SyncedMemory`], which
//! blocks on a buffer map. `nrm2` is the only primitive that reads a value back
//! immediately.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use pollster::block_on;
use wgpu::util::DeviceExt;

use super::{check_gemm_operands, check_gemv_operands, check_strided, MathBackend, Transpose};
use crate::blob::SyncedMemory;
use crate::error::{Error, Result};

const GEMM_WORKGROUP: u32 = 8;
const LINEAR_WORKGROUP: u32 = 64;

const GEMM_WGSL: &str = r#"
struct Params {
    m: u32,
    n: u32,
    k: u32,
    trans_a: u32,
    trans_b: u32,
    alpha: f32,
    beta: f32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.y;
    let col = gid.x;
    if (row >= params.m || col >= params.n) {
        return;
    }
    var acc: f32 = 0.0;
    for (var p: u32 = 0u; p < params.k; p = p + 1u) {
        var lhs: f32;
        if (params.trans_a == 0u) {
            lhs = a[row * params.k + p];
        } else {
            lhs = a[p * params.m + row];
        }
        var rhs: f32;
        if (params.trans_b == 0u) {
            rhs = b[p * params.n + col];
        } else {
            rhs = b[col * params.k + p];
        }
        acc = acc + lhs * rhs;
    }
    let idx = row * params.n + col;
    if (params.beta == 0.0) {
        c[idx] = params.alpha * acc;
    } else {
        c[idx] = params.alpha * acc + params.beta * c[idx];
    }
}
"#;

const GEMV_WGSL: &str = r#"
struct Params {
    m: u32,
    n: u32,
    trans: u32,
    _pad0: u32,
    alpha: f32,
    beta: f32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> x: array<f32>;
@group(0) @binding(2) var<storage, read_write> y: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    var acc: f32 = 0.0;
    if (params.trans == 0u) {
        if (i >= params.m) {
            return;
        }
        for (var j: u32 = 0u; j < params.n; j = j + 1u) {
            acc = acc + a[i * params.n + j] * x[j];
        }
    } else {
        if (i >= params.n) {
            return;
        }
        for (var r: u32 = 0u; r < params.m; r = r + 1u) {
            acc = acc + a[r * params.n + i] * x[r];
        }
    }
    if (params.beta == 0.0) {
        y[i] = params.alpha * acc;
    } else {
        y[i] = params.alpha * acc + params.beta * y[i];
    }
}
"#;

const SCAL_WGSL: &str = r#"
struct Params {
    n: u32,
    offset: u32,
    inc: u32,
    alpha: f32,
};

@group(0) @binding(0) var<storage, read_write> x: array<f32>;
@group(0) @binding(1) var<uniform> params: Params;

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.n) {
        return;
    }
    let idx = params.offset + i * params.inc;
    x[idx] = params.alpha * x[idx];
}
"#;

const NRM2_WGSL: &str = r#"
struct Params {
    n: u32,
    offset: u32,
    inc: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read_write> norm_out: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

var<workgroup> scratch: array<f32, 256>;

// Two passes over the strided vector: the largest magnitude first, then the
// sum of squares of x / scale, so large entries do not overflow to inf.
@compute @workgroup_size(256, 1, 1)
fn main(@builtin(local_invocation_id) lid: vec3<u32>) {
    let t = lid.x;

    var peak: f32 = 0.0;
    for (var i: u32 = t; i < params.n; i = i + 256u) {
        peak = max(peak, abs(x[params.offset + i * params.inc]));
    }
    scratch[t] = peak;
    workgroupBarrier();
    for (var stride: u32 = 128u; stride > 0u; stride = stride / 2u) {
        if (t < stride) {
            scratch[t] = max(scratch[t], scratch[t + stride]);
        }
        workgroupBarrier();
    }
    let scale = scratch[0];
    workgroupBarrier();

    var acc: f32 = 0.0;
    if (scale > 0.0) {
        for (var i: u32 = t; i < params.n; i = i + 256u) {
            let v = x[params.offset + i * params.inc] / scale;
            acc = acc + v * v;
        }
    }
    scratch[t] = acc;
    workgroupBarrier();
    for (var stride: u32 = 128u; stride > 0u; stride = stride / 2u) {
        if (t < stride) {
            scratch[t] = scratch[t] + scratch[t + stride];
        }
        workgroupBarrier();
    }
    if (t == 0u) {
        norm_out[0] = scale * sqrt(scratch[0]);
    }
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GemmParams {
    m: u32,
    n: u32,
    k: u32,
    trans_a: u32,
    trans_b: u32,
    alpha: f32,
    beta: f32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GemvParams {
    m: u32,
    n: u32,
    trans: u32,
    _pad0: u32,
    alpha: f32,
    beta: f32,
    _pad1: u32,
    _pad2: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ScalParams {
    n: u32,
    offset: u32,
    inc: u32,
    alpha: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Nrm2Params {
    n: u32,
    offset: u32,
    inc: u32,
    _pad: u32,
}

/// A `wgpu` device/queue pair with the compiled linear algebra pipelines.
pub struct GpuDevice {
    adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    gemm: wgpu::ComputePipeline,
    gemv: wgpu::ComputePipeline,
    scal: wgpu::ComputePipeline,
    nrm2: wgpu::ComputePipeline,
}

impl GpuDevice {
    /// Acquire the default adapter and compile all kernels.
    ///
    /// Fails with [`Error::Device`] when no adapter is available.
    pub fn new() -> Result<Arc<Self>> {
        let instance = wgpu::Instance::default();
        let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| Error::Device("no compatible WGPU adapter was found".to_string()))?;
        let adapter_name = adapter.get_info().name;
        tracing::info!(adapter = %adapter_name, "selected accelerator adapter");

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("inner_product.gpu.device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|err| Error::Device(format!("failed to acquire WGPU device: {}", err)))?;

        let gemm = create_pipeline(&device, "inner_product.gpu.gemm", GEMM_WGSL);
        let gemv = create_pipeline(&device, "inner_product.gpu.gemv", GEMV_WGSL);
        let scal = create_pipeline(&device, "inner_product.gpu.scal", SCAL_WGSL);
        let nrm2 = create_pipeline(&device, "inner_product.gpu.nrm2", NRM2_WGSL);

        Ok(Arc::new(Self {
            adapter_name,
            device,
            queue,
            gemm,
            gemv,
            scal,
            nrm2,
        }))
    }

    /// Name reported by the adapter.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Allocate a zero-initialized storage buffer for `len` values.
    pub(crate) fn create_buffer(&self, len: usize) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("inner_product.gpu.storage"),
            // zero-sized storage bindings are invalid
            size: (len.max(1) * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Queue a host-to-device copy; it lands before the next submission runs.
    pub(crate) fn upload(&self, buffer: &wgpu::Buffer, values: &[f32]) {
        if !values.is_empty() {
            self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(values));
        }
    }

    /// Copy the first `len` values of `buffer` back to the host, blocking until done.
    pub(crate) fn read_buffer(&self, buffer: &wgpu::Buffer, len: usize) -> Result<Vec<f32>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let size = (len * std::mem::size_of::<f32>()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("inner_product.gpu.readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("inner_product.gpu.readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| Error::Device("buffer map was cancelled".to_string()))?
            .map_err(|err| Error::Device(format!("failed to map GPU buffer: {}", err)))?;

        let data = slice.get_mapped_range();
        let values = bytemuck::cast_slice::<u8, f32>(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(values)
    }

    fn dispatch(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        buffers: &[&wgpu::Buffer],
        params: &[u8],
        workgroups: (u32, u32),
    ) {
        let uniform = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("inner_product.gpu.params"),
                contents: params,
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: buffers.len() as u32,
            resource: uniform.as_entire_binding(),
        });

        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups.0.max(1), workgroups.1.max(1), 1);
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

fn create_pipeline(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: None,
        module: &module,
        entry_point: "main",
        compilation_options: Default::default(),
    })
}

/// Convert a dimension to the `u32` the kernels index with.
fn shader_u32(what: &str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        Error::Shape(format!(
            "{} = {} does not fit a 32-bit shader index",
            what, value
        ))
    })
}

fn groups(len: u32, size: u32) -> u32 {
    len.div_ceil(size)
}

/// Math on device-resident memory.
#[derive(Clone)]
pub struct GpuMath {
    device: Arc<GpuDevice>,
}

impl GpuMath {
    pub fn new(device: Arc<GpuDevice>) -> Self {
        Self { device }
    }
}

impl MathBackend for GpuMath {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn gemm(
        &self,
        trans_a: Transpose,
        trans_b: Transpose,
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        a: &SyncedMemory,
        b: &SyncedMemory,
        beta: f32,
        c: &mut SyncedMemory,
    ) -> Result<()> {
        check_gemm_operands(m, n, k, a, b, c)?;
        if m == 0 || n == 0 {
            return Ok(());
        }

        let params = GemmParams {
            m: shader_u32("m", m)?,
            n: shader_u32("n", n)?,
            k: shader_u32("k", k)?,
            trans_a: trans_a.is_trans() as u32,
            trans_b: trans_b.is_trans() as u32,
            alpha,
            beta,
            _pad: 0,
        };
        let a = a.gpu_data(&self.device)?;
        let b = b.gpu_data(&self.device)?;
        let c = c.mutable_gpu_data(&self.device)?;
        self.device.dispatch(
            "inner_product.gpu.gemm",
            &self.device.gemm,
            &[&*a, &*b, c],
            bytemuck::bytes_of(&params),
            (
                groups(params.n, GEMM_WORKGROUP),
                groups(params.m, GEMM_WORKGROUP),
            ),
        );
        Ok(())
    }

    fn gemv(
        &self,
        trans_a: Transpose,
        m: usize,
        n: usize,
        alpha: f32,
        a: &SyncedMemory,
        x: &SyncedMemory,
        beta: f32,
        y: &mut SyncedMemory,
    ) -> Result<()> {
        check_gemv_operands(trans_a, m, n, a, x, y)?;
        let y_len = if trans_a.is_trans() { n } else { m };
        if y_len == 0 {
            return Ok(());
        }

        let params = GemvParams {
            m: shader_u32("m", m)?,
            n: shader_u32("n", n)?,
            trans: trans_a.is_trans() as u32,
            _pad0: 0,
            alpha,
            beta,
            _pad1: 0,
            _pad2: 0,
        };
        let a = a.gpu_data(&self.device)?;
        let x = x.gpu_data(&self.device)?;
        let y = y.mutable_gpu_data(&self.device)?;
        self.device.dispatch(
            "inner_product.gpu.gemv",
            &self.device.gemv,
            &[&*a, &*x, y],
            bytemuck::bytes_of(&params),
            (groups(shader_u32("y length", y_len)?, LINEAR_WORKGROUP), 1),
        );
        Ok(())
    }

    fn scal(
        &self,
        n: usize,
        alpha: f32,
        x: &mut SyncedMemory,
        offset: usize,
        inc: usize,
    ) -> Result<()> {
        check_strided("scal", n, x.len(), offset, inc)?;
        if n == 0 {
            return Ok(());
        }

        let params = ScalParams {
            n: shader_u32("n", n)?,
            offset: shader_u32("offset", offset)?,
            inc: shader_u32("inc", inc)?,
            alpha,
        };
        let x = x.mutable_gpu_data(&self.device)?;
        self.device.dispatch(
            "inner_product.gpu.scal",
            &self.device.scal,
            &[x],
            bytemuck::bytes_of(&params),
            (groups(params.n, LINEAR_WORKGROUP), 1),
        );
        Ok(())
    }

    fn nrm2(&self, n: usize, x: &SyncedMemory, offset: usize, inc: usize) -> Result<f32> {
        check_strided("nrm2", n, x.len(), offset, inc)?;
        if n == 0 {
            return Ok(0.0);
        }

        let params = Nrm2Params {
            n: shader_u32("n", n)?,
            offset: shader_u32("offset", offset)?,
            inc: shader_u32("inc", inc)?,
            _pad: 0,
        };
        let out = self.device.create_buffer(1);
        let x = x.gpu_data(&self.device)?;
        self.device.dispatch(
            "inner_product.gpu.nrm2",
            &self.device.nrm2,
            &[&*x, &out],
            bytemuck::bytes_of(&params),
            (1, 1),
        );
        let norm = self.device.read_buffer(&out, 1)?;
        norm.first()
            .copied()
            .ok_or_else(|| Error::Device("empty norm readback".to_string()))
    }
}
