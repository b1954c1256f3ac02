use crate::device::{
    BufferHandle, RenderDevice, TexelFormat, TexelRect, TexelWrite, TextureHandle,
};
use std::num::NonZeroU32;

fn bytes_per_texel(format: TexelFormat) -> u32 {
    match format {
        TexelFormat::Rgba32Float => 16,
        TexelFormat::R32Float => 4,
    }
}

fn wgpu_format(format: TexelFormat) -> wgpu::TextureFormat {
    match format {
        TexelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TexelFormat::R32Float => wgpu::TextureFormat::R32Float,
    }
}

fn texel_bytes(format: TexelFormat, value: [f32; 4]) -> Vec<u8> {
    match format {
        TexelFormat::Rgba32Float => bytemuck::bytes_of(&value).to_vec(),
        TexelFormat::R32Float => value[0].to_le_bytes().to_vec(),
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

struct TextureEntry {
    texture: wgpu::Texture,
    format: TexelFormat,
    width: u32,
    height: u32,
}

/// `RenderDevice` backed by a real GPU through wgpu. Uploads go through
/// `Queue::write_texture`; readback copies into a mapped staging buffer.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: Vec<TextureEntry>,
    buffers: Vec<wgpu::Buffer>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        WgpuDevice {
            device,
            queue,
            textures: Vec::new(),
            buffers: Vec::new(),
        }
    }

    /// Grabs the first suitable adapter and device.
    pub fn request() -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::Backends::PRIMARY);
        let adapter = futures::executor::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        ))
        .ok_or_else(|| anyhow::anyhow!("No suitable GPU adapter"))?;
        log::info!("Using adapter: {:?}", adapter.get_info());
        let (device, queue) = futures::executor::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("particle sim device"),
                features: wgpu::Features::empty(),
                limits: wgpu::Limits::default(),
            },
            None,
        ))?;
        Ok(WgpuDevice::new(device, queue))
    }

    fn entry(&self, texture: TextureHandle) -> &TextureEntry {
        &self.textures[texture.0 as usize]
    }
}

impl RenderDevice for WgpuDevice {
    fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TexelFormat,
        label: &str,
    ) -> TextureHandle {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
        });
        self.textures.push(TextureEntry {
            texture,
            format,
            width,
            height,
        });
        TextureHandle(self.textures.len() as u32 - 1)
    }

    fn create_buffer(&mut self, stride: u32, count: u32, label: &str) -> BufferHandle {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (stride as u64) * (count as u64),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        self.buffers.push(buffer);
        BufferHandle(self.buffers.len() as u32 - 1)
    }

    fn clear_texture_region(&mut self, texture: TextureHandle, region: TexelRect, value: [f32; 4]) {
        let entry = self.entry(texture);
        let texel = texel_bytes(entry.format, value);
        let mut data = Vec::with_capacity(texel.len() * (region.width * region.height) as usize);
        for _ in 0..region.width * region.height {
            data.extend_from_slice(&texel);
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: NonZeroU32::new(region.width * texel.len() as u32),
                rows_per_image: NonZeroU32::new(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn write_texels(&mut self, texture: TextureHandle, writes: &[TexelWrite]) {
        let entry = self.entry(texture);
        for w in writes {
            let data = texel_bytes(entry.format, w.value);
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &entry.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: w.x,
                        y: w.y,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                &data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: None,
                    rows_per_image: None,
                },
                wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    fn read_texture_region(&mut self, texture: TextureHandle, region: TexelRect) -> Vec<[f32; 4]> {
        let entry = &self.textures[texture.0 as usize];
        let bpt = bytes_per_texel(entry.format);
        let padded_bytes_per_row = align_to(region.width * bpt, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: (padded_bytes_per_row as u64) * (region.height as u64),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: NonZeroU32::new(padded_bytes_per_row),
                    rows_per_image: NonZeroU32::new(region.height),
                },
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let mapping = slice.map_async(wgpu::MapMode::Read);
        self.device.poll(wgpu::Maintain::Wait);
        futures::executor::block_on(mapping).unwrap();

        let mut out = Vec::with_capacity((region.width * region.height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in 0..region.height {
                let row_offset = (row * padded_bytes_per_row) as usize;
                for col in 0..region.width {
                    let offset = row_offset + (col * bpt) as usize;
                    let texel = &data[offset..offset + bpt as usize];
                    match entry.format {
                        TexelFormat::Rgba32Float => {
                            out.push(bytemuck::pod_read_unaligned::<[f32; 4]>(texel));
                        }
                        TexelFormat::R32Float => {
                            let v = f32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
                            out.push([v, 0.0, 0.0, 0.0]);
                        }
                    }
                }
            }
        }
        staging.unmap();
        out
    }

    fn wait_idle(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
