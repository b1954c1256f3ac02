use std::collections::HashMap;

/// Formats used by the simulation state textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexelFormat {
    Rgba32Float,
    R32Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A single texel update. R32Float targets keep only the x component.
#[derive(Debug, Clone, Copy)]
pub struct TexelWrite {
    pub x: u32,
    pub y: u32,
    pub value: [f32; 4],
}

/// The resource factory and upload/readback surface the simulation runs
/// against. All calls are made from the render thread, in command order, so
/// implementations do not need internal synchronization.
pub trait RenderDevice {
    fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TexelFormat,
        label: &str,
    ) -> TextureHandle;

    fn create_buffer(&mut self, stride: u32, count: u32, label: &str) -> BufferHandle;

    /// Fill a region of a texture with one value.
    fn clear_texture_region(&mut self, texture: TextureHandle, region: TexelRect, value: [f32; 4]);

    /// Scattered per-texel writes, applied in order.
    fn write_texels(&mut self, texture: TextureHandle, writes: &[TexelWrite]);

    /// Synchronous readback of a region, row-major. Stalls until the device
    /// has finished all preceding work on the texture.
    fn read_texture_region(&mut self, texture: TextureHandle, region: TexelRect) -> Vec<[f32; 4]>;

    /// Block until all submitted work has completed.
    fn wait_idle(&mut self);
}

struct SoftwareTexture {
    width: u32,
    height: u32,
    #[allow(dead_code)]
    format: TexelFormat,
    texels: Vec<[f32; 4]>,
}

/// CPU reference implementation of `RenderDevice`. Backs the tests and the
/// headless demo; every operation completes immediately.
pub struct SoftwareDevice {
    textures: HashMap<u32, SoftwareTexture>,
    next_texture: u32,
    next_buffer: u32,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        SoftwareDevice {
            textures: HashMap::new(),
            next_texture: 0,
            next_buffer: 0,
        }
    }

    pub fn texel(&self, texture: TextureHandle, x: u32, y: u32) -> [f32; 4] {
        let tex = &self.textures[&texture.0];
        assert!(x < tex.width && y < tex.height);
        tex.texels[(y * tex.width + x) as usize]
    }
}

impl RenderDevice for SoftwareDevice {
    fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TexelFormat,
        label: &str,
    ) -> TextureHandle {
        log::debug!("Creating {}x{} texture: {}", width, height, label);
        let id = self.next_texture;
        self.next_texture += 1;
        // Fresh textures hold garbage until the first clear.
        self.textures.insert(
            id,
            SoftwareTexture {
                width,
                height,
                format,
                texels: vec![[f32::NAN; 4]; (width * height) as usize],
            },
        );
        TextureHandle(id)
    }

    fn create_buffer(&mut self, stride: u32, count: u32, label: &str) -> BufferHandle {
        log::debug!("Creating buffer of {}x{} bytes: {}", count, stride, label);
        let id = self.next_buffer;
        self.next_buffer += 1;
        BufferHandle(id)
    }

    fn clear_texture_region(&mut self, texture: TextureHandle, region: TexelRect, value: [f32; 4]) {
        let tex = self.textures.get_mut(&texture.0).expect("unknown texture");
        assert!(region.x + region.width <= tex.width);
        assert!(region.y + region.height <= tex.height);
        for y in region.y..region.y + region.height {
            let offset = (y * tex.width + region.x) as usize;
            tex.texels[offset..offset + region.width as usize].fill(value);
        }
    }

    fn write_texels(&mut self, texture: TextureHandle, writes: &[TexelWrite]) {
        let tex = self.textures.get_mut(&texture.0).expect("unknown texture");
        for w in writes {
            assert!(w.x < tex.width && w.y < tex.height);
            tex.texels[(w.y * tex.width + w.x) as usize] = w.value;
        }
    }

    fn read_texture_region(&mut self, texture: TextureHandle, region: TexelRect) -> Vec<[f32; 4]> {
        let tex = &self.textures[&texture.0];
        assert!(region.x + region.width <= tex.width);
        assert!(region.y + region.height <= tex.height);
        let mut out = Vec::with_capacity((region.width * region.height) as usize);
        for y in region.y..region.y + region.height {
            let offset = (y * tex.width + region.x) as usize;
            out.extend_from_slice(&tex.texels[offset..offset + region.width as usize]);
        }
        out
    }

    fn wait_idle(&mut self) {}
}
