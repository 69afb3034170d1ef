use ash::vk;
use vk_mem::Alloc;

use crate::gfx::Gfx;

/// GPU buffer 封装
///
/// host 可见的 buffer 创建时就保持映射，`mapped_ptr` 在整个生命周期内有效。
///
/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,

    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    mapped_ptr: Option<*mut u8>,
}

unsafe impl Send for GfxBuffer {}
unsafe impl Sync for GfxBuffer {}

// new & init
impl GfxBuffer {
    /// # 参数
    /// - `mapped`: 是否映射到主机内存（host visible + 持久映射）
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags, mapped: bool, name: impl AsRef<str>) -> Self {
        let _span = tracy_client::span!("GfxBuffer::new");

        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if mapped {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let (buffer, mut allocation) =
            unsafe { Gfx::get().allocator().create_buffer_with_alignment(&buffer_ci, &alloc_ci, 8).unwrap() };

        let mut mapped_ptr = None;
        if mapped {
            unsafe {
                mapped_ptr = Some(Gfx::get().allocator().map_memory(&mut allocation).unwrap());
            }
        }

        Gfx::get().gfx_device().set_object_debug_name(buffer, format!("Buffer::{}", name.as_ref()));

        Self {
            buffer,
            allocation,
            size,
            usage,
            mapped_ptr,
        }
    }

    /// host 可见的 staging buffer
    pub fn new_stage_buffer(size: vk::DeviceSize, name: impl AsRef<str>) -> Self {
        Self::new(size, vk::BufferUsageFlags::TRANSFER_SRC, true, name)
    }
}

// getter
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// device local 的 buffer 返回 None
    #[inline]
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapped_ptr
    }
}

// tools
impl GfxBuffer {
    /// 写入 host 可见内存并 flush
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) {
        let ptr = self.mapped_ptr.expect("write_bytes on a device-local buffer");
        assert!(offset + data.len() as u64 <= self.size);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        self.flush(offset, data.len() as vk::DeviceSize);
    }

    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) {
        Gfx::get().allocator().flush_allocation(&self.allocation, offset, size).unwrap();
    }
}

// destroy
impl GfxBuffer {
    pub fn destroy(mut self) {
        unsafe {
            let allocator = Gfx::get().allocator();
            if self.mapped_ptr.is_some() {
                allocator.unmap_memory(&mut self.allocation);
            }
            allocator.destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}
