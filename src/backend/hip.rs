//! ROCm/HIP allocator backend
//!
//! Thin FFI layer over the HIP runtime memory entry points. Only the
//! allocator surface is bound here; kernels, modules, and copies are out of
//! scope for the pool.

use std::ffi::{c_void, CStr};
use std::ptr;

use crate::backend::{DeviceAllocator, DevicePtr};
use crate::error::{PoolError, PoolResult};

// HIP FFI bindings
#[link(name = "amdhip64")]
extern "C" {
    fn hipSetDevice(device_id: i32) -> i32;
    fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    fn hipFree(ptr: *mut c_void) -> i32;
    fn hipHostMalloc(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    fn hipHostFree(ptr: *mut c_void) -> i32;
    fn hipDeviceSynchronize() -> i32;
    fn hipGetErrorString(error: i32) -> *const i8;
    fn hipMemGetInfo(free: *mut usize, total: *mut usize) -> i32;
}

const HIP_SUCCESS: i32 = 0;
// hipError_t value for memory exhaustion, from hip_runtime_api.h.
const HIP_ERROR_OUT_OF_MEMORY: i32 = 2;
const HIP_HOST_MALLOC_DEFAULT: u32 = 0;

/// Decode a hipError_t into the runtime's message string.
fn hip_error_string(code: i32) -> String {
    // SAFETY: hipGetErrorString returns a static NUL-terminated string for
    // any error code, including unknown ones.
    unsafe {
        let raw = hipGetErrorString(code);
        if raw.is_null() {
            format!("hip error {}", code)
        } else {
            CStr::from_ptr(raw).to_string_lossy().into_owned()
        }
    }
}

fn set_device(device_id: u32) -> PoolResult<()> {
    let result = unsafe { hipSetDevice(device_id as i32) };
    if result != HIP_SUCCESS {
        return Err(PoolError::DeviceAllocatorFailure(format!(
            "hipSetDevice({}) failed: {}",
            device_id,
            hip_error_string(result)
        )));
    }
    Ok(())
}

/// [`DeviceAllocator`] over the HIP runtime.
///
/// Stateless apart from the runtime itself; safe to share across threads
/// (the HIP runtime serializes allocator calls internally).
#[derive(Debug, Default)]
pub struct HipAllocator;

impl HipAllocator {
    pub fn new() -> Self {
        HipAllocator
    }

    /// Free and total device memory in bytes for `device_id`, straight from
    /// `hipMemGetInfo`.
    pub fn mem_get_info(&self, device_id: u32) -> PoolResult<(usize, usize)> {
        set_device(device_id)?;
        let mut free: usize = 0;
        let mut total: usize = 0;
        let result = unsafe { hipMemGetInfo(&mut free, &mut total) };
        if result != HIP_SUCCESS {
            return Err(PoolError::DeviceAllocatorFailure(format!(
                "hipMemGetInfo failed: {}",
                hip_error_string(result)
            )));
        }
        Ok((free, total))
    }
}

impl DeviceAllocator for HipAllocator {
    fn allocate_raw(&self, device_id: u32, size: usize) -> PoolResult<DevicePtr> {
        set_device(device_id)?;
        let mut raw: *mut c_void = ptr::null_mut();
        let result = unsafe { hipMalloc(&mut raw, size) };
        if result == HIP_ERROR_OUT_OF_MEMORY {
            return Err(PoolError::OutOfMemory {
                requested: size,
                device_id,
            });
        }
        if result != HIP_SUCCESS {
            return Err(PoolError::DeviceAllocatorFailure(format!(
                "hipMalloc({} bytes) failed: {}",
                size,
                hip_error_string(result)
            )));
        }
        if raw.is_null() {
            return Err(PoolError::DeviceAllocatorFailure(format!(
                "hipMalloc returned null pointer for {} bytes",
                size
            )));
        }
        Ok(DevicePtr::new(raw as u64))
    }

    fn free_raw(&self, device_id: u32, ptr: DevicePtr, _size: usize) -> PoolResult<()> {
        set_device(device_id)?;
        let result = unsafe { hipFree(ptr.as_raw() as *mut c_void) };
        if result != HIP_SUCCESS {
            return Err(PoolError::DeviceAllocatorFailure(format!(
                "hipFree({}) failed: {}",
                ptr,
                hip_error_string(result)
            )));
        }
        Ok(())
    }

    fn allocate_pinned_raw(&self, size: usize) -> PoolResult<DevicePtr> {
        let mut raw: *mut c_void = ptr::null_mut();
        let result = unsafe { hipHostMalloc(&mut raw, size, HIP_HOST_MALLOC_DEFAULT) };
        if result == HIP_ERROR_OUT_OF_MEMORY {
            return Err(PoolError::OutOfMemory {
                requested: size,
                device_id: 0,
            });
        }
        if result != HIP_SUCCESS {
            return Err(PoolError::DeviceAllocatorFailure(format!(
                "hipHostMalloc({} bytes) failed: {}",
                size,
                hip_error_string(result)
            )));
        }
        Ok(DevicePtr::new(raw as u64))
    }

    fn free_pinned_raw(&self, ptr: DevicePtr, _size: usize) -> PoolResult<()> {
        let result = unsafe { hipHostFree(ptr.as_raw() as *mut c_void) };
        if result != HIP_SUCCESS {
            return Err(PoolError::DeviceAllocatorFailure(format!(
                "hipHostFree({}) failed: {}",
                ptr,
                hip_error_string(result)
            )));
        }
        Ok(())
    }

    fn synchronize_device(&self, device_id: u32) -> PoolResult<()> {
        set_device(device_id)?;
        let result = unsafe { hipDeviceSynchronize() };
        if result != HIP_SUCCESS {
            return Err(PoolError::DeviceAllocatorFailure(format!(
                "hipDeviceSynchronize failed: {}",
                hip_error_string(result)
            )));
        }
        Ok(())
    }
}
