//! Device selection.

use candle_core::Device;

/// Get the best available device (CUDA > Metal > CPU)
pub fn get_device(device_id: Option<usize>) -> crate::Result<Device> {
    #[cfg(feature = "cuda")]
    {
        let id = device_id.unwrap_or(0);
        match Device::new_cuda(id) {
            Ok(device) => {
                tracing::info!("Using CUDA device {}", id);
                return Ok(device);
            }
            Err(e) => {
                tracing::warn!("CUDA not available: {}", e);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(device_id.unwrap_or(0)) {
            Ok(device) => {
                tracing::info!("Using Metal device");
                return Ok(device);
            }
            Err(e) => {
                tracing::warn!("Metal not available: {}", e);
            }
        }
    }

    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    let _ = device_id;

    tracing::info!("Using CPU device");
    Ok(Device::Cpu)
}
