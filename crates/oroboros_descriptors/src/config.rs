//! # Descriptor Heap Configuration
//!
//! Heap sizes are loaded once at startup from TOML. Missing keys fall back
//! to the defaults below.
//!
//! ```toml
//! [cpu_chunk_sizes]
//! cbv_srv_uav = 8192
//! sampler = 2048
//! rtv = 1024
//! dsv = 1024
//!
//! [gpu_heap_sizes]
//! cbv_srv_uav = 16384
//! sampler = 1024
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HeapError, HeapResult};
use crate::heap::DescriptorHeapKind;

/// Maximum samplers a shader-visible sampler heap may hold (D3D12 limit).
pub const MAX_SHADER_VISIBLE_SAMPLERS: u32 = 2048;

/// Slots per CPU chunk, per heap kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuChunkSizes {
    /// CBV/SRV/UAV chunk size.
    pub cbv_srv_uav: u32,
    /// Sampler chunk size.
    pub sampler: u32,
    /// Render target view chunk size.
    pub rtv: u32,
    /// Depth stencil view chunk size.
    pub dsv: u32,
}

impl Default for CpuChunkSizes {
    fn default() -> Self {
        Self {
            cbv_srv_uav: 8192,
            sampler: 2048,
            rtv: 1024,
            dsv: 1024,
        }
    }
}

impl CpuChunkSizes {
    /// Chunk size for `kind`.
    #[must_use]
    pub const fn get(&self, kind: DescriptorHeapKind) -> u32 {
        match kind {
            DescriptorHeapKind::CbvSrvUav => self.cbv_srv_uav,
            DescriptorHeapKind::Sampler => self.sampler,
            DescriptorHeapKind::Rtv => self.rtv,
            DescriptorHeapKind::Dsv => self.dsv,
        }
    }
}

/// Capacity of each shader-visible heap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuHeapSizes {
    /// CBV/SRV/UAV heap capacity.
    pub cbv_srv_uav: u32,
    /// Sampler heap capacity.
    pub sampler: u32,
}

impl Default for GpuHeapSizes {
    fn default() -> Self {
        Self {
            cbv_srv_uav: 16384,
            sampler: 1024,
        }
    }
}

impl GpuHeapSizes {
    /// Capacity for `kind`; `None` for kinds that are never shader-visible.
    #[must_use]
    pub const fn get(&self, kind: DescriptorHeapKind) -> Option<u32> {
        match kind {
            DescriptorHeapKind::CbvSrvUav => Some(self.cbv_srv_uav),
            DescriptorHeapKind::Sampler => Some(self.sampler),
            DescriptorHeapKind::Rtv | DescriptorHeapKind::Dsv => None,
        }
    }
}

/// Sizes for every descriptor heap the renderer creates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorHeapConfig {
    /// CPU-only chunk sizes.
    pub cpu_chunk_sizes: CpuChunkSizes,
    /// Shader-visible heap capacities.
    pub gpu_heap_sizes: GpuHeapSizes,
}

impl DescriptorHeapConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`HeapError::ConfigParse`] on malformed TOML, [`HeapError::Config`]
    /// on out-of-range values.
    pub fn from_toml_str(text: &str) -> HeapResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`HeapError::Io`] if the file cannot be read, otherwise as
    /// [`DescriptorHeapConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> HeapResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks that every size is usable.
    ///
    /// # Errors
    ///
    /// [`HeapError::Config`] naming the first bad value.
    pub fn validate(&self) -> HeapResult<()> {
        for kind in DescriptorHeapKind::ALL {
            if self.cpu_chunk_sizes.get(kind) == 0 {
                return Err(HeapError::Config(format!(
                    "cpu_chunk_sizes.{kind} must be non-zero"
                )));
            }
            if self.gpu_heap_sizes.get(kind) == Some(0) {
                return Err(HeapError::Config(format!(
                    "gpu_heap_sizes.{kind} must be non-zero"
                )));
            }
        }
        if self.gpu_heap_sizes.sampler > MAX_SHADER_VISIBLE_SAMPLERS {
            return Err(HeapError::Config(format!(
                "gpu_heap_sizes.sampler is {}, limit is {MAX_SHADER_VISIBLE_SAMPLERS}",
                self.gpu_heap_sizes.sampler
            )));
        }
        Ok(())
    }
}
