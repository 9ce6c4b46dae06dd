use crate::{error::GpuResult, DeviceHandle, Shader};

use std::{borrow::Cow, path::Path};

impl Shader {
    /// Compiles WGSL source into a [`Shader`].
    pub fn from_wgsl(device: &DeviceHandle, label: &str, source: &str) -> GpuResult<Self> {
        let module = device.scoped("Shader::from_wgsl", || {
            device
                .device()
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
                })
        })?;
        log::debug!("compiled shader `{label}`");
        Ok(Self(module))
    }

    /// Initialises a [`Shader`] from a `WGSL` file. The path doubles as the label.
    pub fn from_wgsl_file(device: &DeviceHandle, path: impl AsRef<Path>) -> GpuResult<Self> {
        let source = std::fs::read_to_string(&path)?;
        let label = path.as_ref().to_string_lossy();
        Self::from_wgsl(device, &label, &source)
    }

    pub(crate) fn module(&self) -> &wgpu::ShaderModule {
        &self.0
    }
}
