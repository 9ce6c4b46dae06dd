use crate::{
    commands::PassCommand,
    error::{report, GpuError, GpuResult},
    CommandList, DeviceHandle, ParameterSet, Pipeline, Shader,
};

/// Number of workgroups of `workgroup_size` invocations needed to cover `elements`.
pub fn workgroups_for(elements: u32, workgroup_size: u32) -> u32 {
    elements.div_ceil(workgroup_size.max(1))
}

impl Pipeline {
    /// Builds a compute pipeline whose only bind group layout is `params`'s.
    pub fn create_compute(
        device: &DeviceHandle,
        shader: &Shader,
        params: &ParameterSet<'_>,
        entry_point: &str,
        label: &str,
    ) -> GpuResult<Self> {
        let (layout, pipeline) = device.scoped("Pipeline::create_compute", || {
            let layout = device
                .device()
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[params.layout()],
                    push_constant_ranges: &[],
                });
            let pipeline = device
                .device()
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&layout),
                    module: shader.module(),
                    entry_point,
                });
            (layout, pipeline)
        })?;

        log::debug!("compute pipeline `{label}` -> {entry_point}");

        Ok(Self {
            pipeline,
            layout,
            layout_entries: params.layout_entries().to_vec(),
            entry_point: entry_point.to_owned(),
            label: label.to_owned(),
        })
    }

    /// Records pipeline, bind group 0 and a dispatch of `(x, y, z)` workgroups
    /// into the open compute pass of `cmd`.
    ///
    /// `params` must have the layout the pipeline was created with.
    pub fn encode_dispatch<'a>(
        &'a self,
        cmd: &mut CommandList<'a>,
        params: &'a ParameterSet<'a>,
        x: u32,
        y: u32,
        z: u32,
    ) -> GpuResult<()> {
        if params.layout_entries() != self.layout_entries.as_slice() {
            return Err(report(GpuError::LayoutMismatch {
                label: self.label.clone(),
            }));
        }
        let limit = cmd.device().limits().max_compute_workgroups_per_dimension;
        if x > limit || y > limit || z > limit {
            return Err(report(GpuError::DispatchTooLarge { x, y, z, limit }));
        }

        let pass = cmd.active_pass()?;
        pass.push(PassCommand::SetPipeline(&self.pipeline));
        pass.push(PassCommand::SetBindGroup(0, params.bind_group()));
        pass.push(PassCommand::Marker(&self.entry_point));
        pass.push(PassCommand::Dispatch([x, y, z]));
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn as_native(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    pub fn layout(&self) -> &wgpu::PipelineLayout {
        &self.layout
    }
}
