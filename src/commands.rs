use crate::{
    buffer::{check_aligned, check_range},
    error::{report, GpuError, GpuResult},
    usage::{BufferUsage, COPY_ALIGNMENT},
    Buffer, CommandList, DeviceHandle,
};

/// Queue position of a submitted [`CommandList`], used to wait for it.
pub struct Submission {
    pub(crate) index: wgpu::SubmissionIndex,
}

pub(crate) enum PassCommand<'a> {
    SetPipeline(&'a wgpu::ComputePipeline),
    SetBindGroup(u32, &'a wgpu::BindGroup),
    Marker(&'a str),
    Dispatch([u32; 3]),
}

/// Commands of the open compute pass, replayed into a native pass when it ends.
#[derive(Default)]
pub(crate) struct PassRecording<'a> {
    commands: Vec<PassCommand<'a>>,
}

impl<'a> PassRecording<'a> {
    pub(crate) fn push(&mut self, command: PassCommand<'a>) {
        self.commands.push(command);
    }
}

impl<'a> CommandList<'a> {
    pub fn new(device: &'a DeviceHandle) -> Self {
        Self::with_label(device, "command list")
    }

    pub fn with_label(device: &'a DeviceHandle, label: impl Into<String>) -> Self {
        let label = label.into();
        let encoder = device
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&label),
            });
        Self {
            device,
            encoder,
            pass: None,
            label,
        }
    }

    /// Opens a compute pass. Only one pass may be open at a time.
    pub fn begin_compute_pass(&mut self) -> GpuResult<()> {
        if self.pass.is_some() {
            return Err(report(GpuError::PassAlreadyOpen));
        }
        self.pass = Some(PassRecording::default());
        Ok(())
    }

    /// Closes the open compute pass and encodes everything recorded in it.
    pub fn end_compute_pass(&mut self) -> GpuResult<()> {
        let recording = self
            .pass
            .take()
            .ok_or_else(|| report(GpuError::NoActivePass))?;

        let mut pass = self
            .encoder
            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.label),
            });
        for command in recording.commands {
            match command {
                PassCommand::SetPipeline(pipeline) => pass.set_pipeline(pipeline),
                PassCommand::SetBindGroup(index, group) => pass.set_bind_group(index, group, &[]),
                PassCommand::Marker(marker) => pass.insert_debug_marker(marker),
                PassCommand::Dispatch([x, y, z]) => pass.dispatch_workgroups(x, y, z),
            }
        }
        Ok(())
    }

    pub fn is_pass_open(&self) -> bool {
        self.pass.is_some()
    }

    /// Records a copy of the first `size` bytes of `src` into `dst`.
    pub fn copy_buffer_to_buffer(&mut self, src: &Buffer<'_>, dst: &Buffer<'_>, size: u64) -> GpuResult<()> {
        self.copy_buffer_region(src, 0, dst, 0, size)
    }

    /// Records a device-side copy. Not allowed while a compute pass is open.
    pub fn copy_buffer_region(
        &mut self,
        src: &Buffer<'_>,
        src_offset: u64,
        dst: &Buffer<'_>,
        dst_offset: u64,
        size: u64,
    ) -> GpuResult<()> {
        const OP: &str = "copy_buffer_to_buffer";
        if self.pass.is_some() {
            return Err(report(GpuError::PassAlreadyOpen));
        }
        src.require(OP, BufferUsage::COPY_SRC)?;
        dst.require(OP, BufferUsage::COPY_DST)?;
        src.require_unmapped(OP)?;
        dst.require_unmapped(OP)?;
        check_range(OP, src_offset, size, src.size())?;
        check_range(OP, dst_offset, size, dst.size())?;
        check_aligned(OP, src_offset, size, COPY_ALIGNMENT)?;
        check_aligned(OP, dst_offset, 0, COPY_ALIGNMENT)?;

        self.encoder
            .copy_buffer_to_buffer(src.native(), src_offset, dst.native(), dst_offset, size);
        Ok(())
    }

    /// Finishes the recording and enqueues it on the device queue.
    pub fn submit(self) -> GpuResult<Submission> {
        if self.pass.is_some() {
            return Err(report(GpuError::PassStillOpen));
        }
        let commands = self.encoder.finish();
        let index = self.device.queue().submit(Some(commands));
        log::debug!("submitted `{}`", self.label);
        Ok(Submission { index })
    }

    pub(crate) fn device(&self) -> &'a DeviceHandle {
        self.device
    }

    pub(crate) fn active_pass(&mut self) -> GpuResult<&mut PassRecording<'a>> {
        self.pass
            .as_mut()
            .ok_or_else(|| report(GpuError::NoActivePass))
    }
}
