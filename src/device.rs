use std::time::{Duration, Instant};

use crate::{
    commands::Submission,
    config::DeviceConfig,
    error::{GpuError, GpuResult},
    event::{EventLoop, GpuFuture, Timeout},
    DeviceHandle,
};

// sleep between polls while waiting with a bounded timeout
const WAIT_SLICE: Duration = Duration::from_millis(1);

impl DeviceHandle {
    /// Acquires an adapter and a device according to `config`.
    pub async fn new(config: DeviceConfig) -> GpuResult<Self> {
        // initialize a wgpu instance to create the adapter type
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            dx12_shader_compiler: wgpu::Dx12Compiler::default(),
        });

        // `request_adapter` returns a Future, so must be awaited
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                force_fallback_adapter: config.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| {
                log::error!("no adapter for backends {:?}", config.backends);
                GpuError::AdapterNotFound
            })?;

        let info = adapter.get_info();
        log::info!(
            "adapter: {} ({:?}, {:?})",
            info.name,
            info.device_type,
            info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: config.label.as_deref(),
                    features: wgpu::Features::empty(),
                    limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| {
                log::error!("device request failed: {e}");
                GpuError::from(e)
            })?;

        log::debug!("device acquired");

        Ok(DeviceHandle {
            device,
            queue,
            adapter,
            events: EventLoop::default(),
        })
    }

    /// [`DeviceHandle::new`] with [`DeviceConfig::from_env`].
    pub async fn from_env() -> GpuResult<Self> {
        Self::new(DeviceConfig::from_env()).await
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// Advances the device without blocking and runs every continuation whose
    /// operation completed. Returns the number of continuations run.
    pub fn process_events(&self) -> usize {
        self.device.poll(wgpu::Maintain::Poll);
        self.events.drain_ready()
    }

    /// Number of map-backed operations still waiting for the device.
    pub fn pending_operations(&self) -> usize {
        self.events.pending()
    }

    /// Pumps the device until `future` resolves or `timeout` passes.
    ///
    /// A timeout leaves the device operation running and the future pending.
    pub fn wait_any<T>(&self, future: &mut GpuFuture<T>, timeout: Timeout) -> GpuResult<T> {
        let start = Instant::now();
        loop {
            match timeout {
                Timeout::Infinite => {
                    self.device.poll(wgpu::Maintain::Wait);
                    self.events.drain_ready();
                }
                Timeout::After(_) => {
                    self.process_events();
                }
            }

            if let Some(value) = future.try_take()? {
                return Ok(value);
            }

            if let Timeout::After(limit) = timeout {
                if start.elapsed() >= limit {
                    log::debug!("wait_any gave up after {limit:?}");
                    return Err(GpuError::Timeout(limit));
                }
                std::thread::sleep(WAIT_SLICE);
            }
        }
    }

    /// Blocks until `submission` has finished executing, then runs ready continuations.
    pub fn wait_for(&self, submission: Submission) {
        self.device
            .poll(wgpu::Maintain::WaitForSubmissionIndex(submission.index));
        self.events.drain_ready();
    }

    /// Runs `f` inside a validation error scope and turns a captured error into [`GpuError::Device`].
    pub(crate) fn scoped<T>(&self, op: &'static str, f: impl FnOnce() -> T) -> GpuResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = futures::executor::block_on(self.device.pop_error_scope());
        let oom = futures::executor::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(source) => {
                log::error!("{op}: {source}");
                Err(GpuError::Device { op, source })
            }
            None => Ok(value),
        }
    }

    pub(crate) fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub(crate) fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub(crate) fn events(&self) -> &EventLoop {
        &self.events
    }
}
