use crate::{
    error::{report, GpuError, GpuResult},
    usage::BindingKind,
    Buffer, DeviceHandle, ParameterSet,
};

/// One binding of a [`ParameterSet`]: a borrowed buffer and how the program sees it.
#[derive(Clone, Copy)]
pub struct ParameterEntry<'a> {
    pub buffer: &'a Buffer<'a>,
    pub kind: BindingKind,
}

impl<'a> ParameterEntry<'a> {
    pub fn new(buffer: &'a Buffer<'a>, kind: BindingKind) -> Self {
        Self { buffer, kind }
    }
}

/// Collects bindings in binding-index order.
#[derive(Default)]
pub struct ParameterSetBuilder<'a> {
    entries: Vec<ParameterEntry<'a>>,
}

impl<'a> ParameterSetBuilder<'a> {
    /// Binds `buffer` at the next binding index.
    pub fn bind(mut self, buffer: &'a Buffer<'a>, kind: BindingKind) -> Self {
        self.entries.push(ParameterEntry::new(buffer, kind));
        self
    }

    pub fn build(self, device: &'a DeviceHandle) -> GpuResult<ParameterSet<'a>> {
        ParameterSet::new(device, self.entries)
    }
}

impl<'a> ParameterSet<'a> {
    pub fn builder() -> ParameterSetBuilder<'a> {
        ParameterSetBuilder::default()
    }

    /// Builds the layout from the entries' kinds, then the bind group from their buffers.
    pub fn new(device: &'a DeviceHandle, entries: Vec<ParameterEntry<'a>>) -> GpuResult<Self> {
        let layout_entries = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let index = index as u32;
                validate_entry(index, entry)?;
                Ok(entry.kind.layout_entry(index, entry.buffer.size()))
            })
            .collect::<GpuResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        let layout = device.scoped("ParameterSet::new", || {
            device
                .device()
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("parameter set layout"),
                    entries: &layout_entries,
                })
        })?;
        let bind_group = create_bind_group(device, &layout, &entries)?;

        log::debug!(
            "parameter set with {} entries ({} bound)",
            entries.len(),
            layout_entries.len()
        );

        Ok(Self {
            device,
            entries,
            layout_entries,
            layout,
            bind_group,
        })
    }

    /// Rebuilds the bind group from the current entries. The layout is kept.
    pub fn update(&mut self) -> GpuResult<()> {
        self.bind_group = create_bind_group(self.device, &self.layout, &self.entries)?;
        Ok(())
    }

    /// Points binding `index` at another buffer of the same kind.
    ///
    /// The replacement must keep the layout intact, so its size has to match.
    /// Call [`ParameterSet::update`] afterwards to rebuild the bind group.
    pub fn set_buffer(&mut self, index: u32, buffer: &'a Buffer<'a>) -> GpuResult<()> {
        let entry = self.entries.get(index as usize).copied().ok_or_else(|| {
            report(GpuError::InvalidBinding {
                index,
                reason: "no such binding",
            })
        })?;
        let replacement = ParameterEntry::new(buffer, entry.kind);
        validate_entry(index, &replacement)?;
        if entry.kind.layout_entry(index, buffer.size())
            != entry.kind.layout_entry(index, entry.buffer.size())
        {
            return Err(report(GpuError::InvalidBinding {
                index,
                reason: "replacement buffer changes the layout",
            }));
        }
        self.entries[index as usize] = replacement;
        Ok(())
    }

    /// Buffer resolved at binding `index`, if the slot is bound.
    pub fn binding_buffer(&self, index: u32) -> Option<&'a Buffer<'a>> {
        self.entries
            .get(index as usize)
            .filter(|e| e.kind != BindingKind::NotUsed)
            .map(|e| e.buffer)
    }

    /// Binding kinds in binding-index order.
    pub fn kinds(&self) -> impl Iterator<Item = BindingKind> + '_ {
        self.entries.iter().map(|e| e.kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    pub(crate) fn layout_entries(&self) -> &[wgpu::BindGroupLayoutEntry] {
        &self.layout_entries
    }
}

fn validate_entry(index: u32, entry: &ParameterEntry<'_>) -> GpuResult<()> {
    if entry.kind == BindingKind::NotUsed {
        return Ok(());
    }
    if entry.buffer.size() == 0 {
        return Err(report(GpuError::InvalidBinding {
            index,
            reason: "empty buffers cannot be bound",
        }));
    }
    entry.buffer.require("ParameterSet", entry.kind.required_usage())
}

fn create_bind_group(
    device: &DeviceHandle,
    layout: &wgpu::BindGroupLayout,
    entries: &[ParameterEntry<'_>],
) -> GpuResult<wgpu::BindGroup> {
    let group_entries = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind != BindingKind::NotUsed)
        .map(|(index, e)| wgpu::BindGroupEntry {
            binding: index as u32,
            resource: e.buffer.binding_resource(e.kind),
        })
        .collect::<Vec<_>>();

    device.scoped("ParameterSet::update", || {
        device.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("parameter set"),
            layout,
            entries: &group_entries,
        })
    })
}
