mod common;

use std::ptr;

use common::{device, resolve};
use gpgpu_core::{
    workgroups_for, BindingKind, Buffer, BufferUsage, CommandList, DeviceHandle, GpuError,
    ParameterSet, Pipeline, Shader,
};

const RW: BufferUsage = BufferUsage::STORAGE
    .union(BufferUsage::COPY_SRC)
    .union(BufferUsage::COPY_DST);

const ADD_ONE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(32)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= arrayLength(&data)) {
        return;
    }
    data[id.x] = data[id.x] + 1.0;
}
"#;

const DOUBLE_INTO: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= arrayLength(&dst)) {
        return;
    }
    dst[id.x] = src[id.x] * 2u;
}
"#;

const ADD_UNIFORM: &str = r#"
struct Params {
    offset: f32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(2) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= arrayLength(&data)) {
        return;
    }
    data[id.x] = data[id.x] + params.offset;
}
"#;

fn dispatch(
    device: &DeviceHandle,
    pipeline: &Pipeline,
    params: &ParameterSet<'_>,
    workgroups: u32,
) {
    let mut cmd = CommandList::with_label(device, "test dispatch");
    cmd.begin_compute_pass().unwrap();
    pipeline
        .encode_dispatch(&mut cmd, params, workgroups, 1, 1)
        .unwrap();
    cmd.end_compute_pass().unwrap();
    device.wait_for(cmd.submit().unwrap());
}

#[test]
fn add_one_covers_every_element() {
    let Some(device) = device() else { return };
    let input: Vec<f32> = (0..64).map(|i| i as f32).collect();
    let data = Buffer::from_slice(device, &input, RW, "data").unwrap();

    let params = ParameterSet::builder()
        .bind(&data, BindingKind::Storage)
        .build(device)
        .unwrap();
    let shader = Shader::from_wgsl(device, "add one", ADD_ONE).unwrap();
    let pipeline = Pipeline::create_compute(device, &shader, &params, "main", "add one").unwrap();
    assert_eq!(pipeline.entry_point(), "main");

    // 3 groups of 32 overshoot 64 elements; the shader guards the tail
    dispatch(device, &pipeline, &params, 3);

    let out = resolve(device, data.read_vec::<f32>().unwrap());
    let expected: Vec<f32> = input.iter().map(|v| v + 1.0).collect();
    assert_eq!(out, expected);
}

#[test]
fn bindings_follow_entry_order() {
    let Some(device) = device() else { return };
    let a = Buffer::from_slice(device, &[1u32, 2, 3, 4], RW, "a").unwrap();
    let b = Buffer::from_slice(device, &[10u32, 20, 30, 40], RW, "b").unwrap();
    let shader = Shader::from_wgsl(device, "double", DOUBLE_INTO).unwrap();

    let forward = ParameterSet::builder()
        .bind(&a, BindingKind::ReadOnlyStorage)
        .bind(&b, BindingKind::Storage)
        .build(device)
        .unwrap();
    assert!(ptr::eq(forward.binding_buffer(0).unwrap(), &a));
    assert!(ptr::eq(forward.binding_buffer(1).unwrap(), &b));
    assert!(forward.binding_buffer(2).is_none());

    let pipeline = Pipeline::create_compute(device, &shader, &forward, "main", "double").unwrap();
    dispatch(device, &pipeline, &forward, workgroups_for(4, 64));
    assert_eq!(resolve(device, b.read_vec::<u32>().unwrap()), vec![2, 4, 6, 8]);

    // same buffers, swapped roles
    let swapped = ParameterSet::builder()
        .bind(&b, BindingKind::ReadOnlyStorage)
        .bind(&a, BindingKind::Storage)
        .build(device)
        .unwrap();
    assert!(ptr::eq(swapped.binding_buffer(0).unwrap(), &b));
    dispatch(device, &pipeline, &swapped, 1);
    assert_eq!(resolve(device, a.read_vec::<u32>().unwrap()), vec![4, 8, 12, 16]);
}

#[test]
fn set_buffer_then_update_rebinds() {
    let Some(device) = device() else { return };
    let first = Buffer::from_slice(device, &[0.0f32; 64], RW, "first").unwrap();
    let second = Buffer::from_slice(device, &[5.0f32; 64], RW, "second").unwrap();
    let short = Buffer::new(device, 128, RW, "short", false).unwrap();

    let mut params = ParameterSet::builder()
        .bind(&first, BindingKind::Storage)
        .build(device)
        .unwrap();
    let shader = Shader::from_wgsl(device, "add one", ADD_ONE).unwrap();
    let pipeline = Pipeline::create_compute(device, &shader, &params, "main", "add one").unwrap();

    assert!(matches!(
        params.set_buffer(0, &short),
        Err(GpuError::InvalidBinding { index: 0, .. })
    ));
    assert!(matches!(
        params.set_buffer(3, &second),
        Err(GpuError::InvalidBinding { index: 3, .. })
    ));
    assert!(ptr::eq(params.binding_buffer(0).unwrap(), &first));

    params.set_buffer(0, &second).unwrap();
    params.update().unwrap();
    params.update().unwrap();
    assert!(ptr::eq(params.binding_buffer(0).unwrap(), &second));

    dispatch(device, &pipeline, &params, 2);
    assert_eq!(resolve(device, second.read_vec::<f32>().unwrap()), vec![6.0; 64]);
    assert_eq!(resolve(device, first.read_vec::<f32>().unwrap()), vec![0.0; 64]);
}

#[test]
fn reserved_binding_and_uniform() {
    let Some(device) = device() else { return };
    let uniform = Buffer::new(
        device,
        4,
        BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        "offset",
        false,
    )
    .unwrap();
    uniform.write(&[2.5f32], 0).unwrap();
    let data = Buffer::from_slice(device, &[1.0f32; 16], RW, "data").unwrap();

    let params = ParameterSet::builder()
        .bind(&uniform, BindingKind::Uniform)
        .bind(&data, BindingKind::NotUsed)
        .bind(&data, BindingKind::Storage)
        .build(device)
        .unwrap();
    assert_eq!(params.len(), 3);
    assert!(params.binding_buffer(1).is_none());
    assert_eq!(
        params.kinds().collect::<Vec<_>>(),
        vec![BindingKind::Uniform, BindingKind::NotUsed, BindingKind::Storage]
    );

    let shader = Shader::from_wgsl(device, "add uniform", ADD_UNIFORM).unwrap();
    let pipeline =
        Pipeline::create_compute(device, &shader, &params, "main", "add uniform").unwrap();
    dispatch(device, &pipeline, &params, 1);

    assert_eq!(resolve(device, data.read_vec::<f32>().unwrap()), vec![3.5; 16]);
}

#[test]
fn binding_requires_matching_usage() {
    let Some(device) = device() else { return };
    let plain = Buffer::new(device, 64, BufferUsage::COPY_DST, "plain", false).unwrap();
    let empty = Buffer::new(device, 0, RW, "empty", false).unwrap();

    assert!(matches!(
        ParameterSet::builder()
            .bind(&plain, BindingKind::Storage)
            .build(device),
        Err(GpuError::MissingUsage { .. })
    ));
    assert!(matches!(
        ParameterSet::builder()
            .bind(&empty, BindingKind::ReadOnlyStorage)
            .build(device),
        Err(GpuError::InvalidBinding { index: 0, .. })
    ));
}

#[test]
fn pipeline_rejects_foreign_layout() {
    let Some(device) = device() else { return };
    let big = Buffer::new(device, 256, RW, "big", false).unwrap();
    let small = Buffer::new(device, 128, RW, "small", false).unwrap();
    let built_for = ParameterSet::builder()
        .bind(&big, BindingKind::Storage)
        .build(device)
        .unwrap();
    let other = ParameterSet::builder()
        .bind(&small, BindingKind::Storage)
        .build(device)
        .unwrap();

    let shader = Shader::from_wgsl(device, "add one", ADD_ONE).unwrap();
    let pipeline = Pipeline::create_compute(device, &shader, &built_for, "main", "add one").unwrap();

    let mut cmd = CommandList::new(device);
    cmd.begin_compute_pass().unwrap();
    assert!(matches!(
        pipeline.encode_dispatch(&mut cmd, &other, 1, 1, 1),
        Err(GpuError::LayoutMismatch { .. })
    ));
    let limit = device.limits().max_compute_workgroups_per_dimension;
    assert!(matches!(
        pipeline.encode_dispatch(&mut cmd, &built_for, limit + 1, 1, 1),
        Err(GpuError::DispatchTooLarge { .. })
    ));
    cmd.end_compute_pass().unwrap();
    cmd.submit().unwrap();
}

#[test]
fn unknown_entry_point_is_a_device_error() {
    let Some(device) = device() else { return };
    let data = Buffer::new(device, 256, RW, "data", false).unwrap();
    let params = ParameterSet::builder()
        .bind(&data, BindingKind::Storage)
        .build(device)
        .unwrap();
    let shader = Shader::from_wgsl(device, "add one", ADD_ONE).unwrap();

    assert!(matches!(
        Pipeline::create_compute(device, &shader, &params, "missing", "bad entry"),
        Err(GpuError::Device { .. })
    ));
}

#[test]
fn invalid_wgsl_is_a_device_error() {
    let Some(device) = device() else { return };
    assert!(matches!(
        Shader::from_wgsl(device, "broken", "fn main( {"),
        Err(GpuError::Device { .. })
    ));
}

#[test]
fn command_list_pass_state() {
    let Some(device) = device() else { return };
    let src = Buffer::new(device, 64, RW, "src", false).unwrap();
    let dst = Buffer::new(device, 64, RW, "dst", false).unwrap();
    let params = ParameterSet::builder()
        .bind(&src, BindingKind::Storage)
        .build(device)
        .unwrap();
    let shader = Shader::from_wgsl(device, "add one", ADD_ONE).unwrap();
    let pipeline = Pipeline::create_compute(device, &shader, &params, "main", "add one").unwrap();

    let mut cmd = CommandList::new(device);
    assert!(matches!(cmd.end_compute_pass(), Err(GpuError::NoActivePass)));
    assert!(matches!(
        pipeline.encode_dispatch(&mut cmd, &params, 1, 1, 1),
        Err(GpuError::NoActivePass)
    ));

    cmd.begin_compute_pass().unwrap();
    assert!(cmd.is_pass_open());
    assert!(matches!(cmd.begin_compute_pass(), Err(GpuError::PassAlreadyOpen)));
    assert!(matches!(
        cmd.copy_buffer_to_buffer(&src, &dst, 64),
        Err(GpuError::PassAlreadyOpen)
    ));
    assert!(matches!(cmd.submit(), Err(GpuError::PassStillOpen)));

    let mut cmd = CommandList::new(device);
    cmd.begin_compute_pass().unwrap();
    pipeline.encode_dispatch(&mut cmd, &params, 1, 1, 1).unwrap();
    cmd.end_compute_pass().unwrap();
    assert!(!cmd.is_pass_open());
    cmd.copy_buffer_to_buffer(&src, &dst, 64).unwrap();
    device.wait_for(cmd.submit().unwrap());

    assert_eq!(resolve(device, dst.read_vec::<f32>().unwrap()), vec![1.0; 16]);
}

#[test]
fn copy_checks_usage_and_range() {
    let Some(device) = device() else { return };
    let src = Buffer::new(device, 64, RW, "src", false).unwrap();
    let no_src = Buffer::new(device, 64, BufferUsage::COPY_DST, "no src", false).unwrap();
    let dst = Buffer::new(device, 32, RW, "dst", false).unwrap();

    let mut cmd = CommandList::new(device);
    assert!(matches!(
        cmd.copy_buffer_to_buffer(&no_src, &dst, 16),
        Err(GpuError::MissingUsage { .. })
    ));
    assert!(matches!(
        cmd.copy_buffer_to_buffer(&src, &dst, 64),
        Err(GpuError::OutOfBounds { .. })
    ));
    assert!(matches!(
        cmd.copy_buffer_region(&src, 2, &dst, 0, 8),
        Err(GpuError::Misaligned { .. })
    ));
    cmd.copy_buffer_region(&src, 32, &dst, 16, 16).unwrap();
    cmd.submit().unwrap();
}
