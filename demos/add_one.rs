use gpgpu_core::{
    workgroups_for, BindingKind, Buffer, BufferUsage, CommandList, DeviceHandle, GpuResult,
    ParameterSet, Pipeline, Shader, Timeout,
};

const WORKGROUP_SIZE: u32 = 32;

async fn run() -> GpuResult<()> {
    let device = DeviceHandle::from_env().await?;
    println!("running on {}", device.adapter_info().name);

    let shader = Shader::from_wgsl_file(&device, "./demos/add_one.wgsl")?;

    let size = 64u32;
    let host: Vec<f32> = (0..size).map(|i| i as f32).collect();
    let data = Buffer::from_slice(
        &device,
        &host,
        BufferUsage::STORAGE | BufferUsage::COPY_SRC,
        "data",
    )?;

    let params = ParameterSet::builder() // bindgroup 0
        .bind(&data, BindingKind::Storage) // bindentry 0
        .build(&device)?;
    let pipeline = Pipeline::create_compute(&device, &shader, &params, "main", "add one")?;

    // one group more than needed; the shader discards the extra 32 invocations
    let groups = workgroups_for(size, WORKGROUP_SIZE) + 1;

    let mut cmd = CommandList::with_label(&device, "add one");
    cmd.begin_compute_pass()?;
    pipeline.encode_dispatch(&mut cmd, &params, groups, 1, 1)?;
    cmd.end_compute_pass()?;
    device.wait_for(cmd.submit()?);

    let mut pending = data.read_vec::<f32>()?;
    let result = device.wait_any(&mut pending, Timeout::Infinite)?;

    println!("dispatched {} invocations over {size} elements", groups * WORKGROUP_SIZE);
    println!("first: {:?}", &result[..5]);
    println!("last:  {:?}", &result[size as usize - 5..]);
    Ok(())
}

fn main() {
    pretty_env_logger::init();
    if let Err(e) = futures::executor::block_on(run()) {
        eprintln!("add_one failed: {e}");
        std::process::exit(1);
    }
}
