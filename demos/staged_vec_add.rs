use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use gpgpu_core::{
    workgroups_for, BindingKind, Buffer, BufferUsage, CommandList, DeviceHandle, GpuResult,
    ParameterSet, Pipeline, Shader, StagingPool, StagingPoolConfig, Timeout,
};
use rayon::prelude::*;

// elements uploaded per staging handle
const CHUNK: usize = 4096;

pub fn run_cpu(a: &[u32], b: &[u32]) -> Vec<u32> {
    a.iter().zip(b).map(|(a, b)| a + b).collect()
}

pub fn run_cpu_par(a: &[u32], b: &[u32]) -> Vec<u32> {
    a.par_iter().zip(b).map(|(a, b)| a + b).collect()
}

/// Streams `host` into `dst` chunk by chunk, recycling staging handles.
fn upload(pool: &StagingPool<'_>, dst: &Buffer<'_>, host: &[u32]) -> GpuResult<()> {
    let chunk_bytes = (CHUNK * std::mem::size_of::<u32>()) as u64;
    let mut handle = Some(pool.allocate(chunk_bytes)?);

    for (idx, chunk) in host.chunks(CHUNK).enumerate() {
        let current = match handle.take() {
            Some(h) => h,
            None => pool.allocate(chunk_bytes)?,
        };
        let bytes: &[u8] = bytemuck::cast_slice(chunk);
        pool.write(&current, 0, bytes)?;
        handle = pool.submit_upload(current, dst, bytes.len() as u64, idx as u64 * chunk_bytes)?;
    }
    Ok(())
}

pub async fn run_gpu(device: &DeviceHandle, a: &[u32], b: &[u32]) -> GpuResult<Vec<u32>> {
    let shader = Shader::from_wgsl_file(device, "./demos/add.wgsl")?;
    let bytes = std::mem::size_of_val(a) as u64;
    let usage = BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC;

    let gpu_a = Buffer::new(device, bytes, usage, "a", false)?;
    let gpu_b = Buffer::new(device, bytes, usage, "b", false)?;
    let gpu_sum = Buffer::new(device, bytes, usage, "sum", false)?;

    let pool = StagingPool::new(device, StagingPoolConfig::default());
    upload(&pool, &gpu_a, a)?;
    upload(&pool, &gpu_b, b)?;
    log::info!("uploads submitted, pool: {:?}", pool.stats());

    let params = ParameterSet::builder() // bindgroup 0
        .bind(&gpu_a, BindingKind::ReadOnlyStorage) // bindentry 0
        .bind(&gpu_b, BindingKind::ReadOnlyStorage) // bindentry 1
        .bind(&gpu_sum, BindingKind::Storage) // bindentry 2
        .build(device)?;
    let pipeline = Pipeline::create_compute(device, &shader, &params, "main", "vec add")?;

    let mut cmd = CommandList::with_label(device, "vec add");
    cmd.begin_compute_pass()?;
    pipeline.encode_dispatch(&mut cmd, &params, workgroups_for(a.len() as u32, 64), 1, 1)?;
    cmd.end_compute_pass()?;
    cmd.submit()?;

    let out = Arc::new(Mutex::new(Vec::with_capacity(a.len())));
    let sink = Arc::clone(&out);
    let mut done = pool.readback(&gpu_sum, bytes, 0, move |data| {
        if let Ok(mut sink) = sink.lock() {
            let words = data
                .chunks_exact(4)
                .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]));
            sink.extend(words);
        }
    })?;
    device.wait_any(&mut done, Timeout::Infinite)?;
    log::info!("readback done, pool: {:?}", pool.stats());

    let result = out.lock().map(|v| v.clone()).unwrap_or_default();
    Ok(result)
}

async fn run() -> GpuResult<()> {
    let device = DeviceHandle::from_env().await?;

    let size = 32000usize;
    let a = (0..size as u32).collect::<Vec<u32>>();
    let b = (0..size as u32).rev().collect::<Vec<u32>>();

    println!("\nCompute using CPU");
    let now = Instant::now();
    let cpu_vec = run_cpu(&a, &b);
    println!("Done in {:.2?}\n", now.elapsed());

    println!("Compute using CPU (parallel)");
    let now = Instant::now();
    let par_cpu_vec = run_cpu_par(&a, &b);
    println!("Done in {:.2?}\n", now.elapsed());

    println!("Compute using GPU (staged)");
    let now = Instant::now();
    let gpu_vec = run_gpu(&device, &a, &b).await?;
    println!("Done in {:.2?}\n", now.elapsed());

    println!("cpu-only:     {:?}", &cpu_vec[size - 5..size]);
    println!("cpu-parallel: {:?}", &par_cpu_vec[size - 5..size]);
    println!("gpu-staged:   {:?}", &gpu_vec[size - 5..size]);
    assert_eq!(cpu_vec, gpu_vec);
    Ok(())
}

fn main() {
    pretty_env_logger::init();
    if let Err(e) = futures::executor::block_on(run()) {
        eprintln!("staged_vec_add failed: {e}");
        std::process::exit(1);
    }
}
