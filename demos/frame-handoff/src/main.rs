//! Hands one 512x512 frame back and forth between the two sides of a
//! shared texture.
//!
//! Runs on the D3D11 driver on Windows and on the software driver
//! elsewhere (or when `--software` is passed). Honors the `TEXSHARE_*`
//! environment variables and `RUST_LOG`.

use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use texshare::{
    InteropConfig, InteropDriver, InteropSession, PixelFormat, SharedResourceDescriptor, Side,
    SoftwareDriver,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const FRAMES: usize = 8;
const RED: [u8; 4] = [255, 0, 0, 255];

fn frame_descriptor() -> SharedResourceDescriptor {
    SharedResourceDescriptor::new(512, 512, PixelFormat::Rgba8Unorm)
}

/// Alternate sides for `FRAMES` hand-offs and check the keys only grow.
fn hand_off<D: InteropDriver>(session: &InteropSession<D>) -> Result<()> {
    let mut side = Side::Primary;
    let mut last_key = None;
    for frame in 0..FRAMES {
        let key = session.with_resource("frameTex", side, |resource| {
            Ok(resource.gate().current_key())
        })?;
        ensure!(
            last_key.map_or(true, |last| key > last),
            "key went from {last_key:?} to {key}"
        );
        info!("frame {frame}: {side} side held the texture with key {key}");
        last_key = Some(key);
        side = side.other();
    }
    session.flush();
    Ok(())
}

fn run<D: InteropDriver>(driver: D, config: &InteropConfig) -> Result<()> {
    let mut session = InteropSession::initialize(Arc::new(driver), config)
        .context("failed to bring up the interop devices")?;
    let resource = session.register_resource("frameTex", &frame_descriptor())?;
    info!("frameTex shared through {:?}", resource.handle());

    hand_off(&session)?;
    session.shutdown();
    Ok(())
}

/// Same hand-off, plus a pixel written by the primary and read back by the
/// secondary.
fn run_software(config: &InteropConfig) -> Result<()> {
    let driver = SoftwareDriver::new();
    let mut session = InteropSession::initialize(Arc::new(driver.clone()), config)?;
    session.register_resource("frameTex", &frame_descriptor())?;

    session.with_resource("frameTex", Side::Primary, |frame| {
        frame.primary().write_pixels(0, &RED)?;
        Ok(())
    })?;
    let texel = session.with_resource("frameTex", Side::Secondary, |frame| {
        Ok(frame.secondary().read_pixels()[..4].to_vec())
    })?;
    ensure!(texel == RED, "secondary read {texel:?}");
    info!("secondary side sees the primary's write");

    hand_off(&session)?;
    session.shutdown();

    let counters = driver.counters();
    ensure!(
        counters == Default::default(),
        "driver objects leaked: {counters:?}"
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("frame_handoff=debug,texshare=debug")),
        )
        .init();

    let config = InteropConfig::from_env();
    let software = std::env::args().any(|arg| arg == "--software");

    if software || !cfg!(target_os = "windows") {
        return run_software(&config);
    }

    #[cfg(target_os = "windows")]
    run(texshare::Dx11Driver, &config)?;
    #[cfg(not(target_os = "windows"))]
    run(SoftwareDriver::new(), &config)?;
    Ok(())
}
