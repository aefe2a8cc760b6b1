use std::sync::Arc;

use texshare::software::{DriverEvent, Fault, ResourceCounters};
use texshare::{
    AdapterKind, AdapterPreference, DescriptorError, DeviceContext, DeviceCreationError,
    InteropConfig, PixelFormat, ResourceCreationError, SharedResourceDescriptor, SharingMode,
    SoftwareDriver, UsageFlags, ViewOpenError,
};

fn device(driver: &SoftwareDriver) -> DeviceContext<SoftwareDriver> {
    DeviceContext::initialize(Arc::new(driver.clone()), &InteropConfig::default()).unwrap()
}

#[test]
fn create_then_release_leaves_nothing_behind() {
    let driver = SoftwareDriver::new();
    let device = device(&driver);
    let baseline = driver.counters();

    let descriptors = [
        SharedResourceDescriptor::new(512, 512, PixelFormat::Rgba8Unorm),
        SharedResourceDescriptor::new(1920, 1080, PixelFormat::Bgra8Unorm).with_mip_levels(4),
        SharedResourceDescriptor::new(64, 64, PixelFormat::Rgba16Float)
            .with_usage(UsageFlags::SHADER_READ | UsageFlags::SHADER_WRITE),
        SharedResourceDescriptor::new(16, 16, PixelFormat::R8Unorm)
            .with_usage(UsageFlags::SHADER_READ)
            .with_sharing(SharingMode::ReadOnly),
    ];

    let bridge = device.bridge();
    for descriptor in &descriptors {
        let resource = bridge.create_shared(descriptor).unwrap();
        let during = driver.counters();
        assert_eq!(during.textures, baseline.textures + 1);
        assert_eq!(during.views, baseline.views + 1);
        assert_eq!(during.handles, baseline.handles + 1);
        assert_eq!(resource.descriptor(), descriptor);
        assert!(!resource.gate().is_held());
        bridge.release(resource);
        assert_eq!(driver.counters(), baseline);
    }

    assert!(!driver
        .events()
        .iter()
        .any(|e| matches!(e, DriverEvent::DestroyedWhileInUse { .. })));
}

#[test]
fn both_halves_see_the_same_memory() {
    let driver = SoftwareDriver::new();
    let device = device(&driver);
    let texels: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
    let descriptor = SharedResourceDescriptor::new(4, 4, PixelFormat::Rgba8Unorm)
        .with_initial_data(texels.clone());

    let resource = device.bridge().create_shared(&descriptor).unwrap();
    assert_eq!(resource.primary().memory_id(), resource.secondary().memory_id());
    assert_eq!(resource.secondary().read_pixels(), texels);

    resource.secondary().write_pixels(0, &[0xAA; 4]).unwrap();
    assert_eq!(&resource.primary().read_pixels()[..4], &[0xAA; 4]);
}

#[test]
fn read_only_sharing_gives_a_read_only_view() {
    let driver = SoftwareDriver::new();
    let device = device(&driver);
    let descriptor = SharedResourceDescriptor::new(8, 8, PixelFormat::Rgba8Unorm)
        .with_sharing(SharingMode::ReadOnly);

    let resource = device.bridge().create_shared(&descriptor).unwrap();
    assert!(resource.secondary().is_read_only());
    assert!(resource.secondary().write_pixels(0, &[1]).is_err());
    resource.primary().write_pixels(0, &[1]).unwrap();
}

#[test]
fn invalid_descriptors_allocate_nothing() {
    let driver = SoftwareDriver::new();
    let device = device(&driver);
    let baseline = driver.counters();
    driver.clear_events();

    let zero_width = SharedResourceDescriptor::new(0, 512, PixelFormat::Rgba8Unorm);
    assert_eq!(
        device.bridge().create_shared(&zero_width).unwrap_err(),
        ResourceCreationError::InvalidDescriptor(DescriptorError::InvalidDimensions {
            width: 0,
            height: 512
        })
    );

    let depth = SharedResourceDescriptor::new(512, 512, PixelFormat::Depth32Float);
    assert_eq!(
        device.bridge().create_shared(&depth).unwrap_err(),
        ResourceCreationError::InvalidDescriptor(DescriptorError::UnsupportedFormat(
            PixelFormat::Depth32Float
        ))
    );

    let short_data = SharedResourceDescriptor::new(2, 2, PixelFormat::Rgba8Unorm)
        .with_initial_data(vec![0u8; 3]);
    assert!(matches!(
        device.bridge().create_shared(&short_data),
        Err(ResourceCreationError::InvalidDescriptor(
            DescriptorError::InitialDataSize { expected: 16, actual: 3 }
        ))
    ));

    assert_eq!(driver.counters(), baseline);
    assert!(driver.events().is_empty());
}

#[test]
fn every_failing_step_is_rolled_back() {
    let driver = SoftwareDriver::new();
    let device = device(&driver);
    let baseline = driver.counters();
    let descriptor = SharedResourceDescriptor::new(256, 256, PixelFormat::Rgba8Unorm);

    driver.inject(Fault::CreateTexture);
    assert!(matches!(
        device.bridge().create_shared(&descriptor),
        Err(ResourceCreationError::Allocation(_))
    ));
    assert_eq!(driver.counters(), baseline);

    driver.inject(Fault::ExportHandle);
    assert!(matches!(
        device.bridge().create_shared(&descriptor),
        Err(ResourceCreationError::HandleExport(_))
    ));
    assert_eq!(driver.counters(), baseline);

    driver.inject(Fault::OpenView);
    assert!(matches!(
        device.bridge().create_shared(&descriptor),
        Err(ResourceCreationError::ViewOpen(ViewOpenError::Import(_)))
    ));
    assert_eq!(driver.counters(), baseline);

    driver.inject(Fault::KeyedMutex);
    assert!(matches!(
        device.bridge().create_shared(&descriptor),
        Err(ResourceCreationError::SyncSetup(_))
    ));
    assert_eq!(driver.counters(), baseline);

    // Nothing was destroyed out from under an open view along the way.
    assert!(!driver
        .events()
        .iter()
        .any(|e| matches!(e, DriverEvent::DestroyedWhileInUse { .. })));

    let resource = device.bridge().create_shared(&descriptor).unwrap();
    device.bridge().release(resource);
    assert_eq!(driver.counters(), baseline);
}

#[test]
fn mismatched_view_is_rejected_and_rolled_back() {
    let driver = SoftwareDriver::new();
    let device = device(&driver);
    let baseline = driver.counters();
    let descriptor = SharedResourceDescriptor::new(512, 512, PixelFormat::Rgba8Unorm);

    driver.inject(Fault::ViewMismatch);
    let err = device.bridge().create_shared(&descriptor).unwrap_err();
    match err {
        ResourceCreationError::ViewOpen(ViewOpenError::Mismatch { expected, actual }) => {
            assert_eq!(expected, descriptor.surface_info());
            assert_eq!(actual.width, 256);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(driver.counters(), baseline);
}

#[test]
fn initialization_without_adapters_fails_cleanly() {
    let driver = SoftwareDriver::with_adapters(Vec::new());
    let err = DeviceContext::initialize(Arc::new(driver.clone()), &InteropConfig::default())
        .unwrap_err();
    assert_eq!(err, DeviceCreationError::NoCompatibleAdapter);
    assert_eq!(driver.counters(), ResourceCounters::default());
}

#[test]
fn refused_hardware_falls_back_to_software() {
    let driver = SoftwareDriver::new().refuse_hardware();
    let device = DeviceContext::initialize(Arc::new(driver.clone()), &InteropConfig::default())
        .unwrap();
    assert_eq!(device.adapter().kind, AdapterKind::Software);
    assert_eq!(driver.counters().devices, 1);

    let hardware_only = InteropConfig::default().with_adapter(AdapterPreference::HardwareOnly);
    let other = SoftwareDriver::new().refuse_hardware();
    let err = DeviceContext::initialize(Arc::new(other.clone()), &hardware_only).unwrap_err();
    assert!(matches!(err, DeviceCreationError::DriverRefused(_)));
    assert_eq!(other.counters(), ResourceCounters::default());
}

#[test]
fn secondary_failure_destroys_the_primary_device() {
    let driver = SoftwareDriver::new();
    driver.inject(Fault::OpenSecondary);
    let err = DeviceContext::initialize(Arc::new(driver.clone()), &InteropConfig::default())
        .unwrap_err();
    assert!(matches!(err, DeviceCreationError::SecondaryUnavailable(_)));
    assert_eq!(driver.counters(), ResourceCounters::default());
}

#[test]
fn device_validity_tracks_device_removal() {
    let driver = SoftwareDriver::new();
    let device = device(&driver);
    assert!(device.is_valid());
    driver.remove_devices();
    assert!(!device.is_valid());
}

#[test]
fn shutdown_tears_down_secondary_context_then_device() {
    let driver = SoftwareDriver::new();
    let device = device(&driver);
    device.flush();
    driver.clear_events();

    device.shutdown();
    let events = driver.events();
    assert!(matches!(
        events.as_slice(),
        [
            DriverEvent::SecondaryDestroyed { .. },
            DriverEvent::ContextDestroyed { .. },
            DriverEvent::DeviceDestroyed { .. },
        ]
    ));
    assert_eq!(driver.counters(), ResourceCounters::default());
}
