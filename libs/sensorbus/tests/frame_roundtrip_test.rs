//! Frame Round-Trip Integration Test
//!
//! Drives the full consumer path against the bundled test pattern plugin:
//! 1. Plugin registration and context initialization
//! 2. Stream discovery through the URI catalog
//! 3. Frame production, locking and subframe access
//! 4. Host events and catch-up stream-added registration
//! 5. Teardown and stale-handle behavior

use parking_lot::Mutex;
use std::sync::Arc;

use sensorbus::core::{
    BusError, Context, FrameTimeout, StreamCallbacks, StreamDescription, StreamEvent,
    StreamSubtype, StreamType,
};
use sensorbus::plugins::test_pattern::{
    TestPatternConfig, TestPatternPlugin, HOST_EVENT_DEVICE_READY,
};

fn color() -> StreamDescription {
    StreamDescription::new(StreamType::COLOR, StreamSubtype::DEFAULT)
}

fn vga_plugin(uri: &str) -> Box<TestPatternPlugin> {
    Box::new(TestPatternPlugin::new(TestPatternConfig {
        uri: uri.to_string(),
        ..TestPatternConfig::default()
    }))
}

struct NoopCallbacks;
impl StreamCallbacks for NoopCallbacks {}

#[test]
fn test_vga_color_round_trip() {
    let context = Context::new();
    context.register_plugin(vga_plugin("device/0"));
    context.initialize();

    let set = context.open_stream_set("device/0").expect("set registered");
    let reader = context.create_reader(set).expect("reader");
    let connection = context.get_stream(reader, color()).expect("stream served");
    context.start_stream(connection).expect("start");

    context.update();
    context
        .open_frame(reader, FrameTimeout::Millis(1000))
        .expect("frame within the timeout");
    let frame = context.get_subframe(reader, color()).expect("subframe");
    assert_eq!(frame.data().len(), 640 * 480 * 3);
    assert_eq!(frame.frame_index(), 1);

    // Gradient: every channel of pixel (col, row) is col + row + frame_index.
    assert_eq!(frame.data()[0], 1);
    let offset = (640 * 3) + (2 * 3);
    assert_eq!(frame.data()[offset], 4);

    context.close_frame(reader).expect("close");
    context.destroy_reader(reader).expect("destroy");
    assert!(matches!(
        context.open_frame(reader, FrameTimeout::Poll),
        Err(BusError::StaleHandle(_))
    ));
}

#[test]
fn test_locked_snapshot_is_isolated_from_later_cycles() {
    let context = Context::new();
    context.register_plugin(vga_plugin("device/0"));
    context.initialize();

    let set = context.open_stream_set("device/0").expect("set");
    let reader = context.create_reader(set).expect("reader");
    let connection = context.get_stream(reader, color()).expect("connection");
    context.start_stream(connection).expect("start");

    context.update();
    context
        .open_frame(reader, FrameTimeout::Millis(1000))
        .expect("first frame");
    let frame = context.get_subframe(reader, color()).expect("subframe");
    assert_eq!(frame.frame_index(), 1);

    // The producer keeps publishing while the frame is open.
    context.update();
    context.update();

    // The open snapshot is frozen, re-reading yields the same frame.
    assert_eq!(frame.data()[0], 1);
    let reread = context.get_subframe(reader, color()).expect("still open");
    assert_eq!(reread.frame_index(), 1);

    // Reopening jumps to the newest frame, intermediates are skipped.
    context.close_frame(reader).expect("close");
    context
        .open_frame(reader, FrameTimeout::Poll)
        .expect("newest ready");
    let newest = context.get_subframe(reader, color()).expect("subframe");
    assert_eq!(newest.frame_index(), 3);
    assert_eq!(newest.data()[0], 3);
}

#[test]
fn test_catch_up_subscription_then_live_additions() {
    let context = Context::new();
    context.register_plugin(Box::new(TestPatternPlugin::new(TestPatternConfig {
        uri: "device/0".to_string(),
        with_depth: true,
        ..TestPatternConfig::default()
    })));
    context.register_plugin(vga_plugin("device/1"));
    context.initialize();

    // Three streams exist (color + depth on device/0, color on device/1);
    // registration replays all of them before returning.
    let service = context.plugin_service();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    service.register_stream_added_callback(move |event: &StreamEvent| {
        seen_cb.lock().push(event.description);
    });
    assert_eq!(seen.lock().len(), 3);
    assert!(seen.lock().contains(&StreamDescription::new(
        StreamType::DEPTH,
        StreamSubtype::DEFAULT
    )));

    // Live additions keep arriving on the same registration.
    let set = service.create_stream_set("device/2").expect("set");
    service
        .create_stream(set, color(), Arc::new(NoopCallbacks))
        .expect("stream");
    assert_eq!(seen.lock().len(), 4);
}

#[test]
fn test_host_event_announces_device() {
    let context = Context::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_cb = events.clone();
    context.register_host_event_callback(move |event| {
        events_cb.lock().push((event.id, event.data.clone()));
    });

    context.register_plugin(vga_plugin("device/0"));
    context.initialize();

    assert_eq!(
        events.lock().as_slice(),
        &[(HOST_EVENT_DEVICE_READY, b"device/0".to_vec())]
    );
}

#[test]
fn test_terminate_invalidates_all_handles() {
    let context = Context::new();
    context.register_plugin(vga_plugin("device/0"));
    context.initialize();

    let set = context.open_stream_set("device/0").expect("set");
    let reader = context.create_reader(set).expect("reader");
    let connection = context.get_stream(reader, color()).expect("connection");

    context.terminate();

    assert!(matches!(
        context.create_reader(set),
        Err(BusError::StaleHandle(_))
    ));
    assert!(matches!(
        context.start_stream(connection),
        Err(BusError::StaleHandle(_))
    ));
    assert!(matches!(
        context.open_frame(reader, FrameTimeout::Poll),
        Err(BusError::StaleHandle(_))
    ));

    // The context stays usable for host-side bookkeeping afterwards.
    let fresh = context.open_stream_set("device/0").expect("fresh set");
    assert_ne!(fresh, set);
}
