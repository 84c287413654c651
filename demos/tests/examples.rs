//! Renders every example headlessly and inspects the presented frame.

use std::collections::BTreeSet;
use std::time::Duration;

use rstest::rstest;

use redlilium_frame::{BackendType, InstanceParameters, PresentedFrame, QueueMode};
use redlilium_frame_demos::{find_example, run_frames, ExampleContext, EXAMPLES};

const BLACK: [u8; 4] = [0, 0, 0, 255];
const RED: [u8; 4] = [255, 0, 0, 255];
const GRAY: [u8; 4] = [128, 128, 128, 255];

fn render(name: &str, queue_mode: QueueMode, width: u32, height: u32, frames: u64) -> (PresentedFrame, u64) {
    let _ = env_logger::builder().is_test(true).try_init();
    let parameters = InstanceParameters::new()
        .with_backend(BackendType::Software)
        .with_queue_mode(queue_mode);
    let (ctx, surface) = ExampleContext::headless(&parameters, width, height).expect("Failed to resolve device");
    let example = find_example(name).expect("Unknown example");
    let mut callback = (example.init)(&ctx).expect("Failed to initialize example");

    run_frames(ctx.device(), &mut callback, frames, Duration::from_millis(16)).expect("Frame failed");
    assert!(ctx.device().queue().take_errors().is_empty());
    (
        surface.latest_frame().expect("No frame presented"),
        surface.presented_count(),
    )
}

fn distinct_colors(frame: &PresentedFrame) -> BTreeSet<[u8; 4]> {
    frame
        .pixels
        .chunks_exact(4)
        .map(|texel| [texel[0], texel[1], texel[2], texel[3]])
        .collect()
}

#[test]
fn test_registry_names_are_unique() {
    let names: BTreeSet<_> = EXAMPLES.iter().map(|example| example.name).collect();
    assert_eq!(names.len(), EXAMPLES.len());
    for example in &EXAMPLES {
        assert!(find_example(example.name).is_some());
        assert!(!example.title.is_empty());
    }
    assert!(find_example("missing").is_none());
}

#[rstest]
#[case::threaded(QueueMode::Threaded)]
#[case::inline(QueueMode::Inline)]
fn test_hello_triangle(#[case] queue_mode: QueueMode) {
    let (frame, presented) = render("hello_triangle", queue_mode, 64, 64, 3);
    assert_eq!(presented, 3);
    assert_eq!(distinct_colors(&frame), BTreeSet::from([BLACK, RED]));
    assert_eq!(frame.pixel(32, 32), Some(RED));
    assert_eq!(frame.pixel(0, 0), Some(BLACK));
    // Apex at (0, 0.5), base corners at (+-0.5, -0.5)
    assert_eq!(frame.pixel(32, 17), Some(RED));
    assert_eq!(frame.pixel(32, 15), Some(BLACK));
    assert_eq!(frame.pixel(16, 47), Some(RED));
    assert_eq!(frame.pixel(16, 49), Some(BLACK));
}

#[test]
fn test_hello_triangle_msaa() {
    let (frame, _) = render("hello_triangle_msaa", QueueMode::Threaded, 64, 64, 1);
    assert_eq!(frame.pixel(0, 0), Some(BLACK));

    // Fully covered pixels shade at their center
    let [r, g, b, a] = frame.pixel(32, 32).unwrap();
    let expected = (32.5f32 / 800.0 * 255.0).round() as i32;
    assert!((r as i32 - expected).abs() <= 1 && (g as i32 - expected).abs() <= 1);
    assert_eq!((b, a), (0, 255));

    // Partially covered edge pixels are darker than their interior neighbours
    let edge = frame.pixel(32, 16).unwrap();
    assert!(edge[0] < r || edge[1] < g, "edge pixel {edge:?} is not blended");
}

#[rstest]
#[case::threaded(QueueMode::Threaded)]
#[case::inline(QueueMode::Inline)]
fn test_rotating_cube(#[case] queue_mode: QueueMode) {
    let (frame, presented) = render("rotating_cube", queue_mode, 96, 96, 4);
    assert_eq!(presented, 4);
    assert_eq!(frame.pixel(0, 0), Some(GRAY));
    assert_eq!(frame.pixel(95, 95), Some(GRAY));
    assert_ne!(frame.pixel(48, 48), Some(GRAY));
    assert!(distinct_colors(&frame).len() > 8);
}

#[test]
fn test_rotating_cube_animates() {
    let (first, _) = render("rotating_cube", QueueMode::Inline, 48, 48, 1);
    let (later, _) = render("rotating_cube", QueueMode::Inline, 48, 48, 30);
    assert_ne!(first.pixels, later.pixels);
}

#[test]
fn test_instanced_cube() {
    let (frame, presented) = render("instanced_cube", QueueMode::Threaded, 64, 48, 2);
    assert_eq!(presented, 2);
    // The view axis passes between the four central cubes
    assert_eq!(frame.pixel(32, 24), Some(GRAY));
    // Center of the cube in cell (50, 50), translated to (2, 2)
    assert_ne!(frame.pixel(37, 18), Some(GRAY));
    assert!(distinct_colors(&frame).len() > 8);
}
