//! Runs the `mockup-press` binary end to end

use std::path::{Path, PathBuf};
use std::process::Command;

use image::{Rgba, RgbaImage};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mockup-press-cli-{}-{}", name, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_png(path: &Path, width: u32, height: u32, color: [u8; 4]) {
    RgbaImage::from_pixel(width, height, Rgba(color)).save(path).unwrap();
}

fn mockup_press(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_mockup-press"));
    cmd.current_dir(dir)
        .env("CONFIG_PATH", dir.join("no-config"))
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn renders_mockup_and_maps() {
    let dir = scratch_dir("ok");
    write_png(&dir.join("template.png"), 200, 100, [210, 210, 210, 255]);
    write_png(&dir.join("mask.png"), 200, 100, [255, 255, 255, 255]);
    write_png(&dir.join("logo.png"), 40, 40, [200, 0, 0, 255]);

    let status = mockup_press(&dir)
        .args(["template.png", "mask.png", "logo.png", "40", "30", "-5", "20", "-45"])
        .args(["maps/displacement.png", "maps/lighting.png", "maps/adjustment.png", "out/mockup.png"])
        .args(["--output-width", "100"])
        .status()
        .unwrap();
    assert!(status.success());

    let output = image::open(dir.join("out/mockup.png")).unwrap();
    assert_eq!((output.width(), output.height()), (100, 50));
    for map in ["displacement", "lighting", "adjustment"] {
        let map = image::open(dir.join(format!("maps/{}.png", map))).unwrap();
        assert_eq!((map.width(), map.height()), (200, 100));
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_source_exits_with_source_unavailable() {
    let dir = scratch_dir("missing");
    write_png(&dir.join("template.png"), 20, 20, [210, 210, 210, 255]);

    let output = mockup_press(&dir)
        .args(["template.png", "nope.png", "nope.png", "4", "4", "0", "0", "0", "out.png"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[SourceUnavailable]"), "{}", stderr);

    // JSON logging (the default) also emits a machine-readable report line
    let report = stderr
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|value| value.get("kind").is_some())
        .expect("error report line");
    assert_eq!(report["kind"], "SourceUnavailable");
    assert!(report["message"].as_str().unwrap().contains("nope.png"));
    assert!(!dir.join("out.png").exists());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn degenerate_perspective_exits_with_invalid_geometry() {
    let dir = scratch_dir("quad");
    write_png(&dir.join("template.png"), 20, 20, [210, 210, 210, 255]);
    write_png(&dir.join("mask.png"), 20, 20, [255, 255, 255, 255]);
    write_png(&dir.join("logo.png"), 4, 4, [0, 0, 255, 255]);

    let output = mockup_press(&dir)
        .args(["template.png", "mask.png", "logo.png", "4", "4", "0", "0", "0", "out.png"])
        .args(["--perspective", "1,1,1,1,1,1,1,1"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error[InvalidGeometry]"));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn failed_final_write_leaves_no_map_files() {
    let dir = scratch_dir("partial");
    write_png(&dir.join("template.png"), 40, 30, [210, 210, 210, 255]);
    write_png(&dir.join("mask.png"), 40, 30, [255, 255, 255, 255]);
    write_png(&dir.join("logo.png"), 8, 8, [0, 0, 255, 255]);
    // The final output path is a directory, so writing the mockup fails
    std::fs::create_dir_all(dir.join("blocked.png")).unwrap();

    let output = mockup_press(&dir)
        .args(["template.png", "mask.png", "logo.png", "8", "8", "4", "4", "0"])
        .args(["maps/displacement.png", "blocked.png"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.join("maps/displacement.png").exists());

    std::fs::remove_dir_all(&dir).ok();
}
