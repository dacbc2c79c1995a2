use image::{ImageFormat, Rgba, RgbaImage};
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_binary_returns_failure_when_no_input() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("captioncard");
    // No input args → prints help and exit with code 1
    cmd.assert().failure();
}

#[test]
fn test_binary_prints_default_configuration() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("captioncard");
    cmd.arg("--get-default-configuration");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[layout]").and(predicate::str::contains("max_chars")));
}

#[test]
fn test_binary_renders_local_image() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("source.png");
    RgbaImage::from_pixel(320, 240, Rgba([200, 40, 40, 255]))
        .save_with_format(&input, ImageFormat::Png)
        .unwrap();
    let output = dir.path().join("out.gif");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("captioncard");
    cmd.current_dir(dir.path())
        .arg("-i")
        .arg(&input)
        .arg("-t")
        .arg("when the build is green")
        .arg("-o")
        .arg(&output)
        .arg("--no-remote-glyphs");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Saved caption"));

    // A still source is written as PNG whatever extension was asked for
    let written = dir.path().join("out.png");
    assert!(written.exists());
    let (width, height) = image::image_dimensions(&written).unwrap();
    assert_eq!(width, 320);
    assert!(height > 240);
}

#[test]
fn test_binary_dumps_layout() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("source.png");
    RgbaImage::from_pixel(300, 200, Rgba([0, 0, 0, 255]))
        .save_with_format(&input, ImageFormat::Png)
        .unwrap();
    let layout = dir.path().join("layout.json");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("captioncard");
    cmd.current_dir(dir.path())
        .arg("-i")
        .arg(&input)
        .arg("-t")
        .arg("dump me")
        .arg("--dump-layout")
        .arg(&layout)
        .arg("--no-remote-glyphs")
        .arg("-q");
    cmd.assert().success().stdout(predicate::str::is_empty());

    let json = std::fs::read_to_string(&layout).unwrap();
    assert!(json.contains("\"text\": \"dump me\""));
    assert!(dir.path().join("caption.png").exists());
}

#[test]
fn test_binary_reports_missing_glyphs() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("source.png");
    RgbaImage::from_pixel(300, 200, Rgba([0, 0, 0, 255]))
        .save_with_format(&input, ImageFormat::Png)
        .unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("captioncard");
    cmd.current_dir(dir.path())
        .arg("-i")
        .arg(&input)
        .arg("-t")
        .arg("plain 漢")
        .arg("--show-missing-glyphs")
        .arg("--no-remote-glyphs");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("U+6F22"));
}

#[test]
fn test_binary_rejects_missing_file() {
    let dir = tempdir().unwrap();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("captioncard");
    cmd.current_dir(dir.path())
        .arg("-i")
        .arg("does-not-exist.png")
        .arg("-t")
        .arg("hello")
        .arg("--no-remote-glyphs");
    cmd.assert().failure();
    assert!(!dir.path().join("caption.png").exists());
}

#[test]
fn test_binary_rejects_unsupported_attachment() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.txt");
    std::fs::write(&input, "not an image").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("captioncard");
    cmd.current_dir(dir.path())
        .arg("-i")
        .arg(&input)
        .arg("-t")
        .arg("hello")
        .arg("--no-remote-glyphs");
    cmd.assert().failure();
}
