#![cfg(feature = "cli")]

use assert_cmd::Command;
use predicates::prelude::*;
use seedcal::io::{PipelineConfig, RunReport};
use std::path::Path;

const PAPER: [u8; 3] = [245, 245, 245];
const SEED: [u8; 3] = [108, 70, 62];

fn seedcal() -> Command {
    Command::cargo_bin("seedcal").expect("binary built")
}

/// 1200 × 1200 paper with one seed in the middle, saved as PNG.
fn write_tray(path: &Path) {
    let img = image::RgbImage::from_fn(1200, 1200, |x, y| {
        let (dx, dy) = (x as f64 - 600.0, y as f64 - 600.0);
        image::Rgb(if dx * dx + dy * dy <= 64.0 { SEED } else { PAPER })
    });
    img.save(path).expect("save png");
}

#[test]
fn help_lists_subcommands() {
    seedcal()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("evaluate"))
        .stdout(predicate::str::contains("render-chart"));
}

#[test]
fn run_without_input_fails() {
    seedcal()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--config or --image"));
}

#[test]
fn init_config_writes_loadable_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("config.json");
    seedcal()
        .args(["init-config", "--image", "tray.png", "--out"])
        .arg(&cfg_path)
        .assert()
        .success();
    let cfg = PipelineConfig::load_json(&cfg_path).unwrap();
    assert_eq!(cfg.image_path, "tray.png");
    assert!(cfg.params.calibrate);
    assert_eq!(cfg.params.segment.max_area_mm2, 30.0);
}

#[test]
fn render_chart_writes_an_image() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("chart.png");
    seedcal()
        .args(["render-chart", "--px-per-mm", "4", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("256x432"));
    let img = image::open(&out).unwrap();
    assert_eq!((img.width(), img.height()), (256, 432));
}

#[test]
fn uncalibrated_run_reports_the_seed() {
    let dir = tempfile::tempdir().unwrap();
    let tray = dir.path().join("tray.png");
    let report_path = dir.path().join("report.json");
    write_tray(&tray);

    seedcal()
        .args(["run", "--no-calibrate", "--image"])
        .arg(&tray)
        .arg("--out")
        .arg(&report_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("objects:    1"));

    let report = RunReport::load_json(&report_path).unwrap();
    assert!(report.error.is_none());
    let result = report.result.expect("result");
    assert_eq!(result.objects.len(), 1);
    assert!(!result.calibrated());
}

#[test]
fn log_json_writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let tray = dir.path().join("tray.png");
    write_tray(&tray);

    seedcal()
        .args(["--log-json", "run", "--no-calibrate", "--image"])
        .arg(&tray)
        .arg("--out")
        .arg(dir.path().join("report.json"))
        .assert()
        .success()
        .stderr(predicate::str::contains("\"level\":\"INFO\""))
        .stderr(predicate::str::contains("processing"));
}

#[test]
fn failed_run_still_writes_a_report() {
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("report.json");
    seedcal()
        .args(["run", "--image"])
        .arg(dir.path().join("missing.png"))
        .arg("--out")
        .arg(&report_path)
        .assert()
        .failure();
    let report = RunReport::load_json(&report_path).unwrap();
    assert!(report.result.is_none());
    assert!(report.error.is_some());
}
