use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn tmp_path(name: &str) -> PathBuf {
    let tmp_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("radiodecode");
    fs::create_dir_all(&tmp_dir).ok();
    tmp_dir.join(name)
}

fn run_radiodecode(args: &[&str]) -> (bool, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_radiodecode"))
        .args(args)
        .output()
        .expect("Failed to execute radiodecode");

    let text = String::from_utf8_lossy(&output.stderr).to_string() + &String::from_utf8_lossy(&output.stdout);
    (output.status.success(), text)
}

#[test]
fn test_synth_cw_writes_wav() {
    let output = tmp_path("synth_cw.wav");
    let (ok, text) = run_radiodecode(&["synth-cw", "CQ TEST", output.to_str().unwrap()]);

    assert!(ok, "synth-cw failed: {}", text);
    assert!(text.contains("Wrote"), "Unexpected output: {}", text);

    let reader = hound::WavReader::open(&output).expect("Output is not a WAV file");
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 8000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
}

#[test]
fn test_cw_synth_then_decode() {
    let wav = tmp_path("cw_roundtrip.wav");
    let (ok, text) = run_radiodecode(&["synth-cw", "PARIS PARIS", wav.to_str().unwrap(), "--freq", "700"]);
    assert!(ok, "synth-cw failed: {}", text);

    let (ok, text) = run_radiodecode(&["decode", wav.to_str().unwrap(), "--mode", "cw", "--cw-freq", "700"]);
    assert!(ok, "decode failed: {}", text);
    assert!(text.contains("PARIS PARIS"), "Decoded text missing: {}", text);
    assert!(text.contains("WPM at 700 Hz"), "Status line missing: {}", text);

    let wpm: u32 = text
        .split("CW: ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|w| w.parse().ok())
        .expect("No WPM in status line");
    assert!((19..=21).contains(&wpm), "WPM {} not near 20", wpm);
}

#[test]
fn test_rtty_synth_then_decode() {
    let wav = tmp_path("rtty_roundtrip.wav");
    let (ok, text) = run_radiodecode(&["synth-rtty", "CQ CQ DE HA5XYZ K", wav.to_str().unwrap()]);
    assert!(ok, "synth-rtty failed: {}", text);

    let (ok, text) = run_radiodecode(&["decode", wav.to_str().unwrap(), "--mode", "rtty"]);
    assert!(ok, "decode failed: {}", text);
    assert!(text.contains("CQ CQ DE HA5XYZ K"), "Decoded text missing: {}", text);
    assert!(text.contains("mark 2125 Hz, space 1955 Hz"), "Status line missing: {}", text);
}

#[test]
fn test_decode_with_config_file() {
    let wav = tmp_path("rtty_config.wav");
    let (ok, _) = run_radiodecode(&["synth-rtty", "RST 599", wav.to_str().unwrap(), "--mark", "1445"]);
    assert!(ok);

    let config = tmp_path("rtty_config.json");
    fs::write(&config, r#"{"mode": "rtty", "rtty_mark": 1445, "rtty_shift": 170}"#).expect("Failed to write config");

    let (ok, text) = run_radiodecode(&["decode", wav.to_str().unwrap(), "--config", config.to_str().unwrap()]);
    assert!(ok, "decode failed: {}", text);
    assert!(text.contains("RST 599"), "Decoded text missing: {}", text);
    assert!(text.contains("mark 1445 Hz"), "Status line missing: {}", text);
}

#[test]
fn test_decode_without_mode_fails() {
    let wav = tmp_path("no_mode.wav");
    let (ok, _) = run_radiodecode(&["synth-cw", "E", wav.to_str().unwrap()]);
    assert!(ok);

    let (ok, text) = run_radiodecode(&["decode", wav.to_str().unwrap()]);
    assert!(!ok, "decode without a mode should fail");
    assert!(text.contains("No decoder mode"), "Unexpected error: {}", text);
}

#[test]
fn test_decode_rejects_image_modes() {
    let wav = tmp_path("sstv.wav");
    let (ok, _) = run_radiodecode(&["synth-cw", "E", wav.to_str().unwrap()]);
    assert!(ok);

    let (ok, text) = run_radiodecode(&["decode", wav.to_str().unwrap(), "--mode", "sstv"]);
    assert!(!ok, "SSTV has no decoder in this build");
    assert!(text.contains("rejected"), "Unexpected error: {}", text);
}

#[test]
fn test_decode_missing_file() {
    let (ok, text) = run_radiodecode(&["decode", "does-not-exist.wav", "--mode", "cw"]);
    assert!(!ok);
    assert!(text.contains("WAV error") || text.contains("I/O error"), "Unexpected error: {}", text);
}

#[test]
fn test_long_message_decodes_completely() {
    let message = "THE QUICK BROWN FOX JUMPS OVER THE LAZY DOG THE QUICK BROWN FOX JUMPS OVER THE LAZY DOG";
    assert!(message.len() > 63, "message must outgrow the text buffer");

    let wav = tmp_path("rtty_long.wav");
    let (ok, text) = run_radiodecode(&["synth-rtty", message, wav.to_str().unwrap()]);
    assert!(ok, "synth-rtty failed: {}", text);

    let (ok, text) = run_radiodecode(&["decode", wav.to_str().unwrap(), "--mode", "rtty"]);
    assert!(ok, "decode failed: {}", text);
    assert!(text.contains(message), "Decoded text incomplete: {}", text);
    assert!(!text.contains("dropped"), "Characters were dropped: {}", text);
}
