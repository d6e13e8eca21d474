/*
 *  tests/refresh_integration.rs
 *
 *  Display controller end to end against a scripted controller board
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 */

use std::sync::Arc;

use deejdsp::automap::cache_key;
use deejdsp::bitmap::{DEFAULT_THRESHOLD, convert_path};
use deejdsp::bus::transfer::END_OF_FILE;
use deejdsp::bus::{CommandBus, MockTransport};
use deejdsp::config::{self, Config};
use deejdsp::controller::{DisplayController, SlotState};
use deejdsp::modules::sd::SD_LIST;
use deejdsp::sessions::ConfigSessions;
use image::{Rgba, RgbaImage};
use tokio::sync::watch;

fn controller(
    cfg: Config,
) -> (
    Arc<MockTransport>,
    watch::Sender<Arc<Config>>,
    DisplayController<MockTransport>,
) {
    let mock = Arc::new(MockTransport::new());
    let (tx, rx) = watch::channel(Arc::new(cfg));
    let sessions = Arc::new(ConfigSessions::new(rx.clone()));
    let ctl = DisplayController::new(CommandBus::new(Arc::clone(&mock)), rx, sessions.clone(), sessions);
    (mock, tx, ctl)
}

/// White square on transparent, like a typical app icon
fn write_icon(path: &std::path::Path) {
    let mut icon = RgbaImage::new(48, 48);
    for y in 8..40 {
        for x in 8..40 {
            icon.put_pixel(x, y, Rgba([255, 255, 255, 255]));
        }
    }
    icon.save(path).unwrap();
}

#[tokio::test]
async fn test_auto_slot_follows_live_session() {
    let icons = tempfile::tempdir().unwrap();
    write_icon(&icons.path().join("spotify.png"));
    write_icon(&icons.path().join("chrome.png"));

    let base = format!(
        "display_mapping:\n  0: auto\nslider_mapping:\n  0: [spotify.exe, chrome.exe]\nicon_dir: {}\ntransfer:\n  chunk_size: 0\n",
        icons.path().display()
    );
    let (mock, tx, mut ctl) =
        controller(config::parse_yaml(&format!("{base}live_sessions: [chrome.exe]\n")).unwrap());

    let chrome = cache_key("chrome");
    let spotify = cache_key("spotify");
    mock.reply_to(SD_LIST, &["DONE"]);
    mock.reply_to(END_OF_FILE, &["DONE"]);
    mock.reply_to(&chrome, &["DONE"]);
    mock.reply_to(&spotify, &["DONE"]);

    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.uploaded, vec![chrome.clone()]);
    assert_eq!(ctl.current().get(&0), Some(&SlotState::Image(chrome.clone())));

    // the uploaded bytes are exactly what the pipeline produces locally
    let expected = convert_path(&icons.path().join("chrome.png"), DEFAULT_THRESHOLD).unwrap();
    assert_eq!(mock.bytes(), expected.to_bytes());

    // spotify starts playing and wins the slot: first target in the list
    tx.send(Arc::new(
        config::parse_yaml(&format!("{base}live_sessions: [chrome.exe, spotify.exe]\n")).unwrap(),
    ))
    .unwrap();
    mock.reply_to(SD_LIST, &[chrome.to_uppercase().as_str(), "DONE"]);
    mock.clear_written();

    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.uploaded, vec![spotify.clone()]);
    assert_eq!(ctl.current().get(&0), Some(&SlotState::Image(spotify)));

    // nothing changed since: no traffic beyond the listing
    mock.reply_to(SD_LIST, &[chrome.as_str(), cache_key("spotify").as_str(), "DONE"]);
    mock.clear_written();
    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.unchanged, vec![0]);
    assert_eq!(mock.lines(), vec![SD_LIST]);
}

#[tokio::test]
async fn test_mapping_reload_swaps_whole_mapping() {
    let (mock, tx, mut ctl) = controller(
        config::parse_yaml("display_mapping:\n  0: A.B\n  1: B.B\n").unwrap(),
    );
    mock.reply_to(SD_LIST, &["A.B", "B.B", "C.B", "DONE"]);
    for name in ["A.B", "B.B", "C.B"] {
        mock.reply_to(name, &["DONE"]);
    }
    ctl.refresh().await.unwrap();

    tx.send(Arc::new(
        config::parse_yaml("display_mapping:\n  0: C.B\n  1: B.B\n").unwrap(),
    ))
    .unwrap();
    mock.clear_written();
    let report = ctl.refresh().await.unwrap();

    assert_eq!(report.changed, vec![0]);
    assert_eq!(report.unchanged, vec![1]);
    assert!(mock.lines().contains(&"C.B".to_string()));
    assert!(!mock.lines().contains(&"B.B".to_string()));
}

#[tokio::test]
async fn test_mux_chip_and_acknowledge_from_config() {
    let (mock, _tx, mut ctl) = controller(
        config::parse_yaml("display_mapping:\n  3: ~\nmux_chip: PCA9548\nacknowledge_control: true\n").unwrap(),
    );
    mock.reply_to("3", &["DONE"]);
    mock.reply_to("deej.modules.display.off", &["DONE"]);

    let report = ctl.all_off().await;
    assert_eq!(report.changed, vec![3]);
    assert_eq!(
        mock.lines(),
        vec!["deej.modules.PCA9548.select", "3", "deej.modules.display.off"]
    );
}

#[test]
fn test_convert_writes_display_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("icon.png");
    let out = dir.path().join("ICON.B");
    write_icon(&src);

    let packed = convert_path(&src, 128).unwrap();
    packed.write_to(&out).unwrap();

    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(bytes.len(), 1024);
    // 48x48 centred at x=40, lit square spans x 48..80, rows 8..40
    assert_eq!(bytes[48], 0x00); // page 0, rows 0-7 dark
    assert_eq!(bytes[128 + 48], 0xFF); // page 1, rows 8-15 lit
    assert_eq!(bytes[128 + 47], 0x00);
    assert_eq!(bytes[4 * 128 + 79], 0xFF); // page 4, rows 32-39
    assert_eq!(bytes[4 * 128 + 80], 0x00);
    assert_eq!(bytes[5 * 128 + 60], 0x00); // page 5, rows 40-47
}

#[test]
fn test_convert_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("broken.png");
    std::fs::write(&src, b"not an image").unwrap();
    assert!(convert_path(&src, 128).is_err());
}
