/*
 *  controller.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Keeps every display slot showing what the mapping asks for
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::automap::{auto_map, cache_key, contains_file, custom_image_name, program_name};
use crate::bitmap::convert_path;
use crate::bus::{BusError, CommandBus, Transport};
use crate::config::Config;
use crate::func_timer::FunctionTimer;
use crate::mapping::DisplayTarget;
use crate::modules::Modules;
use crate::sessions::{IconSource, SessionSource};

/// What a slot is known to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Off,
    Image(String),
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotState::Off => write!(f, "off"),
            SlotState::Image(name) => write!(f, "{}", name),
        }
    }
}

/// Outcome of one pass over the mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Slots sent a new state
    pub changed: Vec<usize>,
    /// Slots already showing the wanted state
    pub unchanged: Vec<usize>,
    /// Slots whose update failed; retried next pass
    pub failed: Vec<usize>,
    /// Slots naming a file the card does not have; left as they are
    pub missing: Vec<usize>,
    /// Generated images written to the card
    pub uploaded: Vec<String>,
}

/// Owns the per-slot record and everything a refresh pass needs.
///
/// The slot record only holds states the device acknowledged (or accepted
/// without error), so a failed slot is absent and gets another attempt.
pub struct DisplayController<T: Transport> {
    bus: CommandBus<T>,
    config: watch::Receiver<Arc<Config>>,
    sessions: Arc<dyn SessionSource>,
    icons: Arc<dyn IconSource>,
    current: BTreeMap<usize, SlotState>,
}

impl<T: Transport> DisplayController<T> {
    pub fn new(
        bus: CommandBus<T>,
        config: watch::Receiver<Arc<Config>>,
        sessions: Arc<dyn SessionSource>,
        icons: Arc<dyn IconSource>,
    ) -> Self {
        Self {
            bus,
            config,
            sessions,
            icons,
            current: BTreeMap::new(),
        }
    }

    pub fn current(&self) -> &BTreeMap<usize, SlotState> {
        &self.current
    }

    /// Drop the slot record so the next pass resends everything
    pub fn forget(&mut self) {
        self.current.clear();
    }

    fn snapshot(&mut self) -> Arc<Config> {
        Arc::clone(&self.config.borrow_and_update())
    }

    /// Bring every mapped slot in line with the current configuration.
    ///
    /// Per slot failures are logged and reported; only a failed card
    /// listing aborts the pass. The listing is fetched at most once, and
    /// only when a slot needs it: an `auto` slot, or a file not yet shown.
    pub async fn refresh(&mut self) -> Result<RefreshReport, BusError> {
        let _timer = FunctionTimer::new("display refresh");
        let cfg = self.snapshot();
        let mods = Modules::new(&self.bus, &cfg);
        let mapping = cfg.display_mapping();

        let wants_auto = mapping.iter().any(|(_, t)| *t == DisplayTarget::Auto);
        let automap = if wants_auto {
            auto_map(&self.sessions.slider_targets(), &self.sessions.live_sessions())
        } else {
            BTreeMap::new()
        };

        // slots dropped from the mapping are left as they are
        self.current.retain(|slot, _| mapping.get(*slot).is_some());

        let mut report = RefreshReport::default();
        let mut listing: Option<Vec<String>> = None;

        for (slot, target) in mapping.iter() {
            if let Err(e) = mods.mux.select_request(slot) {
                error!("display {}: {}", slot, e);
                self.current.remove(&slot);
                report.failed.push(slot);
                continue;
            }

            let wanted = match target {
                DisplayTarget::Off => SlotState::Off,
                DisplayTarget::File(name) => {
                    let wanted = SlotState::Image(name.clone());
                    if self.current.get(&slot) != Some(&wanted) {
                        if listing.is_none() {
                            listing = Some(mods.sd.list().await?);
                        }
                        let files = listing.get_or_insert_with(Vec::new);
                        if !contains_file(files, name) {
                            warn!("display {}: {} does not exist on the card", slot, name);
                            self.current.remove(&slot);
                            report.missing.push(slot);
                            continue;
                        }
                    }
                    wanted
                }
                DisplayTarget::Auto => match automap.get(&slot) {
                    None => {
                        debug!("display {}: no live session", slot);
                        SlotState::Off
                    }
                    Some(session) => {
                        if listing.is_none() {
                            listing = Some(mods.sd.list().await?);
                        }
                        let files = listing.get_or_insert_with(Vec::new);
                        match self.auto_image(&mods, &cfg, session, files, &mut report).await {
                            Ok(Some(name)) => SlotState::Image(name),
                            Ok(None) => SlotState::Off,
                            Err(e) => {
                                error!("display {} ({}): {}", slot, session, e);
                                self.current.remove(&slot);
                                report.failed.push(slot);
                                continue;
                            }
                        }
                    }
                },
            };

            if self.current.get(&slot) == Some(&wanted) {
                report.unchanged.push(slot);
                continue;
            }

            match apply(&mods, slot, &wanted).await {
                Ok(()) => {
                    info!("display {} -> {}", slot, wanted);
                    self.current.insert(slot, wanted);
                    report.changed.push(slot);
                }
                Err(e) => {
                    error!("display {} ({}): {}", slot, wanted, e);
                    self.current.remove(&slot);
                    report.failed.push(slot);
                }
            }
        }
        Ok(report)
    }

    /// Forget the slot record and run a full pass
    pub async fn reload(&mut self) -> Result<RefreshReport, BusError> {
        self.forget();
        self.refresh().await
    }

    /// Turn every mapped display off
    pub async fn all_off(&mut self) -> RefreshReport {
        let cfg = self.snapshot();
        let mods = Modules::new(&self.bus, &cfg);
        let mut report = RefreshReport::default();
        for slot in cfg.display_mapping().slots() {
            match apply(&mods, slot, &SlotState::Off).await {
                Ok(()) => {
                    self.current.insert(slot, SlotState::Off);
                    report.changed.push(slot);
                }
                Err(e) => {
                    error!("display {} (off): {}", slot, e);
                    self.current.remove(&slot);
                    report.failed.push(slot);
                }
            }
        }
        report
    }

    /// Card file to show for a live session: a user image if the card has
    /// one, else the generated image, created and uploaded when missing.
    /// `None` when there is nothing to show.
    async fn auto_image(
        &self,
        mods: &Modules<T>,
        cfg: &Config,
        session: &str,
        files: &mut Vec<String>,
        report: &mut RefreshReport,
    ) -> Result<Option<String>, BusError> {
        let program = program_name(session);

        let custom = custom_image_name(program);
        if contains_file(files, &custom) {
            return Ok(Some(custom));
        }

        let key = cache_key(program);
        if contains_file(files, &key) {
            return Ok(Some(key));
        }

        let Some(icon) = self.icons.icon_for(program) else {
            warn!("no image for {}, display stays dark", program);
            return Ok(None);
        };
        debug!("generating {} from {}", key, icon.display());
        let packed = convert_path(&icon, cfg.threshold())?;
        mods.sd.send_image(&packed, &key).await?;
        files.push(key.clone());
        report.uploaded.push(key.clone());
        Ok(Some(key))
    }
}

/// Select the slot's port and send its state, all in one session so no
/// other client can switch ports in between
async fn apply<T: Transport>(mods: &Modules<T>, slot: usize, state: &SlotState) -> Result<(), BusError> {
    let mut requests = vec![mods.mux.select_request(slot)?];
    match state {
        SlotState::Off => requests.push(mods.display.off_request()),
        // image first so the panel never lights up with the old one
        SlotState::Image(name) => {
            requests.push(mods.display.set_image_request(name)?);
            requests.push(mods.display.on_request());
        }
    }

    let mut session = mods.bus.open_session().await;
    for request in &requests {
        session
            .run(request)
            .await?
            .into_result(&request.command_path, request.timeout)?;
    }
    session.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockTransport;
    use crate::bus::transfer::END_OF_FILE;
    use crate::config::parse_yaml;
    use crate::modules::display::{DISPLAY_OFF, DISPLAY_ON, SET_IMAGE};
    use crate::modules::sd::SD_LIST;
    use crate::sessions::ConfigSessions;

    const SELECT: &str = "deej.modules.TCA9548A.select";

    struct Rig {
        mock: Arc<MockTransport>,
        config: watch::Sender<Arc<Config>>,
        ctl: DisplayController<MockTransport>,
    }

    fn rig(yaml: &str) -> Rig {
        let mock = Arc::new(MockTransport::new());
        let (config, rx) = watch::channel(Arc::new(parse_yaml(yaml).unwrap()));
        let sessions = Arc::new(ConfigSessions::new(rx.clone()));
        let ctl = DisplayController::new(
            CommandBus::new(Arc::clone(&mock)),
            rx,
            sessions.clone(),
            sessions,
        );
        Rig { mock, config, ctl }
    }

    fn reconfigure(rig: &Rig, yaml: &str) {
        rig.config.send(Arc::new(parse_yaml(yaml).unwrap())).unwrap();
    }

    #[tokio::test]
    async fn test_file_slot_sent_once() {
        let mut rig = rig("display_mapping:\n  1: LOGO.B\n");
        rig.mock.reply_to(SD_LIST, &["LOGO.B", "DONE"]);
        rig.mock.reply_to("LOGO.B", &["DONE"]);

        let report = rig.ctl.refresh().await.unwrap();
        assert_eq!(report.changed, vec![1]);
        assert_eq!(
            rig.mock.lines(),
            vec![SD_LIST, SELECT, "1", SET_IMAGE, "LOGO.B", DISPLAY_ON]
        );

        rig.mock.clear_written();
        let report = rig.ctl.refresh().await.unwrap();
        assert_eq!(report.unchanged, vec![1]);
        assert!(rig.mock.written().is_empty());
    }

    #[tokio::test]
    async fn test_empty_mapping_turns_display_off() {
        let mut rig = rig("display_mapping:\n  0: LOGO.B\n");
        rig.mock.reply_to(SD_LIST, &["logo.b", "DONE"]);
        rig.mock.reply_to("LOGO.B", &["DONE"]);
        rig.ctl.refresh().await.unwrap();

        reconfigure(&rig, "display_mapping:\n  0: ''\n");
        rig.mock.clear_written();
        let report = rig.ctl.refresh().await.unwrap();
        assert_eq!(report.changed, vec![0]);
        assert_eq!(rig.mock.lines(), vec![SELECT, "0", DISPLAY_OFF]);
        assert_eq!(rig.ctl.current().get(&0), Some(&SlotState::Off));
    }

    #[tokio::test]
    async fn test_auto_uses_cached_image_without_upload() {
        let mut rig = rig(
            "display_mapping:\n  0: auto\nslider_mapping:\n  0: [spotify.exe, Chrome.exe]\nlive_sessions: [chrome.exe]\n",
        );
        let key = cache_key("Chrome");
        rig.mock.reply_to(SD_LIST, &[key.to_uppercase().as_str(), "DONE"]);
        rig.mock.reply_to(&key, &["DONE"]);

        let report = rig.ctl.refresh().await.unwrap();
        assert!(report.uploaded.is_empty());
        assert_eq!(report.changed, vec![0]);
        assert_eq!(
            rig.mock.lines(),
            vec![SD_LIST, SELECT, "0", SET_IMAGE, key.as_str(), DISPLAY_ON]
        );
    }

    #[tokio::test]
    async fn test_auto_prefers_custom_image() {
        let mut rig = rig(
            "display_mapping:\n  2: auto\nslider_mapping:\n  2: chrome.exe\nlive_sessions: [chrome.exe]\n",
        );
        rig.mock.reply_to(SD_LIST, &["CHROME.B", "DONE"]);
        rig.mock.reply_to("chrome.b", &["DONE"]);

        rig.ctl.refresh().await.unwrap();
        assert_eq!(rig.ctl.current().get(&2), Some(&SlotState::Image("chrome.b".into())));
    }

    #[tokio::test]
    async fn test_auto_generates_and_uploads_missing_image() {
        let icons = tempfile::tempdir().unwrap();
        image::RgbaImage::from_pixel(32, 32, image::Rgba([255, 255, 255, 255]))
            .save(icons.path().join("chrome.png"))
            .unwrap();
        let yaml = format!(
            "display_mapping:\n  0: auto\n  1: auto\nslider_mapping:\n  0: chrome.exe\n  1: chrome.exe\nlive_sessions: [chrome.exe]\nicon_dir: {}\n",
            icons.path().display()
        );
        let mut rig = rig(&yaml);
        let key = cache_key("chrome");
        rig.mock.reply_to(SD_LIST, &["DONE"]);
        rig.mock.reply_to(END_OF_FILE, &["DONE"]);
        rig.mock.reply_to(&key, &["DONE"]);

        let report = rig.ctl.refresh().await.unwrap();
        // uploaded once, shown on both slots
        assert_eq!(report.uploaded, vec![key.clone()]);
        assert_eq!(report.changed, vec![0, 1]);
        assert_eq!(rig.mock.bytes().len(), 1024);
        let lines = rig.mock.lines();
        assert_eq!(lines.iter().filter(|l| l.as_str() == SD_LIST).count(), 1);
        assert_eq!(lines.iter().filter(|l| l.as_str() == END_OF_FILE).count(), 1);
    }

    #[tokio::test]
    async fn test_auto_without_live_session_is_off() {
        let mut rig = rig("display_mapping:\n  0: auto\nslider_mapping:\n  0: chrome.exe\n");
        rig.ctl.refresh().await.unwrap();
        assert_eq!(rig.mock.lines(), vec![SELECT, "0", DISPLAY_OFF]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_slot_is_retried() {
        let mut rig = rig("display_mapping:\n  0: SLOW.B\n  1: LOGO.B\n");
        rig.mock.reply_to(SD_LIST, &["SLOW.B", "LOGO.B", "DONE"]);
        rig.mock.reply_to("LOGO.B", &["DONE"]);

        let report = rig.ctl.refresh().await.unwrap();
        assert_eq!(report.failed, vec![0]);
        assert_eq!(report.changed, vec![1]);
        assert!(rig.ctl.current().get(&0).is_none());
        assert!(!rig.ctl.bus.arbiter().is_busy());

        rig.mock.reply_to("SLOW.B", &["DONE"]);
        let report = rig.ctl.refresh().await.unwrap();
        assert_eq!(report.changed, vec![0]);
        assert_eq!(report.unchanged, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_timeout_aborts_pass() {
        let mut rig = rig(
            "display_mapping:\n  0: auto\nslider_mapping:\n  0: chrome.exe\nlive_sessions: [chrome.exe]\n",
        );
        let err = rig.ctl.refresh().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(rig.ctl.current().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_slot_fails_without_io() {
        let mut rig = rig("display_mapping:\n  9: LOGO.B\n");
        let report = rig.ctl.refresh().await.unwrap();
        assert_eq!(report.failed, vec![9]);
        assert!(rig.mock.written().is_empty());
    }

    #[tokio::test]
    async fn test_all_off_and_reload() {
        let mut rig = rig("display_mapping:\n  0: LOGO.B\n  1: ~\n");
        rig.mock.reply_to(SD_LIST, &["LOGO.B", "DONE"]);
        rig.mock.reply_to("LOGO.B", &["DONE"]);

        let report = rig.ctl.all_off().await;
        assert_eq!(report.changed, vec![0, 1]);
        assert_eq!(
            rig.mock.lines(),
            vec![SELECT, "0", DISPLAY_OFF, SELECT, "1", DISPLAY_OFF]
        );

        rig.mock.clear_written();
        let report = rig.ctl.reload().await.unwrap();
        assert_eq!(report.changed, vec![0, 1]);
        assert_eq!(
            rig.mock.lines(),
            vec![SD_LIST, SELECT, "0", SET_IMAGE, "LOGO.B", DISPLAY_ON, SELECT, "1", DISPLAY_OFF]
        );
    }

    #[tokio::test]
    async fn test_file_missing_from_card_is_not_sent() {
        let mut rig = rig("display_mapping:\n  0: LOGO.B\n  1: MISSING.B\n");
        rig.mock.reply_to(SD_LIST, &["LOGO.B", "OTHER.B", "DONE"]);
        rig.mock.reply_to("LOGO.B", &["DONE"]);

        let report = rig.ctl.refresh().await.unwrap();
        assert_eq!(report.changed, vec![0]);
        assert_eq!(report.missing, vec![1]);
        assert!(report.failed.is_empty());
        assert!(rig.ctl.current().get(&1).is_none());
        // one listing serves every slot of the pass
        assert_eq!(
            rig.mock.lines(),
            vec![SD_LIST, SELECT, "0", SET_IMAGE, "LOGO.B", DISPLAY_ON]
        );

        // still absent: listed again, nothing sent to the display
        rig.mock.clear_written();
        let report = rig.ctl.refresh().await.unwrap();
        assert_eq!(report.unchanged, vec![0]);
        assert_eq!(report.missing, vec![1]);
        assert_eq!(rig.mock.lines(), vec![SD_LIST]);

        // copied onto the card since
        rig.mock.reply_to(SD_LIST, &["LOGO.B", "MISSING.B", "DONE"]);
        rig.mock.reply_to("MISSING.B", &["DONE"]);
        rig.mock.clear_written();
        let report = rig.ctl.refresh().await.unwrap();
        assert_eq!(report.changed, vec![1]);
        assert_eq!(rig.ctl.current().get(&1), Some(&SlotState::Image("MISSING.B".into())));
    }
}
