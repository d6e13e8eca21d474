/*
 *  sessions.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Audio sessions and their icons, as seen by the display controller
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
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::watch;

use crate::config::Config;

/// Slider assignments and the sessions currently producing audio
pub trait SessionSource: Send + Sync {
    fn slider_targets(&self) -> BTreeMap<usize, Vec<String>>;
    fn live_sessions(&self) -> Vec<String>;
}

/// Local image for a program name, if there is one
pub trait IconSource: Send + Sync {
    fn icon_for(&self, program: &str) -> Option<PathBuf>;
}

/// Extensions tried, in order of preference
pub const ICON_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Icons stored as `<dir>/<program>.<ext>`, names matched ignoring case
#[derive(Debug, Clone)]
pub struct IconDir {
    dir: PathBuf,
}

impl IconDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl IconSource for IconDir {
    fn icon_for(&self, program: &str) -> Option<PathBuf> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("icon dir {}: {}", self.dir.display(), e);
                return None;
            }
        };

        let mut best: Option<(usize, PathBuf)> = None;
        for path in entries.filter_map(Result::ok).map(|e| e.path()) {
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            if !stem.eq_ignore_ascii_case(program) {
                continue;
            }
            let Some(rank) = ICON_EXTENSIONS.iter().position(|e| e.eq_ignore_ascii_case(ext)) else {
                continue;
            };
            if best.as_ref().is_none_or(|(r, _)| rank < *r) {
                best = Some((rank, path));
            }
        }
        let found = best.map(|(_, path)| path);
        debug!("icon for {}: {:?}", program, found);
        found
    }
}

/// Sessions and icons as the current configuration describes them.
/// Follows config reloads.
#[derive(Debug, Clone)]
pub struct ConfigSessions {
    config: watch::Receiver<Arc<Config>>,
}

impl ConfigSessions {
    pub fn new(config: watch::Receiver<Arc<Config>>) -> Self {
        Self { config }
    }

    fn current(&self) -> Arc<Config> {
        Arc::clone(&self.config.borrow())
    }
}

impl SessionSource for ConfigSessions {
    fn slider_targets(&self) -> BTreeMap<usize, Vec<String>> {
        self.current().slider_mapping().targets().clone()
    }

    fn live_sessions(&self) -> Vec<String> {
        self.current().live_sessions().to_vec()
    }
}

impl IconSource for ConfigSessions {
    fn icon_for(&self, program: &str) -> Option<PathBuf> {
        let dir = self.current().icon_dir.clone()?;
        IconDir::new(dir).icon_for(program)
    }
}
