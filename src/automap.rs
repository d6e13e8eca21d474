/*
 *  automap.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Cache keys for generated images and slot to session auto mapping
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

use sha1::{Digest, Sha1};

/// Extension of every generated image
pub const GENERATED_EXT: &str = ".B";

/// Extension of a user supplied image that overrides the generated one
pub const CUSTOM_EXT: &str = ".b";

const KEY_LEN: usize = 7;

/// Stable 9 character card filename for `identifier`: the first seven hex
/// digits of its SHA-1 followed by `.B`
pub fn cache_key(identifier: &str) -> String {
    let mut key = format!("{:x}", Sha1::digest(identifier.as_bytes()));
    key.truncate(KEY_LEN);
    key.push_str(GENERATED_EXT);
    key
}

/// Session target without its extension, `chrome.exe` becomes `chrome`
pub fn program_name(target: &str) -> &str {
    target.split('.').next().unwrap_or(target)
}

pub fn custom_image_name(program: &str) -> String {
    format!("{}{}", program, CUSTOM_EXT)
}

/// Card filenames compare without regard to case
#[inline]
pub fn same_file_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

pub fn contains_file(listing: &[String], name: &str) -> bool {
    listing.iter().any(|f| same_file_name(f, name))
}

/// Resolve each slot to the first of its targets that is a live session.
///
/// Slots where nothing resolves are left out. The target is returned as
/// configured, so its spelling decides the cache key, not the live name.
pub fn auto_map(slider_targets: &BTreeMap<usize, Vec<String>>, live_sessions: &[String]) -> BTreeMap<usize, String> {
    slider_targets
        .iter()
        .filter_map(|(&slot, targets)| {
            targets.iter().find_map(|target| {
                live_sessions
                    .iter()
                    .any(|live| live.eq_ignore_ascii_case(target))
                    .then(|| (slot, target.clone()))
            })
        })
        .collect()
}
