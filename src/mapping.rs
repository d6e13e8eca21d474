/*
 *  mapping.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display and slider mappings as read from the configuration
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

use log::warn;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Mapping value selecting the live session image
pub const AUTO: &str = "auto";

/// What a display slot should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayTarget {
    Off,
    /// Follow the slider mapping and show the live session's icon
    Auto,
    /// A file already on the card
    File(String),
}

impl DisplayTarget {
    /// Interpret one mapping value. Anything that is not a string or null
    /// falls back to `Off` with a warning.
    pub fn from_value(slot: usize, value: &Value) -> Self {
        match value {
            Value::Null => DisplayTarget::Off,
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    DisplayTarget::Off
                } else if s.eq_ignore_ascii_case(AUTO) {
                    DisplayTarget::Auto
                } else {
                    DisplayTarget::File(s.to_string())
                }
            }
            other => {
                warn!("display_mapping[{}]: unsupported value {:?}, using off", slot, other);
                DisplayTarget::Off
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DisplayTarget::Off => Value::Null,
            DisplayTarget::Auto => Value::String(AUTO.to_string()),
            DisplayTarget::File(name) => Value::String(name.clone()),
        }
    }
}

impl fmt::Display for DisplayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayTarget::Off => write!(f, "off"),
            DisplayTarget::Auto => write!(f, "{}", AUTO),
            DisplayTarget::File(name) => write!(f, "{}", name),
        }
    }
}

/// Slot index to display target. Replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct DisplayMapping(BTreeMap<usize, DisplayTarget>);

impl From<Value> for DisplayMapping {
    fn from(value: Value) -> Self {
        Self::from_yaml(&value)
    }
}

impl From<DisplayMapping> for Value {
    fn from(mapping: DisplayMapping) -> Self {
        mapping.to_yaml()
    }
}

impl Default for DisplayMapping {
    fn default() -> Self {
        Self(BTreeMap::from([(0, DisplayTarget::Off)]))
    }
}

impl DisplayMapping {
    pub fn new(slots: BTreeMap<usize, DisplayTarget>) -> Self {
        Self(slots)
    }

    /// Build from the raw YAML mapping. Bad keys are skipped, bad values
    /// become `Off`, a non-mapping yields the default.
    pub fn from_yaml(value: &Value) -> Self {
        let Value::Mapping(map) = value else {
            if !value.is_null() {
                warn!("display_mapping is not a mapping, using default");
            }
            return Self::default();
        };
        let slots = map
            .iter()
            .filter_map(|(k, v)| {
                let Some(slot) = slot_index(k) else {
                    warn!("display_mapping: ignoring key {:?}", k);
                    return None;
                };
                Some((slot, DisplayTarget::from_value(slot, v)))
            })
            .collect();
        Self(slots)
    }

    pub fn to_yaml(&self) -> Value {
        Value::Mapping(
            self.0
                .iter()
                .map(|(slot, target)| (Value::from(*slot as u64), target.to_value()))
                .collect(),
        )
    }

    pub fn get(&self, slot: usize) -> Option<&DisplayTarget> {
        self.0.get(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &DisplayTarget)> {
        self.0.iter().map(|(slot, target)| (*slot, target))
    }

    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Slot index to ordered target names, as deej's `slider_mapping`:
/// each value is one name or a list of names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct SliderMapping(BTreeMap<usize, Vec<String>>);

impl SliderMapping {
    pub fn new(targets: BTreeMap<usize, Vec<String>>) -> Self {
        Self(targets)
    }

    pub fn targets(&self) -> &BTreeMap<usize, Vec<String>> {
        &self.0
    }
}

impl From<Value> for SliderMapping {
    fn from(value: Value) -> Self {
        Self(slider_targets_from_yaml(&value))
    }
}

impl From<SliderMapping> for Value {
    fn from(mapping: SliderMapping) -> Self {
        Value::Mapping(
            mapping
                .0
                .into_iter()
                .map(|(slot, names)| {
                    let names = names.into_iter().map(Value::String).collect();
                    (Value::from(slot as u64), Value::Sequence(names))
                })
                .collect(),
        )
    }
}

pub fn slider_targets_from_yaml(value: &Value) -> BTreeMap<usize, Vec<String>> {
    let Value::Mapping(map) = value else {
        if !value.is_null() {
            warn!("slider_mapping is not a mapping, ignoring");
        }
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let Some(slot) = slot_index(k) else {
                warn!("slider_mapping: ignoring key {:?}", k);
                return None;
            };
            let names = match v {
                Value::String(s) => vec![s.clone()],
                Value::Sequence(items) => items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.clone()),
                        other => {
                            warn!("slider_mapping[{}]: ignoring {:?}", slot, other);
                            None
                        }
                    })
                    .collect(),
                Value::Null => Vec::new(),
                other => {
                    warn!("slider_mapping[{}]: unsupported value {:?}", slot, other);
                    Vec::new()
                }
            };
            Some((slot, names))
        })
        .collect()
}

fn slot_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
