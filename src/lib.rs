/*
 *  lib.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
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

//! Drives small monochrome displays and an SD card hanging off a deej
//! controller. Everything shares one serial link; [`bus`] serializes
//! access to it, [`bitmap`] turns icons into display images and
//! [`controller`] keeps each display in step with the mapping.

pub mod automap;
pub mod bitmap;
pub mod bus;
pub mod config;
pub mod controller;
pub mod func_timer;
pub mod mapping;
pub mod modules;
pub mod sessions;

pub use bus::{BusError, CommandBus, Transport};
pub use config::Config;
pub use controller::{DisplayController, RefreshReport, SlotState};
