/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
#![allow(dead_code)]

use postline::prelude::*;

pub const SENDER: ComponentId = 0x01;
pub const RECEIVER: ComponentId = 0x02;
pub const OBSERVER: ComponentId = 0x03;
pub const BYSTANDER: ComponentId = 0x04;

pub const SET_POSITION: Identifier = 0x10;
pub const GET_STATUS: Identifier = 0x11;
pub const COUNT: Identifier = 0x12;

pub const POSITION_REACHED: Identifier = 0x20;

#[postline_message]
#[derive(PartialEq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[postline_message]
#[derive(PartialEq)]
pub struct Status {
    pub code: u16,
    pub flags: u16,
}
