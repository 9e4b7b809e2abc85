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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use postline::prelude::*;

const DRIVER: ComponentId = 0x01;
const ODOMETRY: ComponentId = 0x02;
const LOGGER: ComponentId = 0x03;

const SET_SPEED: Identifier = 0x10;
const SPEED_CHANGED: Identifier = 0x20;

#[postline_message]
struct Speed {
    left: i16,
    right: i16,
}

/// Two nodes sharing an in-process bus: the driver asks odometry to change
/// speed, odometry answers and publishes an event the logger subscribes to.
fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bus = LoopbackBus::new();

    let controller = RoutingTable::builder()
        .component(DRIVER)
        .event(LOGGER, SPEED_CHANGED, |_, header, speed: &Speed| {
            info!(source = header.source(), ?speed, "Speed changed");
        })
        .build();
    let drive = RoutingTable::builder()
        .action(ODOMETRY, SET_SPEED, |comm, handle, speed: &Speed| {
            if speed.left.abs() > 1000 || speed.right.abs() > 1000 {
                let _ = comm.send_negative_response(&handle, ());
                return;
            }
            let _ = comm.send_response(&handle, speed);
            let _ = comm.publish_event(SPEED_CHANGED, speed);
        })
        .build();

    let mut controller = Dispatcher::new(bus.endpoint(), controller);
    let mut drive = Dispatcher::new(bus.endpoint(), drive);

    let done = Arc::new(AtomicBool::new(false));
    for speed in [Speed { left: 200, right: 180 }, Speed { left: 5000, right: 0 }] {
        let done = Arc::clone(&done);
        controller.communication(DRIVER).call_action_with_callback(
            ODOMETRY,
            SET_SPEED,
            &speed,
            move |_, outcome| {
                match outcome {
                    ResponseOutcome::Response(payload) => {
                        info!(speed = ?payload.read::<Speed>(), "Speed accepted");
                    }
                    ResponseOutcome::NegativeResponse(_) => warn!(?speed, "Speed rejected"),
                    ResponseOutcome::Timeout => warn!(?speed, "Odometry did not answer"),
                }
                done.store(true, Ordering::Release);
            },
        )?;
    }

    while controller.pending_responses() > 0 {
        drive.update();
        controller.update();
    }

    info!(
        sent = controller.stats().packets_sent(),
        matched = controller.stats().responses_matched(),
        answered = done.load(Ordering::Acquire),
        "Done"
    );
    Ok(())
}
