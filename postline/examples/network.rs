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
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use postline::config::CONFIG;
use postline::prelude::*;

const PINGER: ComponentId = 0x01;
const PONGER: ComponentId = 0x02;

const PING: Identifier = 0x10;
const PONGED: Identifier = 0x20;

/// A server and two clients on localhost. The pinger calls the ponger a few
/// times through the server; the ponger answers each call and publishes an
/// event the pinger subscribes to.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = CONFIG.tcpip.clone();
    let server = start_server(config.clone()).await?;

    let mut pinger = Client::new(Handle::current(), config.clone());
    pinger.connect()?;
    pinger.add_receiver_id(PINGER)?;
    let pinger_table = RoutingTable::builder()
        .event(PINGER, PONGED, |_, header, count: &u32| {
            info!(source = header.source(), count, "Ponged");
        })
        .build();
    let mut pinger = Dispatcher::new(pinger, pinger_table);

    let mut ponger = Client::new(Handle::current(), config);
    ponger.connect()?;
    ponger.add_receiver_id(PONGER)?;
    let table = RoutingTable::builder()
        .action(PONGER, PING, |comm, handle, count: &u32| {
            let _ = comm.send_response(&handle, &(count + 1));
            let _ = comm.publish_event(PONGED, count);
        })
        .build();
    let mut ponger = Dispatcher::new(ponger, table);

    while server.registered_components().len() < 2 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let answers = Arc::new(Mutex::new(Vec::new()));
    for count in 0..5u32 {
        let answers = Arc::clone(&answers);
        pinger
            .communication(PINGER)
            .call_action_with_callback(PONGER, PING, &count, move |_, outcome| {
                answers.lock().push(outcome.payload().and_then(|p| p.read::<u32>()));
            })?;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(10));
    while pinger.pending_responses() > 0 {
        ticker.tick().await;
        ponger.update();
        pinger.update();
    }

    info!(answers = ?answers.lock(), forwarded = server.stats.frames_forwarded(), "Done");
    server.stop();
    Ok(())
}
