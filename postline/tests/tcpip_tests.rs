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

use postline::prelude::*;

use crate::setup::messages::*;
use crate::setup::*;

mod setup;

type Node = Dispatcher<Client, RoutingTable>;

const READY: Duration = Duration::from_secs(5);

fn tcpip_config(base_port: u16) -> TcpIpConfig {
    TcpIpConfig {
        base_port,
        reconnect_interval_ms: 50,
        ..TcpIpConfig::default()
    }
}

fn node(
    config: &TcpIpConfig,
    components: &[ComponentId],
    table: RoutingTable,
) -> anyhow::Result<Node> {
    let mut client = Client::new(Handle::current(), config.clone());
    client.connect()?;
    for component in components {
        client.add_receiver_id(*component)?;
    }
    Ok(Dispatcher::with_config(client, table, DispatcherConfig::default()))
}

/// Waits until the server routes every component and each receiver has been
/// reached by the server.
async fn wait_ready(server: &ServerHandle, nodes: &[&Node], expected: &[ComponentId]) -> bool {
    pump_until(
        READY,
        || {},
        || {
            let routed = server.registered_components() == expected;
            routed
                && nodes.iter().all(|node| {
                    let client = node.backend();
                    client.registered_ids().iter().all(|id| {
                        client
                            .receiver(*id)
                            .is_some_and(|receiver| receiver.is_connected())
                    })
                })
        },
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_action_and_response_cross_clients() -> anyhow::Result<()> {
    initialize_tracing();
    let config = tcpip_config(47100);
    let server = start_server(config.clone()).await?;

    let mut node_a = node(&config, &[SENDER], RoutingTable::builder().component(SENDER).build())?;
    let table_b = RoutingTable::builder()
        .action(RECEIVER, SET_POSITION, |comm, handle, position: &Position| {
            info!(?position, "moving");
            comm.send_response(&handle, &Status { code: 200, flags: 0 })
                .unwrap();
        })
        .build();
    let mut node_b = node(&config, &[RECEIVER], table_b)?;

    assert!(wait_ready(&server, &[&node_a, &node_b], &[SENDER, RECEIVER]).await);

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    node_a.communication(SENDER).call_action_with_callback(
        RECEIVER,
        SET_POSITION,
        &Position { x: 5, y: 6 },
        move |_, outcome| sink.lock().push(outcome),
    )?;

    let answered = pump_until(
        READY,
        || {
            node_a.update();
            node_b.update();
        },
        || !outcomes.lock().is_empty(),
    )
    .await;
    assert!(answered);

    let outcome = outcomes.lock()[0].clone();
    assert_eq!(
        outcome.payload().and_then(|p| p.read::<Status>()),
        Some(Status { code: 200, flags: 0 })
    );
    assert_eq!(server.stats.registrations(), 2);
    assert!(pump_until(READY, || {}, || server.stats.frames_forwarded() == 2).await);

    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_reach_every_client_in_order() -> anyhow::Result<()> {
    initialize_tracing();
    let config = tcpip_config(47300);
    let server = start_server(config.clone()).await?;

    let local = Arc::new(Mutex::new(Vec::new()));
    let remote = Arc::new(Mutex::new(Vec::new()));
    let (local_sink, remote_sink) = (local.clone(), remote.clone());

    let table_a = RoutingTable::builder()
        .component(SENDER)
        .event(OBSERVER, POSITION_REACHED, move |_, _, position: &Position| {
            local_sink.lock().push(position.x);
        })
        .build();
    let table_b = RoutingTable::builder()
        .event(RECEIVER, POSITION_REACHED, move |_, header, position: &Position| {
            assert_eq!(header.source(), SENDER);
            remote_sink.lock().push(position.x);
        })
        .build();
    let mut node_a = node(&config, &[SENDER, OBSERVER], table_a)?;
    let mut node_b = node(&config, &[RECEIVER], table_b)?;

    assert!(wait_ready(&server, &[&node_a, &node_b], &[SENDER, RECEIVER, OBSERVER]).await);

    {
        let mut comm = node_a.communication(SENDER);
        for x in 0..20 {
            comm.publish_event(POSITION_REACHED, &Position { x, y: 0 })?;
        }
    }

    let expected: Vec<i32> = (0..20).collect();
    let received = pump_until(
        READY,
        || {
            node_a.update();
            node_b.update();
        },
        || local.lock().len() == expected.len() && remote.lock().len() == expected.len(),
    )
    .await;
    assert!(received);
    assert_eq!(*local.lock(), expected);
    assert_eq!(*remote.lock(), expected);

    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrouted_destination_is_counted() -> anyhow::Result<()> {
    initialize_tracing();
    let config = tcpip_config(47500);
    let server = start_server(config.clone()).await?;

    let mut node_a = node(&config, &[SENDER], RoutingTable::builder().component(SENDER).build())?;
    assert!(node_a.backend_mut().add_receiver_id(BROADCAST).is_err());
    node_a.backend_mut().add_receiver_id(SENDER)?;
    assert_eq!(node_a.backend().registered_ids(), vec![SENDER]);

    assert!(wait_ready(&server, &[&node_a], &[SENDER]).await);

    node_a.communication(SENDER).call_action(0x30, COUNT, &1u32)?;
    let counted = pump_until(
        READY,
        || node_a.update(),
        || server.stats.undeliverable() == 1,
    )
    .await;
    assert!(counted);
    assert_eq!(server.stats.frames_forwarded(), 0);

    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_payload_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let config = TcpIpConfig {
        max_payload_size: 16,
        ..tcpip_config(47600)
    };
    let mut node_a = node(&config, &[], RoutingTable::builder().component(SENDER).build())?;

    let result = node_a
        .communication(SENDER)
        .call_action(RECEIVER, COUNT, &[0u8; 32]);
    assert_eq!(
        result,
        Err(CommunicationError::PayloadTooLarge { size: 32, max: 16 })
    );
    assert_eq!(node_a.stats().send_failures(), 1);
    assert_eq!(node_a.stats().packets_sent(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_receiver_stops_after_shutdown_command() -> anyhow::Result<()> {
    initialize_tracing();
    let config = tcpip_config(47700);
    let server = start_server(config.clone()).await?;

    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = values.clone();
    let mut node_a = node(&config, &[SENDER], RoutingTable::builder().component(SENDER).build())?;
    let table_b = RoutingTable::builder()
        .action(RECEIVER, COUNT, move |_, _, value: &u32| sink.lock().push(*value))
        .build();
    let mut node_b = node(&config, &[RECEIVER], table_b)?;

    assert!(wait_ready(&server, &[&node_a, &node_b], &[SENDER, RECEIVER]).await);

    node_a.communication(SENDER).call_action(RECEIVER, COUNT, &1u32)?;
    assert!(
        pump_until(
            READY,
            || {
                node_a.update();
                node_b.update();
            },
            || values.lock().len() == 1,
        )
        .await
    );

    node_b
        .backend()
        .receiver(RECEIVER)
        .ok_or_else(|| anyhow::anyhow!("receiver missing"))?
        .shutdown_command();

    // The message in flight is still completed before the receiver stops.
    node_a.communication(SENDER).call_action(RECEIVER, COUNT, &2u32)?;
    assert!(
        pump_until(
            READY,
            || {
                node_a.update();
                node_b.update();
            },
            || values.lock().len() == 2,
        )
        .await
    );
    let receiver = node_b
        .backend()
        .receiver(RECEIVER)
        .ok_or_else(|| anyhow::anyhow!("receiver missing"))?;
    assert!(pump_until(READY, || {}, || receiver.is_closed()).await);

    node_a.communication(SENDER).call_action(RECEIVER, COUNT, &3u32)?;
    pump_until(
        Duration::from_millis(300),
        || {
            node_a.update();
            node_b.update();
        },
        || false,
    )
    .await;
    assert_eq!(*values.lock(), vec![1, 2]);

    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_connects_once_server_appears() -> anyhow::Result<()> {
    initialize_tracing();
    let config = tcpip_config(47900);

    let node_a = node(&config, &[SENDER], RoutingTable::builder().component(SENDER).build())?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!node_a.backend().is_connected());

    let server = start_server(config.clone()).await?;
    assert!(wait_ready(&server, &[&node_a], &[SENDER]).await);
    assert!(node_a.backend().is_connected());
    assert_eq!(node_a.backend().stats().connections(), 1);

    server.stop();
    Ok(())
}

/// Binds a new server on a port a stopped server may still be releasing.
async fn restart_server(config: &TcpIpConfig) -> anyhow::Result<ServerHandle> {
    for _ in 0..40 {
        match start_server(config.clone()).await {
            Ok(server) => return Ok(server),
            Err(e) => {
                info!(error = %e, "server port still busy");
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
    }
    Ok(start_server(config.clone()).await?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_receiver_accepts_again_after_server_restart() -> anyhow::Result<()> {
    initialize_tracing();
    let config = tcpip_config(48100);
    let server = start_server(config.clone()).await?;

    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = values.clone();
    let mut node_a = node(&config, &[SENDER], RoutingTable::builder().component(SENDER).build())?;
    let table_b = RoutingTable::builder()
        .action(RECEIVER, COUNT, move |_, _, value: &u32| sink.lock().push(*value))
        .build();
    let mut node_b = node(&config, &[RECEIVER], table_b)?;

    assert!(wait_ready(&server, &[&node_a, &node_b], &[SENDER, RECEIVER]).await);

    server.stop();
    let stats = node_b.backend().stats();
    let dropped = pump_until(
        READY,
        || {},
        || {
            let receiver = node_b.backend().receiver(RECEIVER);
            receiver.is_some_and(|receiver| !receiver.is_connected()) && stats.disconnects() == 1
        },
    )
    .await;
    assert!(dropped);
    assert_eq!(stats.read_errors(), 0);
    assert!(node_b
        .backend()
        .receiver(RECEIVER)
        .is_some_and(|receiver| !receiver.is_closed()));

    let server = restart_server(&config).await?;
    assert!(wait_ready(&server, &[&node_a, &node_b], &[SENDER, RECEIVER]).await);

    node_a.communication(SENDER).call_action(RECEIVER, COUNT, &9u32)?;
    let delivered = pump_until(
        READY,
        || {
            node_a.update();
            node_b.update();
        },
        || !values.lock().is_empty(),
    )
    .await;
    assert!(delivered);
    assert_eq!(*values.lock(), vec![9]);
    assert_eq!(stats.disconnects(), 1);

    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_shutdown_closes_receivers() -> anyhow::Result<()> {
    initialize_tracing();
    let config = tcpip_config(48300);
    let server = start_server(config.clone()).await?;

    let table = RoutingTable::builder()
        .component(SENDER)
        .component(OBSERVER)
        .build();
    let node_a = node(&config, &[SENDER, OBSERVER], table)?;
    assert!(wait_ready(&server, &[&node_a], &[SENDER, OBSERVER]).await);

    let client = node_a.backend();
    client.shutdown();

    let closed = pump_until(
        READY,
        || {},
        || {
            !client.is_connected()
                && client
                    .registered_ids()
                    .iter()
                    .all(|id| client.receiver(*id).is_some_and(|receiver| receiver.is_closed()))
        },
    )
    .await;
    assert!(closed);
    assert!(pump_until(READY, || {}, || server.registered_components().is_empty()).await);

    server.stop();
    Ok(())
}
