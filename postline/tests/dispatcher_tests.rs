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
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use postline::prelude::*;

use crate::setup::messages::*;
use crate::setup::*;

mod setup;

fn config() -> DispatcherConfig {
    DispatcherConfig::default()
}

fn acknowledging(max_retransmissions: u32) -> DispatcherConfig {
    DispatcherConfig {
        acknowledge: true,
        acknowledge_timeout_ms: 100,
        max_retransmissions,
        ..DispatcherConfig::default()
    }
}

fn outcome_slot() -> Arc<Mutex<Vec<ResponseOutcome>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn test_action_with_callback_gets_response() -> anyhow::Result<()> {
    initialize_tracing();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    let table = RoutingTable::builder()
        .component(SENDER)
        .action(RECEIVER, SET_POSITION, move |comm, handle, position: &Position| {
            info!(?position, "position requested");
            seen.lock().push(*position);
            let status = Status { code: 200, flags: 1 };
            comm.send_response(&handle, &status).unwrap();
        })
        .build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, config());

    let outcomes = outcome_slot();
    let sink = outcomes.clone();
    dispatcher.communication(SENDER).call_action_with_callback(
        RECEIVER,
        SET_POSITION,
        &Position { x: 3, y: -7 },
        move |comm, outcome| {
            assert_eq!(comm.component(), SENDER);
            sink.lock().push(outcome);
        },
    )?;
    assert_eq!(dispatcher.pending_responses(), 1);

    dispatcher.update();

    assert_eq!(*requests.lock(), vec![Position { x: 3, y: -7 }]);
    let outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_response());
    assert_eq!(
        outcomes[0].payload().and_then(|p| p.read::<Status>()),
        Some(Status { code: 200, flags: 1 })
    );
    assert_eq!(dispatcher.pending_responses(), 0);

    let stats = dispatcher.stats();
    assert_eq!(stats.packets_sent(), 2);
    assert_eq!(stats.packets_received(), 2);
    assert_eq!(stats.delivered(), 1);
    assert_eq!(stats.responses_matched(), 1);
    Ok(())
}

#[test]
fn test_negative_response_is_distinct_from_timeout() -> anyhow::Result<()> {
    initialize_tracing();
    let table = RoutingTable::builder()
        .component(SENDER)
        .raw_action(RECEIVER, GET_STATUS, |comm, handle, _payload| {
            comm.send_negative_response(&handle, &7u8).unwrap();
        })
        .build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, config());

    let outcomes = outcome_slot();
    let sink = outcomes.clone();
    dispatcher
        .communication(SENDER)
        .call_action_with_callback(RECEIVER, GET_STATUS, (), move |_, outcome| {
            sink.lock().push(outcome);
        })?;
    dispatcher.update();

    let outcomes = outcomes.lock();
    assert_eq!(
        *outcomes,
        vec![ResponseOutcome::NegativeResponse(SmartPayload::from(&7u8))]
    );
    assert!(!outcomes[0].is_timeout());
    Ok(())
}

#[test]
fn test_unanswered_call_times_out_once() -> anyhow::Result<()> {
    initialize_tracing();
    let table = RoutingTable::builder()
        .component(SENDER)
        .component(RECEIVER)
        .build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, config());

    let outcomes = outcome_slot();
    let sink = outcomes.clone();
    let start = Instant::now();
    dispatcher.communication_at(SENDER, start).call_action_with_callback(
        RECEIVER,
        SET_POSITION,
        &Position { x: 0, y: 0 },
        move |_, outcome| sink.lock().push(outcome),
    )?;

    dispatcher.update_at(start);
    assert_eq!(dispatcher.stats().not_available(), 1);

    dispatcher.update_at(start + Duration::from_millis(999));
    assert!(outcomes.lock().is_empty());

    dispatcher.update_at(start + Duration::from_millis(1_000));
    dispatcher.update_at(start + Duration::from_millis(5_000));
    assert_eq!(*outcomes.lock(), vec![ResponseOutcome::Timeout]);
    assert_eq!(dispatcher.stats().timeouts(), 1);
    assert_eq!(dispatcher.pending_responses(), 0);
    Ok(())
}

#[test]
fn test_events_reach_subscribers_only() -> anyhow::Result<()> {
    initialize_tracing();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let (at_receiver, at_observer) = (observed.clone(), observed.clone());
    let bystander_calls = Arc::new(AtomicUsize::new(0));
    let bystander = bystander_calls.clone();

    let table = RoutingTable::builder()
        .component(SENDER)
        .event(RECEIVER, POSITION_REACHED, move |comm, header, position: &Position| {
            assert_eq!(header.source(), SENDER);
            at_receiver.lock().push((comm.component(), *position));
        })
        .event(OBSERVER, POSITION_REACHED, move |comm, _, position: &Position| {
            at_observer.lock().push((comm.component(), *position));
        })
        .raw_action(BYSTANDER, POSITION_REACHED, move |_, _, _| {
            bystander.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, config());

    let reached = Position { x: 10, y: 20 };
    dispatcher
        .communication(SENDER)
        .publish_event(POSITION_REACHED, &reached)?;
    dispatcher.update();

    let mut observed = observed.lock().clone();
    observed.sort_by_key(|(component, _)| *component);
    assert_eq!(observed, vec![(RECEIVER, reached), (OBSERVER, reached)]);
    assert_eq!(bystander_calls.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.stats().delivered(), 1);
    Ok(())
}

#[test]
fn test_misrouted_packets_do_not_stop_the_loop() -> anyhow::Result<()> {
    initialize_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let table = RoutingTable::builder()
        .component(SENDER)
        .action(RECEIVER, COUNT, move |_, _, _: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, config());

    {
        let mut comm = dispatcher.communication(SENDER);
        comm.call_action(0x44, COUNT, &1u32)?;
        comm.call_action(RECEIVER, 0x7F, &1u32)?;
        comm.call_action(RECEIVER, COUNT, &1u16)?;
        comm.call_action(RECEIVER, COUNT, &1u32)?;
        assert_eq!(
            comm.call_action(BROADCAST, COUNT, &1u32),
            Err(CommunicationError::InvalidDestination)
        );
    }
    dispatcher.update();

    let stats = dispatcher.stats();
    assert_eq!(stats.component_not_available(), 1);
    assert_eq!(stats.not_available(), 1);
    assert_eq!(stats.payload_mismatches(), 1);
    assert_eq!(stats.delivered(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_packets_between_one_pair_arrive_in_order() -> anyhow::Result<()> {
    initialize_tracing();
    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = order.clone();
    let table = RoutingTable::builder()
        .component(SENDER)
        .action(RECEIVER, COUNT, move |_, _, value: &u32| sink.lock().push(*value))
        .build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, config());

    {
        let mut comm = dispatcher.communication(SENDER);
        for value in 0..50u32 {
            comm.call_action(RECEIVER, COUNT, &value)?;
        }
    }
    dispatcher.update();

    assert_eq!(*order.lock(), (0..50).collect::<Vec<u32>>());
    Ok(())
}

#[test]
fn test_callback_can_send_follow_up() -> anyhow::Result<()> {
    initialize_tracing();
    let events = Arc::new(AtomicUsize::new(0));
    let counter = events.clone();
    let table = RoutingTable::builder()
        .raw_action(RECEIVER, GET_STATUS, |comm, handle, _| {
            comm.send_response(&handle, ()).unwrap();
        })
        .raw_event(SENDER, POSITION_REACHED, move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, config());

    dispatcher
        .communication(SENDER)
        .call_action_with_callback(RECEIVER, GET_STATUS, (), |comm, outcome| {
            assert!(outcome.is_response());
            comm.publish_event(POSITION_REACHED, ()).unwrap();
        })?;
    dispatcher.update();

    assert_eq!(events.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_acknowledged_exchange_leaves_nothing_pending() -> anyhow::Result<()> {
    initialize_tracing();
    let table = RoutingTable::builder()
        .component(SENDER)
        .raw_action(RECEIVER, GET_STATUS, |comm, handle, _| {
            comm.send_response(&handle, &Status { code: 1, flags: 0 })
                .unwrap();
        })
        .build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, acknowledging(0));

    let outcomes = outcome_slot();
    let sink = outcomes.clone();
    dispatcher
        .communication(SENDER)
        .call_action_with_callback(RECEIVER, GET_STATUS, (), move |_, outcome| {
            sink.lock().push(outcome);
        })?;
    assert_eq!(dispatcher.pending_acknowledges(), 1);

    dispatcher.update();

    assert_eq!(outcomes.lock().len(), 1);
    assert_eq!(dispatcher.pending_acknowledges(), 0);
    assert_eq!(dispatcher.pending_responses(), 0);
    let stats = dispatcher.stats();
    assert_eq!(stats.acknowledges_sent(), 2);
    assert_eq!(stats.acknowledges_received(), 2);
    Ok(())
}

#[test]
fn test_unreachable_destination_with_acknowledge_times_out() -> anyhow::Result<()> {
    initialize_tracing();
    let table = RoutingTable::builder().component(SENDER).build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, acknowledging(0));

    let outcomes = outcome_slot();
    let sink = outcomes.clone();
    let start = Instant::now();
    dispatcher.communication_at(SENDER, start).call_action_with_callback(
        0x44,
        GET_STATUS,
        (),
        move |_, outcome| sink.lock().push(outcome),
    )?;

    dispatcher.update_at(start);
    assert!(outcomes.lock().is_empty());

    // Well before the response timeout, the missing acknowledge ends the call.
    dispatcher.update_at(start + Duration::from_millis(150));
    assert_eq!(*outcomes.lock(), vec![ResponseOutcome::Timeout]);
    let stats = dispatcher.stats();
    assert_eq!(stats.unacknowledged(), 1);
    assert_eq!(stats.timeouts(), 1);
    assert_eq!(dispatcher.pending_responses(), 0);
    assert_eq!(dispatcher.pending_acknowledges(), 0);
    Ok(())
}

#[test]
fn test_unacknowledged_packet_is_retransmitted() -> anyhow::Result<()> {
    initialize_tracing();
    let table = RoutingTable::builder().component(SENDER).build();
    let mut dispatcher = Dispatcher::with_config(LoopbackBackend::new(), table, acknowledging(2));

    let start = Instant::now();
    dispatcher
        .communication_at(SENDER, start)
        .call_action(0x44, COUNT, &1u32)?;

    dispatcher.update_at(start + Duration::from_millis(150));
    dispatcher.update_at(start + Duration::from_millis(300));
    assert_eq!(dispatcher.stats().retransmissions(), 2);
    assert_eq!(dispatcher.stats().unacknowledged(), 0);

    dispatcher.update_at(start + Duration::from_millis(450));
    assert_eq!(dispatcher.stats().unacknowledged(), 1);
    assert_eq!(dispatcher.stats().component_not_available(), 3);
    assert_eq!(dispatcher.pending_acknowledges(), 0);
    Ok(())
}

#[test]
fn test_two_nodes_on_one_bus() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = LoopbackBus::new();

    let table_a = RoutingTable::builder().component(SENDER).build();
    let table_b = RoutingTable::builder()
        .action(RECEIVER, SET_POSITION, |comm, handle, position: &Position| {
            let moved = Position {
                x: position.x + 1,
                y: position.y + 1,
            };
            comm.send_response(&handle, &moved).unwrap();
        })
        .build();
    let mut node_a = Dispatcher::with_config(bus.endpoint(), table_a, config());
    let mut node_b = Dispatcher::with_config(bus.endpoint(), table_b, config());

    let outcomes = outcome_slot();
    let sink = outcomes.clone();
    node_a.communication(SENDER).call_action_with_callback(
        RECEIVER,
        SET_POSITION,
        &Position { x: 1, y: 2 },
        move |_, outcome| sink.lock().push(outcome),
    )?;

    node_b.update();
    node_a.update();

    let outcomes = outcomes.lock();
    assert_eq!(
        outcomes[0].payload().and_then(|p| p.read::<Position>()),
        Some(Position { x: 2, y: 3 })
    );
    assert_eq!(node_a.stats().component_not_available(), 1);
    assert_eq!(node_b.stats().delivered(), 1);
    Ok(())
}
