// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use serial_test::serial;

use crate::integration_tests::common::{TestClient, start_open_broker};

#[tokio::test]
async fn trig_reaches_matching_subscriber() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut publisher, _) = TestClient::register(addr, "pub1", "gateway").await?;
    let (mut subscriber, _) = TestClient::register(addr, "sub1", "display").await?;

    subscriber.send_line("sub temp").await?;
    // give the subscription a beat to land before publishing
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.send_line("trig temp").await?;
    let frame = subscriber.read_line().await?;
    assert_eq!(frame, "trig temp@pub1#gateway");

    // the publisher itself never receives its own event
    publisher.expect_silence().await?;
    Ok(())
}

#[tokio::test]
async fn delivery_frame_is_a_valid_trig_command() -> Result<()> {
    use riot_server_rs::proto::command::Command;

    let (_server, addr) = start_open_broker().await?;

    let (mut publisher, _) = TestClient::register(addr, "cam", "thermal").await?;
    let (mut subscriber, _) = TestClient::register(addr, "watch", "display").await?;

    subscriber.send_line("sub alert").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    publisher.send_line("trig alert").await?;

    let frame = subscriber.read_line().await?;
    let Command::Trig { xeids } = Command::parse(&frame)? else {
        panic!("delivery frame must reparse as trig: {frame:?}");
    };
    assert_eq!(xeids.len(), 1);
    assert_eq!(xeids[0].eid, "alert");
    assert_eq!(xeids[0].dname, "cam");
    assert_eq!(xeids[0].dtype, "thermal");
    Ok(())
}

#[tokio::test]
async fn trig_device_filter_selects_receivers() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut publisher, _) = TestClient::register(addr, "pub1", "gateway").await?;
    let (mut cam_a, _) = TestClient::register(addr, "camA", "cam").await?;
    let (mut cam_b, _) = TestClient::register(addr, "camB", "cam").await?;

    cam_a.send_line("sub snap").await?;
    cam_b.send_line("sub snap").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the trigger's @dname narrows the audience to camA
    publisher.send_line("trig snap@camA").await?;
    let frame = cam_a.read_line().await?;
    assert_eq!(frame, "trig snap@pub1#gateway");
    cam_b.expect_silence().await?;
    Ok(())
}

#[tokio::test]
async fn subscription_filters_on_publisher_identity() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut trusted, _) = TestClient::register(addr, "trusted", "gateway").await?;
    let (mut other, _) = TestClient::register(addr, "other", "gateway").await?;
    let (mut subscriber, _) = TestClient::register(addr, "sub1", "display").await?;

    // only events published by "trusted" are interesting
    subscriber.send_line("sub @trusted").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    other.send_line("trig temp").await?;
    subscriber.expect_silence().await?;

    trusted.send_line("trig temp").await?;
    let frame = subscriber.read_line().await?;
    assert_eq!(frame, "trig temp@trusted#gateway");
    Ok(())
}

#[tokio::test]
async fn negsub_excludes_matching_events() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut publisher, _) = TestClient::register(addr, "pub1", "gateway").await?;
    let (mut subscriber, _) = TestClient::register(addr, "sub1", "display").await?;

    subscriber.send_line("sub @").await?;
    subscriber.send_line("negsub noisy.*").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.send_line("trig noisy1").await?;
    subscriber.expect_silence().await?;

    publisher.send_line("trig quiet1").await?;
    let frame = subscriber.read_line().await?;
    assert_eq!(frame, "trig quiet1@pub1#gateway");

    // dropping the negative subscription lets the events through again
    subscriber.send_line("unnegsub *").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    publisher.send_line("trig noisy2").await?;
    let frame = subscriber.read_line().await?;
    assert_eq!(frame, "trig noisy2@pub1#gateway");
    Ok(())
}

#[tokio::test]
async fn pause_suppresses_and_continue_resumes() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut publisher, _) = TestClient::register(addr, "pub1", "gateway").await?;
    let (mut subscriber, _) = TestClient::register(addr, "sub1", "display").await?;

    subscriber.send_line("sub temp").await?;
    subscriber.send_line("pause").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.send_line("trig temp").await?;
    subscriber.expect_silence().await?;

    subscriber.send_line("continue").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    publisher.send_line("trig temp").await?;
    let frame = subscriber.read_line().await?;
    assert_eq!(frame, "trig temp@pub1#gateway");
    Ok(())
}

#[tokio::test]
async fn unsub_star_clears_subscriptions() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut publisher, _) = TestClient::register(addr, "pub1", "gateway").await?;
    let (mut subscriber, _) = TestClient::register(addr, "sub1", "display").await?;

    subscriber.send_line("sub temp hum").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    publisher.send_line("trig temp").await?;
    subscriber.read_line().await?;

    subscriber.send_line("unsub *").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    publisher.send_line("trig temp hum").await?;
    subscriber.expect_silence().await?;
    Ok(())
}

#[tokio::test]
async fn unsub_by_id_removes_only_that_subscription() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut publisher, _) = TestClient::register(addr, "pub1", "gateway").await?;
    let (mut subscriber, _) = TestClient::register(addr, "sub1", "display").await?;

    // subIDs count from 1 in arrival order: temp=1, hum=2
    subscriber.send_line("sub temp").await?;
    subscriber.send_line("sub hum").await?;
    subscriber.send_line("unsub 1").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.send_line("trig temp").await?;
    subscriber.expect_silence().await?;

    publisher.send_line("trig hum").await?;
    let frame = subscriber.read_line().await?;
    assert_eq!(frame, "trig hum@pub1#gateway");
    Ok(())
}

#[tokio::test]
#[serial]
async fn minperiod_rate_limits_deliveries() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut publisher, _) = TestClient::register(addr, "pub1", "gateway").await?;
    let (mut subscriber, _) = TestClient::register(addr, "sub1", "display").await?;

    subscriber.send_line("sub temp minperiod=5s").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.send_line("trig temp").await?;
    let frame = subscriber.read_line().await?;
    assert_eq!(frame, "trig temp@pub1#gateway");

    // inside the minimum period the event is dropped, not queued
    publisher.send_line("trig temp").await?;
    subscriber.expect_silence().await?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn deliveries_preserve_publisher_fifo() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut publisher, _) = TestClient::register(addr, "pub1", "gateway").await?;
    let (mut subscriber, _) = TestClient::register(addr, "sub1", "display").await?;

    subscriber.send_line("sub e.*").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for i in 0..10 {
        publisher.send_line(&format!("trig e{i}")).await?;
    }
    for i in 0..10 {
        let frame = subscriber.read_line().await?;
        assert_eq!(frame, format!("trig e{i}@pub1#gateway"));
    }
    Ok(())
}

#[tokio::test]
async fn p2p_commands_are_accepted_quietly() -> Result<()> {
    let (_server, addr) = start_open_broker().await?;

    let (mut client, _) = TestClient::register(addr, "dev1", "sensor").await?;
    client.send_line("p2p-accept maxconnections=4").await?;
    client.send_line("1,2>n").await?;
    client.send_line("p2p-disconnect *").await?;
    client.send_line("p2p-stop-accept").await?;
    // none of these produce output; a trailing bad line proves the session
    // is still alive and in order
    client.send_line("nonsense").await?;
    let reply = client.read_line().await?;
    assert_eq!(reply, "ERROR syntax error: not a valid command");
    Ok(())
}
