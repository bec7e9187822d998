// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use riot_server_rs::proto::{
    command::{Command, DEFAULT_P2P_MAX_CONNECTIONS},
    xeid::XeidMatcher,
};

fn parse_ok(line: &str) -> Command {
    Command::parse(line).unwrap_or_else(|e| panic!("{line:?} should parse: {e}"))
}

fn parse_err(line: &str) -> String {
    Command::parse(line)
        .err()
        .unwrap_or_else(|| panic!("{line:?} should fail"))
        .to_string()
}

#[test]
fn empty_line_is_empty_command() {
    assert_eq!(parse_ok(""), Command::Empty);
    assert_eq!(parse_ok("   "), Command::Empty);
}

#[test]
fn unknown_word_is_not_a_command() {
    assert_eq!(parse_err("publish foo"), "syntax error: not a valid command");
}

#[test]
fn trig_collects_xeids() {
    let Command::Trig { xeids } = parse_ok("trig foo bar@cam") else {
        panic!("expected trig");
    };
    assert_eq!(xeids.len(), 2);
    assert_eq!(xeids[0].eid, "foo");
    assert_eq!(xeids[1].dname, "cam");
}

#[test]
fn trig_with_leading_empty_eid() {
    // extra whitespace between tokens is insignificant
    let Command::Trig { xeids } = parse_ok("trig  @cam#thermal") else {
        panic!("expected trig");
    };
    assert_eq!(xeids.len(), 1);
    assert_eq!(xeids[0].eid, "");
    assert_eq!(xeids[0].dname, "cam");
    assert_eq!(xeids[0].dtype, "thermal");
}

#[test]
fn trig_reports_invalid_xeid() {
    let msg = parse_err("trig a#b");
    assert!(
        msg.starts_with("syntax error: invalid xeid : "),
        "unexpected message: {msg}"
    );
}

#[test]
fn sub_with_minperiod() {
    let Command::Sub { xeids, minperiod } = parse_ok("sub foo@cam minperiod=500ms")
    else {
        panic!("expected sub");
    };
    assert_eq!(xeids.len(), 1);
    assert_eq!(xeids[0].eid, "foo");
    assert_eq!(xeids[0].dname, "cam");
    assert_eq!(xeids[0].dtype, "");
    assert_eq!(minperiod, Some(500));
}

#[test]
fn sub_minperiod_defaults_to_absent() {
    let Command::Sub { minperiod, .. } = parse_ok("sub foo") else {
        panic!("expected sub");
    };
    assert_eq!(minperiod, None);

    // explicit inf also means "no minimum period"
    let Command::Sub { minperiod, .. } = parse_ok("sub foo minperiod=inf") else {
        panic!("expected sub");
    };
    assert_eq!(minperiod, None);
}

#[test]
fn sub_rejects_bad_arguments() {
    assert_eq!(
        parse_err("sub foo minperiod=fast"),
        "syntax error: not a valid argument : fast"
    );
    assert_eq!(
        parse_err("sub foo minperiod="),
        "syntax error: not a valid argument : minperiod"
    );
    assert_eq!(
        parse_err("sub a#b"),
        "syntax error: not a valid argument : a#b"
    );
}

#[test]
fn unsub_id_lists() {
    let Command::Unsub { ids, all } = parse_ok("unsub 1 2 3") else {
        panic!("expected unsub");
    };
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(!all);

    let Command::Unsub { ids, all } = parse_ok("unsub *") else {
        panic!("expected unsub");
    };
    assert!(ids.is_empty());
    assert!(all);

    // a star after explicit IDs still means everything
    let Command::Unsub { ids, all } = parse_ok("unsub 7 *") else {
        panic!("expected unsub");
    };
    assert_eq!(ids, vec![7]);
    assert!(all);
}

#[test]
fn unsub_rejects_junk() {
    assert_eq!(
        parse_err("unsub seven"),
        "syntax error: not a valid argument : seven"
    );
    // the star stops the scan, so anything after it is trailing junk
    assert_eq!(parse_err("unsub * 3"), "syntax error: too many arguments");
}

#[test]
fn negsub_and_unnegsub() {
    let Command::Negsub { xeids } = parse_ok("negsub alert.*@cam") else {
        panic!("expected negsub");
    };
    assert_eq!(xeids.len(), 1);

    let Command::Unnegsub { ids, all } = parse_ok("unnegsub 2") else {
        panic!("expected unnegsub");
    };
    assert_eq!(ids, vec![2]);
    assert!(!all);
}

#[test]
fn pause_and_continue_take_no_arguments() {
    assert_eq!(parse_ok("pause"), Command::Pause);
    assert_eq!(parse_ok("continue"), Command::Continue);
    assert_eq!(parse_err("pause now"), "syntax error: too many arguments");
}

#[test]
fn p2p_accept_defaults_and_overrides() {
    let Command::P2pAccept { max_connections } = parse_ok("p2p-accept") else {
        panic!("expected p2p-accept");
    };
    assert_eq!(max_connections, DEFAULT_P2P_MAX_CONNECTIONS);

    let Command::P2pAccept { max_connections } =
        parse_ok("p2p-accept maxconnections=5")
    else {
        panic!("expected p2p-accept");
    };
    assert_eq!(max_connections, 5);

    assert_eq!(
        parse_err("p2p-accept maxconnections=soon"),
        "syntax error: not a valid argument : soon"
    );
    assert_eq!(
        parse_err("p2p-accept maxcons=5"),
        "syntax error: not a valid argument : maxcons"
    );
    assert_eq!(parse_ok("p2p-stop-accept"), Command::P2pStopAccept);
}

#[test]
fn p2p_send_selector() {
    let Command::P2pSend {
        recipients,
        all,
        size,
        until_newline,
    } = parse_ok("1,2,3>n")
    else {
        panic!("expected p2p-send");
    };
    assert_eq!(recipients, vec![1, 2, 3]);
    assert!(!all);
    assert_eq!(size, 0);
    assert!(until_newline);

    let Command::P2pSend {
        recipients,
        all,
        size,
        until_newline,
    } = parse_ok("*>1024")
    else {
        panic!("expected p2p-send");
    };
    assert!(recipients.is_empty());
    assert!(all);
    assert_eq!(size, 1024);
    assert!(!until_newline);

    assert_eq!(parse_err("1,2>x"), "syntax error: not a valid command");
    assert_eq!(parse_err("1,2>8 tail"), "syntax error: too many arguments");
}

#[test]
fn p2p_disconnect_lists() {
    let Command::P2pDisconnect { ids, all } = parse_ok("p2p-disconnect 4 5") else {
        panic!("expected p2p-disconnect");
    };
    assert_eq!(ids, vec![4, 5]);
    assert!(!all);

    let Command::P2pDisconnect { all, .. } = parse_ok("p2p-disconnect *") else {
        panic!("expected p2p-disconnect");
    };
    assert!(all);
}

#[test]
fn canonical_form_round_trips() {
    let lines = [
        "trig foo bar@cam#t",
        "trig @cam#thermal",
        "sub foo@cam minperiod=500",
        "sub a b c",
        "unsub 1 2 3",
        "unsub *",
        "negsub alert.*",
        "unnegsub 4 *",
        "pause",
        "continue",
        "p2p-accept maxconnections=12",
        "p2p-stop-accept",
        "p2p-disconnect 9",
        "1,2,3>n",
        "*>1024",
    ];
    for line in lines {
        let cmd = parse_ok(line);
        let rendered = cmd.to_string();
        let again = parse_ok(&rendered);
        assert_eq!(cmd, again, "round-trip of {line:?} via {rendered:?}");
    }
}

#[test]
fn subscription_matchers_compare_on_sources() {
    let a = XeidMatcher::parse("x@y#z").expect("valid");
    let Command::Sub { xeids, .. } = parse_ok("sub x@y#z") else {
        panic!("expected sub");
    };
    assert_eq!(xeids[0], a);
}
