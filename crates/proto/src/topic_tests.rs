// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn space() -> TopicSpace {
    TopicSpace::new("herd")
}

#[test]
fn builds_device_topics() {
    let t = space();
    assert_eq!(
        t.device("0123abcd", "prusa-CZPX1234", DeviceChannel::State),
        "herd/clients/0123abcd/prusa-CZPX1234/state"
    );
    assert_eq!(
        t.device("0123abcd", "prusa-CZPX1234", DeviceChannel::PrintResponse),
        "herd/clients/0123abcd/prusa-CZPX1234/print_response"
    );
    assert_eq!(t.aliases("0123abcd"), "herd/aliases/0123abcd");
    assert_eq!(t.aliases_set("0123abcd"), "herd/aliases/0123abcd/set");
}

#[test]
fn builds_subscription_patterns() {
    let t = space();
    assert_eq!(t.any_device(DeviceChannel::State), "herd/clients/+/+/state");
    assert_eq!(t.any_aliases(), "herd/aliases/+");
    assert_eq!(t.own_print_requests("id1"), "herd/clients/id1/+/print_request");
}

#[yare::parameterized(
    state = { "herd/clients/p1/dev-1/state", Some(ParsedTopic::Device {
        provider: "p1".into(), device: "dev-1".into(), channel: DeviceChannel::State }) },
    print_request = { "herd/clients/p1/dev-1/print_request", Some(ParsedTopic::Device {
        provider: "p1".into(), device: "dev-1".into(), channel: DeviceChannel::PrintRequest }) },
    aliases = { "herd/aliases/p1", Some(ParsedTopic::Aliases { provider: "p1".into() }) },
    aliases_set = { "herd/aliases/p1/set", Some(ParsedTopic::AliasesSet { provider: "p1".into() }) },
    wrong_prefix = { "other/clients/p1/dev-1/state", None },
    unknown_channel = { "herd/clients/p1/dev-1/bogus", None },
    extra_segment = { "herd/clients/p1/dev-1/state/x", None },
    missing_device = { "herd/clients/p1", None },
    empty_provider = { "herd/clients//dev-1/state", None },
    aliases_extra = { "herd/aliases/p1/set/x", None },
    bare_prefix = { "herd", None },
)]
fn parses(topic: &str, expected: Option<ParsedTopic>) {
    assert_eq!(space().parse(topic), expected);
}

#[test]
fn round_trips_through_parse() {
    let t = space();
    let topic = t.device("provider9", "prusa-X", DeviceChannel::SensorReadings);
    assert_eq!(
        t.parse(&topic),
        Some(ParsedTopic::Device {
            provider: "provider9".into(),
            device: "prusa-X".into(),
            channel: DeviceChannel::SensorReadings,
        })
    );
}
