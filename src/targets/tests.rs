use std::net::Ipv4Addr;

use proptest::prelude::*;

use super::{AddressRange, OctetSpan, TargetError, Targets};

fn addrs(targets: &Targets) -> Vec<Ipv4Addr> {
    targets.iter().collect()
}

#[test]
fn single_address_range_yields_one_address() {
    let range: AddressRange = "1.1.1.1-1.1.1.1".parse().expect("range parses");
    let targets = Targets::from(range);
    assert_eq!(targets.count(), 1);
    assert_eq!(addrs(&targets), vec![Ipv4Addr::new(1, 1, 1, 1)]);
}

#[test]
fn plain_address_parses_as_single() {
    let range: AddressRange = "192.0.2.7".parse().expect("range parses");
    assert_eq!(range, AddressRange::single(Ipv4Addr::new(192, 0, 2, 7)));
}

#[test]
fn small_range_walks_last_octet() {
    let range: AddressRange = "10.0.0.1-10.0.0.4".parse().expect("range parses");
    let targets = Targets::from(range);
    assert_eq!(targets.count(), 4);
    assert_eq!(
        addrs(&targets),
        vec![
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 3),
            Ipv4Addr::new(10, 0, 0, 4),
        ]
    );
}

#[test]
fn fourth_octet_varies_fastest() {
    let range: AddressRange = "10.0.0.1-10.0.1.2".parse().expect("range parses");
    let got: Vec<Ipv4Addr> = range.iter().collect();
    assert_eq!(
        got,
        vec![
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 1, 1),
            Ipv4Addr::new(10, 0, 1, 2),
        ]
    );
}

#[test]
fn wildcard_octet_defaults_to_full_span() {
    let range: AddressRange = "10.0.*.5".parse().expect("pattern parses");
    assert_eq!(range.spans()[2], OctetSpan::FULL);
    assert_eq!(range.count(), 255);
    assert_eq!(range.nth_address(0), Some(Ipv4Addr::new(10, 0, 1, 5)));
    assert_eq!(range.nth_address(254), Some(Ipv4Addr::new(10, 0, 255, 5)));
    assert_eq!(range.nth_address(255), None);
}

#[test]
fn per_octet_pattern_with_span() {
    let range: AddressRange = "172.16.0-1.10-12".parse().expect("pattern parses");
    assert_eq!(range.count(), 6);
    assert_eq!(range.to_string(), "172.16.0-1.10-12");
}

#[test]
fn descending_octet_is_rejected() {
    let err = "10.0.0.200-10.0.1.5"
        .parse::<AddressRange>()
        .expect_err("descending span must fail");
    assert_eq!(
        err,
        TargetError::DescendingSpan {
            position: 4,
            lo: 200,
            hi: 5
        }
    );
}

#[test]
fn malformed_inputs_are_rejected() {
    assert!(matches!(
        "".parse::<AddressRange>(),
        Err(TargetError::Empty)
    ));
    assert!(matches!(
        "10.0.0".parse::<AddressRange>(),
        Err(TargetError::OctetCount { .. })
    ));
    assert!(matches!(
        "10.0.0.300".parse::<AddressRange>(),
        Err(TargetError::InvalidOctet { .. })
    ));
}

#[test]
fn unbounded_range_is_flagged() {
    let range = AddressRange::unbounded();
    assert!(range.is_unbounded());
    assert_eq!(range.count(), 255u64.pow(4));
    assert!(Targets::from(range).is_unbounded());
    assert!(!Targets::from(AddressRange::single(Ipv4Addr::LOCALHOST)).is_unbounded());
}

#[test]
fn iterator_is_restartable() {
    let targets = Targets::from("10.1.1-2.1-3".parse::<AddressRange>().expect("parses"));
    let mut iter = targets.iter();
    iter.next();
    iter.next();
    assert_eq!(addrs(&targets), addrs(&targets));
    assert_eq!(targets.iter().next(), Some(Ipv4Addr::new(10, 1, 1, 1)));
}

#[test]
fn size_hint_is_exact() {
    let range: AddressRange = "10.0.0.1-10.0.0.9".parse().expect("parses");
    let mut iter = range.iter();
    assert_eq!(iter.size_hint(), (9, Some(9)));
    iter.next();
    assert_eq!(iter.size_hint(), (8, Some(8)));
}

#[test]
fn address_list_parsing() {
    let text = "# lab hosts\n192.0.2.1\n\n192.0.2.9  # mx\n";
    let targets = Targets::parse_list(text).expect("list parses");
    assert_eq!(targets.count(), 2);
    assert_eq!(
        addrs(&targets),
        vec![Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 9)]
    );
}

#[test]
fn address_list_reports_bad_line() {
    let err = Targets::parse_list("192.0.2.1\nmail.example\n").expect_err("should fail");
    assert_eq!(
        err,
        TargetError::InvalidListEntry {
            line: 2,
            value: "mail.example".to_string()
        }
    );
    assert_eq!(
        Targets::parse_list("# nothing\n").expect_err("empty"),
        TargetError::EmptyList
    );
}

fn span_strategy() -> impl Strategy<Value = OctetSpan> {
    (0u8..=255, 0u8..4).prop_map(|(lo, width)| OctetSpan::new(lo, lo.saturating_add(width)))
}

proptest! {
    #[test]
    fn count_matches_enumeration(spans in prop::array::uniform4(span_strategy())) {
        let range = AddressRange::from_spans(spans).expect("ascending spans");
        let all: Vec<Ipv4Addr> = range.iter().collect();
        prop_assert_eq!(all.len() as u64, range.count());
    }

    #[test]
    fn enumeration_is_strictly_ascending_and_repeatable(
        spans in prop::array::uniform4(span_strategy())
    ) {
        let range = AddressRange::from_spans(spans).expect("ascending spans");
        let first: Vec<u32> = range.iter().map(u32::from).collect();
        let second: Vec<u32> = range.iter().map(u32::from).collect();
        prop_assert_eq!(&first, &second);
        prop_assert!(first.windows(2).all(|w| w[0] < w[1]));
    }
}
