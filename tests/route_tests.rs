mod common;

use std::net::Ipv4Addr;

use common::FakeRoutes;
use nx_tunnel::error::RouteError;
use nx_tunnel::route::{parse_route_spec, IpRouteTable, RouteInstaller, RouteTable};

#[test]
fn parses_prefix_length_form() {
    assert_eq!(parse_route_spec("10.0.0.0/24").unwrap().to_string(), "10.0.0.0/24");
}

#[test]
fn normalises_host_bits_to_network_address() {
    assert_eq!(parse_route_spec("10.0.0.77/24").unwrap().to_string(), "10.0.0.0/24");
    assert_eq!(parse_route_spec(" 172.16.5.1/12 ").unwrap().to_string(), "172.16.0.0/12");
}

#[test]
fn parses_netmask_form() {
    assert_eq!(
        parse_route_spec("10.1.0.0/255.255.0.0").unwrap().to_string(),
        "10.1.0.0/16"
    );
}

#[test]
fn bare_address_is_a_host_route() {
    assert_eq!(parse_route_spec("192.168.7.9").unwrap().to_string(), "192.168.7.9/32");
}

#[test]
fn rejects_malformed_specs() {
    for spec in [
        "10.0.0/24",
        "10.0.0.0/33",
        "10.0.0.0/255.0.255.0",
        "fe80::/64",
        "",
        "corp.local",
    ] {
        assert!(
            matches!(parse_route_spec(spec), Err(RouteError::InvalidSpec { .. })),
            "{spec:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn installs_via_gateway() {
    let table = FakeRoutes::default();
    let installer = RouteInstaller::new(table.clone());
    let gw = Ipv4Addr::new(10, 255, 0, 1);

    let net = installer.add("10.0.0.9/24", gw).await.unwrap();

    assert_eq!(net.to_string(), "10.0.0.0/24");
    assert_eq!(table.added(), vec![(net, gw)]);
}

#[tokio::test]
async fn failures_are_collected_not_fatal() {
    let table = FakeRoutes::rejecting("10.2.0.0/16");
    let installer = RouteInstaller::new(table.clone());
    let gw = Ipv4Addr::new(10, 255, 0, 1);

    let report = installer
        .install_all(&["10.0.0.0/24", "10.2.0.0/16", "bogus", "10.3.0.0/16"], gw)
        .await;

    assert_eq!(report.installed.len(), 2);
    assert_eq!(report.failed.len(), 2);
    assert!(matches!(report.failed[0], RouteError::Rejected { gateway, .. } if gateway == gw));
    assert!(matches!(report.failed[1], RouteError::InvalidSpec { .. }));
    assert_eq!(table.added().len(), 2);
}

#[tokio::test]
async fn ip_failure_is_reported_as_rejection() {
    // `false` exits non-zero without touching the routing table
    let installer = RouteInstaller::new(IpRouteTable::with_binary("false"));

    let err = installer
        .add("10.9.0.0/16", Ipv4Addr::new(10, 255, 0, 1))
        .await
        .unwrap_err();

    assert!(matches!(err, RouteError::Rejected { ref reason, .. } if reason.contains("exit status")));
}

#[tokio::test]
async fn missing_ip_binary_is_an_error_not_a_panic() {
    let table = IpRouteTable::with_binary("/nonexistent/ip");

    let err = table
        .add("10.9.0.0/16".parse().unwrap(), Ipv4Addr::new(10, 255, 0, 1))
        .await
        .unwrap_err();

    assert!(!err.is_empty());
}
