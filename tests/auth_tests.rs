mod common;

use common::{error_response, ok_response, FakeTransport, SESSION_BODY};
use nx_tunnel::auth::AuthenticationClient;
use nx_tunnel::error::{AuthError, NegotiationError};
use nx_tunnel::Credentials;

fn creds() -> Credentials {
    Credentials {
        username: "alice".into(),
        password: "s3cret".into(),
        domain: "LocalDomain".into(),
    }
}

fn pair(k: &str, v: &str) -> (String, String) {
    (k.to_string(), v.to_string())
}

#[tokio::test]
async fn login_posts_form_with_session_prompt_header() {
    let transport = FakeTransport::new(ok_response(""), ok_response(SESSION_BODY));
    let client = AuthenticationClient::new(transport.clone());

    client.login(&creds()).await.unwrap();

    let reqs = transport.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].method, "POST");
    assert_eq!(reqs[0].path, "/cgi-bin/userLogin");
    assert_eq!(
        reqs[0].params,
        vec![
            pair("username", "alice"),
            pair("password", "s3cret"),
            pair("domain", "LocalDomain"),
            pair("login", "true"),
        ]
    );
    assert_eq!(reqs[0].headers, vec![pair("X-NE-SESSIONPROMPT", "true")]);
}

#[tokio::test]
async fn error_header_fails_login_despite_http_200() {
    let transport = FakeTransport::new(
        error_response("X-NE-Message", "Invalid credentials"),
        ok_response(SESSION_BODY),
    );
    let client = AuthenticationClient::new(transport);

    let err = client.login(&creds()).await.unwrap_err();

    assert!(matches!(&err, AuthError::Server(msg) if msg == "Invalid credentials"));
    assert_eq!(err.to_string(), "Server returned error: Invalid credentials");
}

#[tokio::test]
async fn lower_case_error_header_is_honoured() {
    let transport = FakeTransport::new(
        error_response("X-NE-message", "Account locked"),
        ok_response(SESSION_BODY),
    );
    let client = AuthenticationClient::new(transport);

    let err = client.login(&creds()).await.unwrap_err();

    assert!(matches!(err, AuthError::Server(msg) if msg == "Account locked"));
}

#[tokio::test]
async fn negotiate_sends_capabilities_and_parses_body() {
    let transport = FakeTransport::new(ok_response(""), ok_response(SESSION_BODY));
    let client = AuthenticationClient::new(transport.clone());

    let params = client.negotiate().await.unwrap();

    let req = &transport.requests()[0];
    assert_eq!(req.method, "GET");
    assert_eq!(req.path, "/cgi-bin/sslvpnclient");
    assert_eq!(
        req.params,
        vec![
            pair("launchplatform", "mac"),
            pair("neProto", "3"),
            pair("supportipv6", "no"),
        ]
    );
    assert_eq!(params.option("SessionId"), Some("abc123"));
    assert_eq!(params.distinct_routes(), vec!["10.0.0.0/24", "10.1.0.0/255.255.0.0"]);
    assert_eq!(params.nameservers, vec!["10.0.0.1", "10.0.0.2"]);
}

#[tokio::test]
async fn negotiate_reports_server_error() {
    let transport = FakeTransport::new(
        ok_response(""),
        error_response("X-NE-Message", "No IP addresses available"),
    );
    let client = AuthenticationClient::new(transport);

    let err = client.negotiate().await.unwrap_err();

    assert!(matches!(err, NegotiationError::Server(msg) if msg == "No IP addresses available"));
}

#[tokio::test]
async fn negotiate_rejects_response_without_parameters() {
    let transport = FakeTransport::new(ok_response(""), ok_response("<html>\n</html>\n"));
    let client = AuthenticationClient::new(transport);

    assert!(matches!(client.negotiate().await, Err(NegotiationError::Empty)));
}

#[tokio::test]
async fn logout_swallows_transport_failures() {
    let transport =
        FakeTransport::new(ok_response(""), ok_response(SESSION_BODY)).failing_logout();
    let client = AuthenticationClient::new(transport.clone());

    client.logout().await;

    assert_eq!(transport.paths(), vec!["/cgi-bin/userLogout"]);
}
