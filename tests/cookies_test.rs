mod common;

use common::{ok, runner, seen, serve};
use probenet::config::Preferences;
use probenet::interpolate::VariableScopes;
use probenet::request::PreparedRequest;
use tokio_util::sync::CancellationToken;
use url::Url;

#[tokio::test]
async fn test_cookie_set_on_redirect_is_sent_on_next_hop() {
    let (addr, log) = serve(|req, _| {
        if req.request_line().starts_with("get /login") {
            "HTTP/1.1 302 Found\r\nSet-Cookie: sid=xyz; Path=/; HttpOnly\r\nLocation: /home\r\nContent-Length: 0\r\n\r\n"
                .to_string()
        } else {
            ok("home")
        }
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path(), Preferences::default());

    runner
        .execute(
            PreparedRequest::new("GET", format!("http://{}/login", addr)),
            VariableScopes::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let seen = seen(&log);
    assert!(seen[0].header("cookie").is_none());
    assert_eq!(seen[1].header("cookie").as_deref(), Some("sid=xyz"));

    let url = Url::parse(&format!("http://{}/", addr)).unwrap();
    assert_eq!(runner.cookies().get_cookie_string_for_url(&url), "sid=xyz");
}

#[tokio::test]
async fn test_user_cookie_merged_with_jar() {
    let (addr, log) = serve(|_, _| ok("ok")).await;
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path(), Preferences::default());
    let url = Url::parse(&format!("http://{}/", addr)).unwrap();
    runner.cookies().store_set_cookie(&url, "jar=1; Path=/");

    let mut request = PreparedRequest::new("GET", format!("http://{}/", addr));
    request.headers.set("Cookie", "mine=2");
    runner
        .execute(request, VariableScopes::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(seen(&log)[0].header("cookie").as_deref(), Some("mine=2; jar=1"));
}

#[tokio::test]
async fn test_store_cookies_disabled() {
    let (addr, _log) = serve(|_, _| {
        "HTTP/1.1 200 OK\r\nSet-Cookie: a=b\r\nContent-Length: 0\r\n\r\n".to_string()
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mut prefs = Preferences::default();
    prefs.request.store_cookies = false;
    let runner = runner(dir.path(), prefs);

    runner
        .execute(
            PreparedRequest::new("GET", format!("http://{}/", addr)),
            VariableScopes::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let url = Url::parse(&format!("http://{}/", addr)).unwrap();
    assert_eq!(runner.cookies().get_cookie_string_for_url(&url), "");
}

#[tokio::test]
async fn test_send_cookies_disabled() {
    let (addr, log) = serve(|_, _| ok("ok")).await;
    let dir = tempfile::tempdir().unwrap();
    let mut prefs = Preferences::default();
    prefs.request.send_cookies = false;
    let runner = runner(dir.path(), prefs);
    let url = Url::parse(&format!("http://{}/", addr)).unwrap();
    runner.cookies().store_set_cookie(&url, "jar=1");

    runner
        .execute(
            PreparedRequest::new("GET", format!("http://{}/", addr)),
            VariableScopes::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(seen(&log)[0].header("cookie").is_none());
}
