use crate::base::neterror::{ErrorKind, NetError};

#[test]
fn test_net_error_codes() {
    assert_eq!(NetError::ConnectionRefused.as_i32(), -102);
    assert_eq!(NetError::TooManyRedirects(5).as_i32(), -310);
    assert_eq!(NetError::invalid_url().as_i32(), -300);
}

#[test]
fn test_error_kinds() {
    assert_eq!(NetError::ConnectionRefused.kind(), ErrorKind::Transport);
    assert_eq!(NetError::SslProtocolError.kind(), ErrorKind::Transport);
    assert_eq!(NetError::TooManyRedirects(5).kind(), ErrorKind::Policy);
    assert_eq!(NetError::OAuth2("boom".into()).kind(), ErrorKind::Credential);
    assert_eq!(NetError::Cancelled.kind(), ErrorKind::Cancellation);
    assert_eq!(NetError::WsQueueFull.kind(), ErrorKind::Resource);
}

#[test]
fn test_invalid_url_message() {
    assert_eq!(NetError::invalid_url().to_string(), "Invalid URL format");
}

#[test]
fn test_io_conversion() {
    let err: NetError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
    assert_eq!(err, NetError::ConnectionTimedOut);
}
