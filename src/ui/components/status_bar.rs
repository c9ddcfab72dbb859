use crate::chat::{ViewPhase, ViewState};
use crate::common::UserId;
use crate::error::{ErrorContext, ErrorPresentation, LoadFailure};
use crate::network::ConnectionState;

pub fn render(connection: ConnectionState, view: &ViewState, badge: Option<u32>) -> String {
    let link = match connection {
        ConnectionState::Open => "connected",
        ConnectionState::Connecting => "connecting...",
        ConnectionState::Disconnected => "offline, retrying",
        ConnectionState::Closed => "closed",
    };

    let mut line = format!("[{link}]");
    match (view.phase, view.active_peer) {
        (ViewPhase::NoPeerSelected, _) | (_, None) => line.push_str(" no conversation open"),
        (ViewPhase::Loading, Some(peer)) => line.push_str(&format!(" #{peer} loading...")),
        (ViewPhase::Ready, Some(peer)) => line.push_str(&format!(" #{peer}")),
    }
    if view.active_peer.is_some() && !view.input_enabled {
        line.push_str(" (peer offline, input disabled)");
    }
    if !view.visible {
        line.push_str(" [hidden]");
    }
    if let Some(count) = badge {
        line.push_str(&format!(" unread: {count}"));
    }
    if let Some(failure) = &view.last_error {
        line.push(' ');
        line.push_str(&describe_failure(failure, view.active_peer));
    }
    line
}

/// Error text followed by the command that retries it, when retrying can help.
pub fn describe_failure(failure: &LoadFailure, peer: Option<UserId>) -> String {
    let mut text = match &failure.presentation {
        ErrorPresentation::FullPage { status, message } => format!("error {status}: {message}"),
        ErrorPresentation::Inline { message } => format!("! {message}"),
    };
    if failure.retryable {
        let retry = match (failure.context, peer) {
            (ErrorContext::Navigation, Some(peer)) => format!("/open {peer}"),
            (ErrorContext::Navigation, None) => "/open".to_string(),
            (ErrorContext::Action, _) => "/more".to_string(),
        };
        text.push_str(&format!(" (retry with {retry})"));
    }
    text
}
