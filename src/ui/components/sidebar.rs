use crate::common::{OnlineStatus, Peer, UserId};

pub fn render(
    peers: &[Peer],
    active: Option<UserId>,
    unread: impl Fn(UserId) -> u32,
) -> Vec<String> {
    if peers.is_empty() {
        return vec!["No peers known yet".to_string()];
    }

    peers
        .iter()
        .map(|peer| {
            let marker = if active == Some(peer.id) { '>' } else { ' ' };
            let dot = if peer.online_status.is_online() { '●' } else { '○' };
            let mut line = format!("{marker} {dot} {} (#{})", peer.display_name, peer.id);
            match unread(peer.id) {
                0 => {}
                count => line.push_str(&format!(" [{count}]")),
            }
            line
        })
        .collect()
}

pub fn presence_line(name: &str, status: OnlineStatus) -> String {
    format!("* {name} is {}", status.label())
}
