/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Peers,
    Open(String),
    More,
    Read,
    Hide,
    Show,
    Retry(String),
    Quit,
    Send(String),
    Unknown(String),
}

pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::Send(line.to_string()));
    }

    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    let command = match name {
        "/peers" => Command::Peers,
        "/open" => Command::Open(arg.to_string()),
        "/more" => Command::More,
        "/read" => Command::Read,
        "/hide" => Command::Hide,
        "/show" => Command::Show,
        "/retry" => Command::Retry(arg.to_string()),
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

pub const HELP: &str = "/peers  /open <id>  /more  /read  /hide  /show  /retry <local-id>  /quit";
