use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::platforms::ChatConnection;
use crate::types::{ChatEvent, JoinEvent, MessageEvent, UserIdentity};

type LineWriter = Arc<Mutex<OwnedWriteHalf>>;
type SharedSender = Arc<StdRwLock<Option<broadcast::Sender<ChatEvent>>>>;

/// Configuration for a plain-text IRC connection
#[derive(Debug, Clone)]
pub struct IrcConfig {
    pub server: String,
    pub port: u16,
    pub nick: String,
    pub username: String,
    pub realname: String,
    pub password: Option<String>,
    pub channels: Vec<String>,
}

/// One protocol line split into prefix, command and parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage<'a> {
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: Vec<&'a str>,
}

/// What the reader loop does with an incoming line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcLine {
    Ping(String),
    Welcome,
    NickInUse,
    Event(ChatEvent),
    Other,
}

/// Split a line, skipping any IRCv3 message tags
pub fn parse_raw(line: &str) -> Option<RawMessage<'_>> {
    let mut rest = line.trim_end_matches(['\r', '\n']);

    if rest.starts_with('@') {
        rest = rest.split_once(' ')?.1;
    }
    rest = rest.trim_start();

    let mut prefix = None;
    if let Some(stripped) = rest.strip_prefix(':') {
        let (p, remainder) = stripped.split_once(' ')?;
        prefix = Some(p);
        rest = remainder.trim_start();
    }

    let (command, mut params_part) = match rest.split_once(' ') {
        Some((command, params)) => (command, params),
        None => (rest, ""),
    };
    if command.is_empty() {
        return None;
    }

    let mut params = Vec::new();
    loop {
        params_part = params_part.trim_start_matches(' ');
        if params_part.is_empty() {
            break;
        }
        if let Some(trailing) = params_part.strip_prefix(':') {
            params.push(trailing);
            break;
        }
        match params_part.split_once(' ') {
            Some((param, remainder)) => {
                params.push(param);
                params_part = remainder;
            }
            None => {
                params.push(params_part);
                break;
            }
        }
    }

    Some(RawMessage {
        prefix,
        command,
        params,
    })
}

fn is_channel_name(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

/// Classify an incoming line. Only channel joins and channel messages
/// become events; private messages are ignored.
pub fn parse_line(line: &str) -> IrcLine {
    let Some(raw) = parse_raw(line) else {
        return IrcLine::Other;
    };

    match raw.command.to_ascii_uppercase().as_str() {
        "PING" => IrcLine::Ping(raw.params.first().copied().unwrap_or_default().to_string()),
        "001" => IrcLine::Welcome,
        "433" => IrcLine::NickInUse,
        "JOIN" => {
            let (Some(prefix), Some(channel)) = (raw.prefix, raw.params.first()) else {
                return IrcLine::Other;
            };
            match UserIdentity::parse_prefix(prefix) {
                Some(user) => IrcLine::Event(ChatEvent::Join(JoinEvent {
                    channel: channel.to_string(),
                    user,
                })),
                None => IrcLine::Other,
            }
        }
        "PRIVMSG" => {
            let (Some(prefix), Some(target), Some(text)) =
                (raw.prefix, raw.params.first(), raw.params.get(1))
            else {
                return IrcLine::Other;
            };
            if !is_channel_name(target) {
                return IrcLine::Other;
            }
            match UserIdentity::parse_prefix(prefix) {
                Some(user) => IrcLine::Event(ChatEvent::Message(MessageEvent {
                    channel: target.to_string(),
                    user,
                    text: text.to_string(),
                })),
                None => IrcLine::Other,
            }
        }
        _ => IrcLine::Other,
    }
}

/// Strip line breaks so a parameter cannot smuggle in another command
fn sanitize(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

async fn write_line(writer: &LineWriter, line: &str) -> Result<()> {
    let mut stream = writer.lock().await;
    stream
        .write_all(format!("{}\r\n", line).as_bytes())
        .await
        .context("Failed to write to IRC socket")?;
    debug!("> {}", line);
    Ok(())
}

fn set_sender(shared: &SharedSender, sender: Option<broadcast::Sender<ChatEvent>>) {
    *shared.write().unwrap_or_else(PoisonError::into_inner) = sender;
}

/// IRC connection over plain TCP. The reader task holds the only live event
/// sender, so subscribers see the channel close when the socket does.
pub struct IrcConnection {
    config: IrcConfig,
    event_sender: SharedSender,
    writer: Option<LineWriter>,
    is_connected: Arc<RwLock<bool>>,
}

impl IrcConnection {
    pub fn new(config: IrcConfig) -> Self {
        Self {
            config,
            event_sender: Arc::new(StdRwLock::new(None)),
            writer: None,
            is_connected: Arc::new(RwLock::new(false)),
        }
    }

    async fn send_raw(&self, line: &str) -> Result<()> {
        match &self.writer {
            Some(writer) => write_line(writer, line).await,
            None => Err(anyhow::anyhow!("Not connected to IRC")),
        }
    }
}

#[async_trait]
impl ChatConnection for IrcConnection {
    async fn connect(&mut self) -> Result<()> {
        info!(
            "Connecting to IRC server {}:{} as {}...",
            self.config.server, self.config.port, self.config.nick
        );

        let stream = TcpStream::connect((self.config.server.as_str(), self.config.port))
            .await
            .with_context(|| {
                format!("Failed to connect to {}:{}", self.config.server, self.config.port)
            })?;
        let (read, write) = stream.into_split();
        let writer: LineWriter = Arc::new(Mutex::new(write));
        self.writer = Some(Arc::clone(&writer));

        if let Some(password) = &self.config.password {
            write_line(&writer, &format!("PASS {}", sanitize(password))).await?;
        }
        write_line(&writer, &format!("NICK {}", sanitize(&self.config.nick))).await?;
        write_line(
            &writer,
            &format!(
                "USER {} 0 * :{}",
                sanitize(&self.config.username),
                sanitize(&self.config.realname)
            ),
        )
        .await?;

        let (tx, _) = broadcast::channel(1000);
        set_sender(&self.event_sender, Some(tx.clone()));
        *self.is_connected.write().await = true;

        let shared_sender = Arc::clone(&self.event_sender);
        let is_connected = Arc::clone(&self.is_connected);
        let channels = self.config.channels.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(read);
            let mut buf = Vec::new();
            info!("IRC reader started");

            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => {
                        warn!("IRC server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("IRC read error: {}", e);
                        break;
                    }
                }
                // lines are not guaranteed to be UTF-8
                let line = String::from_utf8_lossy(&buf);
                debug!("< {}", line.trim_end());

                match parse_line(&line) {
                    IrcLine::Ping(token) => {
                        if let Err(e) = write_line(&writer, &format!("PONG :{}", token)).await {
                            error!("Failed to send PONG: {}", e);
                        }
                    }
                    IrcLine::Welcome => {
                        info!("Registered with IRC server");
                        for channel in &channels {
                            match write_line(&writer, &format!("JOIN {}", sanitize(channel))).await {
                                Ok(()) => info!("Joined channel: {}", channel),
                                Err(e) => error!("Failed to join {}: {}", channel, e),
                            }
                        }
                    }
                    IrcLine::NickInUse => {
                        error!("Nick is already in use; choose another nick in the config");
                    }
                    IrcLine::Event(event) => {
                        if tx.send(event).is_err() {
                            debug!("No event subscribers");
                        }
                    }
                    IrcLine::Other => {}
                }
            }

            *is_connected.write().await = false;
            set_sender(&shared_sender, None);
            drop(tx);
            warn!("IRC connection handler exited");
        });

        info!("Connected to {}", self.config.server);
        Ok(())
    }

    async fn set_ban(&self, channel: &str, mask: &str) -> Result<()> {
        self.send_raw(&format!("MODE {} +b {}", sanitize(channel), sanitize(mask)))
            .await
    }

    async fn remove_ban(&self, channel: &str, mask: &str) -> Result<()> {
        self.send_raw(&format!("MODE {} -b {}", sanitize(channel), sanitize(mask)))
            .await
    }

    async fn kick(&self, channel: &str, nick: &str, reason: &str) -> Result<()> {
        self.send_raw(&format!(
            "KICK {} {} :{}",
            sanitize(channel),
            sanitize(nick),
            sanitize(reason)
        ))
        .await
    }

    async fn send_message(&self, target: &str, message: &str) -> Result<()> {
        self.send_raw(&format!("PRIVMSG {} :{}", sanitize(target), sanitize(message)))
            .await
    }

    fn own_nick(&self) -> &str {
        &self.config.nick
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    fn event_receiver(&self) -> Option<broadcast::Receiver<ChatEvent>> {
        self.event_sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|sender| sender.subscribe())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.writer.is_some() {
            if let Err(e) = self.send_raw("QUIT :AutoMod shutting down").await {
                warn!("Failed to send QUIT: {}", e);
            }
        }
        *self.is_connected.write().await = false;
        self.writer = None;
        set_sender(&self.event_sender, None);
        info!("Disconnected from IRC");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn local_config(port: u16) -> IrcConfig {
        IrcConfig {
            server: "127.0.0.1".to_string(),
            port,
            nick: "automod".to_string(),
            username: "automod".to_string(),
            realname: "AutoMod".to_string(),
            password: None,
            channels: vec![],
        }
    }

    #[test]
    fn test_parse_raw_with_tags_and_trailing() {
        let raw = parse_raw("@time=2024 :nick!u@h PRIVMSG #chan :hello there").unwrap();
        assert_eq!(raw.prefix, Some("nick!u@h"));
        assert_eq!(raw.command, "PRIVMSG");
        assert_eq!(raw.params, vec!["#chan", "hello there"]);
    }

    #[test]
    fn test_parse_join_both_forms() {
        for line in [":rambo!~r@host JOIN #Chan", ":rambo!~r@host JOIN :#Chan"] {
            match parse_line(line) {
                IrcLine::Event(ChatEvent::Join(join)) => {
                    assert_eq!(join.channel, "#Chan");
                    assert_eq!(join.user.nick, "rambo");
                    assert_eq!(join.user.ban_mask(), "*!~r@host");
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_channel_message() {
        match parse_line(":troll!t@bad PRIVMSG #help :buy spam now\r\n") {
            IrcLine::Event(ChatEvent::Message(msg)) => {
                assert_eq!(msg.channel, "#help");
                assert_eq!(msg.text, "buy spam now");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_private_message_is_ignored() {
        assert_eq!(parse_line(":troll!t@bad PRIVMSG automod :hi"), IrcLine::Other);
    }

    #[test]
    fn test_ping_and_numerics() {
        assert_eq!(
            parse_line("PING :irc.example.net"),
            IrcLine::Ping("irc.example.net".to_string())
        );
        assert_eq!(
            parse_line(":irc.example.net 001 automod :Welcome"),
            IrcLine::Welcome
        );
        assert_eq!(
            parse_line(":irc.example.net 433 * automod :Nickname is already in use"),
            IrcLine::NickInUse
        );
        assert_eq!(parse_line(""), IrcLine::Other);
    }

    #[test]
    fn test_sanitize_strips_line_breaks() {
        assert_eq!(sanitize("bye\r\nQUIT"), "bye  QUIT");
    }

    #[tokio::test]
    async fn test_actions_fail_when_not_connected() {
        let conn = IrcConnection::new(IrcConfig {
            server: "irc.example.net".to_string(),
            port: 6667,
            nick: "automod".to_string(),
            username: "automod".to_string(),
            realname: "AutoMod".to_string(),
            password: None,
            channels: vec![],
        });
        assert!(conn.set_ban("#chan", "x!*@*").await.is_err());
        assert!(!conn.is_connected().await);
        assert!(conn.event_receiver().is_none());
        assert_eq!(conn.own_nick(), "automod");
    }

    #[tokio::test]
    async fn test_reader_survives_latin1_and_closes_on_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut conn = IrcConnection::new(local_config(port));
        conn.connect().await.unwrap();
        let mut events = conn.event_receiver().unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        server
            .write_all(b":troll!t@bad PRIVMSG #help :caf\xe9\r\n:rambo!r@host JOIN #help\r\n")
            .await
            .unwrap();

        let first = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        match first {
            ChatEvent::Message(msg) => assert_eq!(msg.text, "caf\u{FFFD}"),
            other => panic!("unexpected: {:?}", other),
        }
        let second = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        match second {
            ChatEvent::Join(join) => assert_eq!(join.user.nick, "rambo"),
            other => panic!("unexpected: {:?}", other),
        }

        drop(server);
        let closed = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert!(matches!(closed, Err(broadcast::error::RecvError::Closed)));
        assert!(conn.event_receiver().is_none());
        assert!(!conn.is_connected().await);
    }
}
