//! `ftp:` URL fetcher.
//!
//! Logs in (anonymously unless the URL carries credentials), switches to
//! binary passive mode and streams `RETR` of the URL path. Reports no
//! metadata. The control connection stays open until the transfer's final
//! reply has been read at the end of the body stream.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use url::Url;

use super::{CONNECT_TIMEOUT_SECS, FetchError, FetchResponse, Fetcher};

const DEFAULT_FTP_PORT: u16 = 21;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// Retrieves files named by `ftp:` URLs.
#[derive(Debug, Clone)]
pub struct FtpFetcher {
    connect_timeout: Duration,
}

impl FtpFetcher {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for FtpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(CONNECT_TIMEOUT_SECS))
    }
}

#[async_trait]
impl Fetcher for FtpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let target = FtpTarget::parse(url)?;
        let mut control = Control::connect(url, &target, self.connect_timeout).await?;

        control.expect(&[220]).await?;
        let reply = control.command(&format!("USER {}", target.user)).await?;
        match reply.code {
            230 => {}
            331 | 332 => {
                control
                    .command(&format!("PASS {}", target.password))
                    .await?
                    .require(url, &[230, 202])?;
            }
            _ => return Err(reply.unexpected(url)),
        }
        control.command("TYPE I").await?.require(url, &[200])?;

        let reply = control.command("PASV").await?.require(url, &[227])?;
        let port = passive_port(&reply.text)
            .ok_or_else(|| FetchError::protocol(url, format!("bad PASV reply {:?}", reply.text)))?;
        // The address in the reply is often private; the control peer is reachable.
        let data_addr = SocketAddr::new(control.peer.ip(), port);
        let data = connect(url, data_addr, self.connect_timeout).await?;

        control
            .command(&format!("RETR {}", target.path))
            .await?
            .require(url, &[125, 150])?;
        debug!(path = %target.path, "transfer started");

        let data_url = url.to_owned();
        let data = ReaderStream::new(data)
            .map(move |chunk| chunk.map_err(|e| FetchError::connection(&data_url, e.to_string())));
        let done = stream::once(async move {
            let result = control.expect(&[226, 250]).await;
            // Best effort; the transfer is already complete.
            let _ = control.send("QUIT").await;
            result
        })
        .filter_map(|result| async move { result.err().map(Err) });

        Ok(FetchResponse {
            metadata: None,
            body: data.chain(done).boxed(),
        })
    }
}

/// Connection details taken from an `ftp:` URL.
#[derive(Debug, PartialEq, Eq)]
struct FtpTarget {
    host: String,
    port: u16,
    user: String,
    password: String,
    path: String,
}

impl FtpTarget {
    fn parse(url: &str) -> Result<Self, FetchError> {
        let parsed =
            Url::parse(url).map_err(|e| FetchError::protocol(url, format!("invalid URL: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::protocol(url, "missing host"))?
            .to_owned();
        let decode = |part: &str| {
            urlencoding::decode(part)
                .map(std::borrow::Cow::into_owned)
                .map_err(|e| FetchError::protocol(url, format!("invalid escape: {e}")))
        };

        let user = match parsed.username() {
            "" => ANONYMOUS_USER.to_owned(),
            user => decode(user)?,
        };
        let password = match parsed.password() {
            Some(password) => decode(password)?,
            None => ANONYMOUS_PASSWORD.to_owned(),
        };
        let path = decode(parsed.path())?;
        if path.is_empty() || path == "/" || path.contains(['\r', '\n']) {
            return Err(FetchError::protocol(url, "no file to retrieve"));
        }

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(DEFAULT_FTP_PORT),
            user,
            password,
            path,
        })
    }
}

/// One reply on the control connection.
#[derive(Debug)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn require(self, url: &str, expected: &[u16]) -> Result<Self, FetchError> {
        if expected.contains(&self.code) {
            Ok(self)
        } else {
            Err(self.unexpected(url))
        }
    }

    fn unexpected(&self, url: &str) -> FetchError {
        FetchError::protocol(url, format!("unexpected reply {} {}", self.code, self.text))
    }
}

struct Control {
    url: String,
    stream: BufReader<TcpStream>,
    peer: SocketAddr,
}

impl Control {
    async fn connect(url: &str, target: &FtpTarget, timeout: Duration) -> Result<Self, FetchError> {
        let address = (target.host.as_str(), target.port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| FetchError::connection(url, "connect timed out"))?
            .map_err(|e| FetchError::connection(url, e.to_string()))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| FetchError::connection(url, e.to_string()))?;
        Ok(Self {
            url: url.to_owned(),
            stream: BufReader::new(stream),
            peer,
        })
    }

    async fn send(&mut self, command: &str) -> Result<(), FetchError> {
        let line = format!("{command}\r\n");
        self.stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FetchError::connection(&self.url, e.to_string()))
    }

    async fn command(&mut self, command: &str) -> Result<Reply, FetchError> {
        self.send(command).await?;
        self.read_reply().await
    }

    async fn expect(&mut self, expected: &[u16]) -> Result<Reply, FetchError> {
        let url = self.url.clone();
        self.read_reply().await?.require(&url, expected)
    }

    /// Reads one reply, following `123-` continuation lines to the final `123 ` line.
    async fn read_reply(&mut self) -> Result<Reply, FetchError> {
        let first = self.read_line().await?;
        let code = reply_code(&first)
            .ok_or_else(|| FetchError::protocol(&self.url, format!("bad reply {first:?}")))?;
        let mut text = first.get(4..).unwrap_or_default().to_owned();

        if first.as_bytes().get(3) == Some(&b'-') {
            let last_prefix = format!("{code} ");
            loop {
                let line = self.read_line().await?;
                if let Some(rest) = line.strip_prefix(&last_prefix) {
                    text = rest.to_owned();
                    break;
                }
            }
        }
        Ok(Reply { code, text })
    }

    async fn read_line(&mut self) -> Result<String, FetchError> {
        let mut line = String::new();
        let read = self
            .stream
            .read_line(&mut line)
            .await
            .map_err(|e| FetchError::connection(&self.url, e.to_string()))?;
        if read == 0 {
            return Err(FetchError::connection(&self.url, "control connection closed"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }
}

async fn connect(url: &str, address: SocketAddr, timeout: Duration) -> Result<TcpStream, FetchError> {
    tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| FetchError::connection(url, "data connection timed out"))?
        .map_err(|e| FetchError::connection(url, e.to_string()))
}

fn reply_code(line: &str) -> Option<u16> {
    let digits = line.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn passive_port(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = start + text[start..].find(')')?;
    let numbers: Vec<u16> = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse().ok())
        .collect::<Option<_>>()?;
    match numbers.as_slice() {
        [_, _, _, _, high, low] if *high <= 255 && *low <= 255 => Some(high * 256 + low),
        _ => None,
    }
}
