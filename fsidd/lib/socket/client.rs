use std::path::Path;

use crate::{FsiddError, FsiddResult};

use super::{SeqpacketStream, PACKET_MAX_LENGTH};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A response from the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A `+` response carrying the result, which may be empty.
    Ok(String),

    /// A `-` response carrying the error message.
    Err(String),
}

/// A connection to the daemon.
///
/// Requests are sent one at a time, each waiting for its response.
#[derive(Debug)]
pub struct Client {
    stream: SeqpacketStream,
    buf: Vec<u8>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Client {
    /// Connects to the daemon listening at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> FsiddResult<Self> {
        Ok(Self::from_stream(SeqpacketStream::connect(path).await?))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: SeqpacketStream) -> Self {
        Self {
            stream,
            // a response echoes at most one path
            buf: vec![0u8; PACKET_MAX_LENGTH + 2],
        }
    }

    /// Sends a raw request line and waits for the response.
    pub async fn request(&mut self, line: &str) -> FsiddResult<Response> {
        let written = self.stream.send(line.as_bytes()).await?;
        if written < line.len() {
            return Err(FsiddError::ShortWrite);
        }

        let n = self.stream.recv(&mut self.buf).await?;
        if n == 0 {
            return Err(FsiddError::ServerClosed);
        }

        Response::parse(&String::from_utf8_lossy(&self.buf[..n]))
    }

    /// Looks up the fsid of `path`. `None` means the path has no fsid yet.
    pub async fn get_fsidnum(&mut self, path: &str) -> FsiddResult<Option<i32>> {
        let value = self.call(&format!("get_fsidnum {path}")).await?;
        if value.is_empty() {
            return Ok(None);
        }

        parse_fsid(&value).map(Some)
    }

    /// Returns the fsid of `path`, allocating one if needed.
    pub async fn get_or_create_fsidnum(&mut self, path: &str) -> FsiddResult<i32> {
        let value = self.call(&format!("get_or_create_fsidnum {path}")).await?;
        parse_fsid(&value)
    }

    /// Looks up the path `fsid` was allocated to.
    pub async fn get_path(&mut self, fsid: i32) -> FsiddResult<Option<String>> {
        let value = self.call(&format!("get_path {fsid}")).await?;
        Ok((!value.is_empty()).then_some(value))
    }

    /// Returns the protocol version the daemon speaks.
    pub async fn version(&mut self) -> FsiddResult<String> {
        self.call("version").await
    }

    async fn call(&mut self, line: &str) -> FsiddResult<String> {
        self.request(line).await?.into_result()
    }
}

impl Response {
    /// Parses a response message.
    pub fn parse(message: &str) -> FsiddResult<Self> {
        if let Some(value) = message.strip_prefix("+ ") {
            return Ok(Response::Ok(value.to_string()));
        }
        if let Some(error) = message.strip_prefix("- ") {
            return Ok(Response::Err(error.to_string()));
        }

        match message {
            "+" => Ok(Response::Ok(String::new())),
            "-" => Ok(Response::Err(String::new())),
            _ => Err(FsiddError::UnexpectedResponse(message.to_string())),
        }
    }

    /// Returns `true` for a `+` response.
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }

    /// Converts the response into a result, turning a `-` response into
    /// [`FsiddError::Remote`].
    pub fn into_result(self) -> FsiddResult<String> {
        match self {
            Response::Ok(value) => Ok(value),
            Response::Err(message) => Err(FsiddError::Remote(message)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn parse_fsid(value: &str) -> FsiddResult<i32> {
    value
        .parse()
        .map_err(|_| FsiddError::UnexpectedResponse(value.to_string()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
